use std::env;
use thiserror::Error;

pub const DEFAULT_RELAY_URL: &str = "http://localhost:3000";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Where the reconciler finds the relay and the backing store.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub relay_url: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let relay_url = env::var("SHIMA_RELAY_URL").unwrap_or_else(|_| DEFAULT_RELAY_URL.to_string());
        let supabase_url = required("SUPABASE_URL")?;
        let supabase_anon_key = required("SUPABASE_ANON_KEY")?;

        Ok(Self {
            relay_url: relay_url.trim_end_matches('/').to_string(),
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            supabase_anon_key,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}
