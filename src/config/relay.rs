use std::env;
use std::str::FromStr;

pub const DEFAULT_MODEL: &str = "gemini-1.5-pro";
pub const DEFAULT_TEMPERATURE: f32 = 0.8;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

/// Relay settings read from the environment.
///
/// The credential is optional here: a relay without one still starts and
/// answers every chat request with a 500.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub default_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub bind_addr: String,
}

impl RelayConfig {
    pub fn from_env() -> Self {
        let api_key = env::var("GOOGLE_API_KEY")
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        let default_model = env::var("GEMINI_MODEL")
            .ok()
            .map(|model| model.trim().to_string())
            .filter(|model| !model.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Self {
            api_key,
            base_url: env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            default_model,
            temperature: parse_or("GEMINI_TEMP", env::var("GEMINI_TEMP").ok(), DEFAULT_TEMPERATURE),
            max_tokens: parse_or(
                "GEMINI_MAX_TOKENS",
                env::var("GEMINI_MAX_TOKENS").ok(),
                DEFAULT_MAX_TOKENS,
            ),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
        }
    }
}

fn parse_or<T>(name: &str, raw: Option<String>, fallback: T) -> T
where
    T: FromStr + Copy,
{
    match raw {
        None => fallback,
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!(variable = name, value = %value, "ignoring unparseable value, using default");
                fallback
            }
        },
    }
}
