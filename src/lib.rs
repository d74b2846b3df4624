use std::sync::Arc;

use crate::config::relay::RelayConfig;
use crate::services::llm::Generator;

pub mod client;
pub mod config;
pub mod modules;
pub mod services;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    /// `None` when no generation credential is configured.
    pub generator: Option<Arc<dyn Generator>>,
}
