pub mod client;
pub mod relay;
