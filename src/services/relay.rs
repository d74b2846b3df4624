use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use std::pin::Pin;
use thiserror::Error;

use crate::modules::chat::schema::ChatRequest;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Relay returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Stream interrupted: {0}")]
    Interrupted(String),
}

/// Raw response body chunks; fragment boundaries carry no meaning.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, RelayError>> + Send>>;

#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn open(&self, request: &ChatRequest) -> Result<ByteStream, RelayError>;
}

#[derive(Clone)]
pub struct HttpRelay {
    client: Client,
    endpoint: String,
}

impl HttpRelay {
    pub fn new(relay_url: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: format!("{}/chat", relay_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl RelayTransport for HttpRelay {
    async fn open(&self, request: &ChatRequest) -> Result<ByteStream, RelayError> {
        let response = self.client.post(&self.endpoint).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RelayError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(Box::pin(response.bytes_stream().map(|chunk| chunk.map_err(RelayError::from))))
    }
}
