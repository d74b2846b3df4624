use async_trait::async_trait;
use thiserror::Error;

use crate::modules::session::{
    model::{Message, Session},
    schema::{AuthUser, CreateSessionRequest, NewMessage},
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Store error ({status}): {message}")]
    ApiError { status: u16, message: String },
    #[error("Not signed in")]
    Unauthenticated,
    #[error("Not found")]
    NotFound,
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Auth and row storage. Implementations enforce owner scoping; callers pass
/// the owner id on every session mutation and treat the store's answer as final.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, StoreError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, StoreError>;

    async fn sign_out(&self) -> Result<(), StoreError>;

    async fn current_user(&self) -> Result<Option<AuthUser>, StoreError>;

    /// The owner's sessions, newest first.
    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>, StoreError>;

    async fn create_session(&self, request: CreateSessionRequest) -> Result<Session, StoreError>;

    async fn rename_session(&self, session_id: &str, user_id: &str, title: &str) -> Result<(), StoreError>;

    /// Deleting a session also removes its messages.
    async fn delete_session(&self, session_id: &str, user_id: &str) -> Result<(), StoreError>;

    /// Messages of a session in conversation order.
    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError>;

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError>;
}
