use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::modules::session::model::Role;

#[derive(Debug, Serialize, Validate)]
pub struct CreateSessionRequest {
    #[validate(length(min = 1, max = 100, message = "Title must be 1-100 characters"))]
    pub title: String,
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct RenameSessionRequest {
    pub title: String,
}

/// Row payload for `messages`; id and timestamp are assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewMessage {
    pub session_id: String,
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}
