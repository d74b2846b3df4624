use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Shown wherever a session has no title of its own.
pub const DEFAULT_SESSION_TITLE: &str = "新しいチャット";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A chat thread row.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub title: Option<String>,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(DEFAULT_SESSION_TITLE)
    }
}

/// One turn of a session.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(session_id: String, role: Role, content: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id,
            role,
            content,
            created_at: Utc::now(),
        }
    }

    pub fn user(session_id: String, content: String) -> Self {
        Self::new(session_id, Role::User, content)
    }
}

/// Conversation order: creation time, ties broken by id.
pub fn sort_messages(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// Sidebar order: newest first.
pub fn sort_sessions(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}
