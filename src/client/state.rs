use chrono::Utc;
use std::collections::HashMap;
use thiserror::Error;

use crate::modules::chat::schema::{AiModel, Turn};
use crate::modules::session::{
    model::{sort_sessions, Message, Role, Session},
    schema::AuthUser,
};

/// Shown in place of a reply whose stream failed. Never persisted.
pub const STREAM_ERROR_TEXT: &str = "エラーが発生しました。もう一度送信してください。";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// Loaded from the store.
    Stored,
    /// Written locally: an optimistic user turn or a finished reply.
    Local,
    /// Placeholder for a reply that is still streaming.
    Pending,
    /// Placeholder whose stream failed.
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub message: Message,
    pub status: EntryStatus,
}

impl Entry {
    fn stored(message: Message) -> Self {
        Self {
            message,
            status: EntryStatus::Stored,
        }
    }

    fn is_history(&self) -> bool {
        matches!(self.status, EntryStatus::Stored | EntryStatus::Local) && !self.message.content.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
}

/// Progress of the one send a session may have in flight.
#[derive(Debug, Clone, PartialEq)]
pub enum SendState {
    Idle,
    Sending,
    Streaming { temp_id: String, buffer: String },
    Settled(Outcome),
}

impl SendState {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SendState::Sending | SendState::Streaming { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendRejected {
    #[error("No session selected")]
    NoSession,
    #[error("Nothing to send")]
    EmptyInput,
    #[error("A reply is still streaming in this session")]
    InFlight,
}

/// What a send needs after the state lock is released.
#[derive(Debug, Clone)]
pub struct SendTicket {
    pub session_id: String,
    pub user_message: Message,
    pub history: Vec<Turn>,
    pub model: AiModel,
}

/// Everything the front end renders, owned by one signed-in user.
#[derive(Debug, Clone, Default)]
pub struct ClientState {
    pub user: Option<AuthUser>,
    pub sessions: Vec<Session>,
    pub selected: Option<String>,
    /// Messages of the selected session only.
    pub messages: Vec<Entry>,
    pub draft: String,
    pub model: AiModel,
    sends: HashMap<String, SendState>,
    /// Finished replies not yet seen in a load, by session.
    settled_replies: HashMap<String, Message>,
}

impl ClientState {
    pub fn send_state(&self, session_id: &str) -> SendState {
        self.sends.get(session_id).cloned().unwrap_or(SendState::Idle)
    }

    /// Whether the send affordance should be enabled.
    pub fn can_send(&self) -> bool {
        match &self.selected {
            Some(id) => !self.send_state(id).is_in_flight(),
            None => false,
        }
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.selected.as_deref() == Some(session_id)
    }

    /// Idle → Sending: appends the user turn and clears the draft.
    pub fn begin_send(&mut self) -> Result<SendTicket, SendRejected> {
        let session_id = self.selected.clone().ok_or(SendRejected::NoSession)?;
        if self.draft.trim().is_empty() {
            return Err(SendRejected::EmptyInput);
        }
        if self.send_state(&session_id).is_in_flight() {
            return Err(SendRejected::InFlight);
        }

        let user_message = Message::user(session_id.clone(), std::mem::take(&mut self.draft));
        self.messages.push(Entry {
            message: user_message.clone(),
            status: EntryStatus::Local,
        });

        let history = self
            .messages
            .iter()
            .filter(|entry| entry.is_history())
            .map(|entry| Turn {
                role: entry.message.role,
                content: entry.message.content.clone(),
            })
            .collect();

        self.sends.insert(session_id.clone(), SendState::Sending);
        self.settled_replies.remove(&session_id);

        Ok(SendTicket {
            session_id,
            user_message,
            history,
            model: self.model,
        })
    }

    /// Sending → Streaming: inserts the placeholder and returns its temp id.
    /// `None` when the send was dropped meanwhile (its session was deleted).
    pub fn open_stream(&mut self, session_id: &str) -> Option<String> {
        if self.sends.get(session_id) != Some(&SendState::Sending) {
            return None;
        }

        let temp_id = format!("pending-{}", uuid::Uuid::new_v4());
        if self.is_active(session_id) {
            self.messages.push(Entry {
                message: Message {
                    id: temp_id.clone(),
                    session_id: session_id.to_string(),
                    role: Role::Assistant,
                    content: String::new(),
                    created_at: Utc::now(),
                },
                status: EntryStatus::Pending,
            });
        }

        self.sends.insert(
            session_id.to_string(),
            SendState::Streaming {
                temp_id: temp_id.clone(),
                buffer: String::new(),
            },
        );
        Some(temp_id)
    }

    /// Appends decoded text to the buffer and mirrors it into the placeholder.
    /// Returns whether the visible list changed.
    pub fn apply_text(&mut self, session_id: &str, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }

        let (temp_id, content) = match self.sends.get_mut(session_id) {
            Some(SendState::Streaming { temp_id, buffer }) => {
                buffer.push_str(text);
                (temp_id.clone(), buffer.clone())
            }
            _ => return false,
        };

        self.replace_placeholder(session_id, &temp_id, content, EntryStatus::Pending)
    }

    /// The accumulated reply of a streaming send.
    pub fn buffer(&self, session_id: &str) -> Option<&str> {
        match self.sends.get(session_id) {
            Some(SendState::Streaming { buffer, .. }) => Some(buffer.as_str()),
            _ => None,
        }
    }

    /// Streaming → Settled(Success). The placeholder keeps its temp id.
    pub fn settle_success(&mut self, session_id: &str) -> bool {
        let (temp_id, buffer) = match self.sends.get(session_id) {
            Some(SendState::Streaming { temp_id, buffer }) => (temp_id.clone(), buffer.clone()),
            _ => return false,
        };

        self.sends
            .insert(session_id.to_string(), SendState::Settled(Outcome::Success));
        if !buffer.is_empty() {
            self.settled_replies.insert(
                session_id.to_string(),
                Message {
                    id: temp_id.clone(),
                    session_id: session_id.to_string(),
                    role: Role::Assistant,
                    content: buffer.clone(),
                    created_at: Utc::now(),
                },
            );
        }
        self.replace_placeholder(session_id, &temp_id, buffer, EntryStatus::Local)
    }

    /// Sending/Streaming → Settled(Error). Swaps the placeholder for the error marker.
    pub fn settle_error(&mut self, session_id: &str) -> bool {
        let temp_id = match self.sends.get(session_id) {
            Some(SendState::Streaming { temp_id, .. }) => Some(temp_id.clone()),
            Some(SendState::Sending) => None,
            _ => return false,
        };

        self.sends
            .insert(session_id.to_string(), SendState::Settled(Outcome::Error));
        match temp_id {
            Some(temp_id) => self.replace_placeholder(
                session_id,
                &temp_id,
                STREAM_ERROR_TEXT.to_string(),
                EntryStatus::Failed,
            ),
            None => false,
        }
    }

    fn replace_placeholder(&mut self, session_id: &str, temp_id: &str, content: String, status: EntryStatus) -> bool {
        if !self.is_active(session_id) {
            return false;
        }

        match self
            .messages
            .iter_mut()
            .find(|entry| entry.message.id == temp_id && entry.message.session_id == session_id)
        {
            Some(entry) => {
                entry.message.content = content;
                entry.status = status;
                true
            }
            None => false,
        }
    }

    pub fn set_sessions(&mut self, mut sessions: Vec<Session>) {
        sort_sessions(&mut sessions);
        self.sessions = sessions;
    }

    /// Switches the visible session; its messages arrive via `load_messages`.
    pub fn select(&mut self, session_id: Option<String>) {
        if self.selected != session_id {
            self.messages.clear();
        }
        self.selected = session_id;
    }

    /// Replaces the visible list with canonical rows, re-attaching the
    /// placeholder of a send that is still streaming for this session. A
    /// finished reply the rows do not include yet is kept as a local entry.
    pub fn load_messages(&mut self, session_id: &str, rows: Vec<Message>) -> bool {
        if !self.is_active(session_id) {
            return false;
        }

        self.messages = rows.into_iter().map(Entry::stored).collect();

        let settled = self.settled_replies.get(session_id).map(|reply| {
            let stored = self.messages.last().is_some_and(|entry| {
                entry.message.role == Role::Assistant && entry.message.content == reply.content
            });
            (stored, reply.clone())
        });
        match settled {
            Some((true, _)) => {
                self.settled_replies.remove(session_id);
            }
            Some((false, reply)) => self.messages.push(Entry {
                message: reply,
                status: EntryStatus::Local,
            }),
            None => {}
        }

        if let Some(SendState::Streaming { temp_id, buffer }) = self.sends.get(session_id) {
            self.messages.push(Entry {
                message: Message {
                    id: temp_id.clone(),
                    session_id: session_id.to_string(),
                    role: Role::Assistant,
                    content: buffer.clone(),
                    created_at: Utc::now(),
                },
                status: EntryStatus::Pending,
            });
        }
        true
    }

    /// Newly created sessions go to the top of the list and become selected.
    pub fn add_session(&mut self, session: Session) {
        let id = session.id.clone();
        self.sessions.insert(0, session);
        self.select(Some(id));
    }

    pub fn rename_session(&mut self, session_id: &str, title: &str) -> bool {
        match self.sessions.iter_mut().find(|s| s.id == session_id) {
            Some(session) => {
                session.title = Some(title.to_string());
                true
            }
            None => false,
        }
    }

    pub fn remove_session(&mut self, session_id: &str) {
        self.sessions.retain(|s| s.id != session_id);
        self.sends.remove(session_id);
        self.settled_replies.remove(session_id);
        if self.is_active(session_id) {
            self.selected = None;
            self.messages.clear();
        }
    }

    /// Sign-out: drop everything.
    pub fn reset(&mut self) {
        *self = ClientState::default();
    }
}
