#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use shima::client::observer::ChatObserver;
use shima::client::state::{Entry, EntryStatus};
use shima::modules::chat::model::GenerationRequest;
use shima::modules::chat::schema::ChatRequest;
use shima::modules::session::model::{Message, Role, Session};
use shima::modules::session::schema::{AuthUser, CreateSessionRequest, NewMessage};
use shima::services::llm::{FragmentStream, Generator, LlmError};
use shima::services::relay::{ByteStream, RelayError, RelayTransport};
use shima::services::store::{ChatStore, StoreError};

pub const USER_ID: &str = "user-1";

/// In-memory stand-in for the auth and row store.
#[derive(Default)]
pub struct MemoryStore {
    user: Mutex<Option<AuthUser>>,
    sessions: Mutex<Vec<Session>>,
    messages: Mutex<Vec<Message>>,
    pub fail_inserts: AtomicBool,
    /// When set, every insert waits for a permit on it first.
    pub insert_gate: Mutex<Option<Arc<Notify>>>,
    ticks: AtomicI64,
}

impl MemoryStore {
    fn next_id(&self, prefix: &str) -> (String, chrono::DateTime<Utc>) {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst);
        (
            format!("{}-{:04}", prefix, tick),
            Utc::now() + Duration::milliseconds(tick),
        )
    }

    pub fn messages_for(&self, session_id: &str) -> Vec<Message> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn assistant_rows(&self, session_id: &str) -> Vec<Message> {
        self.messages_for(session_id)
            .into_iter()
            .filter(|m| m.role == Role::Assistant)
            .collect()
    }

    pub fn seed_session(&self, user_id: &str, title: &str) -> Session {
        let (id, created_at) = self.next_id("session");
        let session = Session {
            id,
            title: Some(title.to_string()),
            user_id: user_id.to_string(),
            created_at,
        };
        self.sessions.lock().push(session.clone());
        session
    }

    pub fn seed_message(&self, session_id: &str, role: Role, content: &str) {
        let (id, created_at) = self.next_id("message");
        self.messages.lock().push(Message {
            id,
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            created_at,
        });
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, StoreError> {
        self.sign_in(email, password).await
    }

    async fn sign_in(&self, email: &str, _password: &str) -> Result<AuthUser, StoreError> {
        let user = AuthUser {
            id: USER_ID.to_string(),
            email: Some(email.to_string()),
        };
        *self.user.lock() = Some(user.clone());
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), StoreError> {
        *self.user.lock() = None;
        Ok(())
    }

    async fn current_user(&self) -> Result<Option<AuthUser>, StoreError> {
        Ok(self.user.lock().clone())
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>, StoreError> {
        let mut sessions: Vec<Session> = self
            .sessions
            .lock()
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn create_session(&self, request: CreateSessionRequest) -> Result<Session, StoreError> {
        Ok(self.seed_session(&request.user_id, &request.title))
    }

    async fn rename_session(&self, session_id: &str, user_id: &str, title: &str) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .iter_mut()
            .find(|s| s.id == session_id && s.user_id == user_id)
            .ok_or(StoreError::NotFound)?;
        session.title = Some(title.to_string());
        Ok(())
    }

    async fn delete_session(&self, session_id: &str, user_id: &str) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|s| !(s.id == session_id && s.user_id == user_id));
        if sessions.len() == before {
            return Err(StoreError::NotFound);
        }
        self.messages.lock().retain(|m| m.session_id != session_id);
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        let mut messages = self.messages_for(session_id);
        shima::modules::session::model::sort_messages(&mut messages);
        Ok(messages)
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let gate = self.insert_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::ApiError {
                status: 503,
                message: "store unavailable".to_string(),
            });
        }
        let (id, created_at) = self.next_id("message");
        let row = Message {
            id,
            session_id: message.session_id,
            role: message.role,
            content: message.content,
            created_at,
        };
        self.messages.lock().push(row.clone());
        Ok(row)
    }
}

pub enum Script {
    Chunks(Vec<Vec<u8>>),
    FailAfter(Vec<Vec<u8>>),
    Refuse(u16),
}

/// Relay that replays a fixed script and records every request.
pub struct ScriptedRelay {
    script: Script,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedRelay {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn text(chunks: &[&str]) -> Arc<Self> {
        Self::new(Script::Chunks(chunks.iter().map(|c| c.as_bytes().to_vec()).collect()))
    }
}

#[async_trait]
impl RelayTransport for ScriptedRelay {
    async fn open(&self, request: &ChatRequest) -> Result<ByteStream, RelayError> {
        self.requests.lock().push(request.clone());

        let items: Vec<Result<Bytes, RelayError>> = match &self.script {
            Script::Chunks(chunks) => chunks.iter().map(|c| Ok(Bytes::from(c.clone()))).collect(),
            Script::FailAfter(chunks) => chunks
                .iter()
                .map(|c| Ok(Bytes::from(c.clone())))
                .chain(std::iter::once(Err(RelayError::Interrupted(
                    "connection reset".to_string(),
                ))))
                .collect(),
            Script::Refuse(status) => {
                return Err(RelayError::Status {
                    status: *status,
                    message: "upstream failed".to_string(),
                })
            }
        };

        Ok(Box::pin(futures::stream::iter(items)))
    }
}

/// Relay whose chunks are pushed by the test through a channel.
pub struct ChannelRelay {
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Result<Bytes, RelayError>>>>,
    pub opened: Arc<Notify>,
    pub calls: AtomicUsize,
}

impl ChannelRelay {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<Result<Bytes, RelayError>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let relay = Arc::new(Self {
            receiver: Mutex::new(Some(rx)),
            opened: Arc::new(Notify::new()),
            calls: AtomicUsize::new(0),
        });
        (relay, tx)
    }
}

#[async_trait]
impl RelayTransport for ChannelRelay {
    async fn open(&self, _request: &ChatRequest) -> Result<ByteStream, RelayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut rx = self
            .receiver
            .lock()
            .take()
            .ok_or_else(|| RelayError::Interrupted("relay already used".to_string()))?;
        self.opened.notify_one();

        Ok(Box::pin(async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        }))
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub snapshots: Mutex<Vec<(String, Vec<Entry>)>>,
    pub persist_failures: AtomicUsize,
}

impl RecordingObserver {
    /// Contents of the streaming placeholder, one per observed update.
    pub fn pending_contents(&self) -> Vec<String> {
        self.snapshots
            .lock()
            .iter()
            .filter_map(|(_, entries)| entries.last())
            .filter(|e| e.status == EntryStatus::Pending && !e.message.content.is_empty())
            .map(|e| e.message.content.clone())
            .collect()
    }
}

impl ChatObserver for RecordingObserver {
    fn messages_changed(&self, session_id: &str, messages: &[Entry]) {
        self.snapshots
            .lock()
            .push((session_id.to_string(), messages.to_vec()));
    }

    fn persist_failed(&self, _message: &NewMessage, _error: &StoreError) {
        self.persist_failures.fetch_add(1, Ordering::SeqCst);
    }
}

/// Generator that replays fragments and records the requests it saw.
#[derive(Default)]
pub struct FakeGenerator {
    fragments: Vec<Result<String, String>>,
    open_error: Option<String>,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl FakeGenerator {
    pub fn replying(fragments: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            fragments: fragments.iter().map(|f| Ok(f.to_string())).collect(),
            ..Default::default()
        })
    }

    pub fn failing_on_open(message: &str) -> Arc<Self> {
        Arc::new(Self {
            open_error: Some(message.to_string()),
            ..Default::default()
        })
    }

    pub fn failing_first(message: &str) -> Arc<Self> {
        Arc::new(Self {
            fragments: vec![Ok(String::new()), Err(message.to_string())],
            ..Default::default()
        })
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn stream(&self, request: GenerationRequest) -> Result<FragmentStream, LlmError> {
        self.requests.lock().push(request);
        if let Some(message) = &self.open_error {
            return Err(LlmError::ApiError(message.clone()));
        }

        let items: Vec<Result<String, LlmError>> = self
            .fragments
            .iter()
            .cloned()
            .map(|f| f.map_err(LlmError::ApiError))
            .collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }
}
