//! Client-side reconciler: keeps the signed-in user's sessions and the
//! selected session's messages, and folds a streamed reply into them.

use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use validator::Validate;

use crate::config::client::ClientConfig;
use crate::modules::chat::schema::{AiModel, ChatRequest};
use crate::modules::session::{
    model::{Role, Session, DEFAULT_SESSION_TITLE},
    schema::{AuthUser, CreateSessionRequest, NewMessage},
};
use crate::services::relay::{ByteStream, HttpRelay, RelayError, RelayTransport};
use crate::services::store::{ChatStore, StoreError};
use crate::services::supabase::SupabaseStore;

pub mod decode;
pub mod observer;
pub mod state;

use decode::StreamDecoder;
use observer::{ChatObserver, NoopObserver};
use state::{ClientState, Entry, Outcome, SendRejected, SendState};

const MAX_TITLE_CHARS: usize = 100;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Not signed in")]
    NotSignedIn,
    #[error("Invalid input: {0}")]
    Validation(#[from] validator::ValidationErrors),
    #[error("Title must be at most 100 characters")]
    TitleTooLong,
}

#[derive(Clone)]
pub struct ChatClient {
    state: Arc<Mutex<ClientState>>,
    store: Arc<dyn ChatStore>,
    relay: Arc<dyn RelayTransport>,
    observer: Arc<dyn ChatObserver>,
}

impl ChatClient {
    pub fn new(store: Arc<dyn ChatStore>, relay: Arc<dyn RelayTransport>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClientState::default())),
            store,
            relay,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            Arc::new(SupabaseStore::new(config)),
            Arc::new(HttpRelay::new(&config.relay_url)),
        )
    }

    pub fn with_observer(mut self, observer: Arc<dyn ChatObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// A copy of the whole state, for rendering.
    pub fn state(&self) -> ClientState {
        self.state.lock().clone()
    }

    pub fn messages(&self) -> Vec<Entry> {
        self.state.lock().messages.clone()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.state.lock().sessions.clone()
    }

    pub fn selected(&self) -> Option<String> {
        self.state.lock().selected.clone()
    }

    pub fn send_state(&self, session_id: &str) -> SendState {
        self.state.lock().send_state(session_id)
    }

    pub fn can_send(&self) -> bool {
        self.state.lock().can_send()
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        self.state.lock().draft = text.into();
    }

    pub fn set_model(&self, model: AiModel) {
        self.state.lock().model = model;
    }

    fn user_id(&self) -> Result<String, ClientError> {
        self.state
            .lock()
            .user
            .as_ref()
            .map(|u| u.id.clone())
            .ok_or(ClientError::NotSignedIn)
    }

    fn notify_messages(&self, session_id: &str) {
        let snapshot = {
            let state = self.state.lock();
            if !state.is_active(session_id) {
                return;
            }
            state.messages.clone()
        };
        self.observer.messages_changed(session_id, &snapshot);
    }

    fn notify_sessions(&self) {
        let (sessions, selected) = {
            let state = self.state.lock();
            (state.sessions.clone(), state.selected.clone())
        };
        self.observer.sessions_changed(&sessions, selected.as_deref());
    }

    fn notify_send_state(&self, session_id: &str) {
        let send_state = self.send_state(session_id);
        self.observer.send_state_changed(session_id, &send_state);
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, ClientError> {
        let user = self.store.sign_up(email, password).await?;
        self.start_session_for(user.clone()).await?;
        Ok(user)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, ClientError> {
        let user = self.store.sign_in(email, password).await?;
        self.start_session_for(user.clone()).await?;
        Ok(user)
    }

    /// Picks up an existing login, if the store still has one.
    pub async fn restore(&self) -> Result<Option<AuthUser>, ClientError> {
        match self.store.current_user().await? {
            Some(user) => {
                self.start_session_for(user.clone()).await?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    async fn start_session_for(&self, user: AuthUser) -> Result<(), ClientError> {
        tracing::info!(user_id = %user.id, "signed in");
        {
            let mut state = self.state.lock();
            state.reset();
            state.user = Some(user);
        }
        self.load_sessions().await
    }

    /// Tears the state down even when the store call fails.
    pub async fn sign_out(&self) -> Result<(), ClientError> {
        let result = self.store.sign_out().await;
        self.state.lock().reset();
        self.notify_sessions();
        result.map_err(ClientError::from)
    }

    pub async fn load_sessions(&self) -> Result<(), ClientError> {
        let user_id = self.user_id()?;
        let sessions = self.store.list_sessions(&user_id).await?;
        tracing::debug!(user_id = %user_id, count = sessions.len(), "sessions loaded");

        let first = {
            let mut state = self.state.lock();
            state.set_sessions(sessions);
            match &state.selected {
                None => state.sessions.first().map(|s| s.id.clone()),
                Some(_) => None,
            }
        };
        self.notify_sessions();

        if let Some(id) = first {
            self.select_session(&id).await?;
        }
        Ok(())
    }

    pub async fn select_session(&self, session_id: &str) -> Result<(), ClientError> {
        self.state.lock().select(Some(session_id.to_string()));
        self.notify_sessions();
        self.notify_messages(session_id);

        let rows = self.store.list_messages(session_id).await.map_err(|e| {
            tracing::warn!(session_id, error = %e, "failed to load messages");
            e
        })?;

        let changed = self.state.lock().load_messages(session_id, rows);
        if changed {
            self.notify_messages(session_id);
        }
        Ok(())
    }

    pub async fn create_session(&self, title: &str) -> Result<Session, ClientError> {
        let user_id = self.user_id()?;
        let title = match title.trim() {
            "" => DEFAULT_SESSION_TITLE.to_string(),
            trimmed => trimmed.to_string(),
        };

        let request = CreateSessionRequest { title, user_id };
        request.validate()?;

        let session = self.store.create_session(request).await?;
        tracing::info!(session_id = %session.id, "session created");

        self.state.lock().add_session(session.clone());
        self.notify_sessions();
        self.notify_messages(&session.id);
        Ok(session)
    }

    /// A blank title leaves the session untouched and returns `false`.
    pub async fn rename_session(&self, session_id: &str, title: &str) -> Result<bool, ClientError> {
        let title = title.trim();
        if title.is_empty() {
            return Ok(false);
        }
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(ClientError::TitleTooLong);
        }

        let user_id = self.user_id()?;
        self.store.rename_session(session_id, &user_id, title).await?;

        self.state.lock().rename_session(session_id, title);
        self.notify_sessions();
        Ok(true)
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), ClientError> {
        let user_id = self.user_id()?;
        self.store.delete_session(session_id, &user_id).await?;
        tracing::info!(session_id, "session deleted");

        let was_selected = {
            let mut state = self.state.lock();
            let was_selected = state.is_active(session_id);
            state.remove_session(session_id);
            was_selected
        };
        self.notify_sessions();
        if was_selected {
            self.observer.messages_changed(session_id, &[]);
        }
        Ok(())
    }

    /// Sets the draft and submits it.
    pub async fn send(&self, text: impl Into<String>) -> Result<Outcome, SendRejected> {
        self.set_draft(text);
        self.submit().await
    }

    /// Sends the draft in the selected session and streams the reply into a
    /// placeholder. Transport failures settle the send as `Outcome::Error`
    /// rather than returning `Err`.
    pub async fn submit(&self) -> Result<Outcome, SendRejected> {
        let ticket = self.state.lock().begin_send()?;
        let session_id = ticket.session_id.clone();
        tracing::debug!(session_id = %session_id, turns = ticket.history.len(), "message submitted");
        self.notify_messages(&session_id);
        self.notify_send_state(&session_id);

        // Runs alongside the relay call; joined before the reply is written
        // so the user row stays ahead of it.
        let user_write = tokio::spawn({
            let client = self.clone();
            let message = NewMessage {
                session_id: session_id.clone(),
                role: Role::User,
                content: ticket.user_message.content.clone(),
            };
            async move { client.persist(message).await }
        });

        let opened = self.state.lock().open_stream(&session_id);
        if opened.is_none() {
            tracing::info!(session_id = %session_id, "session went away before the reply started");
            Self::join_write(user_write).await;
            return Ok(Outcome::Error);
        }
        self.notify_messages(&session_id);
        self.notify_send_state(&session_id);

        let request = ChatRequest {
            messages: ticket.history,
            model: Some(ticket.model.as_str().to_string()),
            temperature: None,
            max_tokens: None,
        };

        let streamed = match self.relay.open(&request).await {
            Ok(stream) => self.consume(&session_id, stream).await,
            Err(e) => Err(e),
        };

        Self::join_write(user_write).await;

        match streamed {
            Ok(()) => {
                let reply = self.state.lock().buffer(&session_id).map(str::to_string);
                if let Some(content) = reply.filter(|c| !c.is_empty()) {
                    self.persist(NewMessage {
                        session_id: session_id.clone(),
                        role: Role::Assistant,
                        content,
                    })
                    .await;
                }

                self.state.lock().settle_success(&session_id);
                tracing::debug!(session_id = %session_id, "reply settled");
                self.notify_messages(&session_id);
                self.notify_send_state(&session_id);
                Ok(Outcome::Success)
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "reply stream failed");
                self.state.lock().settle_error(&session_id);
                self.notify_messages(&session_id);
                self.notify_send_state(&session_id);
                Ok(Outcome::Error)
            }
        }
    }

    async fn consume(&self, session_id: &str, mut stream: ByteStream) -> Result<(), RelayError> {
        let mut decoder = StreamDecoder::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let text = decoder.decode(&chunk);
            self.apply_text(session_id, &text);
        }

        let tail = decoder.finish();
        self.apply_text(session_id, &tail);
        Ok(())
    }

    fn apply_text(&self, session_id: &str, text: &str) {
        let changed = self.state.lock().apply_text(session_id, text);
        if changed {
            self.notify_messages(session_id);
        }
    }

    async fn join_write(handle: tokio::task::JoinHandle<()>) {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "message write task failed");
        }
    }

    /// Local state stays the source of truth; failures are logged and reported.
    async fn persist(&self, message: NewMessage) {
        if let Err(e) = self.store.insert_message(message.clone()).await {
            tracing::warn!(
                session_id = %message.session_id,
                role = message.role.as_str(),
                error = %e,
                "failed to persist message"
            );
            self.observer.persist_failed(&message, &e);
        }
    }
}
