use crate::client::state::{Entry, SendState};
use crate::modules::session::{model::Session, schema::NewMessage};
use crate::services::store::StoreError;

/// Front-end hooks. Every callback runs after the state lock is released and
/// receives a snapshot.
pub trait ChatObserver: Send + Sync {
    /// The visible message list of `session_id` changed. Re-render and scroll
    /// to the newest entry.
    fn messages_changed(&self, _session_id: &str, _messages: &[Entry]) {}

    fn sessions_changed(&self, _sessions: &[Session], _selected: Option<&str>) {}

    /// Enable or disable the send affordance from here.
    fn send_state_changed(&self, _session_id: &str, _state: &SendState) {}

    /// A background write failed. Local state is left as is; a stricter
    /// front end may roll back here.
    fn persist_failed(&self, _message: &NewMessage, _error: &StoreError) {}
}

pub struct NoopObserver;

impl ChatObserver for NoopObserver {}
