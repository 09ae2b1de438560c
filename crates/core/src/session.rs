use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::ConversationContext;
use crate::errors::SessionError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Time-prefixed id with a random suffix so sessions opened within the
    /// same millisecond stay distinct.
    pub fn generate() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("S-{}-{}", Utc::now().timestamp_millis(), &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Serializes turns for one session. `tokio::sync::Mutex` queues waiters in
/// FIFO order, so turns that reach the gate in order are dispatched in order.
pub type TurnGate = Arc<tokio::sync::Mutex<()>>;

struct SessionEntry {
    external_user_id: String,
    context: ConversationContext,
    turn_gate: TurnGate,
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<SessionId, SessionEntry>,
    by_user: HashMap<String, SessionId>,
}

/// Process-lifetime table of conversations keyed by the messaging-platform
/// user id. Every operation runs inside one short critical section; nothing is
/// awaited while the table is locked.
#[derive(Default)]
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve_or_create(&self, external_user_id: &str) -> SessionId {
        let mut state = self.lock();
        if let Some(id) = state.by_user.get(external_user_id) {
            return id.clone();
        }

        let id = SessionId::generate();
        state.sessions.insert(
            id.clone(),
            SessionEntry {
                external_user_id: external_user_id.to_owned(),
                context: ConversationContext::default(),
                turn_gate: Arc::new(tokio::sync::Mutex::new(())),
            },
        );
        state.by_user.insert(external_user_id.to_owned(), id.clone());
        id
    }

    pub fn context(&self, id: &SessionId) -> Result<ConversationContext, SessionError> {
        self.with_entry(id, |entry| entry.context.clone())
    }

    pub fn set_context(
        &self,
        id: &SessionId,
        context: ConversationContext,
    ) -> Result<(), SessionError> {
        let mut state = self.lock();
        let entry = state
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::UnknownSession(id.clone()))?;
        entry.context = context;
        Ok(())
    }

    pub fn external_user_id(&self, id: &SessionId) -> Result<String, SessionError> {
        self.with_entry(id, |entry| entry.external_user_id.clone())
    }

    pub fn turn_gate(&self, id: &SessionId) -> Result<TurnGate, SessionError> {
        self.with_entry(id, |entry| Arc::clone(&entry.turn_gate))
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_entry<T>(
        &self,
        id: &SessionId,
        read: impl FnOnce(&SessionEntry) -> T,
    ) -> Result<T, SessionError> {
        let state = self.lock();
        state.sessions.get(id).map(read).ok_or_else(|| SessionError::UnknownSession(id.clone()))
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
