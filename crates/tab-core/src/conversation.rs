//! In-memory conversation state.
//!
//! State is lost on restart, which matches the restart-on-unhealthy lifecycle:
//! a restarted instance starts every conversation fresh.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{domain::ConversationId, model::ChatMessage};

#[derive(Clone, Debug, Default)]
pub struct ConversationState {
    pub history: Vec<ChatMessage>,
    pub turn_count: u64,
    pub last_activity_at: Option<DateTime<Utc>>,
}

/// Per-conversation chat history, bounded to `max_turns` user/assistant pairs.
pub struct MemoryStorage {
    max_turns: usize,
    inner: Mutex<HashMap<ConversationId, ConversationState>>,
}

impl MemoryStorage {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of a conversation's state (default when unknown).
    pub async fn load(&self, id: &ConversationId) -> ConversationState {
        self.inner.lock().await.get(id).cloned().unwrap_or_default()
    }

    pub async fn append_turn(&self, id: &ConversationId, user: &str, assistant: &str) {
        let mut map = self.inner.lock().await;
        let state = map.entry(id.clone()).or_default();
        state.history.push(ChatMessage::user(user));
        state.history.push(ChatMessage::assistant(assistant));
        state.turn_count += 1;
        state.last_activity_at = Some(Utc::now());

        let keep = self.max_turns.saturating_mul(2);
        if state.history.len() > keep {
            let excess = state.history.len() - keep;
            state.history.drain(..excess);
        }
    }

    pub async fn clear(&self, id: &ConversationId) -> bool {
        self.inner.lock().await.remove(id).is_some()
    }

    /// Drop conversations whose last activity is older than `cutoff`.
    pub async fn evict_idle(&self, cutoff: DateTime<Utc>) -> usize {
        let mut map = self.inner.lock().await;
        let before = map.len();
        map.retain(|_, state| state.last_activity_at.is_some_and(|at| at >= cutoff));
        before - map.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

/// Serializes turns per conversation so history appends never interleave.
#[derive(Default)]
pub struct ConversationLocks {
    inner: Mutex<HashMap<ConversationId, Arc<Mutex<()>>>>,
}

impl ConversationLocks {
    pub async fn lock(&self, id: &ConversationId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Forget locks nobody holds or waits on.
    pub async fn prune(&self) -> usize {
        let mut map = self.inner.lock().await;
        let before = map.len();
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - map.len()
    }
}
