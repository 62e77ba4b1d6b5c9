use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::domain::ChatId;

/// A chat that has been told "send your question now".
#[derive(Clone, Copy, Debug)]
pub struct PendingState {
    pub registered_at: Instant,
}

/// Per-chat one-shot continuations for `/ask`.
///
/// A chat is either absent (idle) or pending. Entries are only removed by
/// `consume` or, when a ttl is configured, by expiry.
#[derive(Debug, Default)]
pub struct PendingQuestions {
    ttl: Option<Duration>,
    inner: Mutex<HashMap<ChatId, PendingState>>,
}

impl PendingQuestions {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, chat_id: ChatId) {
        self.register_at(chat_id, Instant::now());
    }

    pub fn register_at(&self, chat_id: ChatId, now: Instant) {
        self.lock()
            .insert(chat_id, PendingState { registered_at: now });
    }

    /// Remove the continuation for `chat_id`, returning whether a live one existed.
    pub fn consume(&self, chat_id: ChatId) -> bool {
        self.consume_at(chat_id, Instant::now())
    }

    pub fn consume_at(&self, chat_id: ChatId, now: Instant) -> bool {
        match self.lock().remove(&chat_id) {
            Some(state) => !self.is_expired(&state, now),
            None => false,
        }
    }

    pub fn is_pending(&self, chat_id: ChatId) -> bool {
        let now = Instant::now();
        self.lock()
            .get(&chat_id)
            .is_some_and(|s| !self.is_expired(s, now))
    }

    /// Drop expired entries; returns how many were removed. No-op without a ttl.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn purge_expired_at(&self, now: Instant) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, s| !self.is_expired(s, now));
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn is_expired(&self, state: &PendingState, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(state.registered_at) >= ttl)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ChatId, PendingState>> {
        // The map holds no invariants a panicking holder could break.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
