//! Tracks the latest regenerable reply per conversation

use std::sync::Arc;

use crate::conversation::{ConversationKey, ReplyState};

use super::store::{KeyValueStore, StoreError};

pub struct ReplyStateTracker {
    store: Arc<dyn KeyValueStore<ReplyState>>,
}

impl ReplyStateTracker {
    pub fn new(store: Arc<dyn KeyValueStore<ReplyState>>) -> Self {
        Self { store }
    }

    pub async fn get_state(&self, key: &ConversationKey) -> Result<Option<ReplyState>, StoreError> {
        self.store.get(key).await
    }

    /// Replace any previous state for the key.
    pub async fn set_state(&self, key: &ConversationKey, state: ReplyState) -> Result<(), StoreError> {
        self.store.set(key, state).await
    }

    pub async fn clear(&self, key: &ConversationKey) -> Result<(), StoreError> {
        self.store.delete(key).await
    }
}
