//! Per-conversation session state
//!
//! A session is three pieces of keyed state (history, the latest regenerable
//! reply, and per-conversation settings) plus a keyed mutex. Anything that
//! mutates a session must do so inside [`SessionStore::run_exclusive`] for that
//! key. Reads outside of it are point-in-time snapshots.

mod history;
mod mutex;
mod reply_state;
mod store;

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use crate::conversation::{ConversationKey, Message, ReplyState};

pub use history::{HistoryLimit, HistoryLog};
pub use mutex::KeyedMutex;
pub use reply_state::ReplyStateTracker;
pub use store::{connect_sqlite, InMemoryStore, KeyValueStore, SqliteStore, StoreError};

#[cfg(test)]
pub use store::connect_sqlite_in_memory;

/// Per-conversation settings that survive a reset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Custom system prompt set by the user
    #[serde(default)]
    pub custom_prompt: Option<String>,

    /// Selected character name
    #[serde(default)]
    pub character: Option<String>,
}

pub struct SessionStore {
    history: HistoryLog,
    replies: ReplyStateTracker,
    settings: Arc<dyn KeyValueStore<SessionSettings>>,
    locks: KeyedMutex,
}

impl SessionStore {
    pub fn new(
        history: Arc<dyn KeyValueStore<Vec<Message>>>,
        replies: Arc<dyn KeyValueStore<ReplyState>>,
        settings: Arc<dyn KeyValueStore<SessionSettings>>,
        limit: HistoryLimit,
    ) -> Self {
        Self {
            history: HistoryLog::new(history, limit),
            replies: ReplyStateTracker::new(replies),
            settings,
            locks: KeyedMutex::new(),
        }
    }

    /// Sessions kept for the lifetime of the process
    pub fn in_memory(limit: HistoryLimit) -> Self {
        Self::new(
            Arc::new(InMemoryStore::<Vec<Message>>::new()),
            Arc::new(InMemoryStore::<ReplyState>::new()),
            Arc::new(InMemoryStore::<SessionSettings>::new()),
            limit,
        )
    }

    /// Sessions persisted in SQLite
    pub fn sqlite(pool: SqlitePool, limit: HistoryLimit) -> Self {
        Self::new(
            Arc::new(SqliteStore::<Vec<Message>>::new(pool.clone(), "history")),
            Arc::new(SqliteStore::<ReplyState>::new(pool.clone(), "reply_state")),
            Arc::new(SqliteStore::<SessionSettings>::new(pool, "settings")),
            limit,
        )
    }

    /// Run `task` with exclusive access to the session for `key`.
    pub fn run_exclusive<Fut, T>(&self, key: &ConversationKey, task: Fut) -> impl Future<Output = T>
    where
        Fut: Future<Output = T>,
    {
        self.locks.run_exclusive(key, task)
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn replies(&self) -> &ReplyStateTracker {
        &self.replies
    }

    pub async fn settings(&self, key: &ConversationKey) -> Result<SessionSettings, StoreError> {
        Ok(self.settings.get(key).await?.unwrap_or_default())
    }

    pub async fn set_settings(
        &self,
        key: &ConversationKey,
        settings: SessionSettings,
    ) -> Result<(), StoreError> {
        if settings == SessionSettings::default() {
            self.settings.delete(key).await
        } else {
            self.settings.set(key, settings).await
        }
    }

    /// Drop history and reply state; settings are kept.
    pub async fn reset(&self, key: &ConversationKey) -> Result<(), StoreError> {
        self.history.reset(key).await?;
        self.replies.clear(key).await
    }

    /// Keys with queued or running critical sections
    pub fn active_keys(&self) -> usize {
        self.locks.tracked_keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Turn;
    use chrono::Utc;

    #[tokio::test]
    async fn test_reset_keeps_settings() {
        let sessions = SessionStore::in_memory(HistoryLimit::from_turns(4).unwrap());
        let key = ConversationKey::new("g:c:u");

        sessions
            .set_settings(
                &key,
                SessionSettings {
                    custom_prompt: Some("Talk like a pirate.".into()),
                    character: None,
                },
            )
            .await
            .unwrap();
        sessions
            .history()
            .append_turn(&key, Turn::new("hi", "arr"))
            .await
            .unwrap();
        sessions
            .replies()
            .set_state(
                &key,
                ReplyState {
                    target_message_id: "m".into(),
                    user_message: "hi".into(),
                    quick_reply_input: None,
                    last_assistant_message: "arr".into(),
                    is_private: false,
                    updated_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        sessions.reset(&key).await.unwrap();

        assert!(sessions.history().get_history(&key).await.unwrap().is_empty());
        assert!(sessions.replies().get_state(&key).await.unwrap().is_none());
        assert_eq!(
            sessions.settings(&key).await.unwrap().custom_prompt.as_deref(),
            Some("Talk like a pirate.")
        );
    }

    #[tokio::test]
    async fn test_sqlite_sessions() {
        let pool = connect_sqlite_in_memory().await.unwrap();
        let sessions = SessionStore::sqlite(pool, HistoryLimit::from_turns(1).unwrap());
        let key = ConversationKey::new("g:c:u");

        sessions
            .history()
            .append_turn(&key, Turn::new("u1", "a1"))
            .await
            .unwrap();
        sessions
            .history()
            .append_turn(&key, Turn::new("u2", "a2"))
            .await
            .unwrap();

        let history = sessions.history().get_history(&key).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "u2");

        sessions.set_settings(&key, SessionSettings::default()).await.unwrap();
        assert_eq!(sessions.settings(&key).await.unwrap(), SessionSettings::default());
    }
}
