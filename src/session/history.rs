//! Bounded per-conversation message history

use std::sync::Arc;

use crate::config::ConfigError;
use crate::conversation::{ConversationKey, Message, Role, Turn};

use super::store::{KeyValueStore, StoreError};

/// Maximum number of messages kept per conversation. Always even and at least 2,
/// so trimming never splits a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimit(usize);

impl HistoryLimit {
    pub fn from_turns(turns: usize) -> Result<Self, ConfigError> {
        if turns == 0 {
            return Err(ConfigError::Validation(
                "max_history_turns must be a positive integer".to_string(),
            ));
        }
        Self::from_messages(turns.saturating_mul(2).max(2))
    }

    pub fn from_messages(messages: usize) -> Result<Self, ConfigError> {
        if messages < 2 || messages % 2 != 0 {
            return Err(ConfigError::Validation(format!(
                "max history messages must be an even number of at least 2, got {}",
                messages
            )));
        }
        Ok(Self(messages))
    }

    pub fn max_messages(&self) -> usize {
        self.0
    }

    pub fn max_turns(&self) -> usize {
        self.0 / 2
    }
}

/// The last turn, if the history ends with a user message followed by an
/// assistant message.
pub fn last_turn_of(messages: &[Message]) -> Option<Turn> {
    match messages {
        [.., user, assistant] if user.role == Role::User && assistant.role == Role::Assistant => {
            Some(Turn::new(user.content.clone(), assistant.content.clone()))
        }
        _ => None,
    }
}

/// Append-only history log with oldest-first eviction
pub struct HistoryLog {
    store: Arc<dyn KeyValueStore<Vec<Message>>>,
    limit: HistoryLimit,
}

impl HistoryLog {
    pub fn new(store: Arc<dyn KeyValueStore<Vec<Message>>>, limit: HistoryLimit) -> Self {
        Self { store, limit }
    }

    /// Snapshot of the history; empty if the key was never used
    pub async fn get_history(&self, key: &ConversationKey) -> Result<Vec<Message>, StoreError> {
        Ok(self.store.get(key).await?.unwrap_or_default())
    }

    pub async fn append_turn(&self, key: &ConversationKey, turn: Turn) -> Result<(), StoreError> {
        let mut history = self.get_history(key).await?;
        history.extend(turn.into_messages());
        self.trim(key, &mut history);

        self.store.set(key, history).await
    }

    /// Swap the last turn for `turn` in a single write. Returns the replaced
    /// turn, or `None` (writing nothing) if the history does not end in one.
    pub async fn replace_last_turn(
        &self,
        key: &ConversationKey,
        turn: Turn,
    ) -> Result<Option<Turn>, StoreError> {
        let mut history = self.get_history(key).await?;
        let Some(replaced) = last_turn_of(&history) else {
            return Ok(None);
        };

        history.truncate(history.len() - 2);
        history.extend(turn.into_messages());
        self.trim(key, &mut history);

        self.store.set(key, history).await?;
        Ok(Some(replaced))
    }

    /// Put back a snapshot taken with [`HistoryLog::get_history`].
    pub async fn restore(&self, key: &ConversationKey, snapshot: Vec<Message>) -> Result<(), StoreError> {
        if snapshot.is_empty() {
            self.store.delete(key).await
        } else {
            self.store.set(key, snapshot).await
        }
    }

    pub async fn get_last_turn(&self, key: &ConversationKey) -> Result<Option<Turn>, StoreError> {
        let history = self.get_history(key).await?;
        Ok(last_turn_of(&history))
    }

    /// Remove the last turn, deleting the key entirely when nothing is left.
    pub async fn remove_last_turn(&self, key: &ConversationKey) -> Result<Option<Turn>, StoreError> {
        let mut history = self.get_history(key).await?;
        let Some(turn) = last_turn_of(&history) else {
            return Ok(None);
        };

        history.truncate(history.len() - 2);
        if history.is_empty() {
            self.store.delete(key).await?;
        } else {
            self.store.set(key, history).await?;
        }

        Ok(Some(turn))
    }

    pub async fn reset(&self, key: &ConversationKey) -> Result<(), StoreError> {
        self.store.delete(key).await
    }

    fn trim(&self, key: &ConversationKey, history: &mut Vec<Message>) {
        let max = self.limit.max_messages();
        if history.len() > max {
            let evicted = history.len() - max;
            history.drain(..evicted);
            tracing::debug!(key = %key, evicted, "Trimmed conversation history");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::InMemoryStore;

    fn log_with(turns: usize) -> (HistoryLog, Arc<InMemoryStore<Vec<Message>>>) {
        let store = Arc::new(InMemoryStore::<Vec<Message>>::new());
        let log = HistoryLog::new(store.clone(), HistoryLimit::from_turns(turns).unwrap());
        (log, store)
    }

    fn contents(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn test_history_limit_validation() {
        assert_eq!(HistoryLimit::from_turns(1).unwrap().max_messages(), 2);
        assert_eq!(HistoryLimit::from_turns(10).unwrap().max_messages(), 20);
        assert!(HistoryLimit::from_turns(0).is_err());

        assert_eq!(HistoryLimit::from_messages(4).unwrap().max_turns(), 2);
        assert!(HistoryLimit::from_messages(3).is_err());
        assert!(HistoryLimit::from_messages(0).is_err());
    }

    #[tokio::test]
    async fn test_oldest_turn_is_evicted() {
        let (log, _) = log_with(2);
        let key = ConversationKey::new("k");

        log.append_turn(&key, Turn::new("u1", "a1")).await.unwrap();
        log.append_turn(&key, Turn::new("u2", "a2")).await.unwrap();
        log.append_turn(&key, Turn::new("u3", "a3")).await.unwrap();

        let history = log.get_history(&key).await.unwrap();
        assert_eq!(contents(&history), vec!["u2", "a2", "u3", "a3"]);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[3].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_length_never_exceeds_limit() {
        let (log, _) = log_with(3);
        let key = ConversationKey::new("k");

        for i in 0..10 {
            log.append_turn(&key, Turn::new(format!("u{}", i), format!("a{}", i)))
                .await
                .unwrap();

            let history = log.get_history(&key).await.unwrap();
            assert!(history.len() <= 6);
            assert_eq!(history.last().unwrap().role, Role::Assistant);
            assert_eq!(history.last().unwrap().content, format!("a{}", i));
        }

        let history = log.get_history(&key).await.unwrap();
        assert_eq!(contents(&history), vec!["u7", "a7", "u8", "a8", "u9", "a9"]);
    }

    #[tokio::test]
    async fn test_snapshot_is_detached() {
        let (log, _) = log_with(2);
        let key = ConversationKey::new("k");
        log.append_turn(&key, Turn::new("u1", "a1")).await.unwrap();

        let mut snapshot = log.get_history(&key).await.unwrap();
        snapshot.clear();

        assert_eq!(log.get_history(&key).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_last_turn_and_removal() {
        let (log, store) = log_with(5);
        let key = ConversationKey::new("k");

        assert!(log.get_last_turn(&key).await.unwrap().is_none());
        assert!(log.remove_last_turn(&key).await.unwrap().is_none());

        log.append_turn(&key, Turn::new("u1", "a1")).await.unwrap();
        log.append_turn(&key, Turn::new("u2", "a2")).await.unwrap();

        assert_eq!(
            log.get_last_turn(&key).await.unwrap(),
            Some(Turn::new("u2", "a2"))
        );
        assert_eq!(
            log.remove_last_turn(&key).await.unwrap(),
            Some(Turn::new("u2", "a2"))
        );
        assert_eq!(contents(&log.get_history(&key).await.unwrap()), vec!["u1", "a1"]);

        log.remove_last_turn(&key).await.unwrap();
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_replace_last_turn() {
        let (log, store) = log_with(2);
        let key = ConversationKey::new("k");

        assert!(log
            .replace_last_turn(&key, Turn::new("u", "a"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.len(), 0);

        log.append_turn(&key, Turn::new("u1", "a1")).await.unwrap();
        log.append_turn(&key, Turn::new("u2", "a2")).await.unwrap();

        let replaced = log
            .replace_last_turn(&key, Turn::new("u2", "a2 again"))
            .await
            .unwrap();
        assert_eq!(replaced, Some(Turn::new("u2", "a2")));
        assert_eq!(
            contents(&log.get_history(&key).await.unwrap()),
            vec!["u1", "a1", "u2", "a2 again"]
        );
    }

    #[tokio::test]
    async fn test_restore_snapshot() {
        let (log, store) = log_with(2);
        let key = ConversationKey::new("k");

        let empty = log.get_history(&key).await.unwrap();
        log.append_turn(&key, Turn::new("u1", "a1")).await.unwrap();
        let snapshot = log.get_history(&key).await.unwrap();
        log.append_turn(&key, Turn::new("u2", "a2")).await.unwrap();

        log.restore(&key, snapshot).await.unwrap();
        assert_eq!(contents(&log.get_history(&key).await.unwrap()), vec!["u1", "a1"]);

        log.restore(&key, empty).await.unwrap();
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_last_turn_requires_user_then_assistant() {
        assert!(last_turn_of(&[Message::user("only")]).is_none());
        assert!(last_turn_of(&[Message::assistant("a"), Message::user("u")]).is_none());
        assert_eq!(
            last_turn_of(&[Message::user("u"), Message::assistant("a")]),
            Some(Turn::new("u", "a"))
        );
    }

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let (log, store) = log_with(2);
        let key = ConversationKey::new("k");

        log.reset(&key).await.unwrap();
        log.append_turn(&key, Turn::new("u1", "a1")).await.unwrap();
        log.reset(&key).await.unwrap();
        log.reset(&key).await.unwrap();

        assert!(log.get_history(&key).await.unwrap().is_empty());
        assert_eq!(store.len(), 0);
    }
}
