//! Chat engine
//!
//! The ChatEngine implements the AI chat commands on top of the session store:
//! 1. Serializes every mutating command per conversation key
//! 2. Resolves the system prompt (custom prompt, character, default)
//! 3. Calls the text generator with the bounded history
//! 4. Commits the turn and the regenerable reply state only after success

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::{characters_builtin, Character, CharacterBook};
use crate::conversation::{ConversationKey, Message, ReplyState, Turn};
use crate::providers::{GeneratedImage, ImageGenerator, ImageRequest, ProviderError, TextGenerator};
use crate::session::{SessionSettings, SessionStore, StoreError};

/// A chat command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The user's message
    pub message: String,

    /// Quick-reply action that produced `message`, if any
    #[serde(default)]
    pub quick_reply_input: Option<String>,

    /// Only show the reply to the requesting user
    #[serde(default)]
    pub is_private: bool,

    /// Id of the platform message that will carry the reply
    #[serde(default)]
    pub target_message_id: Option<String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            quick_reply_input: None,
            is_private: false,
            target_message_id: None,
        }
    }
}

/// A regenerate command for the latest reply
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegenerateRequest {
    /// Override the visibility of the regenerated reply
    #[serde(default)]
    pub is_private: Option<bool>,

    /// Move the reply to a different platform message
    #[serde(default)]
    pub target_message_id: Option<String>,
}

/// Reply to a chat or regenerate command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub message: String,
    pub target_message_id: String,
    pub is_private: bool,
}

impl From<&ReplyState> for ChatReply {
    fn from(state: &ReplyState) -> Self {
        Self {
            message: state.last_assistant_message.clone(),
            target_message_id: state.target_message_id.clone(),
            is_private: state.is_private,
        }
    }
}

/// Errors from the chat engine
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("The reply changed since it was shown; send the message again")]
    StaleReplyState,

    #[error("There is no reply to regenerate")]
    NoRegenerableReply,

    #[error("There is nothing to undo")]
    EmptyHistory,

    #[error("Unknown character: {0}")]
    UnknownCharacter(String),

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Image generation is not configured")]
    ImagesDisabled,

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<ProviderError> for ChatError {
    fn from(err: ProviderError) -> Self {
        ChatError::GenerationFailed(err.to_string())
    }
}

/// The core chat engine
pub struct ChatEngine {
    sessions: Arc<SessionStore>,
    generator: Arc<dyn TextGenerator>,
    images: Option<Arc<dyn ImageGenerator>>,
    characters: CharacterBook,
    default_character: String,
    timeout: Duration,
}

impl ChatEngine {
    pub fn new(sessions: Arc<SessionStore>, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            sessions,
            generator,
            images: None,
            characters: CharacterBook::builtin(),
            default_character: characters_builtin::DEFAULT_ID.to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_images(mut self, images: Arc<dyn ImageGenerator>) -> Self {
        self.images = Some(images);
        self
    }

    /// Replace the character book. Fails if `default_character` is not in it.
    pub fn with_characters(
        mut self,
        characters: CharacterBook,
        default_character: Option<&str>,
    ) -> Result<Self, ChatError> {
        let default_id = default_character.unwrap_or(characters_builtin::DEFAULT_ID);
        let default = characters
            .get(default_id)
            .ok_or_else(|| ChatError::UnknownCharacter(default_id.to_string()))?;

        self.default_character = default.id.clone();
        self.characters = characters;
        Ok(self)
    }

    /// Upper bound on a single generation call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Generate a reply and commit it as the newest turn.
    pub async fn chat(&self, key: &ConversationKey, request: ChatRequest) -> Result<ChatReply, ChatError> {
        if request.message.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        self.sessions
            .run_exclusive(key, async move {
                let history = self.sessions.history().get_history(key).await?;
                let system_prompt = self.system_prompt(key).await?;

                let mut messages = Vec::with_capacity(history.len() + 2);
                messages.push(Message::system(system_prompt));
                messages.extend(history.iter().cloned());
                messages.push(Message::user(request.message.clone()));

                let reply = self.generate(&messages).await?;
                let turn = Turn::new(request.message.clone(), reply.clone());

                let state = ReplyState {
                    target_message_id: request
                        .target_message_id
                        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                    user_message: request.message,
                    quick_reply_input: request.quick_reply_input,
                    last_assistant_message: reply,
                    is_private: request.is_private,
                    updated_at: Utc::now(),
                };

                self.sessions.history().append_turn(key, turn).await?;
                self.commit_state(key, state.clone(), history).await?;

                tracing::debug!(key = %key, prompt_len = messages.len(), "Chat reply committed");
                Ok::<_, ChatError>(ChatReply::from(&state))
            })
            .await
    }

    /// Replace the newest reply with a fresh generation for the same user message.
    ///
    /// Fails with `StaleReplyState` when the recorded reply is no longer the
    /// head of history. The turn is swapped in a single history write; if the
    /// new reply state cannot be stored, the old history is put back.
    pub async fn regenerate(
        &self,
        key: &ConversationKey,
        request: RegenerateRequest,
    ) -> Result<ChatReply, ChatError> {
        self.sessions
            .run_exclusive(key, async move {
                let Some(latest) = self.sessions.replies().get_state(key).await? else {
                    tracing::warn!(key = %key, "Regenerate requested with no recorded reply");
                    return Err(ChatError::NoRegenerableReply);
                };

                let last_turn = self.sessions.history().get_last_turn(key).await?;
                if !last_turn.as_ref().is_some_and(|turn| latest.matches(turn)) {
                    tracing::warn!(key = %key, "Regenerate rejected, reply is no longer the head of history");
                    return Err(ChatError::StaleReplyState);
                }

                let snapshot = self.sessions.history().get_history(key).await?;
                let mut history = snapshot.clone();
                history.truncate(history.len().saturating_sub(2));

                let system_prompt = self.system_prompt(key).await?;
                let mut messages = Vec::with_capacity(history.len() + 2);
                messages.push(Message::system(system_prompt));
                messages.extend(history);
                messages.push(Message::user(latest.user_message.clone()));

                let reply = self.generate(&messages).await?;

                let turn = Turn::new(latest.user_message.clone(), reply.clone());
                if self.sessions.history().replace_last_turn(key, turn).await?.is_none() {
                    return Err(ChatError::StaleReplyState);
                }

                let state = ReplyState {
                    target_message_id: request.target_message_id.unwrap_or(latest.target_message_id),
                    is_private: request.is_private.unwrap_or(latest.is_private),
                    last_assistant_message: reply,
                    updated_at: Utc::now(),
                    ..latest
                };
                self.commit_state(key, state.clone(), snapshot).await?;

                tracing::debug!(key = %key, "Regenerated reply");
                Ok::<_, ChatError>(ChatReply::from(&state))
            })
            .await
    }

    /// Drop the newest turn. The regenerable reply goes with it.
    pub async fn undo(&self, key: &ConversationKey) -> Result<Turn, ChatError> {
        self.sessions
            .run_exclusive(key, async move {
                let Some(turn) = self.sessions.history().remove_last_turn(key).await? else {
                    return Err(ChatError::EmptyHistory);
                };
                self.sessions.replies().clear(key).await?;
                tracing::debug!(key = %key, "Removed last turn");
                Ok::<_, ChatError>(turn)
            })
            .await
    }

    /// Forget the conversation's history and regenerable reply.
    pub async fn reset(&self, key: &ConversationKey) -> Result<(), ChatError> {
        self.sessions
            .run_exclusive(key, async move {
                self.sessions.reset(key).await?;
                tracing::debug!(key = %key, "Session reset");
                Ok::<_, ChatError>(())
            })
            .await
    }

    /// Set or clear the conversation's custom system prompt. Resets the session.
    pub async fn set_prompt(&self, key: &ConversationKey, prompt: Option<String>) -> Result<(), ChatError> {
        let prompt = prompt
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        self.sessions
            .run_exclusive(key, async move {
                let mut settings = self.sessions.settings(key).await?;
                settings.custom_prompt = prompt;
                self.sessions.set_settings(key, settings).await?;
                self.sessions.reset(key).await?;
                tracing::debug!(key = %key, "Custom prompt changed");
                Ok::<_, ChatError>(())
            })
            .await
    }

    /// Select a character for the conversation. Clears any custom prompt and
    /// resets the session. Unknown characters leave everything untouched.
    pub async fn set_character(&self, key: &ConversationKey, name: &str) -> Result<&Character, ChatError> {
        let character = self
            .characters
            .resolve(name)
            .map_err(|_| ChatError::UnknownCharacter(name.to_string()))?;

        self.sessions
            .run_exclusive(key, async move {
                let settings = SessionSettings {
                    custom_prompt: None,
                    character: (character.id != self.default_character).then(|| character.id.clone()),
                };
                self.sessions.set_settings(key, settings).await?;
                self.sessions.reset(key).await?;
                tracing::debug!(key = %key, character = %character.id, "Character changed");
                Ok::<_, ChatError>(())
            })
            .await?;

        Ok(character)
    }

    /// Display snapshot of the history; may be stale by the time it is used.
    pub async fn history(&self, key: &ConversationKey) -> Result<Vec<Message>, ChatError> {
        Ok(self.sessions.history().get_history(key).await?)
    }

    pub fn characters(&self) -> Vec<&Character> {
        self.characters.list()
    }

    pub async fn imagine(&self, request: ImageRequest) -> Result<GeneratedImage, ChatError> {
        if request.prompt.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let images = self.images.as_ref().ok_or(ChatError::ImagesDisabled)?;

        match tokio::time::timeout(self.timeout, images.generate_image(&request)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ChatError::GenerationFailed(format!(
                "image generation timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }

    /// Resolve the system prompt: custom prompt > character > default character.
    async fn system_prompt(&self, key: &ConversationKey) -> Result<String, ChatError> {
        let settings = self.sessions.settings(key).await?;
        if let Some(prompt) = settings.custom_prompt {
            return Ok(prompt);
        }

        let character = settings
            .character
            .as_deref()
            .and_then(|id| self.characters.get(id))
            .or_else(|| self.characters.get(&self.default_character));

        Ok(character
            .map(|c| c.system_prompt.clone())
            .unwrap_or_else(|| characters_builtin::DEFAULT.to_string()))
    }

    /// Record the reply state for a turn that was just written. If that fails,
    /// the history goes back to `snapshot` so the two never disagree.
    async fn commit_state(
        &self,
        key: &ConversationKey,
        state: ReplyState,
        snapshot: Vec<Message>,
    ) -> Result<(), ChatError> {
        if let Err(err) = self.sessions.replies().set_state(key, state).await {
            if let Err(restore_err) = self.sessions.history().restore(key, snapshot).await {
                tracing::error!(key = %key, error = %restore_err, "Failed to roll back history");
            }
            return Err(err.into());
        }
        Ok(())
    }

    async fn generate(&self, messages: &[Message]) -> Result<String, ChatError> {
        match tokio::time::timeout(self.timeout, self.generator.generate(messages)).await {
            Ok(reply) => Ok(reply?),
            Err(_) => Err(ChatError::GenerationFailed(format!(
                "generation timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}
