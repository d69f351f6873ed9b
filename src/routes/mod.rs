//! API routes
//!
//! The HTTP surface stands in for the chat platform's command dispatcher: each
//! slash command or button press maps to one request against a conversation key.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::Character;
use crate::conversation::{ConversationKey, Message, Turn};
use crate::core::{ChatError, ChatReply, ChatRequest, RegenerateRequest};
use crate::providers::{GeneratedImage, ImageRequest};
use crate::AppState;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    provider: String,
    model: String,
    active_sessions: usize,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    key: ConversationKey,
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct PromptRequest {
    #[serde(default)]
    prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CharacterRequest {
    name: String,
}

#[derive(Debug, Serialize)]
struct CharactersResponse<'a> {
    characters: Vec<&'a Character>,
}

/// Maps engine errors onto HTTP responses
pub struct ApiError(ChatError);

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn kind(&self) -> (StatusCode, &'static str) {
        match self.0 {
            ChatError::StaleReplyState => (StatusCode::CONFLICT, "stale_reply_state"),
            ChatError::NoRegenerableReply => (StatusCode::NOT_FOUND, "no_regenerable_reply"),
            ChatError::EmptyHistory => (StatusCode::NOT_FOUND, "empty_history"),
            ChatError::UnknownCharacter(_) => (StatusCode::BAD_REQUEST, "unknown_character"),
            ChatError::EmptyMessage => (StatusCode::BAD_REQUEST, "empty_message"),
            ChatError::GenerationFailed(_) => (StatusCode::BAD_GATEWAY, "generation_failed"),
            ChatError::ImagesDisabled => (StatusCode::SERVICE_UNAVAILABLE, "images_disabled"),
            ChatError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.kind();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Command failed");
        }
        let body = Json(json!({ "error": kind, "message": self.0.to_string() }));
        (status, body).into_response()
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        provider: state.config.provider.clone(),
        model: state.config.model.clone(),
        active_sessions: state.chat_engine.sessions().active_keys(),
    })
}

async fn history(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let key = ConversationKey::from(key);
    let messages = state.chat_engine.history(&key).await?;
    Ok(Json(HistoryResponse { key, messages }))
}

async fn chat(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ApiError> {
    let key = ConversationKey::from(key);
    let reply = state.chat_engine.chat(&key, request).await?;
    Ok(Json(reply))
}

async fn regenerate(
    State(state): State<AppState>,
    Path(key): Path<String>,
    request: Option<Json<RegenerateRequest>>,
) -> Result<Json<ChatReply>, ApiError> {
    let key = ConversationKey::from(key);
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let reply = state.chat_engine.regenerate(&key, request).await?;
    Ok(Json(reply))
}

async fn undo(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Turn>, ApiError> {
    let turn = state.chat_engine.undo(&ConversationKey::from(key)).await?;
    Ok(Json(turn))
}

async fn reset(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.chat_engine.reset(&ConversationKey::from(key)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_prompt(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<PromptRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .chat_engine
        .set_prompt(&ConversationKey::from(key), request.prompt)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_character(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<CharacterRequest>,
) -> Result<Response, ApiError> {
    let character = state
        .chat_engine
        .set_character(&ConversationKey::from(key), &request.name)
        .await?;
    Ok(Json(character).into_response())
}

async fn characters(State(state): State<AppState>) -> Response {
    Json(CharactersResponse {
        characters: state.chat_engine.characters(),
    })
    .into_response()
}

async fn imagine(
    State(state): State<AppState>,
    Json(request): Json<ImageRequest>,
) -> Result<Json<GeneratedImage>, ApiError> {
    let images = state.chat_engine.imagine(request).await?;
    Ok(Json(images))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/v1/sessions/:key", delete(reset))
        .route("/v1/sessions/:key/history", get(history))
        .route("/v1/sessions/:key/chat", post(chat))
        .route("/v1/sessions/:key/regenerate", post(regenerate))
        .route("/v1/sessions/:key/last", delete(undo))
        .route("/v1/sessions/:key/prompt", put(set_prompt))
        .route("/v1/sessions/:key/character", put(set_character))
        .route("/v1/characters", get(characters))
        .route("/v1/images", post(imagine))
}
