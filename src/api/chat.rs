//! Chat endpoints.
//!
//! Every message opens a fresh session bound to the caller; nothing about a
//! session outlives the request that created it.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::error::{ApiError, ResultExt};
use crate::auth::CurrentUser;
use crate::chat::{RagSource, SessionFactory};
use crate::db::{ChatRecord, Database};
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;

/// Longest accepted chat message in characters.
const MAX_MESSAGE_CHARS: usize = 4000;
/// Characters of source text returned to the client.
const SOURCE_PREVIEW_CHARS: usize = 200;
const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 200;

#[derive(Clone)]
pub struct ChatState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub sessions: Arc<SessionFactory>,
}

impl_has_auth_backend!(ChatState);

pub fn router(state: ChatState) -> Router {
    Router::new()
        .route("/message", post(send_message))
        .route("/history", get(history))
        .route("/conversation/{conversation_id}", delete(delete_conversation))
        .with_state(state)
}

#[derive(Deserialize)]
struct ChatMessageRequest {
    message: String,
    #[serde(default)]
    conversation_id: Option<String>,
}

#[derive(Serialize)]
struct SourceDocument {
    document_id: usize,
    text_preview: String,
    metadata: String,
    relevance_score: f64,
}

impl SourceDocument {
    fn new(index: usize, source: &RagSource) -> Self {
        let metadata = match &source.metadata {
            serde_json::Value::Null => "{}".to_string(),
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            document_id: index,
            text_preview: source.text.chars().take(SOURCE_PREVIEW_CHARS).collect(),
            metadata,
            relevance_score: source.score,
        }
    }
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
    sources: Vec<SourceDocument>,
    conversation_id: Option<String>,
}

async fn send_message(
    State(state): State<ChatState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<ChatMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = payload.message.trim();
    if message.is_empty() {
        return Err(ApiError::bad_request("Message cannot be empty"));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::bad_request(format!(
            "Message cannot be longer than {} characters",
            MAX_MESSAGE_CHARS
        )));
    }

    let session = state.sessions.open_session(&user.id, Some(&user.email));
    info!(
        user_id = %user.id,
        session_id = session.session_id(),
        "Processing chat message"
    );

    // The recording task is left to finish on its own.
    let reply = session
        .ask(message, None, payload.conversation_id.as_deref())
        .await?;

    let sources = reply
        .answer
        .sources
        .iter()
        .enumerate()
        .map(|(i, s)| SourceDocument::new(i, s))
        .collect();

    Ok(Json(ChatResponse {
        response: reply.answer.answer,
        sources,
        conversation_id: payload.conversation_id,
    }))
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
}

#[derive(Serialize)]
struct HistoryResponse {
    conversations: Vec<ChatRecord>,
}

async fn history(
    State(state): State<ChatState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    let conversations = state
        .db
        .memories()
        .history(&user.id, limit)
        .await
        .db_err("Failed to load chat history")?;

    Ok(Json(HistoryResponse { conversations }))
}

#[derive(Serialize)]
struct DeleteConversationResponse {
    message: &'static str,
    deleted: u64,
}

async fn delete_conversation(
    State(state): State<ChatState>,
    CurrentUser(user): CurrentUser,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .memories()
        .delete_conversation(&user.id, &conversation_id)
        .await
        .db_err("Failed to delete conversation")?;

    Ok(Json(DeleteConversationResponse {
        message: "Conversation deleted",
        deleted,
    }))
}
