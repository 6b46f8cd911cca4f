use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use parley_db::AppendOutcome;
use parley_types::api::{Claims, CreateConversationRequest};
use parley_types::models::{ConversationId, MessageEntry};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let doc = state.create_conversation(claims.sub, req.counterparty_id).await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.get_conversation(claims.sub, conversation_id).await?))
}

/// 201 for a new entry, 200 when the same entry id was already stored.
pub async fn append_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
    Extension(claims): Extension<Claims>,
    Json(entry): Json<MessageEntry>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.append_message(claims.sub, conversation_id, entry).await?;
    let status = match outcome {
        AppendOutcome::Duplicate => StatusCode::OK,
        _ => StatusCode::CREATED,
    };
    Ok(status)
}
