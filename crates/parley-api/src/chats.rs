use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use parley_types::api::{Claims, SummaryMatch};
use parley_types::models::{ChatListDocument, ChatSummary, ConversationId, SummaryUpdate, UserId};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn get_chat_list(
    State(state): State<AppState>,
    Path(owner): Path<UserId>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.get_chat_list(claims.sub, owner).await?))
}

pub async fn put_chat_list(
    State(state): State<AppState>,
    Path(owner): Path<UserId>,
    Extension(claims): Extension<Claims>,
    Json(list): Json<ChatListDocument>,
) -> Result<impl IntoResponse, ApiError> {
    if list.user_id != owner {
        return Err(ApiError::InvalidArgument("chat list owner does not match path".into()));
    }
    state.put_chat_list(claims.sub, list).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_summary(
    State(state): State<AppState>,
    Path(owner): Path<UserId>,
    Extension(claims): Extension<Claims>,
    Json(summary): Json<ChatSummary>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation_id = summary.conversation_id;
    let matched = state.add_chat_summary(claims.sub, owner, summary).await?;
    Ok(Json(SummaryMatch {
        conversation_id,
        matched,
    }))
}

pub async fn update_summary(
    State(state): State<AppState>,
    Path((owner, conversation_id)): Path<(UserId, ConversationId)>,
    Extension(claims): Extension<Claims>,
    Json(update): Json<SummaryUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let matched = state
        .update_chat_summary(claims.sub, owner, conversation_id, update)
        .await?;
    Ok(Json(SummaryMatch {
        conversation_id,
        matched,
    }))
}

pub async fn mark_seen(
    State(state): State<AppState>,
    Path((owner, conversation_id)): Path<(UserId, ConversationId)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    if owner != claims.sub {
        return Err(ApiError::PermissionDenied);
    }
    let matched = state.mark_chat_seen(claims.sub, conversation_id).await?;
    Ok(Json(SummaryMatch {
        conversation_id,
        matched,
    }))
}
