use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use parley_types::api::{Claims, UsernameQuery};
use parley_types::models::{ProfilePatch, UserId, UserProfile};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.get_profile(user_id).await?))
}

/// Exact-match search on the lowercase username.
pub async fn find_user(
    State(state): State<AppState>,
    Query(query): Query<UsernameQuery>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.find_profile_by_username(query.username).await?))
}

pub async fn put_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Extension(claims): Extension<Claims>,
    Json(profile): Json<UserProfile>,
) -> Result<impl IntoResponse, ApiError> {
    if profile.id != user_id {
        return Err(ApiError::InvalidArgument("profile id does not match path".into()));
    }
    state.put_profile(claims.sub, profile).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn patch_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Extension(claims): Extension<Claims>,
    Json(patch): Json<ProfilePatch>,
) -> Result<impl IntoResponse, ApiError> {
    if user_id != claims.sub {
        return Err(ApiError::PermissionDenied);
    }
    Ok(Json(state.update_profile(claims.sub, patch).await?))
}

pub async fn touch_last_seen(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    if user_id != claims.sub {
        return Err(ApiError::PermissionDenied);
    }
    state.touch_last_seen(claims.sub).await?;
    Ok(StatusCode::NO_CONTENT)
}
