use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use parley_types::errors;

use crate::error::ApiError;
use crate::state::AppState;

/// Extract and validate the bearer token, rejecting revoked sessions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Auth(errors::NO_CURRENT_USER))?;

    let claims = state.verify_token(token).await?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
