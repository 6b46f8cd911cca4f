use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use parley_types::errors::{self, ErrorBody, humanize};

/// Every failure the backend can report. Each variant maps to one HTTP
/// status and one structured code in the `{code, message}` body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{}", humanize(.0))]
    Auth(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("permission denied")]
    PermissionDenied,

    #[error("{0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(code) => code,
            Self::NotFound(_) => errors::NOT_FOUND,
            Self::PermissionDenied => errors::PERMISSION_DENIED,
            Self::InvalidArgument(_) => errors::INVALID_ARGUMENT,
            Self::Internal(_) => errors::INTERNAL,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth(code) if *code == errors::EMAIL_ALREADY_IN_USE => StatusCode::CONFLICT,
            Self::Auth(code)
                if *code == errors::INVALID_EMAIL || *code == errors::WEAK_PASSWORD =>
            {
                StatusCode::BAD_REQUEST
            }
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Internal(e) => {
                error!("internal error: {:#}", e);
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            code: self.code().to_string(),
            message,
        };
        (self.status(), Json(body)).into_response()
    }
}
