use reqwest::StatusCode;
use uuid::Uuid;

use parley_api::ApiError;
use parley_types::errors::{self, ErrorBody, humanize};

/// A failed auth call, carrying the backend's structured code
/// (for example `auth/weak-password`). Displays in humanized form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", humanize(.code))]
pub struct AuthError {
    pub code: String,
}

impl AuthError {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

/// Anything the backend client can fail with.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("permission denied")]
    PermissionDenied,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Transport failures and 5xx-class trouble; worth retrying.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend error: {0}")]
    Internal(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Structured code, in the same `namespace/words-with-hyphens` shape the
    /// backend uses.
    pub fn code(&self) -> &str {
        match self {
            Self::Auth(e) => &e.code,
            Self::NotFound(_) => errors::NOT_FOUND,
            Self::PermissionDenied => errors::PERMISSION_DENIED,
            Self::InvalidArgument(_) => errors::INVALID_ARGUMENT,
            Self::Unavailable(_) => errors::UNAVAILABLE,
            Self::Internal(_) => errors::INTERNAL,
        }
    }

    /// Map a non-2xx REST response onto the taxonomy.
    pub fn from_response(status: StatusCode, body: Option<ErrorBody>) -> Self {
        let (code, message) = match body {
            Some(b) => (b.code, b.message),
            None => (String::new(), status.to_string()),
        };
        if code.starts_with("auth/") {
            return Self::Auth(AuthError::new(code));
        }
        match status {
            StatusCode::NOT_FOUND => Self::NotFound(message.trim_end_matches(" not found").to_string()),
            StatusCode::FORBIDDEN => Self::PermissionDenied,
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Self::InvalidArgument(message),
            StatusCode::UNAUTHORIZED => Self::Auth(AuthError::new(errors::NO_CURRENT_USER)),
            s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                if code == errors::INTERNAL {
                    Self::Internal(message)
                } else {
                    Self::Unavailable(message)
                }
            }
            _ => Self::Internal(message),
        }
    }
}

impl From<ApiError> for BackendError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Auth(code) => Self::Auth(AuthError::new(code)),
            ApiError::NotFound(what) => Self::NotFound(what.to_string()),
            ApiError::PermissionDenied => Self::PermissionDenied,
            ApiError::InvalidArgument(message) => Self::InvalidArgument(message),
            ApiError::Internal(e) => Self::Internal(format!("{:#}", e)),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            Self::Unavailable(err.to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BackendError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Rejected before anything was written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("Chat not selected!")]
    NoActiveConversation,

    #[error("Failed to upload image or chat not selected")]
    MissingImage,

    #[error("Not signed in")]
    NotSignedIn,
}

/// What a user-facing operation reports. Each is surfaced once as a
/// notification by the component that ran the operation.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Nothing was persisted.
    #[error("{0}")]
    Write(#[source] BackendError),

    /// The message itself is stored; a chat list preview could not be updated.
    #[error("{source}")]
    SummarySync {
        message_id: Uuid,
        #[source]
        source: BackendError,
    },

    #[error("{0}")]
    Subscribe(#[source] BackendError),
}

impl ChatError {
    /// Whether the message reached the conversation log despite the error.
    pub fn message_was_sent(&self) -> bool {
        matches!(self, Self::SummarySync { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_error_displays_humanized() {
        let err = AuthError::new(errors::EMAIL_ALREADY_IN_USE);
        assert_eq!(err.to_string(), "email already in use");
    }

    #[test]
    fn response_mapping() {
        let body = |code: &str, message: &str| {
            Some(ErrorBody {
                code: code.into(),
                message: message.into(),
            })
        };

        assert!(matches!(
            BackendError::from_response(StatusCode::CONFLICT, body(errors::EMAIL_ALREADY_IN_USE, "email already in use")),
            BackendError::Auth(e) if e.code == errors::EMAIL_ALREADY_IN_USE
        ));
        assert!(matches!(
            BackendError::from_response(StatusCode::NOT_FOUND, body(errors::NOT_FOUND, "conversation not found")),
            BackendError::NotFound(what) if what == "conversation"
        ));
        assert!(BackendError::from_response(StatusCode::BAD_GATEWAY, None).is_transient());
        assert!(!BackendError::from_response(StatusCode::INTERNAL_SERVER_ERROR, body(errors::INTERNAL, "internal error")).is_transient());
    }

    #[test]
    fn api_errors_convert() {
        let err: BackendError = ApiError::Auth(errors::WEAK_PASSWORD).into();
        assert_eq!(err.code(), errors::WEAK_PASSWORD);
        assert_eq!(err.to_string(), "weak password");
    }
}
