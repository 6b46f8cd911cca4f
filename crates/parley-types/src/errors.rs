use serde::{Deserialize, Serialize};

// -- Auth error codes --

pub const EMAIL_ALREADY_IN_USE: &str = "auth/email-already-in-use";
pub const INVALID_EMAIL: &str = "auth/invalid-email";
pub const WEAK_PASSWORD: &str = "auth/weak-password";
pub const INVALID_CREDENTIAL: &str = "auth/invalid-credential";
pub const USER_NOT_FOUND: &str = "auth/user-not-found";
pub const SESSION_EXPIRED: &str = "auth/requires-recent-login";
pub const NO_CURRENT_USER: &str = "auth/no-current-user";

// -- Non-auth error codes --

pub const NOT_FOUND: &str = "db/not-found";
pub const PERMISSION_DENIED: &str = "db/permission-denied";
pub const INVALID_ARGUMENT: &str = "db/invalid-argument";
pub const INTERNAL: &str = "db/internal";
pub const UNAVAILABLE: &str = "db/unavailable";

/// Minimum accepted password length at signup.
pub const MIN_PASSWORD_LEN: usize = 6;

/// JSON body of every non-2xx REST response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Turn a structured code into something a person can read:
/// drop the `namespace/` prefix and replace hyphens with spaces.
///
/// `"auth/email-already-in-use"` becomes `"email already in use"`.
pub fn humanize(code: &str) -> String {
    let tail = match code.split_once('/') {
        Some((_, rest)) => rest,
        None => code,
    };
    tail.replace('-', " ")
}
