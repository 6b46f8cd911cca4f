use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::info;
use uuid::Uuid;

use parley_types::api::{AuthResponse, Claims, LoginRequest, SignupRequest};
use parley_types::errors;
use parley_types::models::UserId;

use crate::error::ApiError;
use crate::state::{AppState, AppStateInner, require_session};

/// Sessions last 30 days unless revoked by logout.
const SESSION_DAYS: i64 = 30;

impl AppStateInner {
    /// Create an identity and an active session. Profile and chat list
    /// documents are written separately by the caller.
    pub async fn signup(&self, email: String, password: String) -> Result<AuthResponse, ApiError> {
        let email = email.trim().to_lowercase();
        if !is_plausible_email(&email) {
            return Err(ApiError::Auth(errors::INVALID_EMAIL));
        }
        if password.chars().count() < errors::MIN_PASSWORD_LEN {
            return Err(ApiError::Auth(errors::WEAK_PASSWORD));
        }

        let (user_id, session_id) = self
            .blocking(move |db| {
                if db.get_identity_by_email(&email)?.is_some() {
                    return Err(ApiError::Auth(errors::EMAIL_ALREADY_IN_USE));
                }

                // Hash password with Argon2id
                let salt = SaltString::generate(&mut OsRng);
                let password_hash = Argon2::default()
                    .hash_password(password.as_bytes(), &salt)
                    .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
                    .to_string();

                let user_id = Uuid::new_v4();
                let session_id = Uuid::new_v4();
                db.create_identity(&user_id, &email, &password_hash)?;
                db.create_session(&session_id, &user_id)?;
                Ok((user_id, session_id))
            })
            .await?;

        info!("identity {} created", user_id);
        self.issue(user_id, session_id)
    }

    pub async fn login(&self, email: String, password: String) -> Result<AuthResponse, ApiError> {
        let email = email.trim().to_lowercase();
        let (user_id, session_id) = self
            .blocking(move |db| {
                let identity = db
                    .get_identity_by_email(&email)?
                    .ok_or(ApiError::Auth(errors::INVALID_CREDENTIAL))?;

                let parsed_hash = PasswordHash::new(&identity.password)
                    .map_err(|e| anyhow::anyhow!("stored hash unreadable: {}", e))?;
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed_hash)
                    .map_err(|_| ApiError::Auth(errors::INVALID_CREDENTIAL))?;

                let user_id = identity.user_id()?;
                let session_id = Uuid::new_v4();
                db.create_session(&session_id, &user_id)?;
                Ok((user_id, session_id))
            })
            .await?;

        self.issue(user_id, session_id)
    }

    /// Revoke the session behind `claims`. Tokens carrying it stop working.
    pub async fn logout(&self, claims: &Claims) -> Result<(), ApiError> {
        let session_id = claims.sid;
        let revoked = self.blocking(move |db| Ok(db.revoke_session(&session_id)?)).await?;
        if !revoked {
            return Err(ApiError::Auth(errors::NO_CURRENT_USER));
        }
        info!("session {} of {} revoked", session_id, claims.sub);
        Ok(())
    }

    /// Decode a bearer token and check that its session is still live.
    pub async fn verify_token(&self, token: &str) -> Result<Claims, ApiError> {
        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| ApiError::Auth(errors::SESSION_EXPIRED))?
        .claims;

        let (sid, sub) = (claims.sid, claims.sub);
        self.blocking(move |db| require_session(db, sid, sub)).await?;
        Ok(claims)
    }

    fn issue(&self, user_id: UserId, session_id: Uuid) -> Result<AuthResponse, ApiError> {
        let token = create_token(&self.jwt_secret, user_id, session_id)?;
        Ok(AuthResponse {
            user_id,
            session_id,
            token,
        })
    }
}

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let res = state.signup(req.email, req.password).await?;
    Ok((StatusCode::CREATED, Json(res)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.login(req.email, req.password).await?))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    state.logout(&claims).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn create_token(secret: &str, user_id: UserId, session_id: Uuid) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        sid: session_id,
        exp: (chrono::Utc::now() + chrono::Duration::days(SESSION_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_db::Database;

    fn state() -> AppStateInner {
        AppStateInner::new(Database::open_in_memory().unwrap(), "test-secret".into())
    }

    #[tokio::test]
    async fn signup_then_login() {
        let state = state();
        let created = state.signup("Ann@Example.com".into(), "hunter22".into()).await.unwrap();
        let logged_in = state.login("ann@example.com".into(), "hunter22".into()).await.unwrap();
        assert_eq!(created.user_id, logged_in.user_id);
        assert_ne!(created.session_id, logged_in.session_id);
    }

    #[tokio::test]
    async fn signup_rejects_bad_input() {
        let state = state();
        let err = state.signup("not-an-email".into(), "hunter22".into()).await.unwrap_err();
        assert_eq!(err.code(), errors::INVALID_EMAIL);

        let err = state.signup("a@b.io".into(), "123".into()).await.unwrap_err();
        assert_eq!(err.code(), errors::WEAK_PASSWORD);

        state.signup("a@b.io".into(), "hunter22".into()).await.unwrap();
        let err = state.signup("a@b.io".into(), "hunter22".into()).await.unwrap_err();
        assert_eq!(err.code(), errors::EMAIL_ALREADY_IN_USE);
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credential() {
        let state = state();
        state.signup("a@b.io".into(), "hunter22".into()).await.unwrap();
        let err = state.login("a@b.io".into(), "hunter23".into()).await.unwrap_err();
        assert_eq!(err.code(), errors::INVALID_CREDENTIAL);
        let err = state.login("nobody@b.io".into(), "hunter22".into()).await.unwrap_err();
        assert_eq!(err.code(), errors::INVALID_CREDENTIAL);
    }

    #[tokio::test]
    async fn logout_revokes_token() {
        let state = state();
        let res = state.signup("a@b.io".into(), "hunter22".into()).await.unwrap();
        let claims = state.verify_token(&res.token).await.unwrap();
        assert_eq!(claims.sub, res.user_id);

        state.logout(&claims).await.unwrap();
        let err = state.verify_token(&res.token).await.unwrap_err();
        assert_eq!(err.code(), errors::SESSION_EXPIRED);

        let err = state.logout(&claims).await.unwrap_err();
        assert_eq!(err.code(), errors::NO_CURRENT_USER);
    }
}
