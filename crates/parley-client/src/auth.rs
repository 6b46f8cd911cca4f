use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use parley_types::errors::humanize;
use parley_types::models::{ChatListDocument, UserId, UserProfile};

use crate::backend::{ChatBackend, Session};
use crate::error::BackendError;
use crate::notify::{Notification, Notifier};

/// Signup, login and logout for one client. Failures are logged and shown
/// to the user as a humanized notification; nothing is returned as an error.
pub struct Auth {
    backend: Arc<dyn ChatBackend>,
    notifier: Arc<dyn Notifier>,
}

impl Auth {
    pub fn new(backend: Arc<dyn ChatBackend>, notifier: Arc<dyn Notifier>) -> Self {
        Self { backend, notifier }
    }

    /// Create an identity, then seed its profile and an empty chat list.
    pub async fn signup(&self, username: &str, email: &str, password: &str) -> Option<UserId> {
        match self.try_signup(username, email, password).await {
            Ok(user_id) => {
                info!("signed up {} as {}", username, user_id);
                Some(user_id)
            }
            Err(e) => {
                self.report("signup", &e);
                None
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Option<Session> {
        match self.backend.sign_in(email, password).await {
            Ok(session) => {
                info!("signed in as {}", session.user_id);
                Some(session)
            }
            Err(e) => {
                self.report("login", &e);
                None
            }
        }
    }

    pub async fn logout(&self) -> bool {
        match self.backend.sign_out().await {
            Ok(()) => {
                info!("signed out");
                true
            }
            Err(e) => {
                self.report("logout", &e);
                false
            }
        }
    }

    async fn try_signup(&self, username: &str, email: &str, password: &str) -> Result<UserId, BackendError> {
        let user_id = self.backend.create_user(email, password).await?;
        let profile = UserProfile::for_signup(user_id, username, email, Utc::now());
        self.backend.put_profile(&profile).await?;
        self.backend
            .put_chat_list(&ChatListDocument::empty(user_id))
            .await?;
        Ok(user_id)
    }

    fn report(&self, what: &str, err: &BackendError) {
        error!("{} failed: {} ({})", what, err, err.code());
        self.notifier.notify(Notification::error(humanize(err.code())));
    }
}
