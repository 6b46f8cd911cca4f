use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use parley_api::{ApiError, AppState, AppStateInner};
use parley_db::Database;
use parley_types::api::AuthResponse;
use parley_types::errors;
use parley_types::events::GatewayEvent;
use parley_types::models::{
    ChatListDocument, ChatSummary, ConversationDocument, ConversationId, MessageEntry,
    ProfilePatch, SummaryUpdate, UserId, UserProfile,
};

use super::{ChatBackend, LiveDocument, SNAPSHOT_BUFFER, Session, Subscription};
use crate::error::{AuthError, BackendError};

/// In-process backend: calls the service layer directly and listens on its
/// dispatcher. Several `LocalBackend`s built over one [`AppState`] behave
/// like several signed-in devices sharing a server.
pub struct LocalBackend {
    state: AppState,
    session: RwLock<Option<Session>>,
}

impl LocalBackend {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            session: RwLock::new(None),
        }
    }

    /// A private backend over a fresh in-memory database.
    pub fn in_memory() -> anyhow::Result<Self> {
        let db = Database::open_in_memory()?;
        let secret = Uuid::new_v4().to_string();
        Ok(Self::new(Arc::new(AppStateInner::new(db, secret))))
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    fn actor(&self) -> Result<UserId, BackendError> {
        self.current_session()
            .map(|s| s.user_id)
            .ok_or_else(|| AuthError::new(errors::NO_CURRENT_USER).into())
    }

    fn store_session(&self, res: AuthResponse) -> Session {
        let session = Session {
            user_id: res.user_id,
            session_id: res.session_id,
            token: res.token,
        };
        if let Ok(mut slot) = self.session.write() {
            *slot = Some(session.clone());
        }
        session
    }
}

/// Turn "not found" into `None`; every other error passes through.
fn optional<T>(result: Result<T, ApiError>) -> Result<Option<T>, BackendError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ApiError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ChatBackend for LocalBackend {
    async fn create_user(&self, email: &str, password: &str) -> Result<UserId, BackendError> {
        let res = self.state.signup(email.to_string(), password.to_string()).await?;
        Ok(self.store_session(res).user_id)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let res = self.state.login(email.to_string(), password.to_string()).await?;
        Ok(self.store_session(res))
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let session = self
            .current_session()
            .ok_or_else(|| AuthError::new(errors::NO_CURRENT_USER))?;
        let claims = self.state.verify_token(&session.token).await?;
        self.state.logout(&claims).await?;
        if let Ok(mut slot) = self.session.write() {
            *slot = None;
        }
        Ok(())
    }

    fn current_session(&self) -> Option<Session> {
        self.session.read().ok().and_then(|s| s.clone())
    }

    async fn put_profile(&self, profile: &UserProfile) -> Result<(), BackendError> {
        Ok(self.state.put_profile(self.actor()?, profile.clone()).await?)
    }

    async fn get_profile(&self, id: UserId) -> Result<Option<UserProfile>, BackendError> {
        self.actor()?;
        optional(self.state.get_profile(id).await)
    }

    async fn find_profile_by_username(&self, username: &str) -> Result<Option<UserProfile>, BackendError> {
        self.actor()?;
        optional(self.state.find_profile_by_username(username.to_string()).await)
    }

    async fn update_profile(&self, patch: &ProfilePatch) -> Result<UserProfile, BackendError> {
        Ok(self.state.update_profile(self.actor()?, patch.clone()).await?)
    }

    async fn touch_last_seen(&self) -> Result<(), BackendError> {
        Ok(self.state.touch_last_seen(self.actor()?).await?)
    }

    async fn put_chat_list(&self, list: &ChatListDocument) -> Result<(), BackendError> {
        Ok(self.state.put_chat_list(self.actor()?, list.clone()).await?)
    }

    async fn get_chat_list(&self, user_id: UserId) -> Result<Option<ChatListDocument>, BackendError> {
        optional(self.state.get_chat_list(self.actor()?, user_id).await)
    }

    async fn add_chat_summary(&self, owner: UserId, summary: &ChatSummary) -> Result<bool, BackendError> {
        Ok(self
            .state
            .add_chat_summary(self.actor()?, owner, summary.clone())
            .await?)
    }

    async fn update_chat_summary(
        &self,
        owner: UserId,
        conversation_id: ConversationId,
        update: &SummaryUpdate,
    ) -> Result<bool, BackendError> {
        Ok(self
            .state
            .update_chat_summary(self.actor()?, owner, conversation_id, update.clone())
            .await?)
    }

    async fn mark_chat_seen(&self, conversation_id: ConversationId) -> Result<bool, BackendError> {
        Ok(self.state.mark_chat_seen(self.actor()?, conversation_id).await?)
    }

    async fn create_conversation(&self, counterparty: UserId) -> Result<ConversationDocument, BackendError> {
        Ok(self.state.create_conversation(self.actor()?, counterparty).await?)
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Option<ConversationDocument>, BackendError> {
        optional(self.state.get_conversation(self.actor()?, id).await)
    }

    async fn append_message(&self, conversation_id: ConversationId, entry: &MessageEntry) -> Result<(), BackendError> {
        self.state
            .append_message(self.actor()?, conversation_id, entry.clone())
            .await?;
        Ok(())
    }

    async fn subscribe(&self, conversation_id: ConversationId) -> Result<Subscription, BackendError> {
        let actor = self.actor()?;

        // Listen before reading so no append falls between snapshot and feed.
        let mut events = self.state.dispatcher.subscribe();
        let initial = optional(self.state.get_conversation(actor, conversation_id).await)?;

        let state = self.state.clone();
        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        let task = tokio::spawn(async move {
            let messages = initial.map(|doc| doc.messages).unwrap_or_default();
            let mut live = LiveDocument::new(conversation_id, messages);
            if tx.send(live.snapshot()).await.is_err() {
                return;
            }

            loop {
                match events.recv().await {
                    Ok(GatewayEvent::MessageAppended {
                        conversation_id: cid,
                        entry,
                    }) if cid == conversation_id => {
                        if live.apply(entry) && tx.send(live.snapshot()).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("subscription to {} lagged by {} events, resyncing", conversation_id, n);
                        match state.get_conversation(actor, conversation_id).await {
                            Ok(doc) => live.reset(doc.messages),
                            Err(e) => {
                                warn!("resync of {} failed: {}", conversation_id, e);
                                continue;
                            }
                        }
                        if tx.send(live.snapshot()).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("subscription to {} ended", conversation_id);
        });

        Ok(Subscription::new(conversation_id, rx, task))
    }
}
