#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parley_api::{AppState, AppStateInner};
use parley_client::{
    Auth, BackendError, ChatBackend, ConversationView, LocalBackend, Session, Subscription, ToastQueue,
    ViewConfig,
};
use parley_db::Database;
use parley_types::models::{
    ChatListDocument, ChatSummary, ConversationDocument, ConversationId, MessageEntry, ProfilePatch,
    SummaryUpdate, UserId, UserProfile,
};

pub fn shared_state() -> AppState {
    Arc::new(AppStateInner::new(Database::open_in_memory().unwrap(), "test-secret".into()))
}

/// One signed-in device.
pub struct Peer {
    pub backend: Arc<LocalBackend>,
    pub toasts: Arc<ToastQueue>,
    pub profile: UserProfile,
}

impl Peer {
    pub async fn signup(state: &AppState, username: &str) -> Self {
        let backend = Arc::new(LocalBackend::new(state.clone()));
        let toasts = Arc::new(ToastQueue::new());
        let email = format!("{}@example.com", username.to_lowercase());
        let user_id = Auth::new(backend.clone(), toasts.clone())
            .signup(username, &email, "hunter22")
            .await
            .expect("signup");
        let profile = backend.get_profile(user_id).await.unwrap().unwrap();
        Self {
            backend,
            toasts,
            profile,
        }
    }

    pub fn view(&self) -> ConversationView {
        self.view_over(self.backend.clone())
    }

    /// A view of this peer's session that talks through `backend`.
    pub fn view_over(&self, backend: Arc<dyn ChatBackend>) -> ConversationView {
        let config = ViewConfig {
            retry: parley_client::RetryPolicy::none(),
            ..ViewConfig::default()
        };
        let view = ConversationView::new(backend, self.toasts.clone(), config);
        view.set_user(self.profile.clone());
        view
    }

    pub fn faulty(&self) -> Arc<Faulty> {
        Arc::new(Faulty::new(self.backend.clone()))
    }
}

/// Wraps a peer's backend and injects write failures.
pub struct Faulty {
    inner: Arc<LocalBackend>,
    /// Appends attempted, including failed ones.
    pub appends: AtomicU32,
    /// Fail this many appends as unavailable before passing them through.
    pub unavailable_appends: AtomicU32,
    /// Store this many appends but answer them as unavailable.
    pub lost_append_replies: AtomicU32,
    pub deny_appends: bool,
    /// Summary updates for this owner fail as unavailable.
    pub summary_outage_for: Option<UserId>,
}

impl Faulty {
    pub fn new(inner: Arc<LocalBackend>) -> Self {
        Self {
            inner,
            appends: AtomicU32::new(0),
            unavailable_appends: AtomicU32::new(0),
            lost_append_replies: AtomicU32::new(0),
            deny_appends: false,
            summary_outage_for: None,
        }
    }

    pub fn denying_appends(mut self) -> Self {
        self.deny_appends = true;
        self
    }

    pub fn with_summary_outage(mut self, owner: UserId) -> Self {
        self.summary_outage_for = Some(owner);
        self
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl ChatBackend for Faulty {
    async fn create_user(&self, email: &str, password: &str) -> Result<UserId, BackendError> {
        self.inner.create_user(email, password).await
    }
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        self.inner.sign_in(email, password).await
    }
    async fn sign_out(&self) -> Result<(), BackendError> {
        self.inner.sign_out().await
    }
    fn current_session(&self) -> Option<Session> {
        self.inner.current_session()
    }
    async fn put_profile(&self, profile: &UserProfile) -> Result<(), BackendError> {
        self.inner.put_profile(profile).await
    }
    async fn get_profile(&self, id: UserId) -> Result<Option<UserProfile>, BackendError> {
        self.inner.get_profile(id).await
    }
    async fn find_profile_by_username(&self, username: &str) -> Result<Option<UserProfile>, BackendError> {
        self.inner.find_profile_by_username(username).await
    }
    async fn update_profile(&self, patch: &ProfilePatch) -> Result<UserProfile, BackendError> {
        self.inner.update_profile(patch).await
    }
    async fn touch_last_seen(&self) -> Result<(), BackendError> {
        self.inner.touch_last_seen().await
    }
    async fn put_chat_list(&self, list: &ChatListDocument) -> Result<(), BackendError> {
        self.inner.put_chat_list(list).await
    }
    async fn get_chat_list(&self, user_id: UserId) -> Result<Option<ChatListDocument>, BackendError> {
        self.inner.get_chat_list(user_id).await
    }
    async fn add_chat_summary(&self, owner: UserId, summary: &ChatSummary) -> Result<bool, BackendError> {
        self.inner.add_chat_summary(owner, summary).await
    }
    async fn update_chat_summary(
        &self,
        owner: UserId,
        conversation_id: ConversationId,
        update: &SummaryUpdate,
    ) -> Result<bool, BackendError> {
        if self.summary_outage_for == Some(owner) {
            return Err(BackendError::Unavailable("chat list store offline".into()));
        }
        self.inner.update_chat_summary(owner, conversation_id, update).await
    }
    async fn mark_chat_seen(&self, conversation_id: ConversationId) -> Result<bool, BackendError> {
        self.inner.mark_chat_seen(conversation_id).await
    }
    async fn create_conversation(&self, counterparty: UserId) -> Result<ConversationDocument, BackendError> {
        self.inner.create_conversation(counterparty).await
    }
    async fn get_conversation(&self, id: ConversationId) -> Result<Option<ConversationDocument>, BackendError> {
        self.inner.get_conversation(id).await
    }
    async fn append_message(&self, conversation_id: ConversationId, entry: &MessageEntry) -> Result<(), BackendError> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        if self.deny_appends {
            return Err(BackendError::PermissionDenied);
        }
        if take_one(&self.unavailable_appends) {
            return Err(BackendError::Unavailable("connection reset".into()));
        }
        self.inner.append_message(conversation_id, entry).await?;
        if take_one(&self.lost_append_replies) {
            return Err(BackendError::Unavailable("response lost".into()));
        }
        Ok(())
    }
    async fn subscribe(&self, conversation_id: ConversationId) -> Result<Subscription, BackendError> {
        self.inner.subscribe(conversation_id).await
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
