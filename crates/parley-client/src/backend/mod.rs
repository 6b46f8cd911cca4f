//! The backend capability set the client is written against.
//!
//! Two implementations ship: [`LocalBackend`] drives the service layer
//! in-process (embedded use, tests), [`RemoteBackend`] talks to a running
//! `parley` server over HTTP and the WebSocket gateway.

mod local;
mod remote;

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use parley_types::models::{
    ChatListDocument, ChatSummary, ConversationDocument, ConversationId, MessageEntry,
    ProfilePatch, SummaryUpdate, UserId, UserProfile,
};

use crate::error::BackendError;

pub use local::LocalBackend;
pub use remote::RemoteBackend;

/// An authenticated session held by a backend client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub session_id: Uuid,
    pub token: String,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    // -- Auth --

    /// Create an identity and sign in as it.
    async fn create_user(&self, email: &str, password: &str) -> Result<UserId, BackendError>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError>;
    async fn sign_out(&self) -> Result<(), BackendError>;
    fn current_session(&self) -> Option<Session>;

    // -- users --

    async fn put_profile(&self, profile: &UserProfile) -> Result<(), BackendError>;
    async fn get_profile(&self, id: UserId) -> Result<Option<UserProfile>, BackendError>;
    async fn find_profile_by_username(&self, username: &str) -> Result<Option<UserProfile>, BackendError>;
    /// Patch the signed-in user's profile.
    async fn update_profile(&self, patch: &ProfilePatch) -> Result<UserProfile, BackendError>;
    /// Stamp the signed-in user's `last_seen_at` with the server's clock.
    async fn touch_last_seen(&self) -> Result<(), BackendError>;

    // -- chats --

    async fn put_chat_list(&self, list: &ChatListDocument) -> Result<(), BackendError>;
    async fn get_chat_list(&self, user_id: UserId) -> Result<Option<ChatListDocument>, BackendError>;
    /// Returns false when `owner` has no chat list.
    async fn add_chat_summary(&self, owner: UserId, summary: &ChatSummary) -> Result<bool, BackendError>;
    /// Returns false when `owner` has no chat list or no summary for the conversation.
    async fn update_chat_summary(
        &self,
        owner: UserId,
        conversation_id: ConversationId,
        update: &SummaryUpdate,
    ) -> Result<bool, BackendError>;
    /// Mark the signed-in user's own summary as seen.
    async fn mark_chat_seen(&self, conversation_id: ConversationId) -> Result<bool, BackendError>;

    // -- messages --

    /// Establish a conversation between the signed-in user and `counterparty`.
    async fn create_conversation(&self, counterparty: UserId) -> Result<ConversationDocument, BackendError>;
    async fn get_conversation(&self, id: ConversationId) -> Result<Option<ConversationDocument>, BackendError>;
    /// Atomic append; a repeated entry id is accepted without a second write.
    async fn append_message(&self, conversation_id: ConversationId, entry: &MessageEntry) -> Result<(), BackendError>;
    async fn subscribe(&self, conversation_id: ConversationId) -> Result<Subscription, BackendError>;
}

/// Full message log of a conversation at one point in time. Empty when the
/// conversation document does not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub conversation_id: ConversationId,
    /// Stored order, oldest first.
    pub messages: Vec<MessageEntry>,
}

/// A live feed of snapshots for one conversation.
///
/// The first snapshot reflects the state when the subscription was
/// established; one more follows every append. Dropping the subscription
/// cancels it, and nothing is delivered afterwards.
pub struct Subscription {
    conversation_id: ConversationId,
    rx: mpsc::Receiver<Snapshot>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(conversation_id: ConversationId, rx: mpsc::Receiver<Snapshot>, task: JoinHandle<()>) -> Self {
        Self {
            conversation_id,
            rx,
            task,
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Next snapshot, or `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.rx.recv().await
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
        self.rx.close();
    }
}

/// Snapshot buffer shared by both backends: a base document plus appends
/// seen on the change feed, deduplicated by entry id.
pub(crate) struct LiveDocument {
    conversation_id: ConversationId,
    messages: Vec<MessageEntry>,
    ids: HashSet<Uuid>,
}

impl LiveDocument {
    pub(crate) fn new(conversation_id: ConversationId, messages: Vec<MessageEntry>) -> Self {
        let mut doc = Self {
            conversation_id,
            messages: Vec::new(),
            ids: HashSet::new(),
        };
        doc.reset(messages);
        doc
    }

    pub(crate) fn reset(&mut self, messages: Vec<MessageEntry>) {
        self.ids = messages.iter().map(|m| m.id).collect();
        self.messages = messages;
    }

    /// Returns false when the entry was already part of the document.
    pub(crate) fn apply(&mut self, entry: MessageEntry) -> bool {
        if !self.ids.insert(entry.id) {
            return false;
        }
        self.messages.push(entry);
        true
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        Snapshot {
            conversation_id: self.conversation_id,
            messages: self.messages.clone(),
        }
    }
}

/// Snapshots buffered per subscription before the producer waits on the consumer.
pub(crate) const SNAPSHOT_BUFFER: usize = 32;

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use parley_types::models::MessageBody;

    use super::*;

    #[test]
    fn live_document_ignores_replayed_entries() {
        let sender = Uuid::new_v4();
        let first = MessageEntry::new(sender, MessageBody::text("one"), Utc::now());
        let second = MessageEntry::new(sender, MessageBody::text("two"), Utc::now());

        let mut doc = LiveDocument::new(Uuid::new_v4(), vec![first.clone()]);
        assert!(!doc.apply(first.clone()));
        assert!(doc.apply(second.clone()));
        assert!(!doc.apply(second.clone()));
        assert_eq!(doc.snapshot().messages, vec![first, second]);
    }
}
