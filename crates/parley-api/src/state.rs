use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use parley_db::{AppendOutcome, Database};
use parley_gateway::dispatcher::Dispatcher;
use parley_types::errors;
use parley_types::models::{
    ChatListDocument, ChatSummary, ConversationDocument, ConversationId, MessageEntry,
    ProfilePatch, SummaryUpdate, UserId, UserProfile,
};

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

/// The backend service: document store, change fan-out and token secret.
///
/// REST handlers and the in-process client backend both go through these
/// methods, so access rules live in one place. `actor` is always the
/// authenticated user on whose behalf the call is made.
pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
}

impl AppStateInner {
    pub fn new(db: Database, jwt_secret: String) -> Self {
        Self {
            db: Arc::new(db),
            dispatcher: Dispatcher::new(),
            jwt_secret,
        }
    }

    /// Run blocking DB work off the async runtime.
    pub(crate) async fn blocking<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, ApiError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("spawn_blocking join error: {}", e)))?
    }

    // -- Profiles --

    pub async fn put_profile(&self, actor: UserId, profile: UserProfile) -> Result<(), ApiError> {
        if profile.id != actor {
            return Err(ApiError::PermissionDenied);
        }
        self.blocking(move |db| Ok(db.put_profile(&profile)?)).await
    }

    pub async fn get_profile(&self, id: UserId) -> Result<UserProfile, ApiError> {
        self.blocking(move |db| db.get_profile(&id)?.ok_or(ApiError::NotFound("user")))
            .await
    }

    pub async fn find_profile_by_username(&self, username: String) -> Result<UserProfile, ApiError> {
        self.blocking(move |db| {
            db.find_profile_by_username(&username)?
                .ok_or(ApiError::NotFound("user"))
        })
        .await
    }

    pub async fn update_profile(&self, actor: UserId, patch: ProfilePatch) -> Result<UserProfile, ApiError> {
        self.blocking(move |db| {
            let mut profile = db.get_profile(&actor)?.ok_or(ApiError::NotFound("user"))?;
            patch.apply(&mut profile);
            db.put_profile(&profile)?;
            Ok(profile)
        })
        .await
    }

    pub async fn touch_last_seen(&self, actor: UserId) -> Result<(), ApiError> {
        self.blocking(move |db| {
            if db.touch_last_seen(&actor, &Utc::now())? {
                Ok(())
            } else {
                Err(ApiError::NotFound("user"))
            }
        })
        .await
    }

    // -- Chat lists --

    pub async fn put_chat_list(&self, actor: UserId, list: ChatListDocument) -> Result<(), ApiError> {
        if list.user_id != actor {
            return Err(ApiError::PermissionDenied);
        }
        self.blocking(move |db| Ok(db.put_chat_list(&list)?)).await
    }

    pub async fn get_chat_list(&self, actor: UserId, owner: UserId) -> Result<ChatListDocument, ApiError> {
        if owner != actor {
            return Err(ApiError::PermissionDenied);
        }
        self.blocking(move |db| db.get_chat_list(&owner)?.ok_or(ApiError::NotFound("chat list")))
            .await
    }

    /// Returns false when `owner` has no chat list.
    ///
    /// Both `actor` and `owner` must take part in the conversation, and the
    /// summary must name the owner's counterparty as `r_id`.
    pub async fn add_chat_summary(
        &self,
        actor: UserId,
        owner: UserId,
        summary: ChatSummary,
    ) -> Result<bool, ApiError> {
        self.blocking(move |db| {
            let participants = require_participant(db, summary.conversation_id, actor)?;
            let counterparty = counterparty_in(&participants, owner).ok_or(ApiError::PermissionDenied)?;
            if summary.r_id != counterparty {
                return Err(ApiError::InvalidArgument(
                    "summary must name the other participant".into(),
                ));
            }
            Ok(db.add_chat_summary(&owner, &summary)?)
        })
        .await
    }

    /// Returns false when `owner` has no summary for the conversation.
    pub async fn update_chat_summary(
        &self,
        actor: UserId,
        owner: UserId,
        conversation_id: ConversationId,
        update: SummaryUpdate,
    ) -> Result<bool, ApiError> {
        if update.sender_id != actor {
            return Err(ApiError::PermissionDenied);
        }
        self.blocking(move |db| {
            let participants = require_participant(db, conversation_id, actor)?;
            if !participants.contains(&owner) {
                return Err(ApiError::PermissionDenied);
            }
            let matched = db.update_chat_summary(&owner, &conversation_id, &update)?;
            debug!(%owner, %conversation_id, matched, "chat summary update");
            Ok(matched)
        })
        .await
    }

    pub async fn mark_chat_seen(&self, actor: UserId, conversation_id: ConversationId) -> Result<bool, ApiError> {
        self.blocking(move |db| Ok(db.mark_chat_seen(&actor, &conversation_id)?))
            .await
    }

    // -- Conversations --

    pub async fn create_conversation(
        &self,
        actor: UserId,
        counterparty: UserId,
    ) -> Result<ConversationDocument, ApiError> {
        if counterparty == actor {
            return Err(ApiError::InvalidArgument(
                "a conversation needs two different participants".into(),
            ));
        }
        self.blocking(move |db| {
            if db.get_profile(&counterparty)?.is_none() {
                return Err(ApiError::NotFound("user"));
            }
            let doc = ConversationDocument {
                id: Uuid::new_v4(),
                participants: [actor, counterparty],
                created_at: Utc::now(),
                messages: Vec::new(),
            };
            db.create_conversation(&doc)?;
            info!("conversation {} created between {} and {}", doc.id, actor, counterparty);
            Ok(doc)
        })
        .await
    }

    pub async fn get_conversation(
        &self,
        actor: UserId,
        id: ConversationId,
    ) -> Result<ConversationDocument, ApiError> {
        self.blocking(move |db| {
            let doc = db.get_conversation(&id)?.ok_or(ApiError::NotFound("conversation"))?;
            if !doc.has_participant(actor) {
                return Err(ApiError::PermissionDenied);
            }
            Ok(doc)
        })
        .await
    }

    /// Append an entry and notify subscribers. A duplicate id is accepted
    /// without a second write or a second notification.
    pub async fn append_message(
        &self,
        actor: UserId,
        conversation_id: ConversationId,
        entry: MessageEntry,
    ) -> Result<AppendOutcome, ApiError> {
        if entry.sender_id != actor {
            return Err(ApiError::PermissionDenied);
        }
        if entry.body.is_blank() {
            return Err(ApiError::InvalidArgument("message body is empty".into()));
        }

        let stored = entry.clone();
        let outcome = self
            .blocking(move |db| {
                require_participant(db, conversation_id, actor)?;
                Ok(db.append_message(&conversation_id, &stored)?)
            })
            .await?;

        match outcome {
            AppendOutcome::Appended => {
                self.dispatcher.message_appended(conversation_id, entry);
            }
            AppendOutcome::Duplicate => {
                debug!("duplicate append of message {} ignored", entry.id);
            }
            AppendOutcome::MissingConversation => {
                return Err(ApiError::NotFound("conversation"));
            }
        }
        Ok(outcome)
    }
}

/// Participants of the conversation, provided `actor` is one of them.
fn require_participant(
    db: &Database,
    conversation_id: ConversationId,
    actor: UserId,
) -> Result<[UserId; 2], ApiError> {
    let participants = db
        .get_conversation_participants(&conversation_id)?
        .ok_or(ApiError::NotFound("conversation"))?;
    if participants.contains(&actor) {
        Ok(participants)
    } else {
        Err(ApiError::PermissionDenied)
    }
}

fn counterparty_in(participants: &[UserId; 2], user: UserId) -> Option<UserId> {
    match *participants {
        [a, b] if a == user => Some(b),
        [a, b] if b == user => Some(a),
        _ => None,
    }
}

/// Reject sessions that were revoked or never existed.
pub(crate) fn require_session(db: &Database, session_id: Uuid, user_id: UserId) -> Result<(), ApiError> {
    if db.is_session_active(&session_id, &user_id)? {
        Ok(())
    } else {
        Err(ApiError::Auth(errors::SESSION_EXPIRED))
    }
}

#[cfg(test)]
mod tests {
    use parley_types::models::MessageBody;

    use super::*;

    async fn user(state: &AppStateInner, name: &str) -> UserId {
        let res = state
            .signup(format!("{}@example.com", name), "hunter22".into())
            .await
            .unwrap();
        let id = res.user_id;
        let profile = UserProfile::for_signup(id, name, &format!("{}@example.com", name), Utc::now());
        state.put_profile(id, profile).await.unwrap();
        state.put_chat_list(id, ChatListDocument::empty(id)).await.unwrap();
        id
    }

    async fn setup() -> (AppStateInner, UserId, UserId, UserId, ConversationId) {
        let state = AppStateInner::new(Database::open_in_memory().unwrap(), "test-secret".into());
        let ann = user(&state, "ann").await;
        let bob = user(&state, "bob").await;
        let carol = user(&state, "carol").await;
        let cid = state.create_conversation(ann, bob).await.unwrap().id;
        (state, ann, bob, carol, cid)
    }

    #[tokio::test]
    async fn summaries_only_land_in_participant_lists() {
        let (state, ann, bob, carol, cid) = setup().await;

        let err = state
            .add_chat_summary(ann, carol, ChatSummary::opened(cid, ann, Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::PermissionDenied));
        assert!(state.get_chat_list(carol, carol).await.unwrap().chats_data.is_empty());

        let err = state
            .add_chat_summary(ann, bob, ChatSummary::opened(cid, carol, Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));

        assert!(state
            .add_chat_summary(ann, bob, ChatSummary::opened(cid, ann, Utc::now()))
            .await
            .unwrap());
        assert!(state
            .add_chat_summary(ann, ann, ChatSummary::opened(cid, bob, Utc::now()))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn summary_updates_cannot_target_outsiders() {
        let (state, ann, _bob, carol, cid) = setup().await;
        let update = SummaryUpdate {
            last_message: MessageBody::text("hi").preview(),
            updated_at: Utc::now(),
            sender_id: ann,
        };

        let err = state
            .update_chat_summary(ann, carol, cid, update.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::PermissionDenied));

        let err = state
            .add_chat_summary(carol, carol, ChatSummary::opened(cid, ann, Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::PermissionDenied));
    }
}
