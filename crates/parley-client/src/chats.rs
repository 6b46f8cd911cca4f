use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use parley_types::models::{ChatSummary, UserId, UserProfile};

use crate::backend::ChatBackend;
use crate::error::{ChatError, ValidationError};

/// How often the signed-in user's `last_seen_at` is refreshed.
pub const PRESENCE_INTERVAL: Duration = Duration::from_secs(60);

/// One row of the chat list: the signed-in user's summary plus the
/// counterparty's profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatUser {
    pub summary: ChatSummary,
    pub profile: UserProfile,
}

fn signed_in(backend: &dyn ChatBackend) -> Result<UserId, ChatError> {
    backend
        .current_session()
        .map(|s| s.user_id)
        .ok_or_else(|| ValidationError::NotSignedIn.into())
}

/// Open a conversation with `other` and seed a summary in both chat lists.
/// Returns the existing chat when the two already have one.
pub async fn start_conversation(backend: &dyn ChatBackend, other: &UserProfile) -> Result<ChatUser, ChatError> {
    let me = signed_in(backend)?;

    if let Some(list) = backend.get_chat_list(me).await.map_err(ChatError::Write)? {
        if let Some(summary) = list.chats_data.iter().find(|c| c.r_id == other.id) {
            debug!("{} already chats with {}", me, other.id);
            return Ok(ChatUser {
                summary: summary.clone(),
                profile: other.clone(),
            });
        }
    }

    let doc = backend
        .create_conversation(other.id)
        .await
        .map_err(ChatError::Write)?;
    let now = Utc::now();

    let theirs = ChatSummary::opened(doc.id, me, now);
    if !backend
        .add_chat_summary(other.id, &theirs)
        .await
        .map_err(ChatError::Write)?
    {
        warn!("{} has no chat list; conversation {} only listed for {}", other.id, doc.id, me);
    }

    let mine = ChatSummary::opened(doc.id, other.id, now);
    backend
        .add_chat_summary(me, &mine)
        .await
        .map_err(ChatError::Write)?;

    info!("{} started conversation {} with {}", me, doc.id, other.id);
    Ok(ChatUser {
        summary: mine,
        profile: other.clone(),
    })
}

/// Look a user up by username. Searching for yourself finds nothing.
pub async fn search_user(backend: &dyn ChatBackend, username: &str) -> Result<Option<UserProfile>, ChatError> {
    let me = signed_in(backend)?;
    let found = backend
        .find_profile_by_username(&username.trim().to_lowercase())
        .await
        .map_err(ChatError::Write)?;
    Ok(found.filter(|p| p.id != me))
}

/// The signed-in user's chats, most recently updated first.
pub async fn load_chat_users(backend: &dyn ChatBackend) -> Result<Vec<ChatUser>, ChatError> {
    let me = signed_in(backend)?;
    let Some(list) = backend.get_chat_list(me).await.map_err(ChatError::Write)? else {
        return Ok(Vec::new());
    };

    let mut users = Vec::with_capacity(list.chats_data.len());
    for summary in list.chats_data {
        match backend.get_profile(summary.r_id).await.map_err(ChatError::Write)? {
            Some(profile) => users.push(ChatUser { summary, profile }),
            None => warn!("no profile for {}, dropping chat {}", summary.r_id, summary.conversation_id),
        }
    }
    users.sort_by(|a, b| b.summary.updated_at.cmp(&a.summary.updated_at));
    Ok(users)
}

/// Refresh `last_seen_at` now and then every `interval` until aborted.
pub fn spawn_presence_heartbeat(backend: Arc<dyn ChatBackend>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = backend.touch_last_seen().await {
                warn!("presence update failed: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use parley_api::AppStateInner;
    use parley_db::Database;

    use crate::auth::Auth;
    use crate::backend::LocalBackend;
    use crate::notify::LogNotifier;

    use super::*;

    async fn pair() -> (Arc<LocalBackend>, Arc<LocalBackend>, UserId, UserId) {
        let state = Arc::new(AppStateInner::new(Database::open_in_memory().unwrap(), "secret".into()));
        let ann = Arc::new(LocalBackend::new(state.clone()));
        let bob = Arc::new(LocalBackend::new(state));
        let ann_id = Auth::new(ann.clone(), Arc::new(LogNotifier))
            .signup("Ann", "ann@example.com", "hunter22")
            .await
            .unwrap();
        let bob_id = Auth::new(bob.clone(), Arc::new(LogNotifier))
            .signup("Bob", "bob@example.com", "hunter22")
            .await
            .unwrap();
        (ann, bob, ann_id, bob_id)
    }

    #[tokio::test]
    async fn start_conversation_lists_it_for_both() {
        let (ann, bob, ann_id, bob_id) = pair().await;
        let bob_profile = search_user(&*ann, "BOB").await.unwrap().unwrap();
        assert_eq!(bob_profile.id, bob_id);

        let chat = start_conversation(&*ann, &bob_profile).await.unwrap();
        assert_eq!(chat.summary.r_id, bob_id);
        assert!(chat.summary.message_seen);
        assert_eq!(chat.summary.last_message, "");

        let bobs = load_chat_users(&*bob).await.unwrap();
        assert_eq!(bobs.len(), 1);
        assert_eq!(bobs[0].summary.conversation_id, chat.summary.conversation_id);
        assert_eq!(bobs[0].summary.r_id, ann_id);
        assert_eq!(bobs[0].profile.username, "ann");

        let again = start_conversation(&*ann, &bob_profile).await.unwrap();
        assert_eq!(again.summary.conversation_id, chat.summary.conversation_id);
        assert_eq!(load_chat_users(&*ann).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn searching_for_yourself_finds_nothing() {
        let (ann, _, _, _) = pair().await;
        assert!(search_user(&*ann, "ann").await.unwrap().is_none());
        assert!(search_user(&*ann, "carol").await.unwrap().is_none());
    }
}
