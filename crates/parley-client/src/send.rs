//! Send a message: append it to the conversation log, then bring each
//! participant's chat summary up to date.
//!
//! The append is the durability point. Summary updates that fail after it
//! are reported as [`ChatError::SummarySync`], and the message stays sent.

use chrono::Utc;
use tracing::{debug, warn};

use parley_types::models::{ConversationId, MessageBody, MessageEntry, SummaryUpdate, UserId};

use crate::backend::ChatBackend;
use crate::error::{BackendError, ChatError, ValidationError};
use crate::retry::RetryPolicy;

/// A message about to be sent.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub sender_id: UserId,
    /// `None` when no conversation is selected.
    pub conversation_id: Option<ConversationId>,
    /// Whose chat lists to update. Unresolved ids (`None`) and repeats are skipped.
    pub participant_ids: Vec<Option<UserId>>,
    pub body: MessageBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub conversation_id: ConversationId,
    pub entry: MessageEntry,
    /// Participants whose summary now shows this message.
    pub synced: Vec<UserId>,
    /// Participants without a chat list or without a summary for the conversation.
    pub skipped: Vec<UserId>,
}

impl Outgoing {
    /// Reject the message before anything is written.
    pub fn validate(&self) -> Result<ConversationId, ValidationError> {
        match (&self.body, self.conversation_id) {
            (MessageBody::Text { .. }, _) if self.body.is_blank() => Err(ValidationError::EmptyMessage),
            (MessageBody::Text { .. }, None) => Err(ValidationError::NoActiveConversation),
            (MessageBody::Image { .. }, None) => Err(ValidationError::MissingImage),
            (MessageBody::Image { .. }, _) if self.body.is_blank() => Err(ValidationError::MissingImage),
            (_, Some(conversation_id)) => Ok(conversation_id),
        }
    }

    fn recipients(&self) -> Vec<UserId> {
        let mut ids = Vec::with_capacity(self.participant_ids.len());
        for id in self.participant_ids.iter().flatten() {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        ids
    }
}

pub async fn send(backend: &dyn ChatBackend, retry: &RetryPolicy, out: Outgoing) -> Result<SendReport, ChatError> {
    let conversation_id = out.validate()?;
    let now = Utc::now();
    let entry = MessageEntry::new(out.sender_id, out.body.clone(), now);

    // Retried appends reuse the entry id, so a lost response cannot duplicate it.
    let stored = &entry;
    retry
        .run("append message", move || backend.append_message(conversation_id, stored))
        .await
        .map_err(ChatError::Write)?;
    debug!("message {} appended to {}", entry.id, conversation_id);

    let update = SummaryUpdate {
        last_message: entry.body.preview(),
        updated_at: now,
        sender_id: out.sender_id,
    };

    let mut synced = Vec::new();
    let mut skipped = Vec::new();
    let mut first_error: Option<BackendError> = None;
    for owner in out.recipients() {
        let update = &update;
        let result = retry
            .run("update chat summary", move || {
                backend.update_chat_summary(owner, conversation_id, update)
            })
            .await;
        match result {
            Ok(true) => synced.push(owner),
            Ok(false) => {
                debug!("{} has no summary for {}, skipping", owner, conversation_id);
                skipped.push(owner);
            }
            Err(e) => {
                warn!("summary of {} for {} not updated: {}", owner, conversation_id, e);
                first_error.get_or_insert(e);
            }
        }
    }

    if let Some(source) = first_error {
        return Err(ChatError::SummarySync {
            message_id: entry.id,
            source,
        });
    }

    Ok(SendReport {
        conversation_id,
        entry,
        synced,
        skipped,
    })
}
