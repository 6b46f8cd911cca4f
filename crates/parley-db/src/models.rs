//! Database row types. These map directly to SQLite rows and are converted
//! into parley-types documents at the edge of this crate.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use parley_types::models::{ChatSummary, MessageBody, MessageEntry, UserProfile};

pub struct IdentityRow {
    pub id: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
}

pub struct ProfileRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub name: String,
    pub avatar_url: String,
    pub bio: String,
    pub last_seen_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub user_a: String,
    pub user_b: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub created_at: String,
}

pub struct SummaryRow {
    pub conversation_id: String,
    pub r_id: String,
    pub last_message: String,
    pub updated_at: String,
    pub message_seen: bool,
}

/// Timestamps are stored as RFC 3339 with nanoseconds so that two summaries
/// written with the same instant compare equal after a round trip.
pub fn format_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("corrupt timestamp '{}'", raw))?
        .with_timezone(&Utc))
}

pub fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("corrupt id '{}'", raw))
}

impl IdentityRow {
    pub fn user_id(&self) -> Result<Uuid> {
        parse_id(&self.id)
    }
}

impl TryFrom<ProfileRow> for UserProfile {
    type Error = anyhow::Error;

    fn try_from(row: ProfileRow) -> Result<Self> {
        Ok(UserProfile {
            id: parse_id(&row.id)?,
            username: row.username,
            email: row.email,
            name: row.name,
            avatar_url: row.avatar_url,
            bio: row.bio,
            last_seen_at: parse_time(&row.last_seen_at)?,
        })
    }
}

impl TryFrom<MessageRow> for MessageEntry {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        let body = match (row.text, row.image_url) {
            (Some(text), None) => MessageBody::Text { text },
            (None, Some(image_url)) => MessageBody::Image { image_url },
            _ => return Err(anyhow!("message '{}' must carry exactly one of text or image", row.id)),
        };
        Ok(MessageEntry {
            id: parse_id(&row.id)?,
            sender_id: parse_id(&row.sender_id)?,
            body,
            created_at: parse_time(&row.created_at)?,
        })
    }
}

impl TryFrom<SummaryRow> for ChatSummary {
    type Error = anyhow::Error;

    fn try_from(row: SummaryRow) -> Result<Self> {
        Ok(ChatSummary {
            conversation_id: parse_id(&row.conversation_id)?,
            r_id: parse_id(&row.r_id)?,
            last_message: row.last_message,
            updated_at: parse_time(&row.updated_at)?,
            message_seen: row.message_seen,
        })
    }
}
