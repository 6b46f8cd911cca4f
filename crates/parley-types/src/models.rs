use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;
pub type ConversationId = Uuid;

/// Longest text preview kept on a chat summary, counted in characters.
pub const PREVIEW_MAX_CHARS: usize = 30;

/// Preview shown for any image message, whatever the file was called.
pub const IMAGE_PREVIEW: &str = "Image";

pub const DEFAULT_BIO: &str = "Hey, There i am using Chat App.";

/// Payload of a message. Exactly one of text or image is ever present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageBody {
    Text { text: String },
    Image { image_url: String },
}

impl MessageBody {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(image_url: impl Into<String>) -> Self {
        Self::Image {
            image_url: image_url.into(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Image { .. } => None,
        }
    }

    pub fn as_image_url(&self) -> Option<&str> {
        match self {
            Self::Image { image_url } => Some(image_url),
            Self::Text { .. } => None,
        }
    }

    /// True for whitespace-only text or an empty image reference.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Text { text } => text.trim().is_empty(),
            Self::Image { image_url } => image_url.trim().is_empty(),
        }
    }

    /// The `lastMessage` preview written to chat summaries.
    pub fn preview(&self) -> String {
        match self {
            Self::Text { text } => text.chars().take(PREVIEW_MAX_CHARS).collect(),
            Self::Image { .. } => IMAGE_PREVIEW.to_string(),
        }
    }
}

/// One entry in a conversation's message log. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntry {
    /// Client-generated; a second append with the same id is ignored.
    pub id: Uuid,
    pub sender_id: UserId,
    #[serde(flatten)]
    pub body: MessageBody,
    pub created_at: DateTime<Utc>,
}

impl MessageEntry {
    pub fn new(sender_id: UserId, body: MessageBody, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_id,
            body,
            created_at,
        }
    }
}

/// Append-only message log shared by exactly two participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationDocument {
    pub id: ConversationId,
    pub participants: [UserId; 2],
    pub created_at: DateTime<Utc>,
    /// Chronological, oldest first.
    pub messages: Vec<MessageEntry>,
}

impl ConversationDocument {
    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.participants.contains(&user_id)
    }

    /// The participant that is not `user_id`, if `user_id` takes part at all.
    pub fn counterparty_of(&self, user_id: UserId) -> Option<UserId> {
        match self.participants {
            [a, b] if a == user_id => Some(b),
            [a, b] if b == user_id => Some(a),
            _ => None,
        }
    }
}

/// One user's view of one conversation, embedded in their chat list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub conversation_id: ConversationId,
    /// The other participant.
    pub r_id: UserId,
    pub last_message: String,
    pub updated_at: DateTime<Utc>,
    pub message_seen: bool,
}

impl ChatSummary {
    /// Summary seeded when a conversation is first established.
    pub fn opened(conversation_id: ConversationId, r_id: UserId, at: DateTime<Utc>) -> Self {
        Self {
            conversation_id,
            r_id,
            last_message: String::new(),
            updated_at: at,
            message_seen: true,
        }
    }
}

/// Per-user denormalized index of conversation previews.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatListDocument {
    pub user_id: UserId,
    pub chats_data: Vec<ChatSummary>,
}

impl ChatListDocument {
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            chats_data: Vec::new(),
        }
    }

    pub fn find(&self, conversation_id: ConversationId) -> Option<&ChatSummary> {
        self.chats_data
            .iter()
            .find(|c| c.conversation_id == conversation_id)
    }
}

/// Field update applied to one summary after a send.
///
/// `message_seen` drops to false only on the copy whose `r_id` equals
/// `sender_id`, i.e. the recipient's copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryUpdate {
    pub last_message: String,
    pub updated_at: DateTime<Utc>,
    pub sender_id: UserId,
}

impl SummaryUpdate {
    pub fn apply(&self, summary: &mut ChatSummary) {
        summary.last_message = self.last_message.clone();
        summary.updated_at = self.updated_at;
        if summary.r_id == self.sender_id {
            summary.message_seen = false;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub name: String,
    pub avatar_url: String,
    pub bio: String,
    pub last_seen_at: DateTime<Utc>,
}

impl UserProfile {
    /// Profile written right after an identity is created.
    pub fn for_signup(id: UserId, username: &str, email: &str, at: DateTime<Utc>) -> Self {
        Self {
            id,
            username: username.to_lowercase(),
            email: email.to_string(),
            name: String::new(),
            avatar_url: String::new(),
            bio: DEFAULT_BIO.to_string(),
            last_seen_at: at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
}

impl ProfilePatch {
    pub fn apply(&self, profile: &mut UserProfile) {
        if let Some(name) = &self.name {
            profile.name = name.clone();
        }
        if let Some(avatar_url) = &self.avatar_url {
            profile.avatar_url = avatar_url.clone();
        }
        if let Some(bio) = &self.bio {
            profile.bio = bio.clone();
        }
    }
}
