use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use uuid::Uuid;

use parley_types::models::{
    ChatListDocument, ChatSummary, ConversationDocument, MessageBody, MessageEntry, SummaryUpdate,
    UserProfile,
};

use crate::Database;
use crate::models::{
    ConversationRow, IdentityRow, MessageRow, ProfileRow, SummaryRow, format_time, parse_id,
    parse_time,
};

/// Result of appending to a conversation's message log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// An entry with this id is already stored; nothing was written.
    Duplicate,
    MissingConversation,
}

impl Database {
    // -- Identities --

    pub fn create_identity(&self, id: &Uuid, email: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO identities (id, email, password) VALUES (?1, ?2, ?3)",
                (id.to_string(), email, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_identity_by_email(&self, email: &str) -> Result<Option<IdentityRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, email, password, created_at FROM identities WHERE email = ?1",
                [email],
                |row| {
                    Ok(IdentityRow {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        password: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    // -- Sessions --

    pub fn create_session(&self, id: &Uuid, user_id: &Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, user_id) VALUES (?1, ?2)",
                (id.to_string(), user_id.to_string()),
            )?;
            Ok(())
        })
    }

    /// True while the session exists, belongs to `user_id` and has not been revoked.
    pub fn is_session_active(&self, id: &Uuid, user_id: &Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE id = ?1 AND user_id = ?2 AND revoked_at IS NULL",
                (id.to_string(), user_id.to_string()),
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Returns false if the session was unknown or already revoked.
    pub fn revoke_session(&self, id: &Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE sessions SET revoked_at = datetime('now') WHERE id = ?1 AND revoked_at IS NULL",
                [id.to_string()],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Profiles --

    pub fn put_profile(&self, profile: &UserProfile) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, username, email, name, avatar_url, bio, last_seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    username = excluded.username,
                    email = excluded.email,
                    name = excluded.name,
                    avatar_url = excluded.avatar_url,
                    bio = excluded.bio,
                    last_seen_at = excluded.last_seen_at",
                params![
                    profile.id.to_string(),
                    profile.username,
                    profile.email,
                    profile.name,
                    profile.avatar_url,
                    profile.bio,
                    format_time(&profile.last_seen_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_profile(&self, id: &Uuid) -> Result<Option<UserProfile>> {
        let row = self.with_conn(|conn| {
            query_profile(conn, "WHERE id = ?1", &id.to_string())
        })?;
        row.map(UserProfile::try_from).transpose()
    }

    /// Usernames are stored lowercase; the lookup lowercases its input too.
    pub fn find_profile_by_username(&self, username: &str) -> Result<Option<UserProfile>> {
        let row = self.with_conn(|conn| {
            query_profile(conn, "WHERE username = ?1", &username.to_lowercase())
        })?;
        row.map(UserProfile::try_from).transpose()
    }

    pub fn touch_last_seen(&self, id: &Uuid, at: &DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE profiles SET last_seen_at = ?1 WHERE id = ?2",
                (format_time(at), id.to_string()),
            )?;
            Ok(changed > 0)
        })
    }

    // -- Conversations --

    pub fn create_conversation(&self, doc: &ConversationDocument) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO conversations (id, user_a, user_b, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    doc.id.to_string(),
                    doc.participants[0].to_string(),
                    doc.participants[1].to_string(),
                    format_time(&doc.created_at),
                ],
            )?;
            for entry in &doc.messages {
                insert_message(&tx, &doc.id, entry)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_conversation_participants(&self, id: &Uuid) -> Result<Option<[Uuid; 2]>> {
        let row = self.with_conn(|conn| query_conversation(conn, id))?;
        row.map(|r| Ok([parse_id(&r.user_a)?, parse_id(&r.user_b)?]))
            .transpose()
    }

    pub fn get_conversation(&self, id: &Uuid) -> Result<Option<ConversationDocument>> {
        let loaded = self.with_conn(|conn| {
            let Some(row) = query_conversation(conn, id)? else {
                return Ok(None);
            };
            let messages = query_messages(conn, id)?;
            Ok(Some((row, messages)))
        })?;

        let Some((row, message_rows)) = loaded else {
            return Ok(None);
        };

        let messages = message_rows
            .into_iter()
            .map(MessageEntry::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(ConversationDocument {
            id: parse_id(&row.id)?,
            participants: [parse_id(&row.user_a)?, parse_id(&row.user_b)?],
            created_at: parse_time(&row.created_at)?,
            messages,
        }))
    }

    /// Atomic append. Re-appending an entry whose id is already stored is a no-op.
    pub fn append_message(&self, conversation_id: &Uuid, entry: &MessageEntry) -> Result<AppendOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            if query_conversation(&tx, conversation_id)?.is_none() {
                return Ok(AppendOutcome::MissingConversation);
            }
            let outcome = if insert_message(&tx, conversation_id, entry)? {
                AppendOutcome::Appended
            } else {
                AppendOutcome::Duplicate
            };
            tx.commit()?;
            Ok(outcome)
        })
    }

    // -- Chat lists --

    /// Replace a user's whole chat list, creating it if needed.
    pub fn put_chat_list(&self, list: &ChatListDocument) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let owner = list.user_id.to_string();
            tx.execute("INSERT OR IGNORE INTO chat_lists (user_id) VALUES (?1)", [&owner])?;
            tx.execute("DELETE FROM chat_summaries WHERE owner_id = ?1", [&owner])?;
            for (position, summary) in list.chats_data.iter().enumerate() {
                upsert_summary(&tx, &owner, summary, position as i64)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_chat_list(&self, user_id: &Uuid) -> Result<Option<ChatListDocument>> {
        let rows = self.with_conn(|conn| {
            let owner = user_id.to_string();
            let exists: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chat_lists WHERE user_id = ?1",
                [&owner],
                |row| row.get(0),
            )?;
            if exists == 0 {
                return Ok(None);
            }
            Ok(Some(query_summaries(conn, &owner)?))
        })?;

        let Some(rows) = rows else {
            return Ok(None);
        };
        let chats_data = rows
            .into_iter()
            .map(ChatSummary::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(ChatListDocument {
            user_id: *user_id,
            chats_data,
        }))
    }

    /// Append a summary to a user's list, replacing any existing summary for
    /// the same conversation. Returns false if the user has no chat list.
    pub fn add_chat_summary(&self, owner_id: &Uuid, summary: &ChatSummary) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let owner = owner_id.to_string();
            let exists: i64 = tx.query_row(
                "SELECT COUNT(*) FROM chat_lists WHERE user_id = ?1",
                [&owner],
                |row| row.get(0),
            )?;
            if exists == 0 {
                return Ok(false);
            }
            let next: i64 = tx.query_row(
                "SELECT COALESCE(MAX(position) + 1, 0) FROM chat_summaries WHERE owner_id = ?1",
                [&owner],
                |row| row.get(0),
            )?;
            upsert_summary(&tx, &owner, summary, next)?;
            tx.commit()?;
            Ok(true)
        })
    }

    /// Single-statement conditional update of one summary, keyed by
    /// (owner, conversation). Concurrent sends cannot overwrite each other's
    /// unrelated summaries. Returns false when no summary matched.
    pub fn update_chat_summary(
        &self,
        owner_id: &Uuid,
        conversation_id: &Uuid,
        update: &SummaryUpdate,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE chat_summaries
                 SET last_message = ?1,
                     updated_at = ?2,
                     message_seen = CASE WHEN r_id = ?3 THEN 0 ELSE message_seen END
                 WHERE owner_id = ?4 AND conversation_id = ?5",
                params![
                    update.last_message,
                    format_time(&update.updated_at),
                    update.sender_id.to_string(),
                    owner_id.to_string(),
                    conversation_id.to_string(),
                ],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn mark_chat_seen(&self, owner_id: &Uuid, conversation_id: &Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE chat_summaries SET message_seen = 1 WHERE owner_id = ?1 AND conversation_id = ?2",
                (owner_id.to_string(), conversation_id.to_string()),
            )?;
            Ok(changed > 0)
        })
    }
}

fn query_profile(conn: &Connection, filter: &str, key: &str) -> Result<Option<ProfileRow>> {
    let sql = format!(
        "SELECT id, username, email, name, avatar_url, bio, last_seen_at FROM profiles {} LIMIT 1",
        filter
    );
    conn.query_row(&sql, [key], |row| {
        Ok(ProfileRow {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            name: row.get(3)?,
            avatar_url: row.get(4)?,
            bio: row.get(5)?,
            last_seen_at: row.get(6)?,
        })
    })
    .optional()
}

fn query_conversation(conn: &Connection, id: &Uuid) -> Result<Option<ConversationRow>> {
    conn.query_row(
        "SELECT id, user_a, user_b, created_at FROM conversations WHERE id = ?1",
        [id.to_string()],
        |row| {
            Ok(ConversationRow {
                id: row.get(0)?,
                user_a: row.get(1)?,
                user_b: row.get(2)?,
                created_at: row.get(3)?,
            })
        },
    )
    .optional()
}

fn query_messages(conn: &Connection, conversation_id: &Uuid) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, sender_id, text, image_url, created_at
         FROM messages
         WHERE conversation_id = ?1
         ORDER BY seq ASC",
    )?;

    let rows = stmt
        .query_map([conversation_id.to_string()], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                sender_id: row.get(1)?,
                text: row.get(2)?,
                image_url: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_summaries(conn: &Connection, owner: &str) -> Result<Vec<SummaryRow>> {
    let mut stmt = conn.prepare(
        "SELECT conversation_id, r_id, last_message, updated_at, message_seen
         FROM chat_summaries
         WHERE owner_id = ?1
         ORDER BY position ASC",
    )?;

    let rows = stmt
        .query_map([owner], |row| {
            Ok(SummaryRow {
                conversation_id: row.get(0)?,
                r_id: row.get(1)?,
                last_message: row.get(2)?,
                updated_at: row.get(3)?,
                message_seen: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Returns false if an entry with the same id already exists.
fn insert_message(conn: &Connection, conversation_id: &Uuid, entry: &MessageEntry) -> Result<bool> {
    let (text, image_url) = match &entry.body {
        MessageBody::Text { text } => (Some(text.as_str()), None),
        MessageBody::Image { image_url } => (None, Some(image_url.as_str())),
    };
    let changed = conn.execute(
        "INSERT OR IGNORE INTO messages (id, conversation_id, sender_id, text, image_url, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.id.to_string(),
            conversation_id.to_string(),
            entry.sender_id.to_string(),
            text,
            image_url,
            format_time(&entry.created_at),
        ],
    )?;
    Ok(changed > 0)
}

fn upsert_summary(conn: &Connection, owner: &str, summary: &ChatSummary, position: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO chat_summaries
            (owner_id, conversation_id, r_id, last_message, updated_at, message_seen, position)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(owner_id, conversation_id) DO UPDATE SET
            r_id = excluded.r_id,
            last_message = excluded.last_message,
            updated_at = excluded.updated_at,
            message_seen = excluded.message_seen",
        params![
            owner,
            summary.conversation_id.to_string(),
            summary.r_id.to_string(),
            summary.last_message,
            format_time(&summary.updated_at),
            summary.message_seen,
            position,
        ],
    )?;
    Ok(())
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
