use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS identities (
            id          TEXT PRIMARY KEY,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES identities(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            revoked_at  TEXT
        );

        CREATE TABLE IF NOT EXISTS profiles (
            id            TEXT PRIMARY KEY,
            username      TEXT NOT NULL,
            email         TEXT NOT NULL,
            name          TEXT NOT NULL,
            avatar_url    TEXT NOT NULL,
            bio           TEXT NOT NULL,
            last_seen_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_profiles_username
            ON profiles(username);

        CREATE TABLE IF NOT EXISTS conversations (
            id          TEXT PRIMARY KEY,
            user_a      TEXT NOT NULL,
            user_b      TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        -- seq keeps append order; id is client-generated and makes appends idempotent
        CREATE TABLE IF NOT EXISTS messages (
            seq              INTEGER PRIMARY KEY AUTOINCREMENT,
            id               TEXT NOT NULL UNIQUE,
            conversation_id  TEXT NOT NULL REFERENCES conversations(id),
            sender_id        TEXT NOT NULL,
            text             TEXT,
            image_url        TEXT,
            created_at       TEXT NOT NULL,
            CHECK ((text IS NULL) <> (image_url IS NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, seq);

        CREATE TABLE IF NOT EXISTS chat_lists (
            user_id     TEXT PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS chat_summaries (
            owner_id         TEXT NOT NULL REFERENCES chat_lists(user_id) ON DELETE CASCADE,
            conversation_id  TEXT NOT NULL,
            r_id             TEXT NOT NULL,
            last_message     TEXT NOT NULL,
            updated_at       TEXT NOT NULL,
            message_seen     INTEGER NOT NULL,
            position         INTEGER NOT NULL,
            PRIMARY KEY (owner_id, conversation_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
