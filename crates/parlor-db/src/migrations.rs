use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                external_id TEXT NOT NULL UNIQUE,
                email       TEXT NOT NULL,
                name        TEXT NOT NULL,
                avatar_url  TEXT,
                is_online   INTEGER NOT NULL DEFAULT 0,
                last_seen   INTEGER NOT NULL,
                created_at  INTEGER NOT NULL
            );

            CREATE INDEX idx_users_email ON users(email);

            -- direct_key holds the sorted participant pair for direct
            -- conversations and is NULL for groups.
            CREATE TABLE conversations (
                id                   TEXT PRIMARY KEY,
                kind                 TEXT NOT NULL CHECK (kind IN ('direct', 'group')),
                name                 TEXT,
                direct_key           TEXT UNIQUE,
                created_by           TEXT NOT NULL REFERENCES users(id),
                last_message_at      INTEGER NOT NULL,
                last_message_preview TEXT,
                created_at           INTEGER NOT NULL
            );

            CREATE INDEX idx_conversations_last_message
                ON conversations(last_message_at);

            CREATE TABLE conversation_members (
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                user_id         TEXT NOT NULL,
                joined_at       INTEGER NOT NULL,
                PRIMARY KEY (conversation_id, user_id)
            );

            CREATE INDEX idx_members_user ON conversation_members(user_id);

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                sender_id       TEXT NOT NULL,
                content         TEXT NOT NULL,
                is_deleted      INTEGER NOT NULL DEFAULT 0,
                created_at      INTEGER NOT NULL,
                updated_at      INTEGER
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at);

            CREATE TABLE reactions (
                message_id  TEXT NOT NULL REFERENCES messages(id),
                user_id     TEXT NOT NULL,
                emoji       TEXT NOT NULL,
                created_at  INTEGER NOT NULL,
                PRIMARY KEY (message_id, user_id)
            );

            CREATE TABLE typing_indicators (
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                user_id         TEXT NOT NULL,
                expires_at      INTEGER NOT NULL,
                PRIMARY KEY (conversation_id, user_id)
            );

            CREATE INDEX idx_typing_expires ON typing_indicators(expires_at);

            CREATE TABLE presence (
                user_id         TEXT PRIMARY KEY REFERENCES users(id),
                conversation_id TEXT,
                last_heartbeat  INTEGER NOT NULL
            );

            CREATE INDEX idx_presence_conversation ON presence(conversation_id);

            CREATE TABLE unread_counters (
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                user_id         TEXT NOT NULL,
                count           INTEGER NOT NULL DEFAULT 0,
                last_read_at    INTEGER NOT NULL,
                PRIMARY KEY (conversation_id, user_id)
            );

            CREATE INDEX idx_unread_user ON unread_counters(user_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
