use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Latest schema version this build knows how to create.
pub const LATEST_VERSION: i64 = 1;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version = current_version(conn)?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                role            TEXT NOT NULL CHECK (role IN ('student', 'teacher', 'admin')),
                user_id         TEXT NOT NULL,
                email           TEXT NOT NULL,
                password        TEXT NOT NULL,
                full_name       TEXT NOT NULL DEFAULT '',
                profile_picture TEXT,
                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (role, user_id),
                UNIQUE (role, email)
            );

            CREATE TABLE conversations (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                name        TEXT,
                is_group    INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE conversation_members (
                conversation_id INTEGER NOT NULL REFERENCES conversations(id),
                user_id         TEXT NOT NULL,
                role            TEXT NOT NULL,
                PRIMARY KEY (conversation_id, user_id, role),
                FOREIGN KEY (role, user_id) REFERENCES users(role, user_id)
            );

            CREATE INDEX idx_members_user
                ON conversation_members(user_id, role);

            CREATE TABLE messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL REFERENCES conversations(id),
                sender_id       TEXT NOT NULL,
                sender_role     TEXT NOT NULL,
                body            TEXT NOT NULL,
                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                FOREIGN KEY (sender_role, sender_id) REFERENCES users(role, user_id)
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at);

            CREATE TABLE announcements (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                title       TEXT NOT NULL,
                content     TEXT NOT NULL,
                author_id   TEXT NOT NULL,
                author_role TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (datetime('now')),
                FOREIGN KEY (author_role, author_id) REFERENCES users(role, user_id)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete (schema v{})", current_version(conn)?);
    Ok(())
}

pub fn current_version(conn: &Connection) -> Result<i64> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;
    Ok(version)
}
