use rusqlite::{Connection, Result};

/// Initialise the profile table. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS user_profile (
            user_id    TEXT PRIMARY KEY,
            profile    TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        ) STRICT;",
    )
}
