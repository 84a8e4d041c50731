use rusqlite::Connection;

use crate::error::Result;

/// Initialise the dead-letter schema in `conn`.
///
/// Live scheduling state (the job queue, per-chat mutexes, draining flags)
/// is in-process only — per spec §4.6, "multi-node deployments replace it
/// with an external queue without changing the semantics". The dead-letter
/// log is the one piece of C6 state that survives a restart, giving
/// operators an audit trail of jobs that exhausted their retry budget.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS dead_letters (
            id          TEXT    NOT NULL PRIMARY KEY,
            kind        TEXT    NOT NULL,
            user_id     TEXT    NOT NULL,
            chat_id     TEXT    NOT NULL,
            attempts    INTEGER NOT NULL,
            reason      TEXT    NOT NULL,
            created_at  TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_dead_letters_chat ON dead_letters (user_id, chat_id);
        ",
    )?;
    Ok(())
}
