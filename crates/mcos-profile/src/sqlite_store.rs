use std::sync::Mutex;

use async_trait::async_trait;
use mcos_core::adapters::{ProfileDocRow, ProfileDocStore};
use mcos_core::error::{McosError, Result};
use rusqlite::Connection;

/// Default single-node `ProfileDocStore`, backed by SQLite. Hosts may swap
/// in their own implementation of the trait (spec §6) for a different
/// deployment shape; this is the one `mcos-profile` ships and uses by
/// default.
///
/// `rusqlite::Connection` is not `Sync`, so access is serialized through a
/// `Mutex` — the same tradeoff the teacher's session/memory managers make
/// for a single-node deployment.
pub struct SqliteProfileDocStore {
    db: Mutex<Connection>,
}

impl SqliteProfileDocStore {
    pub fn new(conn: Connection) -> Self {
        Self { db: Mutex::new(conn) }
    }
}

#[async_trait]
impl ProfileDocStore for SqliteProfileDocStore {
    async fn read(&self, user_id: &str) -> Result<Option<ProfileDocRow>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT profile, updated_at FROM user_profile WHERE user_id = ?1",
            rusqlite::params![user_id],
            |row| {
                Ok(ProfileDocRow {
                    profile_json: row.get(0)?,
                    updated_at: row.get(1)?,
                })
            },
        ) {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(McosError::Database(e.to_string())),
        }
    }

    async fn write(
        &self,
        user_id: &str,
        profile_json: &str,
        expected_updated_at: Option<i64>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().timestamp_millis();

        match expected_updated_at {
            None => {
                let rows = db
                    .execute(
                        "INSERT INTO user_profile (user_id, profile, updated_at)
                         VALUES (?1, ?2, ?3)
                         ON CONFLICT(user_id) DO NOTHING",
                        rusqlite::params![user_id, profile_json, now],
                    )
                    .map_err(|e| McosError::Database(e.to_string()))?;
                if rows == 0 {
                    return Err(McosError::StaleWrite {
                        user_id: user_id.to_string(),
                    });
                }
            }
            Some(expected) => {
                let rows = db
                    .execute(
                        "UPDATE user_profile SET profile = ?1, updated_at = ?2
                         WHERE user_id = ?3 AND updated_at = ?4",
                        rusqlite::params![profile_json, now, user_id, expected],
                    )
                    .map_err(|e| McosError::Database(e.to_string()))?;
                if rows == 0 {
                    return Err(McosError::StaleWrite {
                        user_id: user_id.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM user_profile WHERE user_id = ?1",
            rusqlite::params![user_id],
        )
        .map_err(|e| McosError::Database(e.to_string()))?;
        Ok(())
    }
}
