use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mcos_core::adapters::{VectorQuery, VectorStore};
use mcos_core::types::{LedgerEntry, MemoryMetadata};
use mcos_core::validate_id;
use tracing::{debug, instrument, warn};

use crate::error::{LedgerError, Result};
use crate::types::ChatKey;

/// `RECONCILE_TOP_K` — spec §4.2: "metadata-only query to C4 (topK up to
/// 10,000, filter {userId, chatId})".
const RECONCILE_TOP_K: usize = 10_000;

/// Tracks what has durably reached C4 per chat and enforces the upload
/// cooldown. Purely in-process (spec §4.2 ambient addition): correctness
/// depends on reconciliation against C4, not on the ledger's own durability.
pub struct UploadLedger {
    entries: DashMap<ChatKey, Mutex<LedgerEntry>>,
}

impl Default for UploadLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadLedger {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    fn validated_key(user_id: &str, chat_id: &str) -> Result<ChatKey> {
        if !validate_id(user_id) || !validate_id(chat_id) {
            return Err(LedgerError::InvalidKey(format!("{user_id}/{chat_id}")));
        }
        Ok(ChatKey::new(user_id, chat_id))
    }

    /// `Unuploaded(chatId, turnIds) -> []turnId` (spec §4.2).
    ///
    /// On the first call per process for this chat, reconciles against C4
    /// before answering: queries with a `{userId, chatId}` filter and
    /// `topK = 10_000`, seeding `uploadedTurnIds` from the results.
    /// Reconciliation failures fall back to "assume nothing uploaded" —
    /// harmless since `VectorStore::upsert` is idempotent on `id`.
    #[instrument(skip(self, vector_store, turn_ids), fields(user_id, chat_id))]
    pub async fn unuploaded(
        &self,
        vector_store: &dyn VectorStore,
        user_id: &str,
        chat_id: &str,
        turn_ids: &[String],
    ) -> Result<Vec<String>> {
        let key = Self::validated_key(user_id, chat_id)?;
        let needs_reconcile = !self.entries.contains_key(&key);
        if needs_reconcile {
            self.reconcile(vector_store, &key).await;
        }

        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| Mutex::new(LedgerEntry::default()));
        let guard = entry.lock().unwrap();
        Ok(turn_ids
            .iter()
            .filter(|t| !guard.uploaded_turn_ids.contains(*t))
            .cloned()
            .collect())
    }

    async fn reconcile(&self, vector_store: &dyn VectorStore, key: &ChatKey) {
        let query = VectorQuery {
            vector: Vec::new(),
            top_k: RECONCILE_TOP_K,
            filter_user_id: key.user_id.clone(),
            filter_chat_id: Some(key.chat_id.clone()),
            filter_kind: None,
        };
        let now = Utc::now();
        match vector_store.query(query).await {
            Ok(hits) => {
                let mut uploaded = std::collections::HashSet::new();
                for hit in &hits {
                    if let Ok(meta) = serde_json::from_value::<MemoryMetadata>(hit.metadata.clone())
                    {
                        if let Some(turn_id) = meta.turn_id {
                            uploaded.insert(turn_id);
                        }
                    }
                }
                debug!(recovered = uploaded.len(), "cold-start reconciliation complete");
                self.entries.insert(
                    key.clone(),
                    Mutex::new(LedgerEntry {
                        uploaded_turn_ids: uploaded,
                        last_upload_at: None,
                        last_synced_at: Some(now),
                    }),
                );
            }
            Err(e) => {
                warn!(error = %e, "reconciliation against C4 failed, assuming nothing uploaded");
                self.entries
                    .entry(key.clone())
                    .or_insert_with(|| Mutex::new(LedgerEntry::default()));
            }
        }
    }

    /// `MarkUploaded(chatId, turnIds)` (spec §4.2).
    #[instrument(skip(self, turn_ids), fields(user_id, chat_id))]
    pub fn mark_uploaded(&self, user_id: &str, chat_id: &str, turn_ids: &[String], now: DateTime<Utc>) -> Result<()> {
        let key = Self::validated_key(user_id, chat_id)?;
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| Mutex::new(LedgerEntry::default()));
        let mut guard = entry.lock().unwrap();
        guard.uploaded_turn_ids.extend(turn_ids.iter().cloned());
        guard.last_upload_at = Some(now);
        Ok(())
    }

    /// `CooldownExpired(chatId) -> bool` (spec §4.2). True iff no prior
    /// upload or `now - lastUploadAt >= cooldown_secs`. Advisory — the
    /// orchestrator may override this with an explicit `force` flag.
    pub fn cooldown_expired(
        &self,
        user_id: &str,
        chat_id: &str,
        cooldown_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let key = Self::validated_key(user_id, chat_id)?;
        let Some(entry) = self.entries.get(&key) else {
            return Ok(true);
        };
        let guard = entry.lock().unwrap();
        Ok(match guard.last_upload_at {
            None => true,
            Some(last) => (now - last).num_seconds() >= cooldown_secs as i64,
        })
    }

    /// `Reset(chatId)` / `Reset(userId, allChats)` (spec §4.2). Used after
    /// `DeleteChat` / `DeleteUser`.
    pub fn reset(&self, user_id: &str, chat_id: Option<&str>) -> Result<()> {
        if !validate_id(user_id) {
            return Err(LedgerError::InvalidKey(user_id.to_string()));
        }
        match chat_id {
            Some(cid) => {
                let key = Self::validated_key(user_id, cid)?;
                self.entries.remove(&key);
            }
            None => {
                self.entries.retain(|k, _| k.user_id != user_id);
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
