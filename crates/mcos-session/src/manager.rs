use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mcos_core::types::{ChatSession, RollingSummary, Turn};
use mcos_core::{validate_id, McosError};
use tracing::{debug, instrument};

use crate::error::{Result, SessionError};
use crate::types::ChatKey;

/// Process-local store of `ChatSession`s, striped by `dashmap`'s internal
/// sharding (default 64 stripes). Each session is additionally guarded by
/// its own `Mutex` so callers holding a chat's lock never block callers
/// working a different chat — no global lock sits on the read path.
///
/// C1 is purely in-memory (spec §3 "Lifecycle", §4.1 "Failure"): state lost
/// on restart is tolerated because C4 holds the durable copy.
pub struct SessionStore {
    sessions: DashMap<ChatKey, Mutex<ChatSession>>,
    turn_cap: usize,
}

impl SessionStore {
    pub fn new(turn_cap: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            turn_cap,
        }
    }

    fn validated_key(user_id: &str, chat_id: &str) -> Result<ChatKey> {
        if !validate_id(user_id) {
            return Err(SessionError::InvalidKey(format!("invalid userId: {user_id}")));
        }
        if !validate_id(chat_id) {
            return Err(SessionError::InvalidKey(format!("invalid chatId: {chat_id}")));
        }
        Ok(ChatKey::new(user_id, chat_id))
    }

    /// `Append(userId, chatId, turn) -> seq` (spec §4.1).
    ///
    /// Assigns `seq`, appends, evicts the oldest turn if over `turn_cap`,
    /// bumps `lastAccessedAt`. Fails with `InvalidInput` if ids are malformed
    /// or both halves of the turn are empty.
    #[instrument(skip(self, turn), fields(user_id, chat_id))]
    pub fn append(
        &self,
        user_id: &str,
        chat_id: &str,
        mut turn: Turn,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let key = Self::validated_key(user_id, chat_id)?;
        if !turn.is_valid_halves() {
            return Err(SessionError::InvalidKey(
                "turn has both halves empty".to_string(),
            ));
        }

        let entry = self
            .sessions
            .entry(key)
            .or_insert_with(|| Mutex::new(ChatSession::new(user_id, chat_id, now)));
        let mut session = entry.lock().unwrap();

        // Duplicate id insertion is a no-op (spec §3 `Turn.id`).
        if !turn.id.is_empty() {
            if let Some(existing) = session.turns.iter().find(|t| t.id == turn.id) {
                return Ok(existing.seq);
            }
        }

        let seq = session.next_seq;
        turn.seq = seq;
        if turn.id.is_empty() {
            turn.id = mcos_core::compute_turn_id(user_id, chat_id, seq, turn.created_at);
        }
        session.next_seq += 1;
        session.turns.push(turn);
        session.last_accessed_at = now;

        if session.turns.len() > self.turn_cap {
            let evicted = session.turns.remove(0);
            debug!(seq = evicted.seq, "evicted oldest turn over session cap");
        }

        Ok(seq)
    }

    /// `Recent(userId, chatId, n) -> []Turn` (spec §4.1). Newest last, empty
    /// if the chat has never been seen this process.
    #[instrument(skip(self), fields(user_id, chat_id, n))]
    pub fn recent(&self, user_id: &str, chat_id: &str, n: usize) -> Result<Vec<Turn>> {
        let key = Self::validated_key(user_id, chat_id)?;
        let Some(entry) = self.sessions.get(&key) else {
            return Ok(Vec::new());
        };
        let session = entry.lock().unwrap();
        let start = session.turns.len().saturating_sub(n);
        Ok(session.turns[start..].to_vec())
    }

    /// `Search(userId, chatId?, query, k) -> []Turn` (spec §4.1). Lightweight
    /// substring/token-overlap ranking over in-memory turns; no embeddings.
    /// The fast first tier before falling back to C4.
    #[instrument(skip(self, query), fields(user_id, chat_id, k))]
    pub fn search(
        &self,
        user_id: &str,
        chat_id: Option<&str>,
        query: &str,
        k: usize,
    ) -> Result<Vec<Turn>> {
        if !validate_id(user_id) {
            return Err(SessionError::InvalidKey(format!("invalid userId: {user_id}")));
        }
        let query_tokens: Vec<String> = tokenize(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f64, Turn)> = Vec::new();
        for entry in self.sessions.iter() {
            if entry.key().user_id != user_id {
                continue;
            }
            if let Some(cid) = chat_id {
                if entry.key().chat_id != cid {
                    continue;
                }
            }
            let session = entry.value().lock().unwrap();
            for turn in &session.turns {
                let score = overlap_score(&query_tokens, &turn.user_text, &turn.assistant_text);
                if score > 0.0 {
                    scored.push((score, turn.clone()));
                }
            }
        }

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(k).map(|(_, t)| t).collect())
    }

    /// `UpdateSummary(userId, chatId, summary)` (spec §4.1). Replaces
    /// `rollingSummary` atomically; rejects if `coveredThroughSeq` does not
    /// advance past the existing watermark.
    #[instrument(skip(self, summary), fields(user_id, chat_id))]
    pub fn update_summary(
        &self,
        user_id: &str,
        chat_id: &str,
        summary: RollingSummary,
    ) -> Result<()> {
        let key = Self::validated_key(user_id, chat_id)?;
        let entry = self
            .sessions
            .get(&key)
            .ok_or_else(|| SessionError::NotFound {
                user_id: user_id.to_string(),
                chat_id: chat_id.to_string(),
            })?;
        let mut session = entry.lock().unwrap();

        let existing = session
            .rolling_summary
            .as_ref()
            .map(|s| s.covered_through_seq)
            .unwrap_or(-1);
        if summary.covered_through_seq <= existing {
            return Err(SessionError::StaleSummary {
                new: summary.covered_through_seq,
                existing,
            });
        }
        session.rolling_summary = Some(summary);
        Ok(())
    }

    /// `Purge(userId, chatId?)` (spec §4.1). Removes one chat, or every chat
    /// for the user when `chat_id` is `None`.
    #[instrument(skip(self), fields(user_id, chat_id))]
    pub fn purge(&self, user_id: &str, chat_id: Option<&str>) -> Result<()> {
        if !validate_id(user_id) {
            return Err(SessionError::InvalidKey(format!("invalid userId: {user_id}")));
        }
        match chat_id {
            Some(cid) => {
                let key = Self::validated_key(user_id, cid)?;
                self.sessions.remove(&key);
            }
            None => {
                self.sessions.retain(|k, _| k.user_id != user_id);
            }
        }
        Ok(())
    }

    /// Fetch a clone of the session state, if present this process.
    pub fn get(&self, user_id: &str, chat_id: &str) -> Option<ChatSession> {
        let key = ChatKey::new(user_id, chat_id);
        self.sessions.get(&key).map(|e| e.lock().unwrap().clone())
    }

    /// Whether `turn_id` is still present in `(userId, chatId)`'s turn list.
    /// C3 consults this to decide whether a field's backing evidence has
    /// been deleted (spec §4.3: deleted evidence makes the field overwritable
    /// regardless of confidence) — `DeleteChat`/`DeleteUser` purge the chat
    /// from here, so a missing turn means its evidence is gone.
    pub fn turn_exists(&self, user_id: &str, chat_id: &str, turn_id: &str) -> bool {
        let key = ChatKey::new(user_id, chat_id);
        self.sessions
            .get(&key)
            .map(|e| e.lock().unwrap().turns.iter().any(|t| t.id == turn_id))
            .unwrap_or(false)
    }

    /// Chat keys inactive for at least `ttl_secs` as of `now` (spec §4.1
    /// eviction). The janitor calling this is responsible for invoking
    /// `EndChat(..., force=true)` on each before calling [`Self::purge`], so
    /// uncovered turns are flushed before the in-memory copy is dropped.
    pub fn expired(&self, ttl_secs: u64, now: DateTime<Utc>) -> Vec<ChatKey> {
        self.sessions
            .iter()
            .filter_map(|entry| {
                let session = entry.value().lock().unwrap();
                let idle = (now - session.last_accessed_at).num_seconds();
                if idle >= ttl_secs as i64 {
                    Some(entry.key().clone())
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn tokenize(s: &str) -> Vec<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn overlap_score(query_tokens: &[String], user_text: &str, assistant_text: &str) -> f64 {
    let haystack = format!("{user_text} {assistant_text}");
    if haystack.trim().is_empty() {
        return 0.0;
    }
    let doc_tokens: std::collections::HashSet<String> = tokenize(&haystack).into_iter().collect();
    let matches = query_tokens
        .iter()
        .filter(|t| doc_tokens.contains(*t))
        .count();
    if matches == 0 {
        return 0.0;
    }
    matches as f64 / query_tokens.len() as f64
}

/// Sweep expired chats once per minute at most. Intended to be driven by a
/// `tokio::time::interval` in the `mcos` container's startup wiring; kept
/// here only as a pure helper so the cadence rule is testable without a
/// real timer.
pub fn should_run_janitor(last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match last_run {
        None => true,
        Some(t) => (now - t).num_seconds() >= 60,
    }
}

impl From<McosError> for SessionError {
    fn from(e: McosError) -> Self {
        SessionError::InvalidKey(e.to_string())
    }
}
