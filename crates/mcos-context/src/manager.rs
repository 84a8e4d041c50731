//! C5 ContextAssembler — builds the bounded, prompt-ready context bundle for
//! one turn (spec §4.5).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use mcos_core::adapters::{DocumentCache, IntentTag, ModelAdapter};
use mcos_core::types::{Chunk, RecordKind, Scope, Turn, UserProfile};
use mcos_core::validate_id;
use mcos_profile::ProfileStore;
use mcos_session::SessionStore;
use mcos_vector::VectorMemory;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use crate::budget::{self, BudgetSections};
use crate::error::{ContextError, Result};
use crate::types::{AssembleOptions, ContextBundle, TokenBudget};

/// `SessionStore.Recent(userId, chatId, n=5)` (spec §4.5 step 2).
const RECENT_TURNS_N: usize = 5;
/// Below this many local turns, retrieval always runs (spec §4.5 step 4).
const MIN_LOCAL_TURNS_BEFORE_RETRIEVAL: usize = 3;
/// `DocumentCache.TopChunks(documentId, userMessage)` fetches this many (spec §4.5 step 6).
const DOCUMENT_CHUNKS_K: usize = 3;
/// Profile background is rendered to its first 200 chars (spec §4.5 step 1).
const PROFILE_BACKGROUND_CHARS: usize = 200;
const PROFILE_TOP_INTERESTS: usize = 5;
/// Default `AssembleContext` deadline (spec §5).
const DEFAULT_DEADLINE: Duration = Duration::from_secs(3);

/// Closed recall-trigger phrase list (spec §4.5 step 4), case-insensitive.
const RECALL_TRIGGERS: &[&str] = &[
    "remember",
    "earlier",
    "last time",
    "we discussed",
    "you said",
    "my name",
    "my preferences",
];

pub struct ContextAssembler {
    session: Arc<SessionStore>,
    profile: Arc<ProfileStore>,
    vector: Arc<VectorMemory>,
    model: Arc<dyn ModelAdapter>,
    document_cache: Option<Arc<dyn DocumentCache>>,
    retrieval_topk: usize,
    context_token_cap: usize,
}

impl ContextAssembler {
    pub fn new(
        session: Arc<SessionStore>,
        profile: Arc<ProfileStore>,
        vector: Arc<VectorMemory>,
        model: Arc<dyn ModelAdapter>,
        retrieval_topk: usize,
        context_token_cap: usize,
    ) -> Self {
        Self {
            session,
            profile,
            vector,
            model,
            document_cache: None,
            retrieval_topk,
            context_token_cap,
        }
    }

    pub fn with_document_cache(mut self, cache: Arc<dyn DocumentCache>) -> Self {
        self.document_cache = Some(cache);
        self
    }

    /// `AssembleContext(userId, chatId, userMessage, opts) -> ContextBundle` (spec §4.5).
    #[instrument(skip(self, user_message, opts), fields(user_id, chat_id))]
    pub async fn assemble_context(
        &self,
        user_id: &str,
        chat_id: &str,
        user_message: &str,
        opts: AssembleOptions,
    ) -> Result<ContextBundle> {
        if !validate_id(user_id) || !validate_id(chat_id) {
            return Err(ContextError::InvalidInput(format!(
                "invalid userId/chatId: {user_id}/{chat_id}"
            )));
        }
        if user_message.trim().is_empty() {
            return Err(ContextError::InvalidInput("userMessage must not be empty".into()));
        }

        let deadline = Instant::now() + opts.deadline.unwrap_or(DEFAULT_DEADLINE);
        let mut partial = false;

        // Steps 2-3 read C1's per-chat state as a single locked snapshot
        // (spec §5: "consistent snapshot of C1 state for the target chat").
        let session_snapshot = self.session.get(user_id, chat_id);
        let recent_turns: Vec<Turn> = session_snapshot
            .as_ref()
            .map(|s| {
                let start = s.turns.len().saturating_sub(RECENT_TURNS_N);
                s.turns[start..].to_vec()
            })
            .unwrap_or_default();
        let rolling_summary = session_snapshot.as_ref().and_then(|s| {
            s.rolling_summary.as_ref().and_then(|summary| {
                let covered_ok = recent_turns
                    .first()
                    .map(|t| summary.covered_through_seq >= t.seq as i64 - 1)
                    .unwrap_or(true);
                covered_ok.then(|| summary.clone())
            })
        });

        // Step 1: profile slice.
        let (profile_identity, profile_background) =
            match run_with_deadline(deadline, self.profile.get(user_id)).await {
                Completed(Ok(profile)) => render_profile(&profile),
                Completed(Err(e)) => {
                    warn!(user_id, error = %e, "profile fetch degraded, omitting profile slice");
                    (String::new(), String::new())
                }
                TimedOut => {
                    partial = true;
                    (String::new(), String::new())
                }
            };

        // Step 4: retrieval decision.
        let retrieval_reason = self.retrieval_reason(&recent_turns, user_message).await;

        // Step 5: retrieval scope (+ optional second wholeUser pass).
        let mut retrieved_chunks: Vec<Chunk> = Vec::new();
        if let Some(reason) = retrieval_reason {
            info!(user_id, chat_id, reason, "running long-term retrieval");
            let k = self.retrieval_topk;
            let is_new_chat = recent_turns.is_empty();
            let scope = if is_new_chat {
                Scope::WholeUser {
                    user_id: user_id.to_string(),
                }
            } else {
                Scope::ChatOnly {
                    user_id: user_id.to_string(),
                    chat_id: chat_id.to_string(),
                }
            };
            match run_with_deadline(deadline, self.vector.query(user_message, k, &scope)).await {
                Completed(Ok(chunks)) => {
                    retrieved_chunks = chunks;
                    if !is_new_chat && retrieved_chunks.len() < k / 2 {
                        let whole_scope = Scope::WholeUser {
                            user_id: user_id.to_string(),
                        };
                        match run_with_deadline(deadline, self.vector.query(user_message, k, &whole_scope)).await {
                            Completed(Ok(extra)) => {
                                let seen: HashSet<String> =
                                    retrieved_chunks.iter().map(|c| c.source_id.clone()).collect();
                                retrieved_chunks
                                    .extend(extra.into_iter().filter(|c| !seen.contains(&c.source_id)));
                            }
                            Completed(Err(e)) => {
                                warn!(user_id, error = %e, "second wholeUser retrieval degraded");
                            }
                            TimedOut => partial = true,
                        }
                    }
                }
                Completed(Err(e)) => {
                    warn!(user_id, chat_id, error = %e, "retrieval degraded, omitting retrievedChunks");
                }
                TimedOut => partial = true,
            }
        } else {
            debug!(user_id, chat_id, "skipping long-term retrieval: no trigger matched");
        }

        // Step 6: document chunks.
        let mut document_chunks: Vec<Chunk> = Vec::new();
        if let Some(document_id) = &opts.document_id {
            if let Some(cache) = &self.document_cache {
                match run_with_deadline(deadline, cache.top_chunks(document_id, user_message, DOCUMENT_CHUNKS_K)).await
                {
                    Completed(Ok(texts)) => {
                        document_chunks = texts
                            .into_iter()
                            .map(|text| Chunk {
                                text,
                                score: 1.0,
                                source_id: document_id.clone(),
                                kind: RecordKind::Conversation,
                                seq: None,
                            })
                            .collect();
                    }
                    Completed(Err(e)) => {
                        warn!(user_id, error = %e, "document cache degraded, omitting documentChunks");
                    }
                    TimedOut => partial = true,
                }
            }
        }

        // Step 7: budgeting.
        let (summary_text, key_facts) = rolling_summary
            .as_ref()
            .map(|s| (s.text.clone(), s.key_facts.clone()))
            .unwrap_or_default();

        let sections = BudgetSections {
            profile_identity_tokens: budget::estimate_tokens(&profile_identity),
            background_text: profile_background,
            rolling_summary: summary_text,
            recent_turn_tokens: recent_turns.iter().map(turn_tokens).collect(),
            retrieved_chunk_tokens: retrieved_chunks.iter().map(|c| budget::estimate_tokens(&c.text)).collect(),
            current_message_tokens: budget::estimate_tokens(user_message),
        };
        let fitted = budget::fit_to_cap(&sections, self.context_token_cap);

        let kept_turns_start = recent_turns.len() - fitted.kept_recent_turns;
        let recent_turns = recent_turns[kept_turns_start..].to_vec();
        retrieved_chunks.truncate(fitted.kept_retrieved_chunks);

        let profile_text = if profile_identity.is_empty() && fitted.background_text.is_empty() {
            String::new()
        } else {
            format!("{profile_identity}{}", fitted.background_text)
        };

        Ok(ContextBundle {
            profile_text,
            rolling_summary: fitted.rolling_summary,
            key_facts,
            recent_turns,
            retrieved_chunks,
            document_chunks,
            token_budget: TokenBudget {
                used: fitted.used,
                cap: self.context_token_cap,
            },
            partial,
        })
    }

    /// Step 4: decide whether to run retrieval, checking cheap signals
    /// (local turn count, trigger phrases) before the model classifier.
    async fn retrieval_reason(&self, recent_turns: &[Turn], user_message: &str) -> Option<&'static str> {
        if recent_turns.len() < MIN_LOCAL_TURNS_BEFORE_RETRIEVAL {
            return Some("local tier produced fewer than 3 turns");
        }
        if contains_recall_trigger(user_message) {
            return Some("message contains a recall trigger phrase");
        }
        match self.model.classify_intent(user_message).await {
            Ok(IntentTag::ReferencesPast) => Some("intent classifier tagged references_past"),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "intent classification failed, skipping classifier signal");
                None
            }
        }
    }
}

fn turn_tokens(turn: &Turn) -> usize {
    budget::estimate_tokens(&turn.user_text) + budget::estimate_tokens(&turn.assistant_text)
}

fn contains_recall_trigger(message: &str) -> bool {
    let lower = message.to_lowercase();
    RECALL_TRIGGERS.iter().any(|t| lower.contains(t))
}

/// Name, role, top-5 interests, then background first 200 chars (spec §4.5
/// step 1). Split so the budgeting pass can trim the background half
/// without ever touching the identifying fields.
fn render_profile(profile: &UserProfile) -> (String, String) {
    let mut identity = String::new();
    if let Some(name) = &profile.display_name {
        identity.push_str(&format!("Name: {name}\n"));
    }
    if let Some(role) = &profile.role {
        identity.push_str(&format!("Role: {role}\n"));
    }
    if !profile.interests.is_empty() {
        let mut interests: Vec<&str> = profile.interests.iter().map(String::as_str).collect();
        interests.sort_unstable();
        interests.truncate(PROFILE_TOP_INTERESTS);
        identity.push_str(&format!("Interests: {}\n", interests.join(", ")));
    }
    let background = profile
        .background
        .as_deref()
        .map(|b| b.chars().take(PROFILE_BACKGROUND_CHARS).collect())
        .unwrap_or_default();
    (identity, background)
}

enum DeadlineOutcome<T> {
    Completed(T),
    TimedOut,
}
use DeadlineOutcome::{Completed, TimedOut};

async fn run_with_deadline<F: std::future::Future>(deadline: Instant, fut: F) -> DeadlineOutcome<F::Output> {
    match timeout_at(deadline, fut).await {
        Ok(v) => Completed(v),
        Err(_) => TimedOut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mcos_core::types::{MemoryMetadata, MemoryRecord, RecordKind as Kind, Role};
    use mcos_testkit::{FakeModelAdapter, FakeProfileDocStore, FakeVectorStore};

    fn assembler() -> (ContextAssembler, Arc<FakeVectorStore>, Arc<SessionStore>) {
        let session = Arc::new(SessionStore::new(200));
        let vector_store = Arc::new(FakeVectorStore::new());
        let model: Arc<dyn ModelAdapter> = Arc::new(FakeModelAdapter::default());
        let profile_docs = Arc::new(FakeProfileDocStore::new());
        let profile = Arc::new(ProfileStore::new(profile_docs));
        let vector = Arc::new(VectorMemory::new(vector_store.clone(), model.clone(), 4, 0.0));
        let context = ContextAssembler::new(session.clone(), profile, vector, model, 10, 6000);
        (context, vector_store, session)
    }

    fn memory_record(user_id: &str, chat_id: &str, content: &str, seq: i64) -> MemoryRecord {
        MemoryRecord {
            id: format!("{user_id}:{chat_id}:{seq}"),
            vector: Vec::new(),
            metadata: MemoryMetadata {
                user_id: user_id.to_string(),
                chat_id: Some(chat_id.to_string()),
                turn_id: Some(format!("t{seq}")),
                role: Role::User,
                seq: Some(seq),
                created_at: 0,
                has_artifact: false,
                artifact_url: None,
                kind: Kind::Conversation,
                content: content.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn rejects_empty_user_message() {
        let (ctx, _store, _session) = assembler();
        let err = ctx
            .assemble_context("u1", "c1", "   ", AssembleOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn rejects_invalid_ids() {
        let (ctx, _store, _session) = assembler();
        let err = ctx
            .assemble_context("", "c1", "hi", AssembleOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn cold_start_recall_retrieves_at_whole_user_scope() {
        let (ctx, store, _session) = assembler();
        store
            .upsert(&[
                memory_record("u1", "c1", "my name is Sam", 0),
                memory_record("u1", "c1", "nice to meet you Sam", 1),
            ])
            .await
            .unwrap();
        // A brand new chat c2: no recent turns locally, so retrieval runs
        // at wholeUser scope and finds the seed from c1.
        let bundle = ctx
            .assemble_context("u1", "c2", "what's my name?", AssembleOptions::default())
            .await
            .unwrap();
        assert!(!bundle.retrieved_chunks.is_empty());
        assert!(bundle.retrieved_chunks.iter().any(|c| c.text.contains("Sam")));
    }

    #[tokio::test]
    async fn skips_retrieval_when_no_trigger_and_enough_local_turns() {
        let (ctx, store, session) = assembler();
        let now = Utc::now();
        for i in 0..5u64 {
            session
                .append(
                    "u1",
                    "c1",
                    Turn {
                        id: format!("t{i}"),
                        user_id: "u1".into(),
                        chat_id: "c1".into(),
                        seq: 0,
                        created_at: 0,
                        user_text: format!("message {i}"),
                        assistant_text: "ack".into(),
                        artifacts: vec![],
                        derived_summary: None,
                    },
                    now,
                )
                .unwrap();
        }
        store
            .upsert(&[memory_record("u1", "c1", "unrelated long-term fact", 0)])
            .await
            .unwrap();
        let bundle = ctx
            .assemble_context("u1", "c1", "what's up today", AssembleOptions::default())
            .await
            .unwrap();
        assert!(bundle.retrieved_chunks.is_empty());
        assert_eq!(bundle.recent_turns.len(), 5);
    }

    #[tokio::test]
    async fn recall_trigger_phrase_forces_retrieval_even_with_enough_local_turns() {
        let (ctx, store, session) = assembler();
        let now = Utc::now();
        for i in 0..5u64 {
            session
                .append(
                    "u1",
                    "c1",
                    Turn {
                        id: format!("t{i}"),
                        user_id: "u1".into(),
                        chat_id: "c1".into(),
                        seq: 0,
                        created_at: 0,
                        user_text: format!("message {i}"),
                        assistant_text: "ack".into(),
                        artifacts: vec![],
                        derived_summary: None,
                    },
                    now,
                )
                .unwrap();
        }
        store
            .upsert(&[memory_record("u1", "c1", "earlier you said you liked hiking", 0)])
            .await
            .unwrap();
        let bundle = ctx
            .assemble_context("u1", "c1", "remember what we discussed?", AssembleOptions::default())
            .await
            .unwrap();
        assert!(!bundle.retrieved_chunks.is_empty());
    }

    struct SlowProfileDocStore;

    #[async_trait::async_trait]
    impl mcos_core::adapters::ProfileDocStore for SlowProfileDocStore {
        async fn read(&self, _user_id: &str) -> mcos_core::Result<Option<mcos_core::adapters::ProfileDocRow>> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(None)
        }
        async fn write(&self, _user_id: &str, _profile_json: &str, _expected_updated_at: Option<i64>) -> mcos_core::Result<()> {
            Ok(())
        }
        async fn delete(&self, _user_id: &str) -> mcos_core::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn deadline_exceeded_yields_partial_bundle() {
        let session = Arc::new(SessionStore::new(200));
        let vector_store = Arc::new(FakeVectorStore::new());
        let model: Arc<dyn ModelAdapter> = Arc::new(FakeModelAdapter::default());
        let profile = Arc::new(ProfileStore::new(Arc::new(SlowProfileDocStore)));
        let vector = Arc::new(VectorMemory::new(vector_store, model.clone(), 4, 0.0));
        let ctx = ContextAssembler::new(session, profile, vector, model, 10, 6000);

        let bundle = ctx
            .assemble_context(
                "u1",
                "c1",
                "hello",
                AssembleOptions {
                    document_id: None,
                    deadline: Some(Duration::from_millis(1)),
                },
            )
            .await
            .unwrap();
        assert!(bundle.partial);
        assert!(bundle.profile_text.is_empty());
    }

    #[tokio::test]
    async fn unknown_chat_returns_empty_recent_and_whole_user_scope() {
        let (ctx, _store, _session) = assembler();
        let bundle = ctx
            .assemble_context("u1", "unknown-chat", "remember my name?", AssembleOptions::default())
            .await
            .unwrap();
        assert!(bundle.recent_turns.is_empty());
        assert!(bundle.rolling_summary.is_empty());
    }
}
