//! Integration tests driving the six named end-to-end scenarios through the
//! [`Mcos`] facade, wiring every component together with `mcos_testkit`
//! fakes the way a host process would.

use std::sync::Arc;

use async_trait::async_trait;
use mcos::{AssembleOptions, Mcos, McosDeps};
use mcos_core::adapters::{IntentTag, ModelAdapter, VectorStore};
use mcos_core::types::{ExtractedField, ProfileExtraction};
use mcos_core::{McosConfig, Result as McosResult};
use mcos_testkit::{FakeModelAdapter, FakeVectorStore};
use tokio::sync::Notify;

fn config(dir: &tempfile::TempDir) -> McosConfig {
    let mut config = McosConfig::default();
    config.database.path = dir.path().join("mcos.db").to_string_lossy().into_owned();
    config
}

fn deps_with(vector_store: Arc<FakeVectorStore>) -> McosDeps {
    McosDeps {
        model: Arc::new(FakeModelAdapter::default()),
        vector_store,
        profile_doc_store: None,
        document_cache: None,
    }
}

/// `ModelAdapter::summarize` blocks on `gate` until released, and signals
/// `started` the moment it's entered — lets a test observe "EndChat is
/// mid-flight" without racing on wall-clock sleeps.
struct GatedModelAdapter {
    inner: FakeModelAdapter,
    started: Arc<Notify>,
    gate: Arc<Notify>,
}

#[async_trait]
impl ModelAdapter for GatedModelAdapter {
    async fn embed(&self, text: &str) -> McosResult<Vec<f32>> {
        self.inner.embed(text).await
    }

    async fn summarize(&self, prompt: &str, max_len_hint: usize) -> McosResult<String> {
        self.started.notify_one();
        self.gate.notified().await;
        self.inner.summarize(prompt, max_len_hint).await
    }

    async fn classify_intent(&self, message: &str) -> McosResult<IntentTag> {
        self.inner.classify_intent(message).await
    }
}

/// Scenario: cold-start recall. A turn recorded and flushed in one chat is
/// recallable from a brand-new chat after a simulated process restart (a
/// fresh `Mcos` rebuilt from the same durable vector store and database
/// file, per spec §8).
#[tokio::test]
async fn cold_start_recall_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let vector_store = Arc::new(FakeVectorStore::new());

    let mcos_a = Mcos::new(config(&dir), deps_with(vector_store.clone())).unwrap();
    mcos_a
        .record_turn("u1", "c1", "my name is Sam", "nice to meet you, Sam", vec![])
        .await
        .unwrap();
    mcos_a.end_chat("u1", "c1", true).await.unwrap();

    // Fresh container: new SessionStore/UploadLedger, same durable backends.
    let mcos_b = Mcos::new(config(&dir), deps_with(vector_store)).unwrap();
    let bundle = mcos_b
        .assemble_context("u1", "c2", "remember my name?", AssembleOptions::default())
        .await
        .unwrap();

    assert!(bundle.retrieved_chunks.iter().any(|c| c.text.contains("Sam")));
}

/// Scenario: cooldown elision. A second `job:vector-upload` inside the
/// cooldown window is skipped unless `force` overrides it.
#[tokio::test]
async fn cooldown_elides_unforced_reupload() {
    let dir = tempfile::tempdir().unwrap();
    let vector_store = Arc::new(FakeVectorStore::new());
    let mcos = Mcos::new(config(&dir), deps_with(vector_store.clone())).unwrap();

    mcos.record_turn("u1", "c1", "hello", "hi there", vec![])
        .await
        .unwrap();
    mcos.end_chat("u1", "c1", true).await.unwrap();
    let stats_after_first = vector_store.stats().await.unwrap();

    // A second unforced flush immediately after should not reupload: the
    // ledger's cooldown has not elapsed.
    assert!(!mcos
        .ledger
        .cooldown_expired("u1", "c1", mcos.config().upload_cooldown_secs, chrono::Utc::now())
        .unwrap());

    mcos.end_chat("u1", "c1", false).await.unwrap();
    let stats_after_second = vector_store.stats().await.unwrap();
    assert_eq!(stats_after_first.vector_count, stats_after_second.vector_count);
}

/// Scenario: deduplication after restart. `UploadLedger::unuploaded`
/// reconciles against the durable vector store on first access per chat, so
/// turns already uploaded before a restart are never reuploaded.
#[tokio::test]
async fn dedup_after_restart_reconciles_from_vector_store() {
    let dir = tempfile::tempdir().unwrap();
    let vector_store = Arc::new(FakeVectorStore::new());

    let mcos_a = Mcos::new(config(&dir), deps_with(vector_store.clone())).unwrap();
    let turn_id = mcos_a
        .record_turn("u1", "c1", "remember this", "ok", vec![])
        .await
        .unwrap();
    mcos_a.end_chat("u1", "c1", true).await.unwrap();

    // New ledger instance (simulated restart) reconciling against the same store.
    let mcos_b = Mcos::new(config(&dir), deps_with(vector_store.clone())).unwrap();
    let unuploaded = mcos_b
        .ledger
        .unuploaded(vector_store.as_ref(), "u1", "c1", &[turn_id])
        .await
        .unwrap();
    assert!(unuploaded.is_empty());
}

/// Scenario: draining rejects writes. While `EndChat` is mid-flight for a
/// chat, a concurrent `RecordTurn` for that chat is rejected with
/// `ChatDraining`, and succeeds again once the flush completes.
#[tokio::test]
async fn draining_rejects_concurrent_writes() {
    let dir = tempfile::tempdir().unwrap();
    let vector_store = Arc::new(FakeVectorStore::new());
    let started = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let model = Arc::new(GatedModelAdapter {
        inner: FakeModelAdapter::default(),
        started: started.clone(),
        gate: gate.clone(),
    });
    let mcos = Arc::new(
        Mcos::new(
            config(&dir),
            McosDeps {
                model,
                vector_store,
                profile_doc_store: None,
                document_cache: None,
            },
        )
        .unwrap(),
    );

    mcos.record_turn("u1", "c1", "hello", "hi", vec![]).await.unwrap();

    let flushing = Arc::clone(&mcos);
    let end_chat = tokio::spawn(async move { flushing.end_chat("u1", "c1", true).await });
    started.notified().await; // EndChat has entered run_summarize; draining is now set.

    let err = mcos
        .record_turn("u1", "c1", "mid-flush", "nope", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, mcos::OrchestratorError::ChatDraining { .. }));

    gate.notify_one(); // let the gated summarize() return
    end_chat.await.unwrap().unwrap();

    // Draining has cleared; the same write now succeeds.
    mcos.record_turn("u1", "c1", "after flush", "welcome back", vec![])
        .await
        .unwrap();
}

/// Scenario: profile monotonicity. A higher-confidence extraction overwrites
/// a field; a strictly lower-confidence extraction for the same field does not.
#[tokio::test]
async fn profile_merge_is_confidence_monotonic() {
    let dir = tempfile::tempdir().unwrap();
    let vector_store = Arc::new(FakeVectorStore::new());
    let mcos = Mcos::new(config(&dir), deps_with(vector_store)).unwrap();

    let turn_id = mcos
        .record_turn("u1", "c1", "my name is Sam", "nice to meet you", vec![])
        .await
        .unwrap();

    let high = ProfileExtraction {
        display_name: Some(ExtractedField {
            value: "Sam".into(),
            confidence: 0.9,
            turn_id: turn_id.clone(),
            chat_id: "c1".into(),
        }),
        role: None,
        interests: vec![],
        preferences: Default::default(),
        background: None,
    };
    let profile = mcos.profile.merge("u1", high).await.unwrap();
    assert_eq!(profile.display_name.as_deref(), Some("Sam"));

    let low = ProfileExtraction {
        display_name: Some(ExtractedField {
            value: "Not Sam".into(),
            confidence: 0.2,
            turn_id: "t2".into(),
            chat_id: "c1".into(),
        }),
        role: None,
        interests: vec![],
        preferences: Default::default(),
        background: None,
    };
    let profile = mcos.profile.merge("u1", low).await.unwrap();
    assert_eq!(profile.display_name.as_deref(), Some("Sam"));
}

/// Scenario: budget trimming. A context assembled against a tiny token cap
/// never exceeds it and is reported as such via `token_budget`.
#[tokio::test]
async fn assembled_context_respects_a_tight_token_cap() {
    let dir = tempfile::tempdir().unwrap();
    let vector_store = Arc::new(FakeVectorStore::new());
    let mut cfg = config(&dir);
    cfg.context_token_cap = 40;
    let mcos = Mcos::new(cfg, deps_with(vector_store)).unwrap();

    for i in 0..5 {
        mcos.record_turn(
            "u1",
            "c1",
            format!("this is turn number {i} with some extra padding text"),
            format!("acknowledged turn {i} with a reasonably long reply as well"),
            vec![],
        )
        .await
        .unwrap();
    }

    let bundle = mcos
        .assemble_context("u1", "c1", "what did we just talk about?", AssembleOptions::default())
        .await
        .unwrap();
    assert!(bundle.token_budget.used <= 40);
    assert!(bundle.token_budget.cap == 40);
}
