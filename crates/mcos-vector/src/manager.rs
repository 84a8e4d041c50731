//! C4 VectorMemory — adapter over a [`VectorStore`], enforcing tenant
//! isolation and batch discipline (spec §4.4).

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use mcos_core::adapters::{ModelAdapter, VectorQuery, VectorStore};
use mcos_core::types::{Chunk, MemoryMetadata, MemoryRecord, Scope};
use tracing::{instrument, warn};

use crate::error::{Result, VectorError};
use crate::retry::with_backoff;

/// Max records forwarded to the underlying store in a single `upsert` call
/// (spec §4.4: "Batches of up to 100 records per call; larger inputs are split").
const UPSERT_BATCH_SIZE: usize = 100;

pub struct VectorMemory {
    store: Arc<dyn VectorStore>,
    model: Arc<dyn ModelAdapter>,
    embed_concurrency: usize,
    retrieval_min_score: f32,
}

impl VectorMemory {
    pub fn new(
        store: Arc<dyn VectorStore>,
        model: Arc<dyn ModelAdapter>,
        embed_concurrency: usize,
        retrieval_min_score: f32,
    ) -> Self {
        Self {
            store,
            model,
            embed_concurrency,
            retrieval_min_score,
        }
    }

    /// `Upsert([]MemoryRecord)` (spec §4.4). Records without a precomputed
    /// `vector` are embedded first, bounded to `embed_concurrency` inflight
    /// calls; the (possibly re-batched) result is then split into chunks of
    /// [`UPSERT_BATCH_SIZE`] and forwarded to the store with retry/backoff.
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub async fn upsert(&self, mut records: Vec<MemoryRecord>) -> Result<()> {
        for r in &records {
            if !r.metadata.is_well_formed() {
                return Err(VectorError::InvalidInput(format!(
                    "record {} violates kind=profile scoping invariant",
                    r.id
                )));
            }
        }

        let to_embed: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.vector.is_empty())
            .map(|(i, _)| i)
            .collect();

        let embedded: Vec<(usize, Result<Vec<f32>>)> = stream::iter(to_embed)
            .map(|i| {
                let model = Arc::clone(&self.model);
                let content = records[i].metadata.content.clone();
                async move {
                    let v = model
                        .embed(&content)
                        .await
                        .map_err(VectorError::from);
                    (i, v)
                }
            })
            .buffer_unordered(self.embed_concurrency.max(1))
            .collect()
            .await;

        for (i, v) in embedded {
            records[i].vector = v?;
        }

        for batch in records.chunks(UPSERT_BATCH_SIZE) {
            let batch = batch.to_vec();
            with_backoff("upsert", || {
                let store = Arc::clone(&self.store);
                let batch = batch.clone();
                async move {
                    store
                        .upsert(&batch)
                        .await
                        .map_err(VectorError::from)
                }
            })
            .await?;
        }
        Ok(())
    }

    /// `Query(userId, query, k, scope)` (spec §4.4). Embeds `query`, searches
    /// with a metadata filter that always includes `userId`, returns records
    /// scoring at or above `retrieval_min_score`.
    #[instrument(skip(self, query_text), fields(user_id = scope.user_id(), k))]
    pub async fn query(&self, query_text: &str, k: usize, scope: &Scope) -> Result<Vec<Chunk>> {
        let vector = self
            .model
            .embed(query_text)
            .await
            .map_err(VectorError::from)?;

        let (filter_chat_id, filter_kind) = match scope {
            Scope::WholeUser { .. } => (None, None),
            Scope::ChatOnly { chat_id, .. } => (Some(chat_id.clone()), None),
            Scope::ProfileOnly { .. } => (None, Some("profile".to_string())),
        };

        let hits = with_backoff("query", || {
            let store = Arc::clone(&self.store);
            let vector = vector.clone();
            let filter_user_id = scope.user_id().to_string();
            let filter_chat_id = filter_chat_id.clone();
            let filter_kind = filter_kind.clone();
            async move {
                store
                    .query(VectorQuery {
                        vector,
                        top_k: k,
                        filter_user_id,
                        filter_chat_id,
                        filter_kind,
                    })
                    .await
                    .map_err(VectorError::from)
            }
        })
        .await?;

        let mut chunks: Vec<Chunk> = Vec::new();
        for hit in hits {
            if hit.score < self.retrieval_min_score {
                continue;
            }
            let meta: MemoryMetadata = match serde_json::from_value(hit.metadata.clone()) {
                Ok(m) => m,
                Err(e) => {
                    warn!(id = %hit.id, error = %e, "skipping hit with unparsable metadata");
                    continue;
                }
            };
            if meta.user_id != scope.user_id() {
                warn!(id = %hit.id, "dropping cross-tenant hit returned by store");
                continue;
            }
            chunks.push(Chunk {
                text: meta.content,
                score: hit.score,
                source_id: hit.id,
                kind: meta.kind,
                seq: meta.seq,
            });
        }

        // Spec §4.4 tie-break: summary > conversation > profile, then
        // higher seq, then lexicographic id.
        chunks.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.kind.tie_break_rank().cmp(&b.kind.tie_break_rank()))
                .then_with(|| b.seq.unwrap_or(i64::MIN).cmp(&a.seq.unwrap_or(i64::MIN)))
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
        chunks.truncate(k);
        Ok(chunks)
    }

    /// `DeleteByScope(scope)` (spec §4.4).
    #[instrument(skip(self), fields(user_id = scope.user_id()))]
    pub async fn delete_by_scope(&self, scope: &Scope) -> Result<()> {
        with_backoff("delete", || {
            let store = Arc::clone(&self.store);
            async move { store.delete(scope).await.map_err(VectorError::from) }
        })
        .await
    }

    /// `Stats()` (spec §4.4) — for diagnostics.
    pub async fn stats(&self) -> Result<mcos_core::adapters::VectorStats> {
        with_backoff("stats", || {
            let store = Arc::clone(&self.store);
            async move { store.stats().await.map_err(VectorError::from) }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcos_core::types::{RecordKind, Role};
    use mcos_testkit::{FakeModelAdapter, FakeVectorStore};

    fn record(user_id: &str, chat_id: Option<&str>, content: &str, kind: RecordKind, seq: Option<i64>) -> MemoryRecord {
        MemoryRecord {
            id: format!("{user_id}:{}:{content}", chat_id.unwrap_or("-")),
            vector: Vec::new(),
            metadata: MemoryMetadata {
                user_id: user_id.to_string(),
                chat_id: chat_id.map(String::from),
                turn_id: Some("t1".into()),
                role: Role::User,
                seq,
                created_at: 0,
                has_artifact: false,
                artifact_url: None,
                kind,
                content: content.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn upsert_embeds_records_missing_vectors() {
        let store = Arc::new(FakeVectorStore::new());
        let model = Arc::new(FakeModelAdapter::default());
        let vm = VectorMemory::new(store.clone(), model, 4, 0.0);
        vm.upsert(vec![record("u1", Some("c1"), "hello world", RecordKind::Conversation, Some(0))])
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn query_filters_by_retrieval_min_score() {
        let store = Arc::new(FakeVectorStore::new());
        let model = Arc::new(FakeModelAdapter::default());
        let vm = VectorMemory::new(store.clone(), model, 4, 0.99);
        vm.upsert(vec![record(
            "u1",
            Some("c1"),
            "completely unrelated filler text",
            RecordKind::Conversation,
            Some(0),
        )])
        .await
        .unwrap();
        let hits = vm
            .query(
                "something else entirely",
                10,
                &Scope::WholeUser {
                    user_id: "u1".into(),
                },
            )
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn query_tie_breaks_summary_over_conversation() {
        let store = Arc::new(FakeVectorStore::new());
        let model = Arc::new(FakeModelAdapter::default());
        let mut conv = record("u1", Some("c1"), "paris is the capital", RecordKind::Conversation, Some(0));
        conv.vector = model_embed(&model, "paris is the capital").await;
        let vm = VectorMemory::new(store.clone(), model, 4, 0.0);
        let mut summ = record("u1", Some("c1"), "paris is the capital", RecordKind::Summary, Some(0));
        summ.id = "summary-rec".into();
        summ.vector = conv.vector.clone();
        store.upsert(&[conv, summ]).await.unwrap();

        let hits = vm
            .query(
                "paris is the capital",
                10,
                &Scope::ChatOnly {
                    user_id: "u1".into(),
                    chat_id: "c1".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(hits[0].kind, RecordKind::Summary);
    }

    async fn model_embed(model: &FakeModelAdapter, text: &str) -> Vec<f32> {
        use mcos_core::adapters::ModelAdapter;
        model.embed(text).await.unwrap()
    }
}
