//! In-memory fakes for MCOS's five external collaborator traits.
//!
//! Deterministic by construction (no RNG, no wall-clock, no network) so the
//! end-to-end scenarios in spec §8 can be driven byte-for-byte reproducibly
//! from `mcos-context` / `mcos-orchestrator` integration tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use mcos_core::adapters::{
    DocumentCache, IntentTag, ModelAdapter, ObjectStore, ProfileDocRow, ProfileDocStore,
    VectorQuery, VectorQueryHit, VectorStats, VectorStore,
};
use mcos_core::error::{McosError, Result};
use mcos_core::types::{MemoryRecord, Scope};

/// Closed recall-trigger phrase list, mirrored here for test-side intent
/// classification (spec §4.5 step 4's own copy lives in `mcos-context`).
const RECALL_TRIGGERS: &[&str] = &[
    "remember",
    "earlier",
    "last time",
    "we discussed",
    "you said",
    "my name",
    "my preferences",
];

/// Deterministic embedding: a bag-of-words hash folded into `dim` floats,
/// L2-normalized so cosine similarity behaves sensibly in tests.
pub struct FakeModelAdapter {
    pub dim: usize,
}

impl FakeModelAdapter {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Default for FakeModelAdapter {
    fn default() -> Self {
        Self::new(768)
    }
}

#[async_trait]
impl ModelAdapter for FakeModelAdapter {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0f32; self.dim];
        for word in text.split_whitespace() {
            let h = fnv1a(word.as_bytes());
            let idx = (h as usize) % self.dim;
            v[idx] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }

    async fn summarize(&self, prompt: &str, max_len_hint: usize) -> Result<String> {
        let mut s: String = prompt.chars().take(max_len_hint).collect();
        if prompt.chars().count() > max_len_hint {
            s.push('…');
        }
        Ok(s)
    }

    async fn classify_intent(&self, message: &str) -> Result<IntentTag> {
        let lower = message.to_lowercase();
        if RECALL_TRIGGERS.iter().any(|t| lower.contains(t)) {
            return Ok(IntentTag::ReferencesPast);
        }
        Ok(IntentTag::Normal)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// In-memory vector store. Upsert is idempotent on `id`; query applies the
/// same equality filters and tie-breaking order as the real C4 adapter so
/// tests exercise identical ranking semantics.
#[derive(Default)]
pub struct FakeVectorStore {
    records: Mutex<HashMap<String, MemoryRecord>>,
}

impl FakeVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for FakeVectorStore {
    async fn upsert(&self, records: &[MemoryRecord]) -> Result<()> {
        let mut store = self.records.lock().unwrap();
        for r in records {
            store.insert(r.id.clone(), r.clone());
        }
        Ok(())
    }

    async fn query(&self, query: VectorQuery) -> Result<Vec<VectorQueryHit>> {
        let store = self.records.lock().unwrap();
        let mut hits: Vec<(f32, &MemoryRecord)> = store
            .values()
            .filter(|r| r.metadata.user_id == query.filter_user_id)
            .filter(|r| {
                query
                    .filter_chat_id
                    .as_ref()
                    .map_or(true, |c| r.metadata.chat_id.as_deref() == Some(c.as_str()))
            })
            .filter(|r| {
                query
                    .filter_kind
                    .as_ref()
                    .map_or(true, |k| r.metadata.kind.to_string() == *k)
            })
            .map(|r| (cosine(&query.vector, &r.vector), r))
            .collect();

        hits.sort_by(|(sa, ra), (sb, rb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    ra.metadata
                        .kind
                        .tie_break_rank()
                        .cmp(&rb.metadata.kind.tie_break_rank())
                })
                .then_with(|| {
                    rb.metadata
                        .seq
                        .unwrap_or(i64::MIN)
                        .cmp(&ra.metadata.seq.unwrap_or(i64::MIN))
                })
                .then_with(|| ra.id.cmp(&rb.id))
        });

        Ok(hits
            .into_iter()
            .take(query.top_k)
            .map(|(score, r)| VectorQueryHit {
                id: r.id.clone(),
                score,
                metadata: serde_json::to_value(&r.metadata).unwrap_or_default(),
            })
            .collect())
    }

    async fn delete(&self, scope: &Scope) -> Result<()> {
        let mut store = self.records.lock().unwrap();
        store.retain(|_, r| match scope {
            Scope::WholeUser { user_id } => r.metadata.user_id != *user_id,
            Scope::ChatOnly { user_id, chat_id } => {
                !(r.metadata.user_id == *user_id && r.metadata.chat_id.as_deref() == Some(chat_id))
            }
            Scope::ProfileOnly { user_id } => {
                !(r.metadata.user_id == *user_id
                    && r.metadata.kind == mcos_core::types::RecordKind::Profile)
            }
        });
        Ok(())
    }

    async fn stats(&self) -> Result<VectorStats> {
        Ok(VectorStats {
            vector_count: self.len() as u64,
        })
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// In-memory profile document store with the same optimistic-lock semantics
/// as a real `ProfileDocStore` (spec §6, §7 `StaleWrite`).
#[derive(Default)]
pub struct FakeProfileDocStore {
    rows: Mutex<HashMap<String, ProfileDocRow>>,
}

impl FakeProfileDocStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileDocStore for FakeProfileDocStore {
    async fn read(&self, user_id: &str) -> Result<Option<ProfileDocRow>> {
        Ok(self.rows.lock().unwrap().get(user_id).cloned())
    }

    async fn write(
        &self,
        user_id: &str,
        profile_json: &str,
        expected_updated_at: Option<i64>,
    ) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(existing) = rows.get(user_id) {
            if Some(existing.updated_at) != expected_updated_at {
                return Err(McosError::StaleWrite {
                    user_id: user_id.to_string(),
                });
            }
        } else if expected_updated_at.is_some() {
            return Err(McosError::StaleWrite {
                user_id: user_id.to_string(),
            });
        }
        rows.insert(
            user_id.to_string(),
            ProfileDocRow {
                profile_json: profile_json.to_string(),
                updated_at: expected_updated_at.unwrap_or(0) + 1,
            },
        );
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<()> {
        self.rows.lock().unwrap().remove(user_id);
        Ok(())
    }
}

/// In-memory object store; returns a synthetic `mem://` URL per put.
#[derive(Default)]
pub struct FakeObjectStore {
    next_id: Mutex<u64>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn put_artifact(
        &self,
        user_id: &str,
        chat_id: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String> {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        let url = format!("mem://{user_id}/{chat_id}/{next}.{}", ext_for(content_type));
        self.blobs.lock().unwrap().insert(url.clone(), bytes.to_vec());
        Ok(url)
    }

    async fn delete(&self, url: &str) -> Result<()> {
        self.blobs.lock().unwrap().remove(url);
        Ok(())
    }
}

fn ext_for(content_type: &str) -> &'static str {
    if content_type.contains("png") {
        "png"
    } else if content_type.contains("pdf") {
        "pdf"
    } else {
        "bin"
    }
}

/// In-memory document cache returning fixed chunks keyed by `document_id`.
#[derive(Default)]
pub struct FakeDocumentCache {
    chunks: Mutex<HashMap<String, Vec<String>>>,
}

impl FakeDocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, document_id: &str, chunks: Vec<String>) {
        self.chunks
            .lock()
            .unwrap()
            .insert(document_id.to_string(), chunks);
    }
}

#[async_trait]
impl DocumentCache for FakeDocumentCache {
    async fn top_chunks(&self, document_id: &str, _query: &str, k: usize) -> Result<Vec<String>> {
        let chunks = self.chunks.lock().unwrap();
        Ok(chunks
            .get(document_id)
            .map(|v| v.iter().take(k).cloned().collect())
            .unwrap_or_default())
    }
}
