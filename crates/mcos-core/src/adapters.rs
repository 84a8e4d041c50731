//! External collaborator traits (spec §6).
//!
//! MCOS owns none of these implementations — only the shape of the contract.
//! Each is `#[async_trait]` and object-safe, mirroring the teacher's
//! `#[async_trait] trait LlmProvider` convention, so hosts can plug in real
//! network-backed clients and tests can plug in in-memory fakes
//! (see `mcos-testkit`) behind the same `Box<dyn Trait + Send + Sync>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{MemoryRecord, Scope};

/// `embed`, `summarize`, `classifyIntent` — the only surface MCOS needs from
/// the generative model layer (spec §6). Everything else about the model
/// (routing, streaming, tool use) is out of scope.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn summarize(&self, prompt: &str, max_len_hint: usize) -> Result<String>;
    async fn classify_intent(&self, message: &str) -> Result<IntentTag>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentTag {
    Normal,
    ReferencesPast,
    ImageRequest,
    DocumentQuery,
}

/// A single match returned by [`VectorStore::query`].
#[derive(Debug, Clone)]
pub struct VectorQueryHit {
    pub id: String,
    pub score: f32,
    pub metadata: serde_json::Value,
}

/// Parameters for [`VectorStore::query`] (spec §6: "filter must support
/// equality on `userId`, `chatId`, `kind`").
#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub vector: Vec<f32>,
    pub top_k: usize,
    pub filter_user_id: String,
    pub filter_chat_id: Option<String>,
    pub filter_kind: Option<String>,
}

/// Adapter over the backing vector database. `Upsert` is idempotent on `id`.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, records: &[MemoryRecord]) -> Result<()>;
    async fn query(&self, query: VectorQuery) -> Result<Vec<VectorQueryHit>>;
    async fn delete(&self, scope: &Scope) -> Result<()>;
    async fn stats(&self) -> Result<VectorStats>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VectorStats {
    pub vector_count: u64,
}

/// Durable document store backing C3 (spec §6 `ProfileDocStore`).
#[async_trait]
pub trait ProfileDocStore: Send + Sync {
    async fn read(&self, user_id: &str) -> Result<Option<ProfileDocRow>>;
    /// Fails with [`crate::error::McosError::StaleWrite`] if
    /// `expected_updated_at` does not match the row currently stored.
    async fn write(
        &self,
        user_id: &str,
        profile_json: &str,
        expected_updated_at: Option<i64>,
    ) -> Result<()>;
    async fn delete(&self, user_id: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ProfileDocRow {
    pub profile_json: String,
    pub updated_at: i64,
}

/// Blob storage for artifacts (spec §6 `ObjectStore`). MCOS stores only URLs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_artifact(
        &self,
        user_id: &str,
        chat_id: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String>;
    async fn delete(&self, url: &str) -> Result<()>;
}

/// Optional document-RAG collaborator used by C5 step 6 (spec §4.5, §6).
#[async_trait]
pub trait DocumentCache: Send + Sync {
    async fn top_chunks(&self, document_id: &str, query: &str, k: usize) -> Result<Vec<String>>;
}
