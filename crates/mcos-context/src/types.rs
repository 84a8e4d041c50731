use mcos_core::types::{Chunk, Turn};
use serde::Serialize;

/// `tokenBudget` on a [`ContextBundle`] (spec §4.5).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TokenBudget {
    pub used: usize,
    pub cap: usize,
}

/// `AssembleContext`'s return value (spec §4.5).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextBundle {
    pub profile_text: String,
    pub rolling_summary: String,
    pub key_facts: Vec<String>,
    pub recent_turns: Vec<Turn>,
    pub retrieved_chunks: Vec<Chunk>,
    pub document_chunks: Vec<Chunk>,
    pub token_budget: TokenBudget,
    /// Set when the deadline expired before every section completed (spec
    /// §5: "returns whatever sections have completed, with the remainder
    /// omitted").
    pub partial: bool,
}

/// `opts` on `AssembleContext` (spec §4.5).
#[derive(Debug, Clone, Default)]
pub struct AssembleOptions {
    /// If set, step 6 fetches up to 3 chunks from the `DocumentCache`.
    pub document_id: Option<String>,
    /// Overrides the default 3 s deadline (spec §5).
    pub deadline: Option<std::time::Duration>,
}
