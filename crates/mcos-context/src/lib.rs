//! `mcos-context` — C5 ContextAssembler: builds the bounded, prompt-ready
//! context bundle for one turn (spec §4.5).
//!
//! `assemble_context` reads a consistent snapshot of C1 state for the target
//! chat, decides whether long-term retrieval is worth its cost, and renders
//! everything into a [`ContextBundle`] that never exceeds `CONTEXT_TOKEN_CAP`
//! estimated tokens. Every downstream failure (profile, retrieval, document
//! cache) degrades that section rather than failing the call; only an empty
//! `userMessage` or invalid ids are fatal.

pub mod budget;
pub mod error;
pub mod manager;
pub mod types;

pub use error::{ContextError, Result};
pub use manager::ContextAssembler;
pub use types::{AssembleOptions, ContextBundle, TokenBudget};
