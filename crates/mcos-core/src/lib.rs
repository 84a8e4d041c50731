//! `mcos-core` — shared vocabulary for the Memory & Context Orchestration Subsystem.
//!
//! Every other `mcos-*` crate depends only on this one for its data types,
//! error taxonomy, configuration surface, and the five external collaborator
//! traits (`ModelAdapter`, `VectorStore`, `ProfileDocStore`, `ObjectStore`,
//! `DocumentCache`). It owns no I/O and no component logic of its own.

pub mod adapters;
pub mod config;
pub mod error;
pub mod ids;
pub mod types;

pub use adapters::{
    DocumentCache, ModelAdapter, ObjectStore, ProfileDocStore, VectorStore,
};
pub use config::McosConfig;
pub use error::{McosError, Result};
pub use ids::{compute_turn_id, validate_id};
pub use types::*;
