//! `mcos-vector` — C4 VectorMemory: a generic adapter over a host-supplied
//! [`mcos_core::adapters::VectorStore`] and
//! [`mcos_core::adapters::ModelAdapter`] (spec §4.4). Owns no concrete
//! vector-database client — that lives outside MCOS per spec §1.

pub mod error;
pub mod manager;
pub mod retry;

pub use error::{Result, VectorError};
pub use manager::VectorMemory;
