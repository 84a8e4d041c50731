pub mod error;
pub mod manager;
pub mod types;

pub use error::LedgerError;
pub use manager::UploadLedger;
pub use types::ChatKey;
