use thiserror::Error;

/// Errors local to C2. Folds into `McosError` at the `mcos` facade.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid chat identifier: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

impl From<LedgerError> for mcos_core::McosError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InvalidKey(msg) => mcos_core::McosError::InvalidInput(msg),
        }
    }
}
