use thiserror::Error;

/// Errors local to C4. Folds into `McosError` at the `mcos` facade.
#[derive(Debug, Error)]
pub enum VectorError {
    #[error("invalid scope or query: {0}")]
    InvalidInput(String),

    #[error("transient vector-store failure: {0}")]
    Transient(String),

    #[error("vector-store call failed terminally after {attempts} attempts: {reason}")]
    Terminal { attempts: u32, reason: String },

    #[error("metadata serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VectorError>;

impl From<VectorError> for mcos_core::McosError {
    fn from(e: VectorError) -> Self {
        match e {
            VectorError::InvalidInput(msg) => mcos_core::McosError::InvalidInput(msg),
            VectorError::Transient(msg) => mcos_core::McosError::Transient(msg),
            VectorError::Terminal { attempts, reason } => {
                mcos_core::McosError::Terminal { attempts, reason }
            }
            VectorError::Serialization(err) => mcos_core::McosError::Serialization(err),
        }
    }
}

impl From<mcos_core::McosError> for VectorError {
    fn from(e: mcos_core::McosError) -> Self {
        match e {
            mcos_core::McosError::InvalidInput(msg) => VectorError::InvalidInput(msg),
            mcos_core::McosError::Serialization(err) => VectorError::Serialization(err),
            other => VectorError::Transient(other.to_string()),
        }
    }
}
