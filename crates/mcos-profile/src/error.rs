use thiserror::Error;

/// Errors local to C3. Folds into `McosError` at the `mcos` facade.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("optimistic lock conflict writing profile for {user_id}")]
    StaleWrite { user_id: String },

    #[error("invalid user id: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, ProfileError>;

/// Folds a `ProfileDocStore` collaborator failure (reported as a
/// `McosError`) back into the local error type, so `ProfileStore` can keep
/// propagating `ProfileError` regardless of which `ProfileDocStore`
/// implementation is plugged in.
pub fn from_doc_store_error(e: mcos_core::McosError) -> ProfileError {
    match e {
        mcos_core::McosError::StaleWrite { user_id } => ProfileError::StaleWrite { user_id },
        mcos_core::McosError::InvalidInput(msg) => ProfileError::InvalidInput(msg),
        other => ProfileError::Database(rusqlite::Error::ModuleError(other.to_string())),
    }
}

impl From<ProfileError> for mcos_core::McosError {
    fn from(e: ProfileError) -> Self {
        match e {
            ProfileError::Database(err) => mcos_core::McosError::Database(err.to_string()),
            ProfileError::Serialization(err) => mcos_core::McosError::Serialization(err),
            ProfileError::StaleWrite { user_id } => mcos_core::McosError::StaleWrite { user_id },
            ProfileError::InvalidInput(msg) => mcos_core::McosError::InvalidInput(msg),
        }
    }
}
