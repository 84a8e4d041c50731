use thiserror::Error;

/// Errors local to C6. Folds into `McosError` at the `mcos` facade.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Malformed ids or oversize/empty-both-halves turn content (spec §7).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// `RecordTurn` attempted while `EndChat` is draining the chat (spec §7).
    #[error("chat is draining: {user_id}/{chat_id}")]
    ChatDraining { user_id: String, chat_id: String },

    /// A downstream collaborator call failed transiently; retried by the
    /// background job scheduler, or surfaced on the synchronous `EndChat` path.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Dead-lettered after `schedule::MAX_ATTEMPTS` attempts.
    #[error("terminal failure after {attempts} attempts: {reason}")]
    Terminal { attempts: u32, reason: String },

    /// Dead-letter log I/O.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl OrchestratorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrchestratorError::Transient(_))
    }
}

impl From<mcos_core::McosError> for OrchestratorError {
    fn from(e: mcos_core::McosError) -> Self {
        match e {
            mcos_core::McosError::InvalidInput(msg) => OrchestratorError::InvalidInput(msg),
            mcos_core::McosError::ChatDraining { user_id, chat_id } => {
                OrchestratorError::ChatDraining { user_id, chat_id }
            }
            mcos_core::McosError::Terminal { attempts, reason } => {
                OrchestratorError::Terminal { attempts, reason }
            }
            mcos_core::McosError::Serialization(err) => OrchestratorError::Serialization(err),
            other => OrchestratorError::Transient(other.to_string()),
        }
    }
}

impl From<OrchestratorError> for mcos_core::McosError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::InvalidInput(msg) => mcos_core::McosError::InvalidInput(msg),
            OrchestratorError::ChatDraining { user_id, chat_id } => {
                mcos_core::McosError::ChatDraining { user_id, chat_id }
            }
            OrchestratorError::Transient(msg) => mcos_core::McosError::Transient(msg),
            OrchestratorError::Terminal { attempts, reason } => {
                mcos_core::McosError::Terminal { attempts, reason }
            }
            OrchestratorError::Database(err) => mcos_core::McosError::Database(err.to_string()),
            OrchestratorError::Serialization(err) => mcos_core::McosError::Serialization(err),
        }
    }
}

impl From<mcos_session::SessionError> for OrchestratorError {
    fn from(e: mcos_session::SessionError) -> Self {
        mcos_core::McosError::from(e).into()
    }
}

impl From<mcos_ledger::LedgerError> for OrchestratorError {
    fn from(e: mcos_ledger::LedgerError) -> Self {
        mcos_core::McosError::from(e).into()
    }
}

impl From<mcos_profile::ProfileError> for OrchestratorError {
    fn from(e: mcos_profile::ProfileError) -> Self {
        mcos_core::McosError::from(e).into()
    }
}

impl From<mcos_vector::VectorError> for OrchestratorError {
    fn from(e: mcos_vector::VectorError) -> Self {
        mcos_core::McosError::from(e).into()
    }
}
