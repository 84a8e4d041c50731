use thiserror::Error;

/// Errors local to C1. Folds into `McosError` at the `mcos` facade.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session key: {0}")]
    InvalidKey(String),

    #[error("chat not found: {user_id}/{chat_id}")]
    NotFound { user_id: String, chat_id: String },

    #[error("summary rejected: coveredThroughSeq {new} <= existing {existing}")]
    StaleSummary { new: i64, existing: i64 },
}

pub type Result<T> = std::result::Result<T, SessionError>;

impl From<SessionError> for mcos_core::McosError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::InvalidKey(msg) => mcos_core::McosError::InvalidInput(msg),
            SessionError::NotFound { user_id, chat_id } => {
                mcos_core::McosError::NotFound(format!("chat {user_id}/{chat_id}"))
            }
            SessionError::StaleSummary { new, existing } => mcos_core::McosError::InvalidInput(
                format!("summary covered_through_seq {new} <= existing {existing}"),
            ),
        }
    }
}
