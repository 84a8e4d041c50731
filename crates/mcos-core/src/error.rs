use thiserror::Error;

/// The MCOS error taxonomy (spec §7).
///
/// Request-path operations (`AssembleContext`, `RecordTurn`, `EndChat`)
/// recover whatever they can and return partial results; only
/// [`McosError::InvalidInput`] is fatal to the caller. Background jobs never
/// propagate these to a caller — they log and retry (see `mcos-orchestrator`).
#[derive(Debug, Error)]
pub enum McosError {
    /// Malformed ids, empty-on-both-sides turns, oversize content (>8 KB per half).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// `RecordTurn` attempted while the chat is draining via `EndChat`.
    #[error("chat is draining: {user_id}/{chat_id}")]
    ChatDraining { user_id: String, chat_id: String },

    /// Timeouts, 5xx from vector/doc stores, embedding failures — retried with
    /// backoff inside C4/C6, surfaced only after retries are exhausted.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Profile optimistic-lock failure; C3 retries internally then gives up silently.
    #[error("stale write for user {user_id}")]
    StaleWrite { user_id: String },

    /// 6 consecutive job failures — dead-lettered (spec §4.6, §7).
    #[error("terminal failure after {attempts} attempts: {reason}")]
    Terminal { attempts: u32, reason: String },

    /// Underlying SQLite error from a durable component, converted to a
    /// string at the crate boundary so `mcos-core` itself has no `rusqlite`
    /// dependency (only the crates that touch SQLite do).
    #[error("database error: {0}")]
    Database(String),

    /// Config load/parse failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Internal invariant violation — should not occur; logged at `error`.
    #[error("internal error: {0}")]
    Internal(String),
}

impl McosError {
    /// Short error code string for structured logging and metrics correlation.
    pub fn code(&self) -> &'static str {
        match self {
            McosError::InvalidInput(_) => "INVALID_INPUT",
            McosError::ChatDraining { .. } => "CHAT_DRAINING",
            McosError::Transient(_) => "TRANSIENT",
            McosError::StaleWrite { .. } => "STALE_WRITE",
            McosError::Terminal { .. } => "TERMINAL",
            McosError::Database(_) => "DATABASE_ERROR",
            McosError::Config(_) => "CONFIG_ERROR",
            McosError::Serialization(_) => "SERIALIZATION_ERROR",
            McosError::NotFound(_) => "NOT_FOUND",
            McosError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True for the error classes C4/C6 retry with backoff rather than surfacing.
    pub fn is_retryable(&self) -> bool {
        matches!(self, McosError::Transient(_) | McosError::Database(_))
    }
}

pub type Result<T> = std::result::Result<T, McosError>;
