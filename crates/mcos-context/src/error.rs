use thiserror::Error;

/// Errors local to C5. Folds into `McosError` at the `mcos` facade.
///
/// Spec §4.5: "The assembler returns an error only if `userMessage` is empty
/// or ids are invalid" — every other downstream failure is degraded, not
/// propagated, so `InvalidInput` is the only variant this crate needs.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, ContextError>;

impl From<ContextError> for mcos_core::McosError {
    fn from(e: ContextError) -> Self {
        match e {
            ContextError::InvalidInput(msg) => mcos_core::McosError::InvalidInput(msg),
        }
    }
}
