// src/errors.rs - Engine error taxonomy
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failure classes as the pipeline distinguishes them. Data errors never
/// reach here (the offending unit is dropped and counted where it
/// occurs), execution errors arrive as ERROR-status confirmations;
/// what remains are the validation and delivery failures callers must
/// branch on.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("signal expired at {0}")]
    SignalExpired(DateTime<Utc>),

    #[error("duplicate fire_id: {0}")]
    DuplicateFire(String),

    #[error("terminal '{0}' is not deliverable")]
    TerminalUnavailable(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl EngineError {
    /// Validation failures must discard the candidate rather than be
    /// retried or silently corrected.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_) | EngineError::SignalExpired(_)
        )
    }
}
