use thiserror::Error;

/// Every way the fairness engine can refuse or fail an operation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FairnessError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("insufficient balance: wager {wager:.2} exceeds available {available:.2}")]
    InsufficientBalance { wager: f64, available: f64 },
    #[error("secure entropy source unavailable: {0}")]
    EntropySourceFailure(String),
    #[error("seed pair was rotated while the bet was in flight; retry against the current pair")]
    ConcurrencyConflict,
    #[error("verification mismatch: recorded roll {recorded}, recomputed {recomputed}")]
    VerificationMismatch { recorded: String, recomputed: String },
    #[error("revealed server seed does not hash to the published commitment")]
    CommitmentMismatch,
    #[error("server seed has not been revealed yet; rotate the seed pair first")]
    NotYetVerifiable,
    #[error("seed store: {0}")]
    Store(String),
}

impl FairnessError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        FairnessError::InvalidInput(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, FairnessError>;
