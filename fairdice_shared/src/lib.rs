use chrono::{DateTime, Utc};
use fairdice_core::{Condition, DerivationScheme, FairnessError, Roll, Target};
use serde::{Deserialize, Serialize};

/// Active pair as shown to the player. Never carries the raw server seed.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SeedInfo {
    pub client_seed: String,
    pub server_seed_hash: String,
    pub nonce: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BetRequest {
    pub user_id: String,
    pub wager: f64,
    pub target: f64,
    pub condition: Condition,
    #[serde(default)]
    pub house_edge: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BetResponse {
    pub bet_id: i64,
    pub roll: Roll,
    pub target: Target,
    pub condition: Condition,
    pub multiplier: f64,
    pub won: bool,
    pub wager: f64,
    pub payout: f64,
    pub balance: f64,
    /// Filled in only once the pair has been rotated.
    pub server_seed: Option<String>,
    pub server_seed_hash: String,
    pub client_seed: String,
    pub nonce: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientSeedRequest {
    pub user_id: String,
    pub client_seed: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RotateRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RotateResponse {
    pub previous_server_seed: String,
    pub previous_server_seed_hash: String,
    pub previous_client_seed: String,
    pub previous_nonce: u64,
    pub new_server_seed_hash: String,
    pub new_nonce: u64,
}

/// Everything a third party needs to replay one bet.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VerifyRequest {
    pub client_seed: String,
    pub server_seed: String,
    pub server_seed_hash: String,
    pub nonce: u64,
    pub target: f64,
    pub condition: Condition,
    #[serde(default)]
    pub house_edge: Option<f64>,
    pub roll: f64,
    #[serde(default)]
    pub scheme: DerivationScheme,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct VerifyResponse {
    pub valid: bool,
    pub commitment_valid: bool,
    pub recomputed_roll: Option<Roll>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BetLogEntry {
    pub id: i64,
    pub ts: DateTime<Utc>,
    pub user_id: String,
    pub seed_pair_id: String,
    pub client_seed: String,
    pub server_seed_hash: String,
    pub server_seed: Option<String>,
    pub nonce: u64,
    pub scheme: DerivationScheme,
    pub wager: f64,
    pub target: Target,
    pub condition: Condition,
    pub house_edge: f64,
    pub roll: Roll,
    pub multiplier: f64,
    pub won: bool,
    pub payout: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AdminCreditRequest {
    pub user_id: String,
    pub amount: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BalanceResponse {
    pub user_id: String,
    pub balance: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("{0}")]
    Fairness(#[from] FairnessError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("internal server error")]
    Internal,
}

impl ApiError {
    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Invalid(_) => "invalid_input",
            ApiError::Fairness(e) => match e {
                FairnessError::InvalidInput(_) => "invalid_input",
                FairnessError::InsufficientBalance { .. } => "insufficient_balance",
                FairnessError::EntropySourceFailure(_) => "entropy_source_failure",
                FairnessError::ConcurrencyConflict => "concurrency_conflict",
                FairnessError::VerificationMismatch { .. } => "verification_mismatch",
                FairnessError::CommitmentMismatch => "commitment_mismatch",
                FairnessError::NotYetVerifiable => "not_yet_verifiable",
                FairnessError::Store(_) => "store",
            },
            ApiError::NotFound(_) => "not_found",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Internal => "internal",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
            kind: self.kind().to_string(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
