use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fairdice_core::FairnessError;
use fairdice_shared::ApiError;
use tracing::{error, warn};

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("migration: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl From<FairnessError> for ServerError {
    fn from(e: FairnessError) -> Self {
        ServerError::Api(ApiError::Fairness(e))
    }
}

impl ServerError {
    /// Lost a race against another bet or a rotation; safe to retry.
    pub fn is_conflict(&self) -> bool {
        match self {
            ServerError::Api(ApiError::Fairness(FairnessError::ConcurrencyConflict)) => true,
            ServerError::Db(e) => is_busy(e),
            _ => false,
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;

/// SQLITE_BUSY and its extended codes: another writer holds the lock.
fn is_busy(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("5" | "261" | "517")),
        _ => false,
    }
}

fn status_for(e: &ApiError) -> StatusCode {
    match e {
        ApiError::Invalid(_) => StatusCode::BAD_REQUEST,
        ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
        ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        ApiError::Fairness(f) => match f {
            FairnessError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            FairnessError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            FairnessError::ConcurrencyConflict | FairnessError::NotYetVerifiable => {
                StatusCode::CONFLICT
            }
            FairnessError::VerificationMismatch { .. }
            | FairnessError::CommitmentMismatch
            | FairnessError::EntropySourceFailure(_)
            | FairnessError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let api = match self {
            ServerError::Api(api) => api,
            ServerError::Db(ref e) if is_busy(e) => {
                warn!(error = %e, "database busy; reporting as conflict");
                ApiError::Fairness(FairnessError::ConcurrencyConflict)
            }
            other => {
                error!(error = %other, "request failed");
                ApiError::Internal
            }
        };
        let status = status_for(&api);
        if status.is_server_error() {
            error!(kind = api.kind(), error = %api, "request failed");
        }
        (status, Json(api.body())).into_response()
    }
}
