use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use fairdice_core::{
    derive_roll_with, verify_commitment, verify_outcome, DiceParams, FairnessError,
    RevealedSeedPair, Roll,
};
use fairdice_shared::{
    AdminCreditRequest, ApiError, BalanceResponse, BetLogEntry, BetRequest, BetResponse,
    ClientSeedRequest, RotateRequest, RotateResponse, SeedInfo, VerifyRequest, VerifyResponse,
};
use serde::Deserialize;
use tracing::warn;

use crate::{db, error::ServerResult, AppState};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn get_seeds(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ServerResult<Json<SeedInfo>> {
    let info = db::seed_info(&state.db, &user_id, state.config.starting_balance).await?;
    Ok(Json(info))
}

pub async fn revealed_seeds(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ServerResult<Json<Vec<RevealedSeedPair>>> {
    Ok(Json(db::revealed_pairs(&state.db, &user_id).await?))
}

pub async fn set_client_seed(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClientSeedRequest>,
) -> ServerResult<Json<SeedInfo>> {
    let info = db::set_client_seed(
        &state.db,
        &req.user_id,
        &req.client_seed,
        state.config.starting_balance,
    )
    .await?;
    Ok(Json(info))
}

pub async fn rotate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RotateRequest>,
) -> ServerResult<Json<RotateResponse>> {
    Ok(Json(
        db::rotate(&state.db, &req.user_id, state.config.starting_balance).await?,
    ))
}

pub async fn place_bet(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BetRequest>,
) -> ServerResult<Json<BetResponse>> {
    let params = DiceParams::new(
        req.target,
        req.condition,
        req.house_edge.unwrap_or(state.config.default_house_edge),
    )?;
    let placed = db::place_bet(
        &state.db,
        &req.user_id,
        req.wager,
        &params,
        state.config.starting_balance,
    )
    .await?;
    let outcome = placed.outcome;
    Ok(Json(BetResponse {
        bet_id: placed.bet_id,
        roll: outcome.roll,
        target: outcome.params.target,
        condition: outcome.params.condition,
        multiplier: outcome.multiplier,
        won: outcome.won,
        wager: outcome.wager,
        payout: outcome.payout,
        balance: placed.balance,
        server_seed: None,
        server_seed_hash: outcome.server_seed_hash,
        client_seed: outcome.client_seed,
        nonce: outcome.nonce,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}

pub async fn bet_history(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> ServerResult<Json<Vec<BetLogEntry>>> {
    Ok(Json(db::bet_history(&state.db, &user_id, q.limit).await?))
}

pub async fn get_bet(
    State(state): State<Arc<AppState>>,
    Path(bet_id): Path<i64>,
) -> ServerResult<Json<BetLogEntry>> {
    Ok(Json(db::get_bet(&state.db, bet_id).await?))
}

/// Replays a stored bet. Bets under a still-active pair answer 409
/// `not_yet_verifiable`; a replay that disagrees is reported, never hidden.
pub async fn verify_bet(
    State(state): State<Arc<AppState>>,
    Path(bet_id): Path<i64>,
) -> ServerResult<Json<VerifyResponse>> {
    let entry = db::get_bet(&state.db, bet_id).await?;
    let outcome = db::entry_outcome(&entry);
    let server_seed = entry.server_seed.as_deref();
    match verify_outcome(server_seed, &outcome) {
        Ok(verified) => Ok(Json(VerifyResponse {
            valid: true,
            commitment_valid: true,
            recomputed_roll: Some(verified.roll),
            reason: None,
        })),
        Err(FairnessError::NotYetVerifiable) => Err(FairnessError::NotYetVerifiable.into()),
        Err(e) => {
            warn!(bet_id, error = %e, "stored bet failed verification");
            let commitment_valid = server_seed
                .map(|seed| verify_commitment(seed, &entry.server_seed_hash))
                .unwrap_or(false);
            let recomputed_roll = server_seed.map(|seed| {
                derive_roll_with(entry.scheme, &entry.client_seed, seed, entry.nonce)
            });
            Ok(Json(VerifyResponse {
                valid: false,
                commitment_valid,
                recomputed_roll,
                reason: Some(e.to_string()),
            }))
        }
    }
}

/// Stateless verification of caller-supplied data.
pub fn check_verify_request(
    req: &VerifyRequest,
    default_house_edge: f64,
) -> ServerResult<VerifyResponse> {
    DiceParams::new(
        req.target,
        req.condition,
        req.house_edge.unwrap_or(default_house_edge),
    )?;
    let recorded = Roll::try_from(req.roll)?;
    let commitment_valid = verify_commitment(&req.server_seed, &req.server_seed_hash);
    let recomputed = derive_roll_with(req.scheme, &req.client_seed, &req.server_seed, req.nonce);

    let reason = if !commitment_valid {
        Some(FairnessError::CommitmentMismatch.to_string())
    } else if recomputed != recorded {
        Some(
            FairnessError::VerificationMismatch {
                recorded: recorded.to_string(),
                recomputed: recomputed.to_string(),
            }
            .to_string(),
        )
    } else {
        None
    };
    if let Some(reason) = &reason {
        warn!(nonce = req.nonce, %reason, "verification failed");
    }
    Ok(VerifyResponse {
        valid: reason.is_none(),
        commitment_valid,
        recomputed_roll: Some(recomputed),
        reason,
    })
}

pub async fn verify(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyRequest>,
) -> ServerResult<Json<VerifyResponse>> {
    Ok(Json(check_verify_request(&req, state.config.default_house_edge)?))
}

pub async fn balance(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ServerResult<Json<BalanceResponse>> {
    let balance = db::balance(&state.db, &user_id, state.config.starting_balance).await?;
    Ok(Json(BalanceResponse { user_id, balance }))
}

pub async fn admin_credit(
    State(state): State<Arc<AppState>>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Json(req): Json<AdminCreditRequest>,
) -> ServerResult<Json<BalanceResponse>> {
    if bearer.token() != state.config.api_key {
        return Err(ApiError::Unauthorized.into());
    }
    let balance = db::credit(
        &state.db,
        &req.user_id,
        req.amount,
        state.config.starting_balance,
    )
    .await?;
    Ok(Json(BalanceResponse {
        user_id: req.user_id,
        balance,
    }))
}
