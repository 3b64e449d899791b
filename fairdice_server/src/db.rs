//! SQLite persistence for players, seed pairs and bets.
//!
//! Each state change runs in one transaction. Nonces are consumed with a
//! compare-and-swap on `(pair id, nonce, revealed = 0)`, so a bet that raced
//! a rotation or another bet is rolled back instead of reusing a nonce.

use chrono::{DateTime, Utc};
use fairdice_core::{
    odds::validate_wager, roll_dice, seed::validate_client_seed, verify_outcome,
    DerivationScheme, DiceParams, FairnessError, Outcome, ProvablyFairRng, RevealedSeedPair, Roll,
    SeedPair, Target,
};
use fairdice_shared::{ApiError, BetLogEntry, RotateResponse, SeedInfo};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};

use crate::error::ServerResult;

pub async fn init_db(db: &SqlitePool) -> ServerResult<()> {
    sqlx::migrate!("./migrations").run(db).await?;
    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
struct StoredPair {
    id: String,
    server_seed: String,
    server_seed_hash: String,
    client_seed: String,
    nonce: i64,
    scheme: String,
    created_at: DateTime<Utc>,
}

impl StoredPair {
    fn into_pair(self) -> ServerResult<SeedPair> {
        Ok(SeedPair::restore(
            self.id,
            self.server_seed,
            self.server_seed_hash,
            self.client_seed,
            self.nonce as u64,
            self.scheme.parse()?,
            self.created_at,
        )?)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StoredRevealed {
    id: String,
    server_seed: String,
    server_seed_hash: String,
    client_seed: String,
    nonce: i64,
    scheme: String,
    created_at: DateTime<Utc>,
    revealed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct StoredBet {
    id: i64,
    ts: DateTime<Utc>,
    user_id: String,
    seed_pair_id: String,
    client_seed: String,
    server_seed_hash: String,
    server_seed: Option<String>,
    nonce: i64,
    scheme: String,
    wager: f64,
    target: i64,
    condition: String,
    house_edge: f64,
    roll: i64,
    multiplier: f64,
    won: bool,
    payout: f64,
}

impl StoredBet {
    fn into_entry(self) -> ServerResult<BetLogEntry> {
        Ok(BetLogEntry {
            id: self.id,
            ts: self.ts,
            user_id: self.user_id,
            seed_pair_id: self.seed_pair_id,
            client_seed: self.client_seed,
            server_seed_hash: self.server_seed_hash,
            server_seed: self.server_seed,
            nonce: self.nonce as u64,
            scheme: self.scheme.parse()?,
            wager: self.wager,
            target: Target::from_hundredths(self.target as u32)?,
            condition: self.condition.parse()?,
            house_edge: self.house_edge,
            roll: Roll::from_hundredths(self.roll as u32)?,
            multiplier: self.multiplier,
            won: self.won,
            payout: self.payout,
        })
    }
}

/// Rebuilds the core outcome so a stored bet can be replayed by the verifier.
pub fn entry_outcome(entry: &BetLogEntry) -> Outcome {
    Outcome {
        pair_id: entry.seed_pair_id.clone(),
        client_seed: entry.client_seed.clone(),
        server_seed_hash: entry.server_seed_hash.clone(),
        nonce: entry.nonce,
        scheme: entry.scheme,
        params: DiceParams {
            target: entry.target,
            condition: entry.condition,
            house_edge: entry.house_edge,
        },
        roll: entry.roll,
        won: entry.won,
        multiplier: entry.multiplier,
        wager: entry.wager,
        payout: entry.payout,
    }
}

/// Registers the player on first sight and returns their balance.
pub async fn ensure_player(
    conn: &mut SqliteConnection,
    user_id: &str,
    starting_balance: f64,
) -> ServerResult<f64> {
    if user_id.trim().is_empty() {
        return Err(ApiError::Invalid("user_id must not be empty".into()).into());
    }
    sqlx::query("INSERT OR IGNORE INTO players (user_id, balance, created_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(starting_balance)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;
    let balance: f64 = sqlx::query_scalar("SELECT balance FROM players WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(balance)
}

async fn active_pair(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> ServerResult<Option<SeedPair>> {
    let row = sqlx::query_as::<_, StoredPair>(
        "SELECT id, server_seed, server_seed_hash, client_seed, nonce, scheme, created_at \
         FROM seed_pairs WHERE user_id = ? AND revealed = 0",
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(StoredPair::into_pair).transpose()
}

async fn insert_pair(
    conn: &mut SqliteConnection,
    user_id: &str,
    pair: &SeedPair,
) -> ServerResult<()> {
    sqlx::query(
        "INSERT INTO seed_pairs \
         (id, user_id, server_seed, server_seed_hash, client_seed, nonce, scheme, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(pair.id())
    .bind(user_id)
    .bind(pair.server_seed_for_storage())
    .bind(pair.server_seed_hash())
    .bind(pair.client_seed())
    .bind(pair.nonce() as i64)
    .bind(pair.scheme().as_str())
    .bind(pair.created_at())
    .execute(&mut *conn)
    .await?;
    info!(user_id, pair_id = pair.id(), hash = pair.server_seed_hash(), "created seed pair");
    Ok(())
}

async fn active_or_create(conn: &mut SqliteConnection, user_id: &str) -> ServerResult<SeedPair> {
    if let Some(pair) = active_pair(conn, user_id).await? {
        return Ok(pair);
    }
    let pair = SeedPair::generate(None)?;
    insert_pair(conn, user_id, &pair).await?;
    Ok(pair)
}

/// Claims `expected` as the next nonce of `pair_id`. Fails with
/// `ConcurrencyConflict` if the pair was rotated or the nonce already taken.
pub async fn consume_nonce(
    conn: &mut SqliteConnection,
    pair_id: &str,
    expected: u64,
) -> ServerResult<u64> {
    let res = sqlx::query(
        "UPDATE seed_pairs SET nonce = nonce + 1 WHERE id = ? AND nonce = ? AND revealed = 0",
    )
    .bind(pair_id)
    .bind(expected as i64)
    .execute(&mut *conn)
    .await?;
    if res.rows_affected() != 1 {
        warn!(pair_id, nonce = expected, "nonce compare-and-swap lost");
        return Err(FairnessError::ConcurrencyConflict.into());
    }
    Ok(expected)
}

/// Fetch seeds; the raw server seed is never part of the answer.
pub async fn seed_info(
    db: &SqlitePool,
    user_id: &str,
    starting_balance: f64,
) -> ServerResult<SeedInfo> {
    let mut tx = db.begin().await?;
    ensure_player(&mut tx, user_id, starting_balance).await?;
    let pair = active_or_create(&mut tx, user_id).await?;
    tx.commit().await?;
    Ok(SeedInfo {
        client_seed: pair.client_seed().to_string(),
        server_seed_hash: pair.server_seed_hash().to_string(),
        nonce: pair.nonce(),
    })
}

pub async fn set_client_seed(
    db: &SqlitePool,
    user_id: &str,
    client_seed: &str,
    starting_balance: f64,
) -> ServerResult<SeedInfo> {
    validate_client_seed(client_seed)?;
    let mut tx = db.begin().await?;
    ensure_player(&mut tx, user_id, starting_balance).await?;
    let pair = active_or_create(&mut tx, user_id).await?;
    let res = sqlx::query("UPDATE seed_pairs SET client_seed = ? WHERE id = ? AND revealed = 0")
        .bind(client_seed)
        .bind(pair.id())
        .execute(&mut *tx)
        .await?;
    if res.rows_affected() != 1 {
        return Err(FairnessError::ConcurrencyConflict.into());
    }
    tx.commit().await?;
    Ok(SeedInfo {
        client_seed: client_seed.to_string(),
        server_seed_hash: pair.server_seed_hash().to_string(),
        nonce: pair.nonce(),
    })
}

#[derive(Debug, Clone)]
pub struct PlacedBet {
    pub bet_id: i64,
    pub outcome: Outcome,
    pub balance: f64,
}

/// Balance check, nonce claim, derivation, settlement and bet insert as one
/// transaction. Nothing is written unless every step succeeds.
pub async fn place_bet(
    db: &SqlitePool,
    user_id: &str,
    wager: f64,
    params: &DiceParams,
    starting_balance: f64,
) -> ServerResult<PlacedBet> {
    let wager = validate_wager(wager)?;
    params.validate()?;

    let mut tx = db.begin().await?;
    let available = ensure_player(&mut tx, user_id, starting_balance).await?;
    if wager > available {
        return Err(FairnessError::InsufficientBalance { wager, available }.into());
    }

    let pair = active_or_create(&mut tx, user_id).await?;
    let nonce = consume_nonce(&mut tx, pair.id(), pair.nonce()).await?;

    let rng = ProvablyFairRng::new(pair.server_seed_for_storage(), pair.client_seed(), nonce)
        .with_scheme(pair.scheme());
    let outcome = roll_dice(&rng, pair.id(), pair.server_seed_hash(), wager, params)?;
    verify_outcome(Some(pair.server_seed_for_storage()), &outcome)?;

    let res = sqlx::query(
        "UPDATE players SET balance = balance - ? + ? WHERE user_id = ? AND balance >= ?",
    )
    .bind(wager)
    .bind(outcome.payout)
    .bind(user_id)
    .bind(wager)
    .execute(&mut *tx)
    .await?;
    if res.rows_affected() != 1 {
        return Err(FairnessError::InsufficientBalance { wager, available }.into());
    }

    let bet_id = sqlx::query(
        "INSERT INTO bets (ts, user_id, seed_pair_id, client_seed, server_seed_hash, nonce, \
         scheme, wager, target, condition, house_edge, roll, multiplier, won, payout) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(Utc::now())
    .bind(user_id)
    .bind(&outcome.pair_id)
    .bind(&outcome.client_seed)
    .bind(&outcome.server_seed_hash)
    .bind(outcome.nonce as i64)
    .bind(outcome.scheme.as_str())
    .bind(outcome.wager)
    .bind(i64::from(outcome.params.target.hundredths()))
    .bind(outcome.params.condition.as_str())
    .bind(outcome.params.house_edge)
    .bind(i64::from(outcome.roll.hundredths()))
    .bind(outcome.multiplier)
    .bind(outcome.won)
    .bind(outcome.payout)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    let balance: f64 = sqlx::query_scalar("SELECT balance FROM players WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(
        user_id,
        bet_id,
        nonce,
        roll = %outcome.roll,
        won = outcome.won,
        payout = outcome.payout,
        "bet settled"
    );
    Ok(PlacedBet {
        bet_id,
        outcome,
        balance,
    })
}

/// Reveals the active pair, back-fills its seed onto every bet made under it
/// and opens a fresh pair at nonce 0 with the same client seed.
pub async fn rotate(
    db: &SqlitePool,
    user_id: &str,
    starting_balance: f64,
) -> ServerResult<RotateResponse> {
    let mut tx = db.begin().await?;
    ensure_player(&mut tx, user_id, starting_balance).await?;
    let current = active_pair(&mut tx, user_id)
        .await?
        .ok_or_else(|| FairnessError::invalid("no active seed pair; fetch seeds first"))?;
    let next = SeedPair::generate_with_scheme(
        Some(current.client_seed().to_string()),
        current.scheme(),
    )?;
    let revealed = current.reveal();

    let res = sqlx::query(
        "UPDATE seed_pairs SET revealed = 1, revealed_at = ? WHERE id = ? AND revealed = 0",
    )
    .bind(revealed.revealed_at)
    .bind(&revealed.id)
    .execute(&mut *tx)
    .await?;
    if res.rows_affected() != 1 {
        return Err(FairnessError::ConcurrencyConflict.into());
    }
    sqlx::query("UPDATE bets SET server_seed = ? WHERE seed_pair_id = ?")
        .bind(&revealed.server_seed)
        .bind(&revealed.id)
        .execute(&mut *tx)
        .await?;
    insert_pair(&mut tx, user_id, &next).await?;
    tx.commit().await?;

    info!(
        user_id,
        revealed_pair = %revealed.id,
        outcomes = revealed.final_nonce,
        next_hash = next.server_seed_hash(),
        "rotated seed pair"
    );
    Ok(RotateResponse {
        previous_server_seed: revealed.server_seed,
        previous_server_seed_hash: revealed.server_seed_hash,
        previous_client_seed: revealed.client_seed,
        previous_nonce: revealed.final_nonce,
        new_server_seed_hash: next.server_seed_hash().to_string(),
        new_nonce: next.nonce(),
    })
}

pub async fn revealed_pairs(
    db: &SqlitePool,
    user_id: &str,
) -> ServerResult<Vec<RevealedSeedPair>> {
    let rows = sqlx::query_as::<_, StoredRevealed>(
        "SELECT id, server_seed, server_seed_hash, client_seed, nonce, scheme, created_at, \
         revealed_at FROM seed_pairs WHERE user_id = ? AND revealed = 1 \
         ORDER BY revealed_at DESC",
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;
    rows.into_iter()
        .map(|row| {
            Ok(RevealedSeedPair {
                scheme: row.scheme.parse::<DerivationScheme>()?,
                id: row.id,
                server_seed: row.server_seed,
                server_seed_hash: row.server_seed_hash,
                client_seed: row.client_seed,
                final_nonce: row.nonce as u64,
                created_at: row.created_at,
                revealed_at: row.revealed_at.unwrap_or(row.created_at),
            })
        })
        .collect()
}

const BET_COLUMNS: &str = "id, ts, user_id, seed_pair_id, client_seed, server_seed_hash, \
     server_seed, nonce, scheme, wager, target, condition, house_edge, roll, multiplier, won, \
     payout";

pub async fn bet_history(
    db: &SqlitePool,
    user_id: &str,
    limit: i64,
) -> ServerResult<Vec<BetLogEntry>> {
    let rows = sqlx::query_as::<_, StoredBet>(&format!(
        "SELECT {BET_COLUMNS} FROM bets WHERE user_id = ? ORDER BY id DESC LIMIT ?"
    ))
    .bind(user_id)
    .bind(limit.clamp(1, 1_000))
    .fetch_all(db)
    .await?;
    rows.into_iter().map(StoredBet::into_entry).collect()
}

pub async fn get_bet(db: &SqlitePool, bet_id: i64) -> ServerResult<BetLogEntry> {
    let query = format!("SELECT {BET_COLUMNS} FROM bets WHERE id = ?");
    let row = sqlx::query_as::<_, StoredBet>(&query)
        .bind(bet_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("bet {bet_id}")))?;
    row.into_entry()
}

pub async fn balance(db: &SqlitePool, user_id: &str, starting_balance: f64) -> ServerResult<f64> {
    let mut conn = db.acquire().await?;
    ensure_player(&mut conn, user_id, starting_balance).await
}

pub async fn credit(
    db: &SqlitePool,
    user_id: &str,
    amount: f64,
    starting_balance: f64,
) -> ServerResult<f64> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(ApiError::Invalid(format!("credit amount {amount} must be positive")).into());
    }
    let mut tx = db.begin().await?;
    ensure_player(&mut tx, user_id, starting_balance).await?;
    sqlx::query("UPDATE players SET balance = balance + ? WHERE user_id = ?")
        .bind(amount)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    let balance: f64 = sqlx::query_scalar("SELECT balance FROM players WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;
    info!(user_id, amount, balance, "credited player");
    Ok(balance)
}
