use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    odds::{payout, validate_wager, DiceParams},
    rng::{sha256_hex, DerivationScheme, ProvablyFairRng, Roll},
};

/// One settled bet. Everything needed to replay it once the server seed is
/// revealed, minus the seed itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub pair_id: String,
    pub client_seed: String,
    pub server_seed_hash: String,
    pub nonce: u64,
    pub scheme: DerivationScheme,
    pub params: DiceParams,
    pub roll: Roll,
    pub won: bool,
    pub multiplier: f64,
    pub wager: f64,
    pub payout: f64,
}

impl Outcome {
    /// Net change to the player's balance.
    pub fn profit(&self) -> f64 {
        self.payout - self.wager
    }
}

/// Settlement of a derived roll: win flag, multiplier and payout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settlement {
    pub won: bool,
    pub multiplier: f64,
    pub payout: f64,
}

pub fn settle(roll: Roll, wager: f64, params: &DiceParams) -> Result<Settlement> {
    let wager = validate_wager(wager)?;
    params.validate()?;
    let multiplier = params.multiplier()?;
    let won = params.condition.wins(roll, params.target);
    Ok(Settlement {
        won,
        multiplier,
        payout: payout(wager, multiplier, won),
    })
}

/// Derives and settles one bet. Pure.
///
/// `server_seed_hash` is the commitment published for the pair, recorded as
/// is. It is not recomputed from the seed in `rng`, so a swapped seed shows up
/// as a mismatch when the outcome is verified.
pub fn roll_dice(
    rng: &ProvablyFairRng,
    pair_id: &str,
    server_seed_hash: &str,
    wager: f64,
    params: &DiceParams,
) -> Result<Outcome> {
    let roll = rng.roll();
    let Settlement {
        won,
        multiplier,
        payout,
    } = settle(roll, wager, params)?;
    Ok(Outcome {
        pair_id: pair_id.to_string(),
        client_seed: rng.client_seed.clone(),
        server_seed_hash: server_seed_hash.to_string(),
        nonce: rng.nonce,
        scheme: rng.scheme,
        params: *params,
        roll,
        won,
        multiplier,
        wager,
        payout,
    })
}

/// Convenience: settle a bet creating the RNG from seeds.
pub fn roll_with_seeds(
    server_seed: &str,
    client_seed: &str,
    nonce: u64,
    wager: f64,
    params: &DiceParams,
) -> Result<Outcome> {
    let rng = ProvablyFairRng::new(server_seed, client_seed, nonce);
    roll_dice(&rng, "", &sha256_hex(server_seed.as_bytes()), wager, params)
}
