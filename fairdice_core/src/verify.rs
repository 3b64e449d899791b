//! Independent replay of past outcomes from public data.
//!
//! A full proof is two checks: the revealed server seed hashes to the
//! commitment published before the bet, and re-deriving the roll from the
//! recorded inputs reproduces the recorded roll and settlement.

use crate::{
    engine::{settle, Outcome},
    error::{FairnessError, Result},
    odds::DiceParams,
    rng::{derive_roll_with, sha256_hex, DerivationScheme, Roll},
    seed::RevealedSeedPair,
};

/// Result of a successful replay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verified {
    pub roll: Roll,
    pub won: bool,
    pub multiplier: f64,
}

pub fn verify_commitment(server_seed: &str, server_seed_hash: &str) -> bool {
    sha256_hex(server_seed.as_bytes()).eq_ignore_ascii_case(server_seed_hash)
}

/// Boolean form: does `(client, server, nonce)` reproduce `recorded` under
/// the canonical scheme.
pub fn verify(
    client_seed: &str,
    server_seed: &str,
    nonce: u64,
    params: &DiceParams,
    recorded: Roll,
) -> bool {
    let scheme = DerivationScheme::default();
    params.validate().is_ok()
        && derive_roll_with(scheme, client_seed, server_seed, nonce) == recorded
}

/// Replays a recorded outcome. `server_seed` is `None` while the pair is
/// still active, which is reported as [`FairnessError::NotYetVerifiable`]
/// rather than as a mismatch.
pub fn verify_outcome(server_seed: Option<&str>, outcome: &Outcome) -> Result<Verified> {
    let server_seed = server_seed.ok_or(FairnessError::NotYetVerifiable)?;
    if !verify_commitment(server_seed, &outcome.server_seed_hash) {
        return Err(FairnessError::CommitmentMismatch);
    }
    let roll = derive_roll_with(outcome.scheme, &outcome.client_seed, server_seed, outcome.nonce);
    if roll != outcome.roll {
        return Err(FairnessError::VerificationMismatch {
            recorded: outcome.roll.to_string(),
            recomputed: roll.to_string(),
        });
    }
    let settlement = settle(roll, outcome.wager, &outcome.params)?;
    if settlement.won != outcome.won
        || settlement.multiplier != outcome.multiplier
        || settlement.payout != outcome.payout
    {
        return Err(FairnessError::VerificationMismatch {
            recorded: format!(
                "won={} multiplier={} payout={:.2}",
                outcome.won, outcome.multiplier, outcome.payout
            ),
            recomputed: format!(
                "won={} multiplier={} payout={:.2}",
                settlement.won, settlement.multiplier, settlement.payout
            ),
        });
    }
    Ok(Verified {
        roll,
        won: settlement.won,
        multiplier: settlement.multiplier,
    })
}

/// Replays every outcome recorded under a revealed pair.
pub fn verify_epoch(revealed: &RevealedSeedPair, outcomes: &[Outcome]) -> Result<Vec<Verified>> {
    if !revealed.commitment_holds() {
        return Err(FairnessError::CommitmentMismatch);
    }
    outcomes
        .iter()
        .map(|outcome| {
            if outcome.pair_id != revealed.id || outcome.nonce >= revealed.final_nonce {
                return Err(FairnessError::invalid(format!(
                    "outcome at nonce {} was not derived under pair {}",
                    outcome.nonce, revealed.id
                )));
            }
            verify_outcome(Some(&revealed.server_seed), outcome)
        })
        .collect()
}
