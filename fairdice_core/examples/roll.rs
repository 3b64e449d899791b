use fairdice_core::{roll_dice, Condition, DiceParams, ProvablyFairRng};

fn main() -> fairdice_core::Result<()> {
    // Example end-to-end roll
    let server_seed = "example-server-seed";
    let client_seed = "example-client-seed";
    let nonce = 0u64;
    let rng = ProvablyFairRng::new(server_seed, client_seed, nonce);
    let params = DiceParams::with_default_edge(50.0, Condition::Under)?;
    let commitment = rng.server_seed_hash_hex();
    let outcome = roll_dice(&rng, "example", &commitment, 1.0, &params)?;
    println!(
        "server_seed_hash={} roll={} won={} multiplier={} payout={:.2}",
        commitment,
        outcome.roll,
        outcome.won,
        outcome.multiplier,
        outcome.payout
    );
    Ok(())
}
