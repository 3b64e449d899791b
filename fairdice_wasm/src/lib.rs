//! Browser bindings for verifying bets with nothing but public data.

use fairdice_core::{
    derive_roll_with, sha256_hex, verify_commitment, Condition, DerivationScheme, DiceParams, Roll,
};
use wasm_bindgen::prelude::*;

fn js_err(e: impl std::fmt::Display) -> JsError {
    JsError::new(&e.to_string())
}

fn parse_scheme(scheme: Option<String>) -> Result<DerivationScheme, JsError> {
    match scheme {
        Some(s) => s.parse().map_err(js_err),
        None => Ok(DerivationScheme::default()),
    }
}

#[wasm_bindgen]
pub fn hash_server_seed(server_seed: &str) -> String {
    sha256_hex(server_seed.as_bytes())
}

/// Roll for `(client, server, nonce)` as a number with two decimals.
#[wasm_bindgen]
pub fn derive_roll(
    client_seed: &str,
    server_seed: &str,
    nonce: u64,
    scheme: Option<String>,
) -> Result<f64, JsError> {
    let scheme = parse_scheme(scheme)?;
    Ok(derive_roll_with(scheme, client_seed, server_seed, nonce).as_f64())
}

#[wasm_bindgen]
pub fn multiplier(target: f64, condition: &str, house_edge: f64) -> Result<f64, JsError> {
    let condition: Condition = condition.parse().map_err(js_err)?;
    DiceParams::new(target, condition, house_edge)
        .and_then(|p| p.multiplier())
        .map_err(js_err)
}

/// Both halves of the proof: commitment and replay. Returns `false` on any
/// mismatch; malformed input is an error rather than `false`.
#[wasm_bindgen]
pub fn verify_bet(
    client_seed: &str,
    server_seed: &str,
    server_seed_hash: &str,
    nonce: u64,
    recorded_roll: f64,
    scheme: Option<String>,
) -> Result<bool, JsError> {
    let scheme = parse_scheme(scheme)?;
    let recorded = Roll::try_from(recorded_roll).map_err(js_err)?;
    Ok(verify_commitment(server_seed, server_seed_hash)
        && derive_roll_with(scheme, client_seed, server_seed, nonce) == recorded)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER: &str = "deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef";

    #[test]
    fn hash_matches_core() {
        assert_eq!(
            hash_server_seed(SERVER),
            "247d08f3e13938b244f5ecd8966f1778e5e72b175820f46ba86c9c039272affa"
        );
    }

    #[test]
    fn reference_bet_verifies() {
        let hash = hash_server_seed(SERVER);
        assert!(verify_bet("abc123", SERVER, &hash, 0, 21.36, None).unwrap());
        assert!(!verify_bet("abc123", SERVER, &hash, 1, 21.36, None).unwrap());
        assert!(!verify_bet("abc123", "deadbeef", &hash, 0, 21.36, None).unwrap());
    }

    #[test]
    fn derive_matches_reference() {
        assert_eq!(derive_roll("abc123", SERVER, 0, None).unwrap(), 21.36);
        assert_eq!(
            derive_roll("abc123", SERVER, 0, Some("hmac_sha256".into())).unwrap(),
            52.39
        );
    }
}
