use std::fmt;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{FairnessError, Result};

// Provably-fair derivation:
// SHA256("client_seed:server_seed:nonce") -> first 32 bits (big-endian) -> hundredths in [0, 10000)

pub type HmacSha256 = Hmac<Sha256>;

/// Exclusive upper bound of a roll, in hundredths.
pub const ROLL_SCALE: u32 = 10_000;

/// Lowercase hex SHA-256 of `input`. Also the commitment hash for server seeds.
pub fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

pub fn derivation_message(client_seed: &str, server_seed: &str, nonce: u64) -> String {
    format!("{client_seed}:{server_seed}:{nonce}")
}

/// Which hash construction turns seeds into a digest.
///
/// `Sha256` is canonical. `HmacSha256` keys the MAC with the server seed and
/// signs `"client_seed:nonce"`; it is kept so records produced that way can
/// still be audited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivationScheme {
    #[default]
    Sha256,
    HmacSha256,
}

impl DerivationScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            DerivationScheme::Sha256 => "sha256",
            DerivationScheme::HmacSha256 => "hmac_sha256",
        }
    }
}

impl fmt::Display for DerivationScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DerivationScheme {
    type Err = FairnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sha256" => Ok(DerivationScheme::Sha256),
            "hmac_sha256" | "hmac-sha256" => Ok(DerivationScheme::HmacSha256),
            other => Err(FairnessError::invalid(format!(
                "unknown derivation scheme `{other}`"
            ))),
        }
    }
}

/// A dice result in hundredths, always in `[0.00, 100.00)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Roll(u32);

impl Roll {
    pub fn from_hundredths(hundredths: u32) -> Result<Self> {
        if hundredths >= ROLL_SCALE {
            return Err(FairnessError::invalid(format!(
                "roll {hundredths} is outside [0, {ROLL_SCALE})"
            )));
        }
        Ok(Roll(hundredths))
    }

    /// Maps the first 32 bits of a digest onto the roll range.
    /// `h / 0xFFFFFFFF * 100` truncated to two decimals, done in integers so
    /// every platform agrees. The single value that lands on 100.00 is held at 99.99.
    pub fn from_hash_prefix(h: u32) -> Self {
        let hundredths = (u64::from(h) * u64::from(ROLL_SCALE)) / u64::from(u32::MAX);
        Roll((hundredths as u32).min(ROLL_SCALE - 1))
    }

    pub fn hundredths(self) -> u32 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / 100.0
    }
}

impl fmt::Display for Roll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl TryFrom<f64> for Roll {
    type Error = FairnessError;

    fn try_from(value: f64) -> Result<Self> {
        if !value.is_finite() || value < 0.0 {
            return Err(FairnessError::invalid(format!("roll {value} is not a valid dice value")));
        }
        Roll::from_hundredths((value * 100.0).round() as u32)
    }
}

impl From<Roll> for f64 {
    fn from(roll: Roll) -> f64 {
        roll.as_f64()
    }
}

impl FromStr for Roll {
    type Err = FairnessError;

    fn from_str(s: &str) -> Result<Self> {
        let value: f64 = s
            .trim()
            .parse()
            .map_err(|_| FairnessError::invalid(format!("`{s}` is not a number")))?;
        Roll::try_from(value)
    }
}

/// Seeds and nonce for exactly one outcome.
#[derive(Debug, Clone)]
pub struct ProvablyFairRng {
    pub server_seed: String, // secret until rotation
    pub client_seed: String,
    pub nonce: u64,
    pub scheme: DerivationScheme,
}

impl ProvablyFairRng {
    pub fn new(server_seed: impl Into<String>, client_seed: impl Into<String>, nonce: u64) -> Self {
        Self {
            server_seed: server_seed.into(),
            client_seed: client_seed.into(),
            nonce,
            scheme: DerivationScheme::default(),
        }
    }

    pub fn with_scheme(mut self, scheme: DerivationScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn server_seed_hash_hex(&self) -> String {
        sha256_hex(self.server_seed.as_bytes())
    }

    pub fn digest(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        match self.scheme {
            DerivationScheme::Sha256 => {
                let msg = derivation_message(&self.client_seed, &self.server_seed, self.nonce);
                out.copy_from_slice(&Sha256::digest(msg.as_bytes()));
            }
            DerivationScheme::HmacSha256 => {
                let mut mac = HmacSha256::new_from_slice(self.server_seed.as_bytes())
                    .expect("HMAC accepts keys of any length");
                let msg = format!("{}:{}", self.client_seed, self.nonce);
                mac.update(msg.as_bytes());
                out.copy_from_slice(&mac.finalize().into_bytes());
            }
        }
        out
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest())
    }

    pub fn roll(&self) -> Roll {
        let d = self.digest();
        // first 8 hex chars of the digest, big-endian
        Roll::from_hash_prefix(u32::from_be_bytes([d[0], d[1], d[2], d[3]]))
    }
}

/// Canonical derivation: `SHA256(client:server:nonce)` mapped to a roll.
pub fn derive_roll(client_seed: &str, server_seed: &str, nonce: u64) -> Roll {
    ProvablyFairRng::new(server_seed, client_seed, nonce).roll()
}

pub fn derive_roll_with(
    scheme: DerivationScheme,
    client_seed: &str,
    server_seed: &str,
    nonce: u64,
) -> Roll {
    ProvablyFairRng::new(server_seed, client_seed, nonce)
        .with_scheme(scheme)
        .roll()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER: &str = "deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef";

    #[test]
    fn test_determinism() {
        let rng1 = ProvablyFairRng::new("server", "client", 1);
        let rng2 = ProvablyFairRng::new("server", "client", 1);
        assert_eq!(rng1.server_seed_hash_hex(), rng2.server_seed_hash_hex());
        assert_eq!(rng1.digest(), rng2.digest());
        assert_eq!(rng1.roll(), rng2.roll());
    }

    #[test]
    fn test_reference_vectors() {
        assert_eq!(derive_roll("abc123", SERVER, 0).to_string(), "21.36");
        assert_eq!(derive_roll("abc123", SERVER, 1).to_string(), "37.51");
        assert_eq!(derive_roll("abc123", SERVER, 4).to_string(), "18.62");
        assert_eq!(derive_roll("client", "server", 1).to_string(), "0.17");
        assert!(ProvablyFairRng::new(SERVER, "abc123", 0)
            .digest_hex()
            .starts_with("36b32c2c"));
    }

    #[test]
    fn test_hmac_vectors() {
        let roll = derive_roll_with(DerivationScheme::HmacSha256, "abc123", SERVER, 0);
        assert_eq!(roll.hundredths(), 5239);
        assert_ne!(roll, derive_roll("abc123", SERVER, 0));
    }

    #[test]
    fn test_commitment_hash() {
        assert_eq!(
            sha256_hex(SERVER.as_bytes()),
            "247d08f3e13938b244f5ecd8966f1778e5e72b175820f46ba86c9c039272affa"
        );
    }

    #[test]
    fn test_prefix_bounds() {
        assert_eq!(Roll::from_hash_prefix(0).hundredths(), 0);
        assert_eq!(Roll::from_hash_prefix(u32::MAX).hundredths(), 9999);
        assert_eq!(Roll::from_hash_prefix(u32::MAX - 1).hundredths(), 9999);
        assert_eq!(Roll::from_hash_prefix(u32::MAX / 2).to_string(), "49.99");
    }

    #[test]
    fn test_roll_parsing() {
        assert_eq!("21.36".parse::<Roll>().unwrap().hundredths(), 2136);
        assert_eq!(Roll::try_from(5.0).unwrap().to_string(), "5.00");
        assert!(Roll::try_from(100.0).is_err());
        assert!(Roll::try_from(-0.01).is_err());
        assert!("abc".parse::<Roll>().is_err());
    }

    #[test]
    fn test_scheme_names() {
        for scheme in [DerivationScheme::Sha256, DerivationScheme::HmacSha256] {
            assert_eq!(scheme.as_str().parse::<DerivationScheme>().unwrap(), scheme);
        }
        assert!("md5".parse::<DerivationScheme>().is_err());
    }
}
