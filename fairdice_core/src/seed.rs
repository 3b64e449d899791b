use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{FairnessError, Result};
use crate::rng::{sha256_hex, DerivationScheme};

pub const SERVER_SEED_BYTES: usize = 32;
pub const CLIENT_SEED_BYTES: usize = 16;
pub const PAIR_ID_BYTES: usize = 16;

/// Hex string of `len` bytes from the OS CSPRNG. There is no weaker fallback.
pub fn random_hex(len: usize) -> Result<String> {
    let mut buf = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| FairnessError::EntropySourceFailure(e.to_string()))?;
    Ok(hex::encode(buf))
}

pub fn generate_server_seed() -> Result<String> {
    random_hex(SERVER_SEED_BYTES)
}

pub fn generate_client_seed() -> Result<String> {
    random_hex(CLIENT_SEED_BYTES)
}

pub fn validate_client_seed(client_seed: &str) -> Result<()> {
    if client_seed.trim().is_empty() {
        return Err(FairnessError::invalid("client seed must not be empty"));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeedState {
    Active,
    Revealed,
}

/// What a player may see of the active pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedCommitment {
    pub pair_id: String,
    pub client_seed: String,
    pub server_seed_hash: String,
    pub nonce: u64,
}

/// The active commitment epoch. The raw server seed never leaves this type
/// except through [`SeedPair::reveal`]. Deserializing goes through
/// [`SeedPair::restore`], so a stored seed that no longer matches its
/// commitment is refused on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredSeedPair")]
pub struct SeedPair {
    id: String,
    server_seed: String,
    server_seed_hash: String,
    client_seed: String,
    nonce: u64,
    scheme: DerivationScheme,
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct StoredSeedPair {
    id: String,
    server_seed: String,
    server_seed_hash: String,
    client_seed: String,
    nonce: u64,
    scheme: DerivationScheme,
    created_at: DateTime<Utc>,
}

impl TryFrom<StoredSeedPair> for SeedPair {
    type Error = FairnessError;

    fn try_from(stored: StoredSeedPair) -> Result<Self> {
        SeedPair::restore(
            stored.id,
            stored.server_seed,
            stored.server_seed_hash,
            stored.client_seed,
            stored.nonce,
            stored.scheme,
            stored.created_at,
        )
    }
}

impl SeedPair {
    pub fn generate(client_seed: Option<String>) -> Result<Self> {
        Self::generate_with_scheme(client_seed, DerivationScheme::default())
    }

    pub fn generate_with_scheme(
        client_seed: Option<String>,
        scheme: DerivationScheme,
    ) -> Result<Self> {
        let client_seed = match client_seed {
            Some(seed) => {
                validate_client_seed(&seed)?;
                seed
            }
            None => generate_client_seed()?,
        };
        let server_seed = generate_server_seed()?;
        Ok(Self {
            id: random_hex(PAIR_ID_BYTES)?,
            server_seed_hash: sha256_hex(server_seed.as_bytes()),
            server_seed,
            client_seed,
            nonce: 0,
            scheme,
            created_at: Utc::now(),
        })
    }

    /// Rebuilds a pair loaded from storage. The commitment hash is recomputed
    /// and checked so a corrupted row cannot be silently reactivated.
    pub fn restore(
        id: String,
        server_seed: String,
        server_seed_hash: String,
        client_seed: String,
        nonce: u64,
        scheme: DerivationScheme,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        if sha256_hex(server_seed.as_bytes()) != server_seed_hash {
            return Err(FairnessError::CommitmentMismatch);
        }
        validate_client_seed(&client_seed)?;
        Ok(Self {
            id,
            server_seed,
            server_seed_hash,
            client_seed,
            nonce,
            scheme,
            created_at,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn server_seed_hash(&self) -> &str {
        &self.server_seed_hash
    }

    pub fn client_seed(&self) -> &str {
        &self.client_seed
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn scheme(&self) -> DerivationScheme {
        self.scheme
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Crate-internal: derivation needs the secret while the pair is active.
    pub(crate) fn server_seed(&self) -> &str {
        &self.server_seed
    }

    /// Only for persistence layers that must write the secret to their own store.
    pub fn server_seed_for_storage(&self) -> &str {
        &self.server_seed
    }

    pub fn commitment(&self) -> SeedCommitment {
        SeedCommitment {
            pair_id: self.id.clone(),
            client_seed: self.client_seed.clone(),
            server_seed_hash: self.server_seed_hash.clone(),
            nonce: self.nonce,
        }
    }

    pub(crate) fn set_client_seed(&mut self, client_seed: String) -> Result<()> {
        validate_client_seed(&client_seed)?;
        self.client_seed = client_seed;
        Ok(())
    }

    /// Returns the current nonce and advances the counter.
    pub(crate) fn advance_nonce(&mut self) -> Result<u64> {
        let nonce = self.nonce;
        self.nonce = nonce
            .checked_add(1)
            .ok_or_else(|| FairnessError::invalid("nonce space exhausted; rotate the seed pair"))?;
        Ok(nonce)
    }

    /// Ends the epoch. The pair is consumed so it can never derive again.
    pub fn reveal(self) -> RevealedSeedPair {
        RevealedSeedPair {
            id: self.id,
            server_seed: self.server_seed,
            server_seed_hash: self.server_seed_hash,
            client_seed: self.client_seed,
            final_nonce: self.nonce,
            scheme: self.scheme,
            created_at: self.created_at,
            revealed_at: Utc::now(),
        }
    }
}

/// A closed epoch, kept for audit. `final_nonce` is the number of outcomes
/// derived under it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevealedSeedPair {
    pub id: String,
    pub server_seed: String,
    pub server_seed_hash: String,
    pub client_seed: String,
    pub final_nonce: u64,
    pub scheme: DerivationScheme,
    pub created_at: DateTime<Utc>,
    pub revealed_at: DateTime<Utc>,
}

impl RevealedSeedPair {
    pub fn state(&self) -> SeedState {
        SeedState::Revealed
    }

    pub fn commitment_holds(&self) -> bool {
        sha256_hex(self.server_seed.as_bytes()) == self.server_seed_hash
    }
}
