use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    engine::{roll_dice, Outcome},
    error::{FairnessError, Result},
    odds::DiceParams,
    rng::{DerivationScheme, ProvablyFairRng},
    seed::{generate_client_seed, RevealedSeedPair, SeedCommitment, SeedPair},
    verify::verify_outcome,
};

/// Persistence backend for one player's seed pairs.
pub trait SeedStore: Send {
    fn load_active(&self) -> Result<Option<SeedPair>>;
    fn save_active(&mut self, pair: &SeedPair) -> Result<()>;
    fn archive(&mut self, revealed: &RevealedSeedPair) -> Result<()>;
    fn revealed(&self) -> Result<Vec<RevealedSeedPair>>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    active: Option<SeedPair>,
    revealed: Vec<RevealedSeedPair>,
}

impl SeedStore for MemoryStore {
    fn load_active(&self) -> Result<Option<SeedPair>> {
        Ok(self.active.clone())
    }

    fn save_active(&mut self, pair: &SeedPair) -> Result<()> {
        self.active = Some(pair.clone());
        Ok(())
    }

    fn archive(&mut self, revealed: &RevealedSeedPair) -> Result<()> {
        self.revealed.push(revealed.clone());
        Ok(())
    }

    fn revealed(&self) -> Result<Vec<RevealedSeedPair>> {
        Ok(self.revealed.clone())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SeedFile {
    active: Option<SeedPair>,
    #[serde(default)]
    revealed: Vec<RevealedSeedPair>,
}

/// Seed state in a single JSON document, replaced atomically on every write.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<SeedFile> {
        if !self.path.exists() {
            return Ok(SeedFile::default());
        }
        let raw = fs::read_to_string(&self.path).map_err(store_err)?;
        serde_json::from_str(&raw).map_err(store_err)
    }

    fn write(&self, file: &SeedFile) -> Result<()> {
        let json = serde_json::to_string_pretty(file).map_err(store_err)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(store_err)?;
        fs::rename(&tmp, &self.path).map_err(store_err)
    }
}

fn store_err(e: impl std::fmt::Display) -> FairnessError {
    FairnessError::Store(e.to_string())
}

impl SeedStore for JsonFileStore {
    fn load_active(&self) -> Result<Option<SeedPair>> {
        Ok(self.read()?.active)
    }

    fn save_active(&mut self, pair: &SeedPair) -> Result<()> {
        let mut file = self.read()?;
        file.active = Some(pair.clone());
        self.write(&file)
    }

    fn archive(&mut self, revealed: &RevealedSeedPair) -> Result<()> {
        let mut file = self.read()?;
        if file.active.as_ref().map(SeedPair::id) == Some(revealed.id.as_str()) {
            file.active = None;
        }
        file.revealed.push(revealed.clone());
        self.write(&file)
    }

    fn revealed(&self) -> Result<Vec<RevealedSeedPair>> {
        Ok(self.read()?.revealed)
    }
}

/// What happens to the client seed when a pair is rotated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClientSeedPolicy {
    #[default]
    Keep,
    Regenerate,
}

/// Proof that a nonce was handed out under a specific pair. The client seed
/// is captured at issue time, and a ticket can be redeemed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceTicket {
    pub pair_id: String,
    pub client_seed: String,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RotationResult {
    pub revealed: RevealedSeedPair,
    pub next: SeedCommitment,
}

impl RotationResult {
    pub fn previous_server_seed(&self) -> &str {
        &self.revealed.server_seed
    }

    pub fn new_server_seed_hash(&self) -> &str {
        &self.next.server_seed_hash
    }

    pub fn new_nonce(&self) -> u64 {
        self.next.nonce
    }
}

struct Inner<S> {
    store: S,
    active: Option<SeedPair>,
    /// Issued but unredeemed tickets of the active pair, nonce to client seed.
    pending: HashMap<u64, String>,
}

impl<S: SeedStore> Inner<S> {
    fn active(&self) -> Result<&SeedPair> {
        self.active
            .as_ref()
            .ok_or_else(|| FairnessError::invalid("no active seed pair; create one first"))
    }

    fn ensure_active(&mut self, scheme: DerivationScheme) -> Result<&SeedPair> {
        if self.active.is_none() {
            let pair = SeedPair::generate_with_scheme(None, scheme)?;
            self.store.save_active(&pair)?;
            info!(pair_id = pair.id(), hash = pair.server_seed_hash(), "created seed pair");
            self.active = Some(pair);
        }
        self.active()
    }

    /// Writes `next` through the store, then makes it the cached pair.
    /// On a store error the cached pair is left untouched.
    fn commit(&mut self, next: SeedPair) -> Result<()> {
        self.store.save_active(&next)?;
        self.active = Some(next);
        Ok(())
    }
}

/// Owns the active seed pair and serialises every mutation of it.
///
/// All operations go through one lock, so nonce consumption, outcome
/// derivation and rotation never interleave for the same player.
pub struct CommitmentManager<S: SeedStore> {
    inner: Mutex<Inner<S>>,
    policy: ClientSeedPolicy,
    scheme: DerivationScheme,
}

impl<S: SeedStore> CommitmentManager<S> {
    pub fn new(store: S) -> Result<Self> {
        let active = store.load_active()?;
        Ok(Self {
            inner: Mutex::new(Inner {
                store,
                active,
                pending: HashMap::new(),
            }),
            policy: ClientSeedPolicy::default(),
            scheme: DerivationScheme::default(),
        })
    }

    pub fn with_policy(mut self, policy: ClientSeedPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_scheme(mut self, scheme: DerivationScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn create_initial_seed_pair(&self, client_seed: Option<String>) -> Result<SeedCommitment> {
        let mut inner = self.inner.lock();
        if inner.active.is_some() {
            return Err(FairnessError::invalid(
                "a seed pair is already active; rotate it instead",
            ));
        }
        let pair = SeedPair::generate_with_scheme(client_seed, self.scheme)?;
        let commitment = pair.commitment();
        inner.commit(pair)?;
        info!(
            pair_id = %commitment.pair_id,
            hash = %commitment.server_seed_hash,
            "created seed pair"
        );
        Ok(commitment)
    }

    /// Public view of the active pair, creating one on first request.
    pub fn commitment(&self) -> Result<SeedCommitment> {
        let mut inner = self.inner.lock();
        Ok(inner.ensure_active(self.scheme)?.commitment())
    }

    pub fn consume_nonce(&self) -> Result<NonceTicket> {
        let mut inner = self.inner.lock();
        let mut next = inner.active()?.clone();
        let nonce = next.advance_nonce()?;
        let ticket = NonceTicket {
            pair_id: next.id().to_string(),
            client_seed: next.client_seed().to_string(),
            nonce,
        };
        inner.commit(next)?;
        inner.pending.insert(nonce, ticket.client_seed.clone());
        debug!(pair_id = %ticket.pair_id, nonce, "consumed nonce");
        Ok(ticket)
    }

    /// Derives the outcome for a nonce obtained from [`Self::consume_nonce`].
    ///
    /// The roll uses the client seed captured in the ticket. Tickets from a
    /// pair that has since been rotated out fail with `ConcurrencyConflict`;
    /// tickets that were never issued or were already redeemed are refused.
    pub fn derive_for_ticket(
        &self,
        ticket: NonceTicket,
        wager: f64,
        params: &DiceParams,
    ) -> Result<Outcome> {
        let mut inner = self.inner.lock();
        let pair = inner.active()?;
        if pair.id() != ticket.pair_id {
            warn!(pair_id = %ticket.pair_id, nonce = ticket.nonce, "stale nonce ticket");
            return Err(FairnessError::ConcurrencyConflict);
        }
        match inner.pending.get(&ticket.nonce) {
            Some(client_seed) if *client_seed == ticket.client_seed => {}
            Some(_) => {
                return Err(FairnessError::invalid(format!(
                    "ticket for nonce {} carries the wrong client seed",
                    ticket.nonce
                )))
            }
            None => {
                warn!(pair_id = %ticket.pair_id, nonce = ticket.nonce, "ticket not redeemable");
                return Err(FairnessError::invalid(format!(
                    "nonce {} was never issued or is already spent",
                    ticket.nonce
                )));
            }
        }
        let outcome = derive(inner.active()?, &ticket.client_seed, ticket.nonce, wager, params)?;
        inner.pending.remove(&ticket.nonce);
        Ok(outcome)
    }

    /// Consumes a nonce, derives the outcome and runs `persist` as one unit.
    ///
    /// `persist` is the ledger hook (balance check, bet insert). If it fails
    /// the nonce is not consumed and the pair is unchanged.
    pub fn place_bet<R>(
        &self,
        wager: f64,
        params: &DiceParams,
        persist: impl FnOnce(&Outcome) -> Result<R>,
    ) -> Result<(Outcome, R)> {
        let mut inner = self.inner.lock();
        let mut next = inner.ensure_active(self.scheme)?.clone();
        let nonce = next.advance_nonce()?;
        let outcome = derive(&next, next.client_seed(), nonce, wager, params)?;
        let persisted = persist(&outcome)?;
        inner.commit(next)?;
        debug!(
            pair_id = %outcome.pair_id,
            nonce,
            roll = %outcome.roll,
            won = outcome.won,
            "bet settled"
        );
        Ok((outcome, persisted))
    }

    pub fn set_client_seed(&self, client_seed: impl Into<String>) -> Result<SeedCommitment> {
        let mut inner = self.inner.lock();
        let mut next = inner.ensure_active(self.scheme)?.clone();
        next.set_client_seed(client_seed.into())?;
        let commitment = next.commitment();
        inner.commit(next)?;
        Ok(commitment)
    }

    /// Reveals the active pair and starts a fresh one at nonce 0. This is the
    /// only path through which a server seed becomes public.
    pub fn rotate(&self) -> Result<RotationResult> {
        let mut inner = self.inner.lock();
        let current = inner.active()?.clone();
        let client_seed = match self.policy {
            ClientSeedPolicy::Keep => current.client_seed().to_string(),
            ClientSeedPolicy::Regenerate => generate_client_seed()?,
        };
        // generate before revealing so an entropy failure leaves the old pair active
        let next = SeedPair::generate_with_scheme(Some(client_seed), self.scheme)?;
        let revealed = current.reveal();
        inner.store.archive(&revealed)?;
        // the revealed pair must never derive again, even if the save below fails
        inner.active = None;
        inner.pending.clear();
        inner.store.save_active(&next)?;
        let commitment = next.commitment();
        inner.active = Some(next);
        info!(
            revealed_pair = %revealed.id,
            revealed_hash = %revealed.server_seed_hash,
            outcomes = revealed.final_nonce,
            next_hash = %commitment.server_seed_hash,
            "rotated seed pair"
        );
        Ok(RotationResult {
            revealed,
            next: commitment,
        })
    }

    pub fn revealed_pairs(&self) -> Result<Vec<RevealedSeedPair>> {
        self.inner.lock().store.revealed()
    }

    pub fn find_revealed(&self, pair_id: &str) -> Result<Option<RevealedSeedPair>> {
        Ok(self
            .revealed_pairs()?
            .into_iter()
            .find(|pair| pair.id == pair_id))
    }
}

/// Derivation under an active pair, self-checked against the verifier. The
/// outcome carries the pair's published hash, so the check fails if the
/// seed in hand is not the committed one.
fn derive(
    pair: &SeedPair,
    client_seed: &str,
    nonce: u64,
    wager: f64,
    params: &DiceParams,
) -> Result<Outcome> {
    let rng = ProvablyFairRng::new(pair.server_seed(), client_seed, nonce)
        .with_scheme(pair.scheme());
    let outcome = roll_dice(&rng, pair.id(), pair.server_seed_hash(), wager, params)?;
    verify_outcome(Some(pair.server_seed()), &outcome)?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odds::Condition;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn manager() -> CommitmentManager<MemoryStore> {
        let m = CommitmentManager::new(MemoryStore::default()).unwrap();
        m.create_initial_seed_pair(Some("abc123".into())).unwrap();
        m
    }

    fn params() -> DiceParams {
        DiceParams::with_default_edge(50.0, Condition::Under).unwrap()
    }

    #[test]
    fn test_create_twice_rejected() {
        let m = manager();
        assert!(matches!(
            m.create_initial_seed_pair(None),
            Err(FairnessError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_commitment_created_lazily() {
        let m = CommitmentManager::new(MemoryStore::default()).unwrap();
        let c = m.commitment().unwrap();
        assert_eq!(c.nonce, 0);
        assert_eq!(m.commitment().unwrap(), c);
    }

    #[test]
    fn test_consume_nonce_sequential() {
        let m = manager();
        let nonces: Vec<u64> = (0..5).map(|_| m.consume_nonce().unwrap().nonce).collect();
        assert_eq!(nonces, vec![0, 1, 2, 3, 4]);
        assert_eq!(m.commitment().unwrap().nonce, 5);
    }

    #[test]
    fn test_concurrent_nonces_unique() {
        let m = Arc::new(manager());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&m);
                thread::spawn(move || {
                    (0..50)
                        .map(|_| m.place_bet(1.0, &params(), |_| Ok(())).unwrap().0.nonce)
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut seen = HashSet::new();
        for h in handles {
            for nonce in h.join().unwrap() {
                assert!(seen.insert(nonce), "nonce {nonce} issued twice");
            }
        }
        assert_eq!(seen.len(), 400);
        assert_eq!(seen.iter().max(), Some(&399));
    }

    #[test]
    fn test_failed_persist_keeps_nonce() {
        let m = manager();
        let err = m
            .place_bet(5.0, &params(), |_| -> Result<()> {
                Err(FairnessError::InsufficientBalance {
                    wager: 5.0,
                    available: 1.0,
                })
            })
            .unwrap_err();
        assert!(matches!(err, FairnessError::InsufficientBalance { .. }));
        assert_eq!(m.commitment().unwrap().nonce, 0);
        let (outcome, _) = m.place_bet(5.0, &params(), |_| Ok(())).unwrap();
        assert_eq!(outcome.nonce, 0);
    }

    #[test]
    fn test_invalid_bet_leaves_state() {
        let m = manager();
        assert!(m.place_bet(0.0, &params(), |_| Ok(())).is_err());
        assert_eq!(m.commitment().unwrap().nonce, 0);
    }

    #[test]
    fn test_set_client_seed() {
        let m = manager();
        m.consume_nonce().unwrap();
        let before = m.commitment().unwrap();
        let after = m.set_client_seed("lucky").unwrap();
        assert_eq!(after.client_seed, "lucky");
        assert_eq!(after.server_seed_hash, before.server_seed_hash);
        assert_eq!(after.nonce, before.nonce);

        assert!(matches!(
            m.set_client_seed(""),
            Err(FairnessError::InvalidInput(_))
        ));
        assert_eq!(m.commitment().unwrap(), after);
    }

    #[test]
    fn test_stale_ticket_rejected_after_rotation() {
        let m = manager();
        let ticket = m.consume_nonce().unwrap();
        m.rotate().unwrap();
        assert_eq!(
            m.derive_for_ticket(ticket, 1.0, &params()).unwrap_err(),
            FairnessError::ConcurrencyConflict
        );
    }

    #[test]
    fn test_ticket_derivation_matches_place_bet() {
        let m = manager();
        let ticket = m.consume_nonce().unwrap();
        let forged = NonceTicket {
            nonce: 7,
            ..ticket.clone()
        };
        let outcome = m.derive_for_ticket(ticket, 1.0, &params()).unwrap();
        assert_eq!(outcome.nonce, 0);
        assert!(matches!(
            m.derive_for_ticket(forged, 1.0, &params()),
            Err(FairnessError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_ticket_redeems_once() {
        let m = manager();
        let ticket = m.consume_nonce().unwrap();
        let first = m.derive_for_ticket(ticket.clone(), 1.0, &params()).unwrap();
        assert_eq!(first.client_seed, "abc123");

        m.set_client_seed("other").unwrap();
        let over = DiceParams::with_default_edge(50.0, Condition::Over).unwrap();
        assert!(matches!(
            m.derive_for_ticket(ticket.clone(), 1.0, &over),
            Err(FairnessError::InvalidInput(_))
        ));
        let rewritten = NonceTicket {
            client_seed: "other".into(),
            ..ticket
        };
        assert!(matches!(
            m.derive_for_ticket(rewritten, 1.0, &over),
            Err(FairnessError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_ticket_keeps_issue_time_client_seed() {
        let m = manager();
        let ticket = m.consume_nonce().unwrap();
        m.set_client_seed("later").unwrap();
        let outcome = m.derive_for_ticket(ticket, 1.0, &params()).unwrap();
        assert_eq!(outcome.client_seed, "abc123");
        let revealed = m.rotate().unwrap().revealed;
        assert_eq!(
            outcome.roll,
            crate::rng::derive_roll("abc123", &revealed.server_seed, 0)
        );
    }

    #[test]
    fn test_failed_derivation_keeps_ticket() {
        let m = manager();
        let ticket = m.consume_nonce().unwrap();
        assert!(m.derive_for_ticket(ticket.clone(), 0.0, &params()).is_err());
        assert_eq!(m.derive_for_ticket(ticket, 1.0, &params()).unwrap().nonce, 0);
    }

    #[test]
    fn test_tampered_store_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seeds.json");
        CommitmentManager::new(JsonFileStore::new(&path))
            .unwrap()
            .create_initial_seed_pair(Some("abc123".into()))
            .unwrap();

        let mut doc: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        doc["active"]["server_seed"] = serde_json::Value::String("0".repeat(64));
        fs::write(&path, doc.to_string()).unwrap();

        let err = CommitmentManager::new(JsonFileStore::new(&path)).err().unwrap();
        assert!(matches!(
            err,
            FairnessError::Store(ref msg) if msg.contains("published commitment")
        ));
    }

    #[test]
    fn test_rotation_policy_regenerate() {
        let m = manager().with_policy(ClientSeedPolicy::Regenerate);
        let rotation = m.rotate().unwrap();
        assert_eq!(rotation.revealed.client_seed, "abc123");
        assert_ne!(rotation.next.client_seed, "abc123");
    }

    #[test]
    fn test_rotate_without_pair() {
        let m = CommitmentManager::new(MemoryStore::default()).unwrap();
        assert!(matches!(m.rotate(), Err(FairnessError::InvalidInput(_))));
    }
}
