pub mod commitment;
pub mod engine;
pub mod error;
pub mod odds;
pub mod rng;
pub mod seed;
pub mod verify;

pub use crate::commitment::{
    ClientSeedPolicy, CommitmentManager, JsonFileStore, MemoryStore, NonceTicket, RotationResult,
    SeedStore,
};
pub use crate::engine::{roll_dice, roll_with_seeds, settle, Outcome, Settlement};
pub use crate::error::{FairnessError, Result};
pub use crate::odds::{Condition, DiceParams, Target, DEFAULT_HOUSE_EDGE};
pub use crate::rng::{
    derive_roll, derive_roll_with, sha256_hex, DerivationScheme, ProvablyFairRng, Roll,
};
pub use crate::seed::{RevealedSeedPair, SeedCommitment, SeedPair, SeedState};
pub use crate::verify::{verify, verify_commitment, verify_epoch, verify_outcome, Verified};
