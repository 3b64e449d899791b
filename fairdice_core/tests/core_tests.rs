use fairdice_core::{
    derive_roll, sha256_hex, verify, verify_epoch, verify_outcome, CommitmentManager, Condition,
    DiceParams, FairnessError, JsonFileStore, MemoryStore, Outcome, ProvablyFairRng,
};

fn under_50() -> DiceParams {
    DiceParams::with_default_edge(50.0, Condition::Under).unwrap()
}

#[test]
fn rng_repeatable() {
    let seed = "deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef";
    let first = derive_roll("abc123", seed, 0);
    for _ in 0..10 {
        assert_eq!(derive_roll("abc123", seed, 0), first);
    }
    assert_eq!(format!("{first}"), "21.36");
}

#[test]
fn rolls_stay_in_range() {
    for n in 0..2000u64 {
        let roll = ProvablyFairRng::new("server", "client", n).roll();
        assert!(roll.hundredths() < 10_000);
        let text = roll.to_string();
        assert_eq!(text.split('.').nth(1).map(str::len), Some(2), "{text}");
    }
}

#[test]
fn commit_bet_rotate_verify() {
    let manager = CommitmentManager::new(MemoryStore::default()).unwrap();
    let published = manager.create_initial_seed_pair(Some("abc123".into())).unwrap();

    let outcomes: Vec<Outcome> = (0..5)
        .map(|_| manager.place_bet(1.0, &under_50(), |_| Ok(())).unwrap().0)
        .collect();
    let nonces: Vec<u64> = outcomes.iter().map(|o| o.nonce).collect();
    assert_eq!(nonces, vec![0, 1, 2, 3, 4]);
    for outcome in &outcomes {
        assert_eq!(
            verify_outcome(None, outcome).unwrap_err(),
            FairnessError::NotYetVerifiable
        );
    }

    let rotation = manager.rotate().unwrap();
    assert_eq!(
        sha256_hex(rotation.previous_server_seed().as_bytes()),
        published.server_seed_hash
    );
    assert_ne!(rotation.new_server_seed_hash(), published.server_seed_hash);
    assert_eq!(rotation.new_nonce(), 0);
    assert_eq!(rotation.next.client_seed, "abc123");
    assert_eq!(rotation.revealed.final_nonce, 5);

    for outcome in &outcomes {
        assert!(verify(
            &outcome.client_seed,
            rotation.previous_server_seed(),
            outcome.nonce,
            &outcome.params,
            outcome.roll
        ));
    }
    assert_eq!(verify_epoch(&rotation.revealed, &outcomes).unwrap().len(), 5);

    let archived = manager.find_revealed(&published.pair_id).unwrap().unwrap();
    assert_eq!(archived, rotation.revealed);
}

#[test]
fn tampered_seed_never_verifies() {
    let manager = CommitmentManager::new(MemoryStore::default()).unwrap();
    manager.create_initial_seed_pair(None).unwrap();
    let (outcome, _) = manager.place_bet(2.0, &under_50(), |_| Ok(())).unwrap();
    let rotation = manager.rotate().unwrap();

    let seed = rotation.previous_server_seed();
    assert!(verify(&outcome.client_seed, seed, outcome.nonce, &outcome.params, outcome.roll));

    for i in 0..seed.len() {
        let mut bytes = seed.as_bytes().to_vec();
        bytes[i] = if bytes[i] == b'0' { b'1' } else { b'0' };
        let tampered = String::from_utf8(bytes).unwrap();
        assert!(verify_outcome(Some(&tampered), &outcome).is_err());
    }
}

#[test]
fn outcome_from_rotated_pair_is_rejected() {
    let manager = CommitmentManager::new(MemoryStore::default()).unwrap();
    manager.create_initial_seed_pair(None).unwrap();
    let (first, _) = manager.place_bet(1.0, &under_50(), |_| Ok(())).unwrap();
    let rotation = manager.rotate().unwrap();
    let (second, _) = manager.place_bet(1.0, &under_50(), |_| Ok(())).unwrap();

    assert_ne!(second.pair_id, rotation.revealed.id);
    assert_eq!(second.nonce, 0);
    assert!(verify_epoch(&rotation.revealed, &[first, second]).is_err());
}

#[test]
fn empty_client_seed_leaves_pair_unchanged() {
    let manager = CommitmentManager::new(MemoryStore::default()).unwrap();
    let before = manager.create_initial_seed_pair(Some("keep-me".into())).unwrap();
    assert!(matches!(
        manager.set_client_seed(""),
        Err(FairnessError::InvalidInput(_))
    ));
    assert_eq!(manager.commitment().unwrap(), before);
}

#[test]
fn json_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seeds.json");

    let published = {
        let manager = CommitmentManager::new(JsonFileStore::new(&path)).unwrap();
        let c = manager.create_initial_seed_pair(Some("persist".into())).unwrap();
        manager.place_bet(1.0, &under_50(), |_| Ok(())).unwrap();
        manager.place_bet(1.0, &under_50(), |_| Ok(())).unwrap();
        c
    };

    let manager = CommitmentManager::new(JsonFileStore::new(&path)).unwrap();
    let reloaded = manager.commitment().unwrap();
    assert_eq!(reloaded.server_seed_hash, published.server_seed_hash);
    assert_eq!(reloaded.nonce, 2);

    let rotation = manager.rotate().unwrap();
    assert_eq!(rotation.revealed.final_nonce, 2);

    let manager = CommitmentManager::new(JsonFileStore::new(&path)).unwrap();
    assert_eq!(manager.revealed_pairs().unwrap().len(), 1);
    assert_eq!(
        manager.commitment().unwrap().server_seed_hash,
        rotation.new_server_seed_hash()
    );
}

#[test]
fn house_edge_simulation_smoke() {
    let params = under_50();
    let mut wagered = 0.0;
    let mut paid = 0.0;
    for n in 0..10_000u64 {
        let out = fairdice_core::roll_with_seeds("server", "client", n, 1.0, &params).unwrap();
        wagered += out.wager;
        paid += out.payout;
    }
    let rtp = paid / wagered;
    // 99% expected; loose bounds for 10k samples
    assert!(rtp > 0.9 && rtp < 1.08, "rtp {rtp}");
}
