//! Cross-component properties of the accrual engine.
//!
//! Each test opens a fresh sled database under the system temp dir and drives
//! the public `AccrualEngine` API with an explicit clock.
//!
//! Run with:
//!   cargo test -p accrue-state --test properties

use std::sync::Arc;
use std::thread;

use accrue_core::account::{DepositObservation, KycState, LedgerCategory};
use accrue_core::constants::UNITS_PER_COIN;
use accrue_core::error::AccrueError;
use accrue_core::params::AccrualParams;
use accrue_core::types::{AccountId, Balance, CredentialHash};
use accrue_state::{AccrualEngine, DepositOutcome, Registration, StateDb};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const T0: i64 = 1_700_000_000;
const HOUR: i64 = 3600;
const DAY: i64 = 24 * HOUR;

// ── Helpers ───────────────────────────────────────────────────────────────────

fn engine(name: &str) -> AccrualEngine {
    let dir = std::env::temp_dir().join(format!("accrue_props_{}", name));
    let _ = std::fs::remove_dir_all(&dir);
    let db = StateDb::open(&dir).expect("open temp db");
    AccrualEngine::new(Arc::new(db), AccrualParams::default())
}

fn register(engine: &AccrualEngine, handle: &str, referred_by: Option<&str>) -> AccountId {
    engine
        .register_account(
            &Registration {
                handle: handle.to_string(),
                contact: format!("{handle}@example.com"),
                credential_hash: CredentialHash([4u8; 32]),
                referred_by: referred_by.map(str::to_string),
            },
            T0,
        )
        .unwrap()
        .account_id
}

fn deposit(engine: &AccrualEngine, id: &AccountId, tx: &str, amount: Balance, now: i64) {
    let obs = DepositObservation {
        transaction_id: tx.to_string(),
        amount,
        sender_address: "0xfeed".into(),
        observed_at: now,
    };
    engine.ingest_deposit(id, &obs, now).unwrap();
}

fn approve_kyc(engine: &AccrualEngine, id: &AccountId, now: i64) {
    engine.submit_kyc(id, now).unwrap();
    engine.approve_kyc(id, "ops", now).unwrap();
}

fn assert_reconciled(engine: &AccrualEngine) {
    for report in engine.reconcile_all().unwrap() {
        assert!(report.in_balance, "drift on {}: {:?}", report.handle, report);
    }
}

// ── Scenario ──────────────────────────────────────────────────────────────────

#[test]
fn stake_claim_unstake_timeline() {
    let engine = engine("timeline");
    let alice = register(&engine, "alice", None);
    deposit(&engine, &alice, "dep-1", 10 * UNITS_PER_COIN, T0);

    engine.stake(&alice, 10 * UNITS_PER_COIN, T0).unwrap();

    let claim = engine.claim_staking_rewards(&alice, T0 + 18 * HOUR).unwrap();
    assert_eq!(claim.payouts[0].epochs, 3);
    assert_eq!(claim.total, 300_000_000);

    let err = engine.unstake(&alice, T0 + 6 * DAY + 23 * HOUR).unwrap_err();
    assert!(matches!(err, AccrueError::NoEligibleStake));

    let out = engine.unstake(&alice, T0 + 7 * DAY + HOUR).unwrap();
    assert_eq!(out.principal_returned, 10 * UNITS_PER_COIN);
    assert_eq!(out.rewards_kept, 300_000_000);

    let acc = engine.account(&alice).unwrap();
    assert_eq!(acc.balance, 10 * UNITS_PER_COIN + 300_000_000);
    assert!(acc.staking[0].exited);
    assert_reconciled(&engine);
}

// ── Properties ────────────────────────────────────────────────────────────────

#[test]
fn idle_staking_caps_at_four_epochs() {
    let engine = engine("epoch_cap");
    let id = register(&engine, "alice", None);
    deposit(&engine, &id, "dep-1", 10 * UNITS_PER_COIN, T0);
    engine.stake(&id, 10 * UNITS_PER_COIN, T0).unwrap();

    let claim = engine.claim_staking_rewards(&id, T0 + 10 * 6 * HOUR).unwrap();
    assert_eq!(claim.payouts[0].epochs, 4);
    assert_eq!(claim.total, 400_000_000);

    let entry = &engine.account(&id).unwrap().staking[0];
    assert_eq!(entry.last_accrual_at, T0 + 4 * 6 * HOUR);
}

#[test]
fn early_unstake_one_second_before_maturity() {
    let engine = engine("early_exit");
    let id = register(&engine, "alice", None);
    deposit(&engine, &id, "dep-1", 10 * UNITS_PER_COIN, T0);
    engine.stake(&id, 10 * UNITS_PER_COIN, T0).unwrap();
    engine.claim_staking_rewards(&id, T0 + DAY).unwrap();

    let lock = engine.params.stake_lock_secs;
    let err = engine.unstake(&id, T0 + lock - 1).unwrap_err();
    assert!(matches!(err, AccrueError::NoEligibleStake));

    let out = engine.unstake_early(&id, 0, T0 + lock - 1).unwrap();
    assert_eq!(out.principal_returned, 10 * UNITS_PER_COIN);
    assert_eq!(out.penalty, 400_000_000);

    let acc = engine.account(&id).unwrap();
    assert_eq!(acc.balance, 10 * UNITS_PER_COIN);
    assert!(acc.ledger.iter().any(|e| e.category == LedgerCategory::EarlyUnstakePenalty && e.amount == -400_000_000));
    assert_reconciled(&engine);
}

#[test]
fn kyc_bonus_is_paid_exactly_once() {
    let engine = engine("kyc_once");
    let alice = register(&engine, "alice", None);
    let bob = register(&engine, "bob", Some("alice"));
    deposit(&engine, &bob, "dep-1", UNITS_PER_COIN, T0);
    approve_kyc(&engine, &bob, T0);

    for i in 0..3 {
        assert!(engine.on_kyc_approved(&bob, T0 + i).unwrap().is_empty());
    }
    let alice = engine.account(&alice).unwrap();
    assert_eq!(alice.balance, 10_000_000);
    assert_eq!(alice.ledger.iter().filter(|e| e.category == LedgerCategory::Referral).count(), 1);
    assert_reconciled(&engine);
}

#[test]
fn concurrent_mining_claims_credit_once() {
    let engine = Arc::new(engine("mining_race"));
    let ids: Vec<_> = ["alice", "bob", "carol"].iter().map(|h| register(&engine, h, None)).collect();
    for id in &ids {
        engine.start_mining(id, T0).unwrap();
    }

    let mut workers = Vec::new();
    for id in &ids {
        for _ in 0..6 {
            let engine = engine.clone();
            let id = id.clone();
            workers.push(thread::spawn(move || engine.claim_mining(&id, T0 + 3 * HOUR)));
        }
    }
    let ok = workers.into_iter().map(|w| w.join().unwrap()).filter(|r| r.is_ok()).count();
    assert_eq!(ok, ids.len());

    for id in &ids {
        let acc = engine.account(id).unwrap();
        assert_eq!(acc.balance, engine.params.mining_session_reward);
        assert_eq!(acc.ledger.len(), 1);
    }
    assert_reconciled(&engine);
}

#[test]
fn concurrent_staking_claims_credit_once() {
    let engine = Arc::new(engine("staking_race"));
    let id = register(&engine, "alice", None);
    deposit(&engine, &id, "dep-1", 10 * UNITS_PER_COIN, T0);
    engine.stake(&id, 10 * UNITS_PER_COIN, T0).unwrap();

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            let id = id.clone();
            thread::spawn(move || engine.claim_staking_rewards(&id, T0 + DAY))
        })
        .collect();
    let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    let paid: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(paid.len(), 1);
    assert_eq!(paid[0].payouts[0].epochs, 4);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(err, AccrueError::NothingToClaim | AccrueError::Conflict { .. }));
    }

    let acc = engine.account(&id).unwrap();
    assert_eq!(acc.balance, 400_000_000);
    assert_eq!(acc.staking[0].last_accrual_at, T0 + DAY);
    assert_eq!(acc.staking[0].accrued_reward, 400_000_000);
    assert_reconciled(&engine);
}

#[test]
fn concurrent_unstakes_return_principal_once() {
    let engine = Arc::new(engine("unstake_race"));
    let id = register(&engine, "alice", None);
    deposit(&engine, &id, "dep-1", 10 * UNITS_PER_COIN, T0);
    engine.stake(&id, 10 * UNITS_PER_COIN, T0).unwrap();

    let exit_at = T0 + engine.params.stake_lock_secs;
    let workers: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            let id = id.clone();
            thread::spawn(move || engine.unstake(&id, exit_at))
        })
        .collect();
    let ok = workers.into_iter().map(|w| w.join().unwrap()).filter(|r| r.is_ok()).count();

    assert_eq!(ok, 1);
    assert_eq!(engine.account(&id).unwrap().balance, 10 * UNITS_PER_COIN);
    assert_reconciled(&engine);
}

#[test]
fn concurrent_deposit_observations_credit_once() {
    let engine = Arc::new(engine("deposit_race"));
    let id = register(&engine, "alice", None);

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            let id = id.clone();
            thread::spawn(move || {
                let obs = DepositObservation {
                    transaction_id: "chain-tx-42".into(),
                    amount: UNITS_PER_COIN,
                    sender_address: "0xfeed".into(),
                    observed_at: T0,
                };
                engine.ingest_deposit(&id, &obs, T0 + 1)
            })
        })
        .collect();
    let credited = workers
        .into_iter()
        .map(|w| w.join().unwrap().unwrap())
        .filter(|o| matches!(o, DepositOutcome::Credited(_)))
        .count();

    assert_eq!(credited, 1);
    assert_eq!(engine.account(&id).unwrap().balance, UNITS_PER_COIN);
}

#[test]
fn mixed_operations_keep_ledger_reconciled() {
    let engine = engine("mixed");
    let alice = register(&engine, "alice", None);
    let bob = register(&engine, "bob", Some("alice"));
    deposit(&engine, &alice, "seed-a", 5 * UNITS_PER_COIN, T0);
    deposit(&engine, &bob, "seed-b", 5 * UNITS_PER_COIN, T0);
    approve_kyc(&engine, &bob, T0);

    let ids = [alice, bob];
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut now = T0;
    let mut pending = Vec::new();

    for step in 0..200 {
        now += rng.gen_range(0..4 * HOUR);
        let id = &ids[rng.gen_range(0..ids.len())];
        let amount = rng.gen_range(1..=30u128) * UNITS_PER_COIN / 10;
        // Errors are expected (locks, gaps, balances); only state matters.
        let _ = match rng.gen_range(0..9) {
            0 => engine.start_mining(id, now).map(|_| ()),
            1 => engine.claim_mining(id, now).map(|_| ()),
            2 => engine.stake(id, amount, now).map(|_| ()),
            3 => engine.claim_staking_rewards(id, now).map(|_| ()),
            4 => engine.unstake(id, now).map(|_| ()),
            5 => engine.unstake_early(id, rng.gen_range(0..4u32), now).map(|_| ()),
            6 => engine.request_withdrawal(id, amount, "0xdest", now).map(|r| pending.push(r.id)),
            7 => match pending.pop() {
                Some(req) if step % 2 == 0 => engine.approve_withdrawal(req, now).map(|_| ()),
                Some(req) => engine.reject_withdrawal(req, now).map(|_| ()),
                None => Ok(()),
            },
            _ => engine.admin_adjust(id, -(amount as i128), "fee", now).map(|_| ()),
        };
        assert_reconciled(&engine);
    }

    let bob = engine.account(&ids[1]).unwrap();
    assert_eq!(bob.kyc.state, KycState::Approved);
}
