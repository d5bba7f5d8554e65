use accrue_core::account::{Account, EntryStatus, LedgerCategory, StakingEntry};
use accrue_core::error::AccrueError;
use accrue_core::params::AccrualParams;
use accrue_core::types::{apply_bps, format_coins, signed, AccountId, Balance, Timestamp};
use serde::Serialize;
use tracing::{info, warn};

use crate::db::abort;
use crate::engine::AccrualEngine;
use crate::referral::ReferralPayout;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StakeReceipt {
    pub entry_id: u32,
    pub principal: Balance,
    pub unlocks_at: Timestamp,
    pub balance_after: Balance,
    /// Bonus paid to the direct referrer, if any.
    pub referrer_bonus: Option<ReferralPayout>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntryPayout {
    pub entry_id: u32,
    pub epochs: u32,
    pub reward: Balance,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StakingClaim {
    pub payouts: Vec<EntryPayout>,
    pub total: Balance,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExitedStake {
    pub entry_id: u32,
    pub principal: Balance,
    /// Rewards this position earned and the account keeps.
    pub accrued_reward: Balance,
    /// Rewards clawed back on an early exit.
    pub penalty: Balance,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UnstakeOutcome {
    pub exited: Vec<ExitedStake>,
    pub principal_returned: Balance,
    pub rewards_kept: Balance,
    pub penalty: Balance,
}

impl UnstakeOutcome {
    fn from_exits(exited: Vec<ExitedStake>) -> Self {
        Self {
            principal_returned: exited.iter().map(|e| e.principal).sum(),
            rewards_kept: exited.iter().map(|e| e.accrued_reward).sum(),
            penalty: exited.iter().map(|e| e.penalty).sum(),
            exited,
        }
    }
}

/// Whole epochs elapsed since `last_accrual_at`, capped per claim.
pub fn epochs_due(entry: &StakingEntry, now: Timestamp, params: &AccrualParams) -> u32 {
    if entry.exited || now <= entry.last_accrual_at {
        return 0;
    }
    let elapsed = (now - entry.last_accrual_at) / params.stake_epoch_secs;
    elapsed.min(params.stake_max_epochs_per_claim as i64) as u32
}

/// Reward for `epochs` epochs on `principal`.
pub fn epoch_reward(principal: Balance, epochs: u32, params: &AccrualParams) -> Balance {
    apply_bps(principal, params.stake_epoch_bps) * epochs as u128
}

/// Debit `principal` and append a fresh position. Returns its id.
fn open_position(acc: &mut Account, principal: Balance, now: Timestamp) -> Result<u32, AccrueError> {
    if acc.balance < principal {
        return Err(AccrueError::InsufficientBalance { need: principal, have: acc.balance });
    }
    let entry_id = acc.next_stake_id();
    acc.settle(now, LedgerCategory::Staking, -signed(principal)?, EntryStatus::Success, Some(format!("stake #{entry_id}")))?;
    acc.staking.push(StakingEntry::new(entry_id, principal, now));
    Ok(entry_id)
}

impl AccrualEngine {
    /// Lock `principal` in a new position. The direct referrer, if any,
    /// receives `stake_referral_bps` of it in the same transaction.
    ///
    /// Without a referrer bonus to pay this is a single-account write.
    pub fn stake(&self, id: &AccountId, principal: Balance, now: Timestamp) -> Result<StakeReceipt, AccrueError> {
        let p = &self.params;
        if principal < p.min_stake {
            return Err(AccrueError::InvalidAmount(format!(
                "stake below minimum of {} coin",
                format_coins(p.min_stake)
            )));
        }
        let bonus = apply_bps(principal, p.stake_referral_bps);
        let pays_referrer = bonus > 0 && self.account(id)?.referred_by.is_some();

        let receipt = if pays_referrer {
            self.db.transact(|tx| {
                let mut acc = tx.load_account(id)?;
                let entry_id = open_position(&mut acc, principal, now).map_err(abort)?;

                let mut referrer_bonus = None;
                if let Some(referrer_id) = acc.referred_by.clone() {
                    match tx.get_account(&referrer_id)? {
                        Some(mut referrer) => {
                            referrer
                                .settle(
                                    now,
                                    LedgerCategory::Referral,
                                    signed(bonus).map_err(abort)?,
                                    EntryStatus::Success,
                                    Some(format!("stake bonus from {}", acc.handle)),
                                )
                                .map_err(abort)?;
                            tx.put_account(&mut referrer)?;
                            referrer_bonus = Some(ReferralPayout {
                                level: 1,
                                account_id: referrer_id,
                                handle: referrer.handle.clone(),
                                amount: bonus,
                            });
                        }
                        None => warn!(account = %id, referrer = %referrer_id, "referrer missing; stake bonus skipped"),
                    }
                }

                tx.put_account(&mut acc)?;
                Ok(StakeReceipt {
                    entry_id,
                    principal,
                    unlocks_at: now + p.stake_lock_secs,
                    balance_after: acc.balance,
                    referrer_bonus,
                })
            })?
        } else {
            self.update(id, |acc| {
                let entry_id = open_position(acc, principal, now)?;
                Ok(StakeReceipt {
                    entry_id,
                    principal,
                    unlocks_at: now + p.stake_lock_secs,
                    balance_after: acc.balance,
                    referrer_bonus: None,
                })
            })?
        };

        info!(account = %id, entry = receipt.entry_id, principal, "stake opened");
        Ok(receipt)
    }

    /// Pay every whole epoch due on every open position.
    pub fn claim_staking_rewards(&self, id: &AccountId, now: Timestamp) -> Result<StakingClaim, AccrueError> {
        let p = &self.params;
        let claim = self.update(id, |acc| {
            let mut payouts = Vec::new();
            for entry in acc.staking.iter_mut().filter(|e| !e.exited) {
                let epochs = epochs_due(entry, now, p);
                if epochs == 0 {
                    continue;
                }
                let reward = epoch_reward(entry.principal, epochs, p);
                entry.last_accrual_at += epochs as i64 * p.stake_epoch_secs;
                entry.accrued_reward += reward;
                payouts.push(EntryPayout { entry_id: entry.id, epochs, reward });
            }
            if payouts.is_empty() {
                return Err(AccrueError::NothingToClaim);
            }

            for payout in &payouts {
                acc.settle(
                    now,
                    LedgerCategory::Staking,
                    signed(payout.reward)?,
                    EntryStatus::Success,
                    Some(format!("stake #{} reward, {} epoch(s)", payout.entry_id, payout.epochs)),
                )?;
            }
            let total: Balance = payouts.iter().map(|e| e.reward).sum();
            acc.append_summary(
                now,
                LedgerCategory::Staking,
                signed(total)?,
                Some(format!("staking claim, {} position(s)", payouts.len())),
            );
            Ok(StakingClaim { payouts, total })
        })?;

        info!(account = %id, total = claim.total, positions = claim.payouts.len(), "staking rewards claimed");
        Ok(claim)
    }

    /// Exit every position past its lock period and return the principal.
    /// Positions still locked are left alone.
    pub fn unstake(&self, id: &AccountId, now: Timestamp) -> Result<UnstakeOutcome, AccrueError> {
        let lock = self.params.stake_lock_secs;
        let outcome = self.update(id, |acc| {
            let mut exited = Vec::new();
            for entry in acc.staking.iter_mut().filter(|e| !e.exited && e.is_matured(now, lock)) {
                entry.exited = true;
                entry.exited_at = Some(now);
                exited.push(ExitedStake {
                    entry_id: entry.id,
                    principal: entry.principal,
                    accrued_reward: entry.accrued_reward,
                    penalty: 0,
                });
            }
            if exited.is_empty() {
                return Err(AccrueError::NoEligibleStake);
            }
            for e in &exited {
                acc.settle(
                    now,
                    LedgerCategory::Staking,
                    signed(e.principal)?,
                    EntryStatus::Success,
                    Some(format!("unstake #{}", e.entry_id)),
                )?;
            }
            Ok(UnstakeOutcome::from_exits(exited))
        })?;

        info!(account = %id, principal = outcome.principal_returned, positions = outcome.exited.len(), "unstaked");
        Ok(outcome)
    }

    /// Exit one position before it matures. Principal comes back; rewards
    /// it already paid are clawed back.
    pub fn unstake_early(&self, id: &AccountId, entry_id: u32, now: Timestamp) -> Result<UnstakeOutcome, AccrueError> {
        let lock = self.params.stake_lock_secs;
        let outcome = self.update(id, |acc| {
            let entry = acc
                .staking
                .iter()
                .find(|e| e.id == entry_id)
                .ok_or(AccrueError::StakeNotFound(entry_id))?;
            if entry.exited {
                return Err(AccrueError::StakeAlreadyExited(entry_id));
            }
            if entry.is_matured(now, lock) {
                return Err(AccrueError::StakeMatured(entry_id));
            }
            let (principal, penalty) = (entry.principal, entry.accrued_reward);

            acc.settle(
                now,
                LedgerCategory::Staking,
                signed(principal)?,
                EntryStatus::Success,
                Some(format!("early unstake #{entry_id}")),
            )?;
            if penalty > 0 {
                acc.settle(
                    now,
                    LedgerCategory::EarlyUnstakePenalty,
                    -signed(penalty)?,
                    EntryStatus::Success,
                    Some(format!("reward clawback #{entry_id}")),
                )?;
            }
            if let Some(entry) = acc.staking.iter_mut().find(|e| e.id == entry_id) {
                entry.exited = true;
                entry.exited_at = Some(now);
                entry.accrued_reward = 0;
            }
            Ok(UnstakeOutcome::from_exits(vec![ExitedStake {
                entry_id,
                principal,
                accrued_reward: 0,
                penalty,
            }]))
        })?;

        info!(account = %id, entry = entry_id, penalty = outcome.penalty, "early unstake");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{funded, temp_engine, NOW};
    use accrue_core::constants::UNITS_PER_COIN;

    const HOUR: i64 = 3600;
    const DAY: i64 = 24 * HOUR;

    #[test]
    fn epochs_are_whole_and_capped() {
        let p = AccrualParams::default();
        let e = StakingEntry::new(0, UNITS_PER_COIN, 0);
        assert_eq!(epochs_due(&e, 6 * HOUR - 1, &p), 0);
        assert_eq!(epochs_due(&e, 6 * HOUR, &p), 1);
        assert_eq!(epochs_due(&e, 60 * HOUR, &p), 4);
        assert_eq!(epoch_reward(10 * UNITS_PER_COIN, 3, &p), 300_000_000);
    }

    #[test]
    fn stake_below_minimum_rejected() {
        let engine = temp_engine("stake_min");
        let id = funded(&engine, "alice", None, UNITS_PER_COIN);
        let err = engine.stake(&id, UNITS_PER_COIN / 10 - 1, NOW).unwrap_err();
        assert!(matches!(err, AccrueError::InvalidAmount(_)));
        let err = engine.stake(&id, 2 * UNITS_PER_COIN, NOW).unwrap_err();
        assert!(matches!(err, AccrueError::InsufficientBalance { .. }));
        assert_eq!(engine.account(&id).unwrap().balance, UNITS_PER_COIN);
    }

    #[test]
    fn stake_pays_referrer_every_time() {
        let engine = temp_engine("stake_referrer");
        let alice = funded(&engine, "alice", None, 0);
        let bob = funded(&engine, "bob", Some("alice"), 10 * UNITS_PER_COIN);
        let r = engine.stake(&bob, UNITS_PER_COIN, NOW).unwrap();
        assert_eq!(r.referrer_bonus.as_ref().map(|b| b.amount), Some(UNITS_PER_COIN / 10));
        engine.stake(&bob, 2 * UNITS_PER_COIN, NOW).unwrap();

        assert_eq!(engine.account(&alice).unwrap().balance, 3 * UNITS_PER_COIN / 10);
        let bob = engine.account(&bob).unwrap();
        assert_eq!(bob.balance, 7 * UNITS_PER_COIN);
        assert_eq!(bob.staking.len(), 2);
        assert_eq!(bob.staking[1].id, 1);
    }

    #[test]
    fn stake_without_referrer_is_single_account_write() {
        let engine = temp_engine("stake_no_referrer");
        let id = funded(&engine, "alice", None, 3 * UNITS_PER_COIN);
        let before = engine.account(&id).unwrap().version;

        let r = engine.stake(&id, UNITS_PER_COIN, NOW).unwrap();
        assert_eq!(r.referrer_bonus, None);
        assert_eq!(r.balance_after, 2 * UNITS_PER_COIN);
        assert_eq!(r.unlocks_at, NOW + engine.params.stake_lock_secs);

        let acc = engine.account(&id).unwrap();
        assert_eq!(acc.version, before + 1);
        assert_eq!(acc.ledger.last().unwrap().amount, -(UNITS_PER_COIN as i128));
        assert!(engine.reconcile_balance(&id).unwrap().in_balance);
    }

    #[test]
    fn claim_nothing_due() {
        let engine = temp_engine("stake_nothing_due");
        let id = funded(&engine, "alice", None, UNITS_PER_COIN);
        engine.stake(&id, UNITS_PER_COIN, NOW).unwrap();
        let err = engine.claim_staking_rewards(&id, NOW + HOUR).unwrap_err();
        assert!(matches!(err, AccrueError::NothingToClaim));
        assert_eq!(engine.account(&id).unwrap().ledger.len(), 2);
    }

    #[test]
    fn claim_writes_postings_and_summary() {
        let engine = temp_engine("stake_claim_rows");
        let id = funded(&engine, "alice", None, 3 * UNITS_PER_COIN);
        engine.stake(&id, UNITS_PER_COIN, NOW).unwrap();
        engine.stake(&id, 2 * UNITS_PER_COIN, NOW).unwrap();

        let claim = engine.claim_staking_rewards(&id, NOW + 6 * HOUR).unwrap();
        assert_eq!(claim.total, 30_000_000);
        let acc = engine.account(&id).unwrap();
        let rows: Vec<_> = acc.ledger.iter().rev().take(3).collect();
        assert!(rows[0].summary);
        assert_eq!(rows[0].amount, 30_000_000);
        assert!(!rows[1].summary && !rows[2].summary);
        assert_eq!(acc.balance as i128, acc.ledger_sum());
    }

    #[test]
    fn unstake_keeps_locked_positions() {
        let engine = temp_engine("unstake_partial");
        let id = funded(&engine, "alice", None, 2 * UNITS_PER_COIN);
        engine.stake(&id, UNITS_PER_COIN, NOW).unwrap();
        engine.stake(&id, UNITS_PER_COIN, NOW + 2 * DAY).unwrap();

        let out = engine.unstake(&id, NOW + 7 * DAY).unwrap();
        assert_eq!(out.exited.len(), 1);
        assert_eq!(out.principal_returned, UNITS_PER_COIN);
        let acc = engine.account(&id).unwrap();
        assert!(acc.staking[0].exited);
        assert!(!acc.staking[1].exited);

        let err = engine.unstake(&id, NOW + 7 * DAY + 1).unwrap_err();
        assert!(matches!(err, AccrueError::NoEligibleStake));
    }

    #[test]
    fn early_unstake_claws_back_rewards() {
        let engine = temp_engine("unstake_early");
        let id = funded(&engine, "alice", None, 10 * UNITS_PER_COIN);
        engine.stake(&id, 10 * UNITS_PER_COIN, NOW).unwrap();
        engine.claim_staking_rewards(&id, NOW + 12 * HOUR).unwrap();
        assert_eq!(engine.account(&id).unwrap().balance, 200_000_000);

        let lock = engine.params.stake_lock_secs;
        let out = engine.unstake_early(&id, 0, NOW + lock - 1).unwrap();
        assert_eq!(out.penalty, 200_000_000);
        let acc = engine.account(&id).unwrap();
        assert_eq!(acc.balance, 10 * UNITS_PER_COIN);
        assert_eq!(acc.ledger.last().unwrap().category, LedgerCategory::EarlyUnstakePenalty);
        assert_eq!(acc.balance as i128, acc.ledger_sum());

        let err = engine.unstake_early(&id, 0, NOW + lock - 1).unwrap_err();
        assert!(matches!(err, AccrueError::StakeAlreadyExited(0)));
        let err = engine.unstake_early(&id, 7, NOW).unwrap_err();
        assert!(matches!(err, AccrueError::StakeNotFound(7)));
    }

    #[test]
    fn early_unstake_refused_after_maturity() {
        let engine = temp_engine("unstake_early_matured");
        let id = funded(&engine, "alice", None, UNITS_PER_COIN);
        engine.stake(&id, UNITS_PER_COIN, NOW).unwrap();
        let err = engine.unstake_early(&id, 0, NOW + engine.params.stake_lock_secs).unwrap_err();
        assert!(matches!(err, AccrueError::StakeMatured(0)));
    }
}
