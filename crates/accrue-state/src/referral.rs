use std::collections::HashSet;

use accrue_core::account::{Account, EntryStatus, LedgerCategory};
use accrue_core::error::AccrueError;
use accrue_core::params::AccrualParams;
use accrue_core::types::{signed, AccountId, Balance, Timestamp};
use serde::Serialize;
use tracing::{info, warn};

use crate::db::{abort, LedgerTx, TxError};
use crate::engine::AccrualEngine;

/// One referral credit paid to an upline account.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReferralPayout {
    /// 1 = direct referrer.
    pub level: u32,
    pub account_id: AccountId,
    pub handle: String,
    pub amount: Balance,
}

/// Result of walking `referred_by` links upward.
#[derive(Debug)]
pub struct Upline {
    /// Nearest referrer first.
    pub chain: Vec<Account>,
    /// Set when the walk stopped on an account it had already visited.
    pub cycle_at: Option<AccountId>,
}

/// Walk the upline of `origin`, at most `max_levels` hops.
///
/// Stops at a missing referrer, at the depth limit, or on a revisited
/// account. `lookup` is either a plain store read or a transactional read.
pub fn walk_upline<E>(
    origin: &Account,
    max_levels: usize,
    mut lookup: impl FnMut(&AccountId) -> Result<Option<Account>, E>,
) -> Result<Upline, E> {
    let mut visited = HashSet::from([origin.account_id.clone()]);
    let mut chain: Vec<Account> = Vec::new();
    let mut next = origin.referred_by.clone();

    while let Some(id) = next {
        if chain.len() >= max_levels {
            break;
        }
        if !visited.insert(id.clone()) {
            return Ok(Upline { chain, cycle_at: Some(id) });
        }
        let Some(account) = lookup(&id)? else { break };
        next = account.referred_by.clone();
        chain.push(account);
    }
    Ok(Upline { chain, cycle_at: None })
}

/// Pay the KYC schedule for `account` to its upline, at most once.
///
/// The direct referrer's edge `rewarded` flag is the guard; it flips in the
/// same transaction as the credits, so a replay pays nothing.
pub(crate) fn pay_kyc_bonus(
    tx: &LedgerTx<'_>,
    account: &Account,
    params: &AccrualParams,
    now: Timestamp,
) -> Result<Vec<ReferralPayout>, TxError> {
    let Some(referrer_id) = account.referred_by.clone() else {
        return Ok(Vec::new());
    };
    let Some(mut referrer) = tx.get_account(&referrer_id)? else {
        return Ok(Vec::new());
    };
    match referrer.referral_edge_mut(&account.account_id) {
        Some(edge) if edge.rewarded => return Ok(Vec::new()),
        Some(edge) => edge.rewarded = true,
        None => {
            warn!(account = %account.account_id, referrer = %referrer_id, "referrer holds no edge for account");
            return Ok(Vec::new());
        }
    }

    let memo = |level: usize| Some(format!("KYC bonus L{} from {}", level, account.handle));
    let mut payouts = Vec::new();
    let mut visited = HashSet::from([account.account_id.clone(), referrer_id.clone()]);
    let mut schedule = params.kyc_bonus_schedule.iter().take(params.upline_max_levels);

    if let Some(&amount) = schedule.next() {
        if amount > 0 {
            referrer
                .settle(now, LedgerCategory::Referral, signed(amount).map_err(abort)?, EntryStatus::Success, memo(1))
                .map_err(abort)?;
            payouts.push(ReferralPayout {
                level: 1,
                account_id: referrer_id.clone(),
                handle: referrer.handle.clone(),
                amount,
            });
        }
    }
    tx.put_account(&mut referrer)?;

    let mut current = referrer;
    for (i, &amount) in schedule.enumerate() {
        let level = i + 2;
        let Some(next_id) = current.referred_by.clone() else { break };
        if !visited.insert(next_id.clone()) {
            warn!(account = %account.account_id, at = %next_id, "referral cycle in upline; stopping bonus walk");
            break;
        }
        let Some(mut upline) = tx.get_account(&next_id)? else { break };
        if amount > 0 {
            upline
                .settle(now, LedgerCategory::Referral, signed(amount).map_err(abort)?, EntryStatus::Success, memo(level))
                .map_err(abort)?;
            tx.put_account(&mut upline)?;
            payouts.push(ReferralPayout {
                level: level as u32,
                account_id: next_id,
                handle: upline.handle.clone(),
                amount,
            });
        }
        current = upline;
    }
    Ok(payouts)
}

/// Credit `mining_upline_schedule` to the upline of `account`, nearest first.
/// Runs on every successful mining claim.
pub(crate) fn pay_mining_upline(
    tx: &LedgerTx<'_>,
    account: &Account,
    params: &AccrualParams,
    now: Timestamp,
) -> Result<Vec<ReferralPayout>, TxError> {
    let depth = params.mining_upline_schedule.len().min(params.upline_max_levels);
    let upline = walk_upline(account, depth, |id| tx.get_account(id))?;
    if let Some(at) = &upline.cycle_at {
        warn!(account = %account.account_id, at = %at, "referral cycle in upline; mining bonus truncated");
    }

    let mut payouts = Vec::new();
    for (i, (mut ancestor, &amount)) in upline.chain.into_iter().zip(&params.mining_upline_schedule).enumerate() {
        if amount == 0 {
            continue;
        }
        let level = i + 1;
        ancestor
            .settle(
                now,
                LedgerCategory::Referral,
                signed(amount).map_err(abort)?,
                EntryStatus::Success,
                Some(format!("mining upline bonus L{} from {}", level, account.handle)),
            )
            .map_err(abort)?;
        tx.put_account(&mut ancestor)?;
        payouts.push(ReferralPayout {
            level: level as u32,
            account_id: ancestor.account_id.clone(),
            handle: ancestor.handle.clone(),
            amount,
        });
    }
    Ok(payouts)
}

impl AccrualEngine {
    /// Ancestors of `id`, nearest first, at most `max_levels` deep.
    pub fn resolve_upline(&self, id: &AccountId, max_levels: usize) -> Result<Vec<Account>, AccrueError> {
        let origin = self.account(id)?;
        let upline = walk_upline(&origin, max_levels, |id| self.db.get_account(id))?;
        if let Some(at) = &upline.cycle_at {
            warn!(account = %id, at = %at, "referral cycle detected; upline truncated");
        }
        Ok(upline.chain)
    }

    /// Direct referrals that count toward the mining boost: KYC approved and
    /// holding at least `boost_min_balance`.
    pub fn verified_referral_count(&self, account: &Account) -> Result<u32, AccrueError> {
        let mut count = 0;
        for edge in &account.referrals {
            if let Some(referred) = self.db.get_account(&edge.referred_id)? {
                if referred.is_kyc_approved() && referred.balance >= self.params.boost_min_balance {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    /// Pay the upline KYC bonuses for an approved account. Idempotent: a
    /// second call returns no payouts.
    pub fn on_kyc_approved(&self, id: &AccountId, now: Timestamp) -> Result<Vec<ReferralPayout>, AccrueError> {
        let payouts = self.db.transact(|tx| {
            let account = tx.load_account(id)?;
            if !account.is_kyc_approved() {
                return Err(abort(AccrueError::KycNotApproved));
            }
            pay_kyc_bonus(tx, &account, &self.params, now)
        })?;
        log_payouts(id, &payouts);
        Ok(payouts)
    }
}

pub(crate) fn log_payouts(id: &AccountId, payouts: &[ReferralPayout]) {
    for p in payouts {
        info!(account = %id, upline = %p.account_id, level = p.level, amount = p.amount, "referral bonus paid");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{funded, temp_engine, NOW};
    use accrue_core::account::KycState;

    /// alice ← bob ← carol ← dave (dave referred by carol, ...).
    fn chain(engine: &AccrualEngine) -> Vec<AccountId> {
        vec![
            funded(engine, "alice", None, 0),
            funded(engine, "bob", Some("alice"), 0),
            funded(engine, "carol", Some("bob"), 0),
            funded(engine, "dave", Some("carol"), 0),
        ]
    }

    fn force_approved(engine: &AccrualEngine, id: &AccountId) {
        engine
            .update(id, |acc| {
                acc.kyc.state = KycState::Approved;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn upline_nearest_first_and_depth_limited() {
        let engine = temp_engine("upline_depth");
        let ids = chain(&engine);
        let up = engine.resolve_upline(&ids[3], 10).unwrap();
        let handles: Vec<_> = up.iter().map(|a| a.handle.as_str()).collect();
        assert_eq!(handles, ["carol", "bob", "alice"]);
        assert_eq!(engine.resolve_upline(&ids[3], 2).unwrap().len(), 2);
        assert!(engine.resolve_upline(&ids[0], 10).unwrap().is_empty());
    }

    #[test]
    fn walk_stops_on_cycle() {
        let engine = temp_engine("upline_cycle");
        let ids = chain(&engine);
        // Corrupt alice so she points back at dave.
        engine
            .update(&ids[0], |acc| {
                acc.referred_by = Some(ids[3].clone());
                Ok(())
            })
            .unwrap();
        let origin = engine.account(&ids[3]).unwrap();
        let up = walk_upline(&origin, 10, |id| engine.db.get_account(id)).unwrap();
        assert_eq!(up.chain.len(), 3);
        assert_eq!(up.cycle_at, Some(ids[3].clone()));
    }

    #[test]
    fn kyc_bonus_pays_three_levels_once() {
        let engine = temp_engine("kyc_bonus_levels");
        let ids = chain(&engine);
        force_approved(&engine, &ids[3]);

        let payouts = engine.on_kyc_approved(&ids[3], NOW).unwrap();
        let amounts: Vec<_> = payouts.iter().map(|p| p.amount).collect();
        assert_eq!(amounts, [10_000_000, 5_000_000, 2_500_000]);
        assert_eq!(engine.account(&ids[2]).unwrap().balance, 10_000_000);
        assert_eq!(engine.account(&ids[1]).unwrap().balance, 5_000_000);
        assert_eq!(engine.account(&ids[0]).unwrap().balance, 2_500_000);

        assert!(engine.on_kyc_approved(&ids[3], NOW + 1).unwrap().is_empty());
        assert_eq!(engine.account(&ids[2]).unwrap().balance, 10_000_000);
        assert!(engine.account(&ids[2]).unwrap().referrals[0].rewarded);
    }

    #[test]
    fn kyc_bonus_requires_approval() {
        let engine = temp_engine("kyc_bonus_unapproved");
        let ids = chain(&engine);
        let err = engine.on_kyc_approved(&ids[3], NOW).unwrap_err();
        assert!(matches!(err, AccrueError::KycNotApproved));
        assert_eq!(engine.account(&ids[2]).unwrap().balance, 0);
    }

    #[test]
    fn verified_count_needs_kyc_and_balance() {
        let engine = temp_engine("verified_count");
        let alice = funded(&engine, "alice", None, 0);
        let bob = funded(&engine, "bob", Some("alice"), 20_000_000);
        let carol = funded(&engine, "carol", Some("alice"), 1);
        funded(&engine, "dave", Some("alice"), 20_000_000);
        force_approved(&engine, &bob);
        force_approved(&engine, &carol);

        let alice = engine.account(&alice).unwrap();
        assert_eq!(engine.verified_referral_count(&alice).unwrap(), 1);
    }
}
