use accrue_core::account::{Account, EntryStatus, LedgerCategory};
use accrue_core::constants::BPS_DENOMINATOR;
use accrue_core::error::AccrueError;
use accrue_core::params::AccrualParams;
use accrue_core::types::{signed, AccountId, Balance, Timestamp};
use serde::Serialize;
use tracing::{debug, info};

use crate::db::abort;
use crate::engine::AccrualEngine;
use crate::referral::{log_payouts, pay_mining_upline, ReferralPayout};

/// What one successful mining claim paid.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MiningClaim {
    pub base: Balance,
    pub boost: Balance,
    pub total: Balance,
    pub verified_referrals: u32,
    pub claimed_at: Timestamp,
    /// End of the session renewed by this claim.
    pub session_expires_at: Timestamp,
    /// Flat credits paid to the upline with this claim.
    pub upline_bonus: Vec<ReferralPayout>,
}

/// Linear share of the session reward for `elapsed` seconds, capped at one
/// full session.
pub fn session_reward(params: &AccrualParams, elapsed: i64) -> Balance {
    let elapsed = elapsed.clamp(0, params.mining_session_secs) as u128;
    params.mining_session_reward * elapsed / params.mining_session_secs as u128
}

/// Referral boost on top of `base`. Referrals past the cap add nothing.
pub fn referral_boost(params: &AccrualParams, base: Balance, verified: u32) -> Balance {
    let counted = verified.min(params.boost_max_referrals) as u128;
    base * params.boost_per_referral_bps as u128 * counted / BPS_DENOMINATOR
}

enum ClaimStep {
    Expired,
    Paid(MiningClaim),
}

/// Apply one claim to `acc`: lazy expiry, gap check, accrual since the last
/// claim, boost, session renewal.
fn apply_claim(
    acc: &mut Account,
    p: &AccrualParams,
    verified: u32,
    now: Timestamp,
) -> Result<ClaimStep, AccrueError> {
    if !acc.mining.is_active || acc.mining.session_start.is_none() {
        return Err(AccrueError::SessionNotStarted);
    }
    if acc.mining.is_expired(now, p.mining_session_secs) {
        acc.mining.end_session();
        return Ok(ClaimStep::Expired);
    }
    let elapsed = now - acc.mining.last_claim;
    if elapsed < p.mining_claim_gap_secs {
        return Err(AccrueError::ClaimTooSoon { retry_at: acc.mining.last_claim + p.mining_claim_gap_secs });
    }

    let base = session_reward(p, elapsed);
    let boost = referral_boost(p, base, verified);
    let total = base + boost;
    acc.settle(
        now,
        LedgerCategory::Mining,
        signed(total)?,
        EntryStatus::Success,
        Some(format!("mining, {} verified referral(s)", verified)),
    )?;
    acc.mining.last_claim = now;
    acc.mining.session_start = Some(now);
    Ok(ClaimStep::Paid(MiningClaim {
        base,
        boost,
        total,
        verified_referrals: verified,
        claimed_at: now,
        session_expires_at: now + p.mining_session_secs,
        upline_bonus: Vec::new(),
    }))
}

impl AccrualEngine {
    /// Open a mining session. A live session blocks; an expired one is
    /// replaced.
    pub fn start_mining(&self, id: &AccountId, now: Timestamp) -> Result<Timestamp, AccrueError> {
        let secs = self.params.mining_session_secs;
        let expires_at = self.update(id, |acc| {
            if let Some(expires_at) = acc.mining.expires_at(secs) {
                if !acc.mining.is_expired(now, secs) {
                    return Err(AccrueError::SessionAlreadyActive { expires_at });
                }
            }
            acc.mining.is_active = true;
            acc.mining.session_start = Some(now);
            Ok(now + secs)
        })?;
        info!(account = %id, expires_at, "mining session started");
        Ok(expires_at)
    }

    /// Pay the mining reward accrued since the last claim.
    ///
    /// An expired session is closed and persisted before `SessionExpired` is
    /// returned. A successful claim renews the session from `now` and
    /// credits `mining_upline_schedule` to the upline in the same commit.
    pub fn claim_mining(&self, id: &AccountId, now: Timestamp) -> Result<MiningClaim, AccrueError> {
        let p = &self.params;
        let account = self.account(id)?;
        let verified = self.verified_referral_count(&account)?;
        let pays_upline = account.referred_by.is_some() && p.mining_upline_schedule.iter().any(|&a| a > 0);

        let step = if pays_upline {
            self.db.transact(|tx| {
                let mut acc = tx.load_account(id)?;
                let step = apply_claim(&mut acc, p, verified, now).map_err(abort)?;
                tx.put_account(&mut acc)?;
                match step {
                    ClaimStep::Paid(mut claim) => {
                        claim.upline_bonus = pay_mining_upline(tx, &acc, p, now)?;
                        Ok(ClaimStep::Paid(claim))
                    }
                    ClaimStep::Expired => Ok(ClaimStep::Expired),
                }
            })?
        } else {
            self.update(id, |acc| apply_claim(acc, p, verified, now))?
        };

        match step {
            ClaimStep::Expired => {
                info!(account = %id, "mining session expired");
                Err(AccrueError::SessionExpired)
            }
            ClaimStep::Paid(claim) => {
                info!(account = %id, base = claim.base, boost = claim.boost, "mining reward claimed");
                log_payouts(id, &claim.upline_bonus);
                Ok(claim)
            }
        }
    }

    /// Close every session past its window. Returns how many were closed.
    pub fn expire_stale_sessions(&self, now: Timestamp) -> Result<usize, AccrueError> {
        let secs = self.params.mining_session_secs;
        let mut closed = 0;
        for acc in self.db.iter_accounts()? {
            if !acc.mining.is_expired(now, secs) {
                continue;
            }
            let ended = self.update(&acc.account_id, |acc| {
                if !acc.mining.is_expired(now, secs) {
                    return Ok(false);
                }
                acc.mining.end_session();
                Ok(true)
            })?;
            if ended {
                debug!(account = %acc.account_id, "closed stale mining session");
                closed += 1;
            }
        }
        if closed > 0 {
            info!(closed, "mining sweep complete");
        }
        Ok(closed)
    }
}
