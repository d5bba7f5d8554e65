use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::AccrueError;
use crate::types::Balance;

/// Every tunable of the accrual engines.
///
/// Loaded from a JSON file by the operator binary; any field left out takes
/// the protocol default from `constants`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AccrualParams {
    // ── Mining ────────────────────────────────────────────────────────────────
    pub mining_session_secs: i64,
    pub mining_claim_gap_secs: i64,
    /// Reward paid for one full session, amortized linearly over its length.
    pub mining_session_reward: Balance,
    pub boost_per_referral_bps: u32,
    pub boost_min_balance: Balance,
    /// Verified referrals beyond this count add no further boost.
    pub boost_max_referrals: u32,
    /// Credit per upline level on every mining claim; index 0 is the direct
    /// referrer. Empty disables the bonus.
    pub mining_upline_schedule: Vec<Balance>,

    // ── Staking ───────────────────────────────────────────────────────────────
    pub min_stake: Balance,
    pub stake_epoch_secs: i64,
    pub stake_epoch_bps: u32,
    pub stake_max_epochs_per_claim: u32,
    pub stake_lock_secs: i64,
    pub stake_referral_bps: u32,

    // ── Referrals ─────────────────────────────────────────────────────────────
    pub upline_max_levels: usize,
    /// KYC bonus per upline level; index 0 is the direct referrer.
    pub kyc_bonus_schedule: Vec<Balance>,

    // ── KYC ───────────────────────────────────────────────────────────────────
    pub kyc_min_balance: Balance,
    pub kyc_retry_secs: i64,

    // ── Settlement ────────────────────────────────────────────────────────────
    pub min_withdrawal: Balance,

    // ── Store ─────────────────────────────────────────────────────────────────
    pub store_max_retries: u32,
}

impl Default for AccrualParams {
    fn default() -> Self {
        Self {
            mining_session_secs: MINING_SESSION_SECS,
            mining_claim_gap_secs: MINING_CLAIM_GAP_SECS,
            mining_session_reward: MINING_SESSION_REWARD,
            boost_per_referral_bps: BOOST_PER_REFERRAL_BPS,
            boost_min_balance: BOOST_MIN_BALANCE,
            boost_max_referrals: BOOST_MAX_REFERRALS,
            mining_upline_schedule: vec![MINING_UPLINE_BONUS; MINING_UPLINE_LEVELS],
            min_stake: MIN_STAKE,
            stake_epoch_secs: STAKE_EPOCH_SECS,
            stake_epoch_bps: STAKE_EPOCH_BPS,
            stake_max_epochs_per_claim: STAKE_MAX_EPOCHS_PER_CLAIM,
            stake_lock_secs: STAKE_LOCK_SECS,
            stake_referral_bps: STAKE_REFERRAL_BPS,
            upline_max_levels: UPLINE_MAX_LEVELS,
            kyc_bonus_schedule: vec![KYC_BONUS_LEVEL_1, KYC_BONUS_LEVEL_2, KYC_BONUS_LEVEL_3],
            kyc_min_balance: KYC_MIN_BALANCE,
            kyc_retry_secs: KYC_RETRY_SECS,
            min_withdrawal: MIN_WITHDRAWAL,
            store_max_retries: STORE_MAX_RETRIES,
        }
    }
}

impl AccrualParams {
    /// Parse params from JSON text and validate them.
    pub fn from_json(json: &str) -> Result<Self, AccrueError> {
        let params: Self =
            serde_json::from_str(json).map_err(|e| AccrueError::InvalidParams(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    /// Reject settings the engines cannot run with.
    pub fn validate(&self) -> Result<(), AccrueError> {
        let bad = |msg: &str| Err(AccrueError::InvalidParams(msg.to_string()));
        if self.mining_session_secs <= 0 {
            return bad("mining_session_secs must be positive");
        }
        if self.mining_claim_gap_secs < 0 {
            return bad("mining_claim_gap_secs must not be negative");
        }
        if self.stake_epoch_secs <= 0 {
            return bad("stake_epoch_secs must be positive");
        }
        if self.stake_max_epochs_per_claim == 0 {
            return bad("stake_max_epochs_per_claim must be at least 1");
        }
        if self.stake_lock_secs < 0 {
            return bad("stake_lock_secs must not be negative");
        }
        if self.min_stake == 0 {
            return bad("min_stake must be positive");
        }
        if self.min_withdrawal == 0 {
            return bad("min_withdrawal must be positive");
        }
        if self.kyc_bonus_schedule.len() > self.upline_max_levels {
            return bad("kyc_bonus_schedule is deeper than upline_max_levels");
        }
        if self.mining_upline_schedule.len() > self.upline_max_levels {
            return bad("mining_upline_schedule is deeper than upline_max_levels");
        }
        if self.store_max_retries == 0 {
            return bad("store_max_retries must be at least 1");
        }
        Ok(())
    }
}
