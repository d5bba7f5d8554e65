/// ─── Accrue Ledger Constants ────────────────────────────────────────────────
///
/// Base unit: 1 coin = 1,000,000,000 units (nine decimal places).
/// Rates are expressed in basis points: 10_000 bps = 100 %.
///
/// Everything below is a default for `AccrualParams`; a deployment may
/// override any of them through the params JSON file.

// ── Units ────────────────────────────────────────────────────────────────────

/// 1 coin expressed in base units.
pub const UNITS_PER_COIN: u128 = 1_000_000_000;

/// Number of decimal places carried by a base unit.
pub const COIN_DECIMALS: u32 = 9;

/// Denominator for every basis-point rate.
pub const BPS_DENOMINATOR: u128 = 10_000;

// ── Mining ───────────────────────────────────────────────────────────────────

/// Maximum mining session length (seconds). Default: 3 hours.
pub const MINING_SESSION_SECS: i64 = 3 * 3600;

/// Minimum gap between two mining claims (seconds).
pub const MINING_CLAIM_GAP_SECS: i64 = 10;

/// Reward for one full mining session: 0.00025 coin.
pub const MINING_SESSION_REWARD: u128 = 250_000;

/// Boost per verified direct referral: 5 % of the base reward.
pub const BOOST_PER_REFERRAL_BPS: u32 = 500;

/// A direct referral counts towards the boost only at or above this balance (0.01 coin).
pub const BOOST_MIN_BALANCE: u128 = 10_000_000;

/// Cap on referrals counted for the boost. 10 × 5 % = at most +50 %.
pub const BOOST_MAX_REFERRALS: u32 = 10;

/// Flat credit to each upline account on every mining claim (0.00025 coin).
pub const MINING_UPLINE_BONUS: u128 = 250_000;

/// Upline levels credited on a mining claim.
pub const MINING_UPLINE_LEVELS: usize = 10;

// ── Staking ──────────────────────────────────────────────────────────────────

/// Minimum principal for one staking position: 0.1 coin.
pub const MIN_STAKE: u128 = 100_000_000;

/// Length of one staking epoch (seconds). Default: 6 hours.
pub const STAKE_EPOCH_SECS: i64 = 6 * 3600;

/// Reward per epoch: 1 % of principal.
pub const STAKE_EPOCH_BPS: u32 = 100;

/// Epochs payable by a single claim call (4 × 1 % = 4 % per call at most).
pub const STAKE_MAX_EPOCHS_PER_CLAIM: u32 = 4;

/// Lock period before a position may exit without penalty. Default: 7 days.
pub const STAKE_LOCK_SECS: i64 = 7 * 24 * 3600;

/// Share of every new stake paid to the staker's direct referrer: 10 %.
pub const STAKE_REFERRAL_BPS: u32 = 1_000;

// ── Referrals ────────────────────────────────────────────────────────────────

/// Maximum upline depth walked by `resolve_upline`.
pub const UPLINE_MAX_LEVELS: usize = 10;

/// KYC-triggered referral bonus for the direct referrer (0.01 coin).
pub const KYC_BONUS_LEVEL_1: u128 = 10_000_000;

/// KYC-triggered bonus for the referrer's referrer (0.005 coin).
pub const KYC_BONUS_LEVEL_2: u128 = 5_000_000;

/// KYC-triggered bonus for the third upline level (0.0025 coin).
pub const KYC_BONUS_LEVEL_3: u128 = 2_500_000;

// ── KYC ──────────────────────────────────────────────────────────────────────

/// Balance required before a KYC submission is accepted (0.01 coin).
pub const KYC_MIN_BALANCE: u128 = 10_000_000;

/// Waiting period after a rejected KYC before resubmission. Default: 3 days.
pub const KYC_RETRY_SECS: i64 = 3 * 24 * 3600;

// ── Withdrawals ──────────────────────────────────────────────────────────────

/// Smallest withdrawal accepted: 0.1 coin.
pub const MIN_WITHDRAWAL: u128 = 100_000_000;

// ── Store ────────────────────────────────────────────────────────────────────

/// Compare-and-swap attempts before a write surfaces `Conflict`.
pub const STORE_MAX_RETRIES: u32 = 8;

// ── Validation limits ────────────────────────────────────────────────────────

pub const MAX_HANDLE_LEN: usize = 32;
pub const MAX_CONTACT_LEN: usize = 254;
pub const MAX_ADDRESS_LEN: usize = 128;
pub const MAX_MEMO_BYTES: usize = 256;
