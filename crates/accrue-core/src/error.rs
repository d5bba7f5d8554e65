use thiserror::Error;

use crate::types::{Balance, SignedAmount, Timestamp};

/// Coarse failure class, used by callers to decide how to surface an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input shape or range. Nothing changed.
    Validation,
    /// A business-rule gate was not met. Nothing changed.
    PreconditionFailed,
    /// Concurrent writes kept colliding; the caller may retry.
    Conflict,
    /// Account, position, request or ledger row missing.
    NotFound,
    /// Store or downstream failure.
    Internal,
}

#[derive(Debug, Error)]
pub enum AccrueError {
    // ── Validation ───────────────────────────────────────────────────────────
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    #[error("invalid contact address")]
    InvalidContact,

    #[error("invalid destination address")]
    InvalidDestination,

    #[error("memo exceeds maximum length of {max} bytes")]
    MemoTooLong { max: usize },

    #[error("an account cannot refer itself")]
    SelfReferral,

    #[error("invalid params: {0}")]
    InvalidParams(String),

    // ── Registration ─────────────────────────────────────────────────────────
    #[error("handle already taken: {0}")]
    HandleTaken(String),

    #[error("contact address already registered")]
    ContactTaken,

    #[error("referral would create a cycle in the upline of {0}")]
    ReferralCycle(String),

    // ── Balance ──────────────────────────────────────────────────────────────
    #[error("insufficient balance: need {need} units, have {have}")]
    InsufficientBalance { need: Balance, have: Balance },

    // ── Mining ───────────────────────────────────────────────────────────────
    #[error("mining session not started")]
    SessionNotStarted,

    #[error("mining session expired; start a new session")]
    SessionExpired,

    #[error("mining session already active (expires at {expires_at})")]
    SessionAlreadyActive { expires_at: Timestamp },

    #[error("claim too soon; next claim allowed at {retry_at}")]
    ClaimTooSoon { retry_at: Timestamp },

    // ── Staking ──────────────────────────────────────────────────────────────
    #[error("no staking reward due yet")]
    NothingToClaim,

    #[error("no staking position has completed its lock period")]
    NoEligibleStake,

    #[error("staking position {0} already exited")]
    StakeAlreadyExited(u32),

    #[error("staking position {0} has matured; use a regular unstake")]
    StakeMatured(u32),

    // ── KYC ──────────────────────────────────────────────────────────────────
    #[error("KYC not approved")]
    KycNotApproved,

    #[error("KYC already approved")]
    KycAlreadyApproved,

    #[error("KYC already submitted and awaiting review")]
    KycAlreadyPending,

    #[error("no KYC submission awaiting review")]
    KycNotPending,

    #[error("KYC resubmission locked until {retry_at}")]
    KycRetryLocked { retry_at: Timestamp },

    #[error("KYC requires a balance of at least {min} units")]
    KycBalanceRequired { min: Balance },

    // ── Settlement ───────────────────────────────────────────────────────────
    #[error("withdrawal {0} is not pending")]
    WithdrawalNotPending(u64),

    #[error("ledger entry {0} is not pending")]
    LedgerEntryNotPending(u64),

    // ── Not found ────────────────────────────────────────────────────────────
    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error("unknown referrer: {0}")]
    UnknownReferrer(String),

    #[error("staking position not found: {0}")]
    StakeNotFound(u32),

    #[error("withdrawal request not found: {0}")]
    WithdrawalNotFound(u64),

    #[error("ledger entry not found: {0}")]
    LedgerEntryNotFound(u64),

    // ── Concurrency ──────────────────────────────────────────────────────────
    #[error("write conflict on {key} after {attempts} attempts")]
    Conflict { key: String, attempts: u32 },

    // ── Serialization / storage ──────────────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("ledger drift on {account}: balance {balance}, ledger sum {ledger_sum}")]
    LedgerDrift {
        account: String,
        balance: Balance,
        ledger_sum: SignedAmount,
    },
}

impl AccrueError {
    pub fn kind(&self) -> ErrorKind {
        use AccrueError::*;
        match self {
            InvalidAmount(_) | InvalidHandle(_) | InvalidContact | InvalidDestination
            | MemoTooLong { .. } | SelfReferral | InvalidParams(_) | HandleTaken(_)
            | ContactTaken | ReferralCycle(_) => ErrorKind::Validation,

            InsufficientBalance { .. } | SessionNotStarted | SessionExpired
            | SessionAlreadyActive { .. } | ClaimTooSoon { .. } | NothingToClaim
            | NoEligibleStake | StakeAlreadyExited(_) | StakeMatured(_) | KycNotApproved
            | KycAlreadyApproved | KycAlreadyPending | KycNotPending | KycRetryLocked { .. }
            | KycBalanceRequired { .. } | WithdrawalNotPending(_)
            | LedgerEntryNotPending(_) => ErrorKind::PreconditionFailed,

            Conflict { .. } => ErrorKind::Conflict,

            UnknownAccount(_) | UnknownReferrer(_) | StakeNotFound(_) | WithdrawalNotFound(_)
            | LedgerEntryNotFound(_) => ErrorKind::NotFound,

            Serialization(_) | Storage(_) | LedgerDrift { .. } => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_covers_each_class() {
        assert_eq!(AccrueError::InvalidAmount("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(AccrueError::SessionExpired.kind(), ErrorKind::PreconditionFailed);
        assert_eq!(
            AccrueError::Conflict { key: "a".into(), attempts: 3 }.kind(),
            ErrorKind::Conflict
        );
        assert_eq!(AccrueError::StakeNotFound(2).kind(), ErrorKind::NotFound);
        assert_eq!(AccrueError::Storage("io".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn messages_carry_amounts() {
        let e = AccrueError::InsufficientBalance { need: 10, have: 4 };
        assert_eq!(e.to_string(), "insufficient balance: need 10 units, have 4");
    }
}
