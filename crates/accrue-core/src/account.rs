use serde::{Deserialize, Serialize};

use crate::constants::MAX_MEMO_BYTES;
use crate::error::AccrueError;
use crate::types::{AccountId, Balance, CredentialHash, SignedAmount, Timestamp};

// ── KYC ───────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum KycState {
    NotSubmitted,
    Pending,
    Approved,
    Rejected,
}

/// KYC review state for one account.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct KycRecord {
    pub state: KycState,
    pub submitted_at: Option<Timestamp>,
    pub decided_at: Option<Timestamp>,
    /// A rejected account may resubmit only after this timestamp.
    pub retry_after: Option<Timestamp>,
    pub reviewed_by: Option<String>,
}

impl Default for KycRecord {
    fn default() -> Self {
        Self {
            state: KycState::NotSubmitted,
            submitted_at: None,
            decided_at: None,
            retry_after: None,
            reviewed_by: None,
        }
    }
}

// ── Mining ────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct MiningState {
    pub is_active: bool,
    pub session_start: Option<Timestamp>,
    /// Defaults to 0 (Unix epoch) so the first claim passes the gap check.
    pub last_claim: Timestamp,
}

impl MiningState {
    /// End of the current session, if one is running.
    pub fn expires_at(&self, session_secs: i64) -> Option<Timestamp> {
        match (self.is_active, self.session_start) {
            (true, Some(start)) => Some(start + session_secs),
            _ => None,
        }
    }

    /// True if a session is running and `now` lies past its window.
    pub fn is_expired(&self, now: Timestamp, session_secs: i64) -> bool {
        self.expires_at(session_secs).is_some_and(|end| now > end)
    }

    pub fn end_session(&mut self) {
        self.is_active = false;
        self.session_start = None;
    }
}

// ── Staking ───────────────────────────────────────────────────────────────────

/// One staking position. Owned by exactly one account, never reordered.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StakingEntry {
    /// Per-account sequence number, assigned at stake time.
    pub id: u32,
    pub principal: Balance,
    pub started_at: Timestamp,
    /// Start of the first epoch not yet paid.
    pub last_accrual_at: Timestamp,
    /// Rewards credited to the balance so far.
    pub accrued_reward: Balance,
    pub exited: bool,
    pub exited_at: Option<Timestamp>,
}

impl StakingEntry {
    pub fn new(id: u32, principal: Balance, now: Timestamp) -> Self {
        Self {
            id,
            principal,
            started_at: now,
            last_accrual_at: now,
            accrued_reward: 0,
            exited: false,
            exited_at: None,
        }
    }

    pub fn is_matured(&self, now: Timestamp, lock_secs: i64) -> bool {
        now - self.started_at >= lock_secs
    }

    pub fn unlocks_at(&self, lock_secs: i64) -> Timestamp {
        self.started_at + lock_secs
    }
}

// ── Referrals ─────────────────────────────────────────────────────────────────

/// One downlink, held by the referring account.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReferralEdge {
    pub referred_id: AccountId,
    pub referred_handle: String,
    pub referred_at: Timestamp,
    /// Set once the KYC bonus for this downlink has been paid. Never cleared.
    pub rewarded: bool,
}

// ── Ledger ────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LedgerCategory {
    Mining,
    Staking,
    Referral,
    Deposit,
    Withdrawal,
    AdminAdjustment,
    EarlyUnstakePenalty,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    Success,
    Rejected,
}

/// An append-only reward history row.
///
/// Only `status` may change after creation, and only Pending → Success or
/// Pending → Rejected, once.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    /// Per-account sequence number.
    pub id: u64,
    pub timestamp: Timestamp,
    pub category: LedgerCategory,
    pub amount: SignedAmount,
    pub status: EntryStatus,
    /// Aggregate row restating postings already recorded. Does not move the balance.
    pub summary: bool,
    pub memo: Option<String>,
}

impl LedgerEntry {
    /// Whether this row's amount is reflected in the balance.
    ///
    /// Pending rows are holds already applied to the balance (a withdrawal
    /// awaiting approval); they leave the balance only when rejected.
    pub fn counts_toward_balance(&self) -> bool {
        !self.summary && self.status != EntryStatus::Rejected
    }
}

// ── Withdrawals ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum WithdrawStatus {
    Pending,
    Approved,
    Rejected,
}

impl WithdrawStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WithdrawStatus::Pending)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WithdrawRequest {
    pub id: u64,
    pub account_id: AccountId,
    pub amount: Balance,
    pub destination_address: String,
    pub status: WithdrawStatus,
    pub requested_at: Timestamp,
    pub processed_at: Option<Timestamp>,
    /// The Pending `Withdrawal` ledger row this request owns.
    pub ledger_entry_id: u64,
}

// ── Deposits ──────────────────────────────────────────────────────────────────

/// What the blockchain observer reports for one incoming transfer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DepositObservation {
    pub transaction_id: String,
    pub amount: Balance,
    pub sender_address: String,
    pub observed_at: Timestamp,
}

/// Dedup record stored once a deposit has been credited.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DepositRecord {
    pub transaction_id: String,
    pub account_id: AccountId,
    pub amount: Balance,
    pub sender_address: String,
    pub observed_at: Timestamp,
    pub credited_at: Timestamp,
    pub ledger_entry_id: u64,
}

// ── Account ───────────────────────────────────────────────────────────────────

/// Full participant state as stored in the state DB.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub handle: String,
    pub contact: String,
    pub credential_hash: CredentialHash,
    /// The only spendable quantity. Never negative.
    pub balance: Balance,
    pub kyc: KycRecord,
    /// Set at creation, never mutated.
    pub referred_by: Option<AccountId>,
    pub referrals: Vec<ReferralEdge>,
    pub mining: MiningState,
    pub staking: Vec<StakingEntry>,
    pub ledger: Vec<LedgerEntry>,
    pub created_at: Timestamp,
    /// Bumped on every committed write.
    pub version: u64,
}

impl Account {
    pub fn new(
        handle: &str,
        contact: &str,
        credential_hash: CredentialHash,
        referred_by: Option<AccountId>,
        now: Timestamp,
    ) -> Self {
        Self {
            account_id: AccountId::for_handle(handle),
            handle: handle.trim().to_string(),
            contact: contact.trim().to_lowercase(),
            credential_hash,
            balance: 0,
            kyc: KycRecord::default(),
            referred_by,
            referrals: Vec::new(),
            mining: MiningState::default(),
            staking: Vec::new(),
            ledger: Vec::new(),
            created_at: now,
            version: 0,
        }
    }

    pub fn is_kyc_approved(&self) -> bool {
        self.kyc.state == KycState::Approved
    }

    /// Apply `amount` to the balance and append the matching ledger row.
    ///
    /// This is the single place where the balance moves: a row is never
    /// written without its balance change, nor the reverse. Pending and
    /// Success rows move the balance; Rejected rows are recorded only.
    pub fn settle(
        &mut self,
        now: Timestamp,
        category: LedgerCategory,
        amount: SignedAmount,
        status: EntryStatus,
        memo: Option<String>,
    ) -> Result<u64, AccrueError> {
        check_memo(&memo)?;
        if status != EntryStatus::Rejected {
            self.balance = apply_delta(self.balance, amount)?;
        }
        Ok(self.push_entry(now, category, amount, status, false, memo))
    }

    /// Append an aggregate row that restates postings already settled.
    pub fn append_summary(
        &mut self,
        now: Timestamp,
        category: LedgerCategory,
        amount: SignedAmount,
        memo: Option<String>,
    ) -> u64 {
        self.push_entry(now, category, amount, EntryStatus::Success, true, memo)
    }

    /// Move a Pending row to Success or Rejected. A rejected hold is released
    /// back into the balance. Returns the row's amount.
    pub fn resolve_pending(
        &mut self,
        entry_id: u64,
        outcome: EntryStatus,
    ) -> Result<SignedAmount, AccrueError> {
        if outcome == EntryStatus::Pending {
            return Err(AccrueError::LedgerEntryNotPending(entry_id));
        }
        let entry = self
            .ledger
            .iter()
            .find(|e| e.id == entry_id)
            .ok_or(AccrueError::LedgerEntryNotFound(entry_id))?;
        if entry.status != EntryStatus::Pending {
            return Err(AccrueError::LedgerEntryNotPending(entry_id));
        }
        let amount = entry.amount;
        if outcome == EntryStatus::Rejected {
            self.balance = apply_delta(self.balance, -amount)?;
        }
        if let Some(entry) = self.ledger.iter_mut().find(|e| e.id == entry_id) {
            entry.status = outcome;
        }
        Ok(amount)
    }

    /// Signed sum of every row reflected in the balance.
    pub fn ledger_sum(&self) -> SignedAmount {
        self.ledger
            .iter()
            .filter(|e| e.counts_toward_balance())
            .map(|e| e.amount)
            .sum()
    }

    /// Net of the balance-moving rows in `category`.
    pub fn category_total(&self, category: LedgerCategory) -> SignedAmount {
        self.ledger
            .iter()
            .filter(|e| e.category == category && e.counts_toward_balance())
            .map(|e| e.amount)
            .sum()
    }

    /// Staking rewards kept so far: staking rows net of locked principal and
    /// early-exit clawbacks.
    pub fn staking_reward_total(&self) -> SignedAmount {
        self.category_total(LedgerCategory::Staking)
            + self.total_staked() as SignedAmount
            + self.category_total(LedgerCategory::EarlyUnstakePenalty)
    }

    pub fn active_stakes(&self) -> impl Iterator<Item = &StakingEntry> {
        self.staking.iter().filter(|s| !s.exited)
    }

    pub fn total_staked(&self) -> Balance {
        self.active_stakes().map(|s| s.principal).sum()
    }

    pub fn next_stake_id(&self) -> u32 {
        self.staking.last().map(|s| s.id + 1).unwrap_or(0)
    }

    pub fn referral_edge_mut(&mut self, referred: &AccountId) -> Option<&mut ReferralEdge> {
        self.referrals.iter_mut().find(|e| &e.referred_id == referred)
    }

    fn push_entry(
        &mut self,
        now: Timestamp,
        category: LedgerCategory,
        amount: SignedAmount,
        status: EntryStatus,
        summary: bool,
        memo: Option<String>,
    ) -> u64 {
        let id = self.ledger.last().map(|e| e.id + 1).unwrap_or(0);
        self.ledger.push(LedgerEntry {
            id,
            timestamp: now,
            category,
            amount,
            status,
            summary,
            memo,
        });
        id
    }
}

fn check_memo(memo: &Option<String>) -> Result<(), AccrueError> {
    match memo {
        Some(m) if m.len() > MAX_MEMO_BYTES => Err(AccrueError::MemoTooLong { max: MAX_MEMO_BYTES }),
        _ => Ok(()),
    }
}

/// `balance + delta`, refusing to go below zero.
fn apply_delta(balance: Balance, delta: SignedAmount) -> Result<Balance, AccrueError> {
    if delta >= 0 {
        balance
            .checked_add(delta as u128)
            .ok_or_else(|| AccrueError::InvalidAmount("balance overflow".into()))
    } else {
        let need = delta.unsigned_abs();
        balance
            .checked_sub(need)
            .ok_or(AccrueError::InsufficientBalance { need, have: balance })
    }
}
