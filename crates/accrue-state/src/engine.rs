use std::sync::Arc;

use accrue_core::account::{Account, KycState, LedgerCategory, LedgerEntry, ReferralEdge};
use accrue_core::constants::{MAX_CONTACT_LEN, MAX_HANDLE_LEN};
use accrue_core::error::AccrueError;
use accrue_core::params::AccrualParams;
use accrue_core::types::{AccountId, Balance, CredentialHash, SignedAmount, Timestamp};
use serde::Serialize;
use tracing::{info, warn};

use crate::db::{abort, StateDb};
use crate::notify::{Notification, Notifier, TracingNotifier};
use crate::referral::walk_upline;

// ── Requests / views ──────────────────────────────────────────────────────────

/// Sign-up request, as handed over by the (trusted) identity layer.
#[derive(Clone, Debug)]
pub struct Registration {
    pub handle: String,
    pub contact: String,
    pub credential_hash: CredentialHash,
    /// Handle of the referring account, if any.
    pub referred_by: Option<String>,
}

/// Read-only overview of one account.
#[derive(Clone, Debug, Serialize)]
pub struct AccountSummary {
    pub account_id: String,
    pub handle: String,
    pub balance: Balance,
    pub total_staked: Balance,
    pub active_stakes: usize,
    pub kyc: KycState,
    pub mining_active: bool,
    pub mining_expires_at: Option<Timestamp>,
    pub referrals: usize,
    pub mining_reward: SignedAmount,
    pub staking_reward: SignedAmount,
    pub referral_reward: SignedAmount,
    pub ledger_rows: usize,
    pub version: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct LeaderboardRow {
    pub rank: usize,
    pub handle: String,
    pub balance: Balance,
}

// ── AccrualEngine ─────────────────────────────────────────────────────────────

/// Owns the store handle and the tunables; every component operation
/// (mining, staking, referral, KYC, settlement) is a method on it.
///
/// Operations take `now` explicitly so callers control the clock.
pub struct AccrualEngine {
    pub db: Arc<StateDb>,
    pub params: AccrualParams,
    notifier: Arc<dyn Notifier>,
}

impl AccrualEngine {
    pub fn new(db: Arc<StateDb>, params: AccrualParams) -> Self {
        Self { db, params, notifier: Arc::new(TracingNotifier) }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Single-account read-modify-write under the configured retry budget.
    pub(crate) fn update<T>(
        &self,
        id: &AccountId,
        f: impl FnMut(&mut Account) -> Result<T, AccrueError>,
    ) -> Result<T, AccrueError> {
        self.db.update_account(id, self.params.store_max_retries, f)
    }

    /// Deliver a notification for a change that has already committed.
    pub(crate) fn notify(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(&notification) {
            warn!(error = %e, ?notification, "notification not delivered");
        }
    }

    // ── Registration ─────────────────────────────────────────────────────────

    /// Create an account, optionally attached below an existing referrer.
    pub fn register_account(
        &self,
        req: &Registration,
        now: Timestamp,
    ) -> Result<Account, AccrueError> {
        validate_handle(&req.handle)?;
        validate_contact(&req.contact)?;
        let new_id = AccountId::for_handle(&req.handle);
        if let Some(referrer) = &req.referred_by {
            if AccountId::for_handle(referrer) == new_id {
                return Err(AccrueError::SelfReferral);
            }
        }

        let account = self.db.transact(|tx| {
            if tx.account_id_for_handle(&req.handle)?.is_some() {
                return Err(abort(AccrueError::HandleTaken(req.handle.trim().to_string())));
            }
            let mut account =
                Account::new(&req.handle, &req.contact, req.credential_hash.clone(), None, now);

            if let Some(referrer_handle) = &req.referred_by {
                let referrer_id = tx
                    .account_id_for_handle(referrer_handle)?
                    .ok_or_else(|| abort(AccrueError::UnknownReferrer(referrer_handle.clone())))?;
                account.referred_by = Some(referrer_id.clone());

                let upline = walk_upline(&account, self.params.upline_max_levels, |id| {
                    tx.get_account(id)
                })?;
                if upline.cycle_at.is_some() {
                    return Err(abort(AccrueError::ReferralCycle(account.handle.clone())));
                }

                let mut referrer = tx.load_account(&referrer_id)?;
                referrer.referrals.push(ReferralEdge {
                    referred_id: account.account_id.clone(),
                    referred_handle: account.handle.clone(),
                    referred_at: now,
                    rewarded: false,
                });
                tx.put_account(&mut referrer)?;
            }

            tx.insert_new_account(&mut account)?;
            Ok(account)
        })?;

        info!(
            account = %account.account_id,
            handle = %account.handle,
            referred = account.referred_by.is_some(),
            "registered account"
        );
        self.notify(Notification::Welcome {
            handle: account.handle.clone(),
            contact: account.contact.clone(),
        });
        Ok(account)
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn account(&self, id: &AccountId) -> Result<Account, AccrueError> {
        self.db
            .get_account(id)?
            .ok_or_else(|| AccrueError::UnknownAccount(id.to_string()))
    }

    pub fn account_by_handle(&self, handle: &str) -> Result<Account, AccrueError> {
        let id = self
            .db
            .account_id_for_handle(handle)?
            .ok_or_else(|| AccrueError::UnknownAccount(handle.to_string()))?;
        self.account(&id)
    }

    pub fn summary(&self, id: &AccountId) -> Result<AccountSummary, AccrueError> {
        let acc = self.account(id)?;
        Ok(AccountSummary {
            account_id: acc.account_id.to_b58(),
            handle: acc.handle.clone(),
            balance: acc.balance,
            total_staked: acc.total_staked(),
            active_stakes: acc.active_stakes().count(),
            kyc: acc.kyc.state,
            mining_active: acc.mining.is_active,
            mining_expires_at: acc.mining.expires_at(self.params.mining_session_secs),
            referrals: acc.referrals.len(),
            mining_reward: acc.category_total(LedgerCategory::Mining),
            staking_reward: acc.staking_reward_total(),
            referral_reward: acc.category_total(LedgerCategory::Referral),
            ledger_rows: acc.ledger.len(),
            version: acc.version,
        })
    }

    /// Reward history, newest first.
    pub fn history(&self, id: &AccountId) -> Result<Vec<LedgerEntry>, AccrueError> {
        let mut rows = self.account(id)?.ledger;
        rows.reverse();
        Ok(rows)
    }

    /// Top `limit` accounts by balance. Ties break on handle.
    pub fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardRow>, AccrueError> {
        let mut accounts = self.db.iter_accounts()?;
        accounts.sort_by(|a, b| b.balance.cmp(&a.balance).then_with(|| a.handle.cmp(&b.handle)));
        Ok(accounts
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, a)| LeaderboardRow { rank: i + 1, handle: a.handle, balance: a.balance })
            .collect())
    }
}

fn validate_handle(handle: &str) -> Result<(), AccrueError> {
    let h = handle.trim();
    if h.len() < 3 || h.len() > MAX_HANDLE_LEN {
        return Err(AccrueError::InvalidHandle(format!(
            "{h:?}: must be 3 to {MAX_HANDLE_LEN} characters"
        )));
    }
    if !h.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(AccrueError::InvalidHandle(format!(
            "{h:?}: only letters, digits, '_' and '-' allowed"
        )));
    }
    Ok(())
}

fn validate_contact(contact: &str) -> Result<(), AccrueError> {
    let c = contact.trim();
    match c.split_once('@') {
        Some((local, domain))
            if !local.is_empty() && domain.contains('.') && c.len() <= MAX_CONTACT_LEN =>
        {
            Ok(())
        }
        _ => Err(AccrueError::InvalidContact),
    }
}
