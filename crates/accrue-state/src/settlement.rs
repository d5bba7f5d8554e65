use accrue_core::account::{
    DepositObservation, DepositRecord, EntryStatus, LedgerCategory, LedgerEntry, WithdrawRequest,
    WithdrawStatus,
};
use accrue_core::constants::MAX_ADDRESS_LEN;
use accrue_core::error::AccrueError;
use accrue_core::types::{format_coins, signed, AccountId, Balance, SignedAmount, Timestamp};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::db::abort;
use crate::engine::AccrualEngine;
use crate::notify::Notification;

/// Balance vs ledger for one account.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub account_id: String,
    pub handle: String,
    pub balance: Balance,
    pub ledger_sum: SignedAmount,
    pub in_balance: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum DepositOutcome {
    Credited(DepositRecord),
    /// Already seen; nothing changed.
    Duplicate,
}

impl AccrualEngine {
    // ── Ledger ───────────────────────────────────────────────────────────────

    /// Append one row and move the balance with it.
    pub fn append_ledger_entry(
        &self,
        id: &AccountId,
        category: LedgerCategory,
        amount: SignedAmount,
        status: EntryStatus,
        memo: Option<String>,
        now: Timestamp,
    ) -> Result<LedgerEntry, AccrueError> {
        let entry = self.update(id, |acc| {
            let row = acc.settle(now, category, amount, status, memo.clone())?;
            acc.ledger
                .iter()
                .find(|e| e.id == row)
                .cloned()
                .ok_or(AccrueError::LedgerEntryNotFound(row))
        })?;
        info!(account = %id, ?category, amount, ?status, "ledger entry appended");
        Ok(entry)
    }

    /// Operator correction, credit or debit. Never takes the balance below zero.
    pub fn admin_adjust(
        &self,
        id: &AccountId,
        amount: SignedAmount,
        reason: &str,
        now: Timestamp,
    ) -> Result<LedgerEntry, AccrueError> {
        if amount == 0 {
            return Err(AccrueError::InvalidAmount("adjustment must be non-zero".into()));
        }
        self.append_ledger_entry(
            id,
            LedgerCategory::AdminAdjustment,
            amount,
            EntryStatus::Success,
            Some(reason.to_string()),
            now,
        )
    }

    /// Compare the balance with the ledger. Drift is reported, never repaired.
    pub fn reconcile_balance(&self, id: &AccountId) -> Result<ReconcileReport, AccrueError> {
        let report = reconcile(&self.account(id)?);
        if !report.in_balance {
            error!(account = %id, balance = report.balance, ledger_sum = report.ledger_sum, "ledger drift");
            return Err(AccrueError::LedgerDrift {
                account: report.account_id,
                balance: report.balance,
                ledger_sum: report.ledger_sum,
            });
        }
        Ok(report)
    }

    /// Audit every account. Drifted accounts are logged and included.
    pub fn reconcile_all(&self) -> Result<Vec<ReconcileReport>, AccrueError> {
        let reports: Vec<_> = self.db.iter_accounts()?.iter().map(reconcile).collect();
        for r in reports.iter().filter(|r| !r.in_balance) {
            error!(account = %r.account_id, balance = r.balance, ledger_sum = r.ledger_sum, "ledger drift");
        }
        Ok(reports)
    }

    // ── Withdrawals ──────────────────────────────────────────────────────────

    /// Hold `amount` against the balance and queue a payout request.
    pub fn request_withdrawal(
        &self,
        id: &AccountId,
        amount: Balance,
        destination: &str,
        now: Timestamp,
    ) -> Result<WithdrawRequest, AccrueError> {
        let destination = destination.trim();
        if destination.is_empty() || destination.len() > MAX_ADDRESS_LEN {
            return Err(AccrueError::InvalidDestination);
        }
        if amount < self.params.min_withdrawal {
            return Err(AccrueError::InvalidAmount(format!(
                "withdrawal below minimum of {} coin",
                format_coins(self.params.min_withdrawal)
            )));
        }
        let hold = signed(amount)?;
        let request_id = self.db.generate_id()?;

        let request = self.db.transact(|tx| {
            let mut acc = tx.load_account(id)?;
            if !acc.is_kyc_approved() {
                return Err(abort(AccrueError::KycNotApproved));
            }
            let row = acc
                .settle(
                    now,
                    LedgerCategory::Withdrawal,
                    -hold,
                    EntryStatus::Pending,
                    Some(format!("withdrawal #{request_id}")),
                )
                .map_err(abort)?;
            let request = WithdrawRequest {
                id: request_id,
                account_id: id.clone(),
                amount,
                destination_address: destination.to_string(),
                status: WithdrawStatus::Pending,
                requested_at: now,
                processed_at: None,
                ledger_entry_id: row,
            };
            tx.put_account(&mut acc)?;
            tx.put_withdrawal(&request)?;
            Ok(request)
        })?;

        info!(account = %id, request = request.id, amount, "withdrawal requested");
        Ok(request)
    }

    pub fn approve_withdrawal(&self, request_id: u64, now: Timestamp) -> Result<WithdrawRequest, AccrueError> {
        self.resolve_withdrawal(request_id, WithdrawStatus::Approved, now)
    }

    /// Reject a pending request and release its hold.
    pub fn reject_withdrawal(&self, request_id: u64, now: Timestamp) -> Result<WithdrawRequest, AccrueError> {
        self.resolve_withdrawal(request_id, WithdrawStatus::Rejected, now)
    }

    fn resolve_withdrawal(
        &self,
        request_id: u64,
        outcome: WithdrawStatus,
        now: Timestamp,
    ) -> Result<WithdrawRequest, AccrueError> {
        let row_status = match outcome {
            WithdrawStatus::Approved => EntryStatus::Success,
            WithdrawStatus::Rejected => EntryStatus::Rejected,
            WithdrawStatus::Pending => return Err(AccrueError::WithdrawalNotPending(request_id)),
        };

        let (request, handle, contact) = self.db.transact(|tx| {
            let mut request = tx
                .get_withdrawal(request_id)?
                .ok_or_else(|| abort(AccrueError::WithdrawalNotFound(request_id)))?;
            if request.status.is_terminal() {
                return Err(abort(AccrueError::WithdrawalNotPending(request_id)));
            }
            let mut acc = tx.load_account(&request.account_id)?;
            acc.resolve_pending(request.ledger_entry_id, row_status).map_err(abort)?;
            request.status = outcome;
            request.processed_at = Some(now);
            tx.put_account(&mut acc)?;
            tx.put_withdrawal(&request)?;
            Ok((request, acc.handle, acc.contact))
        })?;

        info!(request = request_id, account = %request.account_id, status = ?outcome, "withdrawal processed");
        self.notify(Notification::WithdrawalProcessed {
            handle,
            contact,
            request_id,
            amount: request.amount,
            status: outcome,
        });
        Ok(request)
    }

    /// Requests awaiting an operator decision, oldest first.
    pub fn pending_withdrawals(&self) -> Result<Vec<WithdrawRequest>, AccrueError> {
        let mut pending: Vec<_> = self
            .db
            .iter_withdrawals()?
            .into_iter()
            .filter(|r| r.status == WithdrawStatus::Pending)
            .collect();
        pending.sort_by_key(|r| (r.requested_at, r.id));
        Ok(pending)
    }

    // ── Deposits ─────────────────────────────────────────────────────────────

    /// Credit an observed on-chain deposit, at most once per transaction id.
    pub fn ingest_deposit(
        &self,
        id: &AccountId,
        obs: &DepositObservation,
        now: Timestamp,
    ) -> Result<DepositOutcome, AccrueError> {
        if obs.transaction_id.trim().is_empty() {
            return Err(AccrueError::InvalidAmount("deposit without transaction id".into()));
        }
        if obs.amount == 0 {
            return Err(AccrueError::InvalidAmount("zero deposit".into()));
        }
        let credit = signed(obs.amount)?;

        let outcome = self.db.transact(|tx| {
            if tx.deposit_exists(&obs.transaction_id)? {
                return Ok(DepositOutcome::Duplicate);
            }
            let mut acc = tx.load_account(id)?;
            let row = acc
                .settle(
                    now,
                    LedgerCategory::Deposit,
                    credit,
                    EntryStatus::Success,
                    Some(format!("deposit {}", obs.transaction_id)),
                )
                .map_err(abort)?;
            let record = DepositRecord {
                transaction_id: obs.transaction_id.clone(),
                account_id: id.clone(),
                amount: obs.amount,
                sender_address: obs.sender_address.clone(),
                observed_at: obs.observed_at,
                credited_at: now,
                ledger_entry_id: row,
            };
            tx.put_account(&mut acc)?;
            tx.put_deposit(&record)?;
            Ok(DepositOutcome::Credited(record))
        })?;

        match &outcome {
            DepositOutcome::Credited(r) => {
                info!(account = %id, tx = %r.transaction_id, amount = r.amount, "deposit credited")
            }
            DepositOutcome::Duplicate => {
                warn!(account = %id, tx = %obs.transaction_id, "duplicate deposit observation ignored")
            }
        }
        Ok(outcome)
    }
}

fn reconcile(acc: &accrue_core::account::Account) -> ReconcileReport {
    let ledger_sum = acc.ledger_sum();
    ReconcileReport {
        account_id: acc.account_id.to_b58(),
        handle: acc.handle.clone(),
        balance: acc.balance,
        ledger_sum,
        in_balance: i128::try_from(acc.balance).map_or(false, |b| b == ledger_sum),
    }
}
