use accrue_core::account::{KycRecord, KycState};
use accrue_core::error::AccrueError;
use accrue_core::types::{AccountId, Balance, Timestamp};
use serde::Serialize;
use tracing::info;

use crate::db::abort;
use crate::engine::AccrualEngine;
use crate::notify::Notification;
use crate::referral::{log_payouts, pay_kyc_bonus, ReferralPayout};

/// A submission awaiting review.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct KycRequest {
    pub account_id: String,
    pub handle: String,
    pub contact: String,
    pub balance: Balance,
    pub submitted_at: Option<Timestamp>,
}

impl AccrualEngine {
    /// Accounts in `Pending` KYC state, oldest submission first.
    pub fn pending_kyc(&self) -> Result<Vec<KycRequest>, AccrueError> {
        let mut requests: Vec<_> = self
            .db
            .iter_accounts()?
            .into_iter()
            .filter(|acc| acc.kyc.state == KycState::Pending)
            .map(|acc| KycRequest {
                account_id: acc.account_id.to_b58(),
                handle: acc.handle,
                contact: acc.contact,
                balance: acc.balance,
                submitted_at: acc.kyc.submitted_at,
            })
            .collect();
        requests.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then_with(|| a.handle.cmp(&b.handle)));
        Ok(requests)
    }

    /// Queue the account for KYC review.
    pub fn submit_kyc(&self, id: &AccountId, now: Timestamp) -> Result<KycRecord, AccrueError> {
        let min = self.params.kyc_min_balance;
        let record = self.update(id, |acc| {
            match acc.kyc.state {
                KycState::Approved => return Err(AccrueError::KycAlreadyApproved),
                KycState::Pending => return Err(AccrueError::KycAlreadyPending),
                KycState::Rejected | KycState::NotSubmitted => {}
            }
            if let Some(retry_at) = acc.kyc.retry_after.filter(|&t| now < t) {
                return Err(AccrueError::KycRetryLocked { retry_at });
            }
            if acc.balance < min {
                return Err(AccrueError::KycBalanceRequired { min });
            }
            acc.kyc = KycRecord {
                state: KycState::Pending,
                submitted_at: Some(now),
                ..KycRecord::default()
            };
            Ok(acc.kyc.clone())
        })?;
        info!(account = %id, "KYC submitted");
        Ok(record)
    }

    /// Approve a pending submission and pay the upline bonuses in the same
    /// transaction.
    pub fn approve_kyc(
        &self,
        id: &AccountId,
        reviewer: &str,
        now: Timestamp,
    ) -> Result<Vec<ReferralPayout>, AccrueError> {
        let (account, payouts) = self.db.transact(|tx| {
            let mut account = tx.load_account(id)?;
            match account.kyc.state {
                KycState::Pending => {}
                KycState::Approved => return Err(abort(AccrueError::KycAlreadyApproved)),
                KycState::NotSubmitted | KycState::Rejected => {
                    return Err(abort(AccrueError::KycNotPending))
                }
            }
            account.kyc.state = KycState::Approved;
            account.kyc.decided_at = Some(now);
            account.kyc.retry_after = None;
            account.kyc.reviewed_by = Some(reviewer.to_string());
            tx.put_account(&mut account)?;
            let payouts = pay_kyc_bonus(tx, &account, &self.params, now)?;
            Ok((account, payouts))
        })?;

        info!(account = %id, reviewer, "KYC approved");
        log_payouts(id, &payouts);
        self.notify(Notification::KycApproved {
            handle: account.handle,
            contact: account.contact,
        });
        Ok(payouts)
    }

    /// Reject a pending submission; resubmission is locked for
    /// `kyc_retry_secs`.
    pub fn reject_kyc(&self, id: &AccountId, reviewer: &str, now: Timestamp) -> Result<Timestamp, AccrueError> {
        let retry_after = now + self.params.kyc_retry_secs;
        let (handle, contact) = self.update(id, |acc| {
            if acc.kyc.state != KycState::Pending {
                return Err(AccrueError::KycNotPending);
            }
            acc.kyc.state = KycState::Rejected;
            acc.kyc.decided_at = Some(now);
            acc.kyc.retry_after = Some(retry_after);
            acc.kyc.reviewed_by = Some(reviewer.to_string());
            Ok((acc.handle.clone(), acc.contact.clone()))
        })?;

        info!(account = %id, reviewer, retry_after, "KYC rejected");
        self.notify(Notification::KycRejected { handle, contact, retry_after });
        Ok(retry_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::engine::tests::{funded, temp_engine, RecordingNotifier, NOW};

    const CENT: u128 = 10_000_000;

    #[test]
    fn submit_requires_minimum_balance() {
        let engine = temp_engine("kyc_min_balance");
        let id = funded(&engine, "alice", None, CENT - 1);
        let err = engine.submit_kyc(&id, NOW).unwrap_err();
        assert!(matches!(err, AccrueError::KycBalanceRequired { .. }));

        engine.admin_adjust(&id, 1, "top up", NOW).unwrap();
        let rec = engine.submit_kyc(&id, NOW).unwrap();
        assert_eq!(rec.state, KycState::Pending);

        let err = engine.submit_kyc(&id, NOW).unwrap_err();
        assert!(matches!(err, AccrueError::KycAlreadyPending));
    }

    #[test]
    fn approve_pays_referrer_and_notifies() {
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = temp_engine("kyc_approve").with_notifier(notifier.clone());
        let alice = funded(&engine, "alice", None, 0);
        let bob = funded(&engine, "bob", Some("alice"), CENT);
        engine.submit_kyc(&bob, NOW).unwrap();

        let payouts = engine.approve_kyc(&bob, "ops", NOW + 10).unwrap();
        assert_eq!(payouts.len(), 1);
        assert_eq!(engine.account(&alice).unwrap().balance, CENT);
        let bob_acc = engine.account(&bob).unwrap();
        assert!(bob_acc.is_kyc_approved());
        assert_eq!(bob_acc.kyc.reviewed_by.as_deref(), Some("ops"));

        let err = engine.approve_kyc(&bob, "ops", NOW + 20).unwrap_err();
        assert!(matches!(err, AccrueError::KycAlreadyApproved));
        assert_eq!(engine.account(&alice).unwrap().balance, CENT);

        let seen = notifier.seen.lock().unwrap();
        assert!(seen.iter().any(|n| matches!(n, Notification::KycApproved { handle, .. } if handle == "bob")));
    }

    #[test]
    fn approve_requires_pending() {
        let engine = temp_engine("kyc_approve_not_pending");
        let id = funded(&engine, "carol", None, CENT);
        let err = engine.approve_kyc(&id, "ops", NOW).unwrap_err();
        assert!(matches!(err, AccrueError::KycNotPending));
    }

    #[test]
    fn pending_queue_lists_only_submitted() {
        let engine = temp_engine("kyc_pending_queue");
        let a = funded(&engine, "anna", None, CENT);
        let b = funded(&engine, "ben", None, CENT);
        funded(&engine, "cleo", None, CENT);
        engine.submit_kyc(&b, NOW).unwrap();
        engine.submit_kyc(&a, NOW + 1).unwrap();

        let handles: Vec<_> = engine.pending_kyc().unwrap().into_iter().map(|r| r.handle).collect();
        assert_eq!(handles, ["ben", "anna"]);

        engine.approve_kyc(&b, "ops", NOW + 2).unwrap();
        let queue = engine.pending_kyc().unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].submitted_at, Some(NOW + 1));
    }

    #[test]
    fn rejection_locks_resubmission() {
        let engine = temp_engine("kyc_reject");
        let id = funded(&engine, "dave", None, CENT);
        engine.submit_kyc(&id, NOW).unwrap();
        let retry_at = engine.reject_kyc(&id, "ops", NOW + 5).unwrap();
        assert_eq!(retry_at, NOW + 5 + engine.params.kyc_retry_secs);

        let err = engine.submit_kyc(&id, retry_at - 1).unwrap_err();
        assert!(matches!(err, AccrueError::KycRetryLocked { .. }));
        assert_eq!(engine.submit_kyc(&id, retry_at).unwrap().state, KycState::Pending);
    }
}
