use accrue_core::account::WithdrawStatus;
use accrue_core::types::{Balance, Timestamp};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// Account-holder notification emitted after a state change has committed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Notification {
    Welcome {
        handle: String,
        contact: String,
    },
    KycApproved {
        handle: String,
        contact: String,
    },
    KycRejected {
        handle: String,
        contact: String,
        retry_after: Timestamp,
    },
    WithdrawalProcessed {
        handle: String,
        contact: String,
        request_id: u64,
        amount: Balance,
        status: WithdrawStatus,
    },
}

#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Delivery seam for notifications (mail, push, ...).
///
/// Called only after the state change is durable. A delivery failure is
/// logged by the engine and never undoes the change.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Default notifier: writes each notification to the log.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(?notification, "notification");
        Ok(())
    }
}
