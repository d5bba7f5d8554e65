pub mod db;
pub mod engine;
pub mod kyc;
pub mod mining;
pub mod notify;
pub mod referral;
pub mod settlement;
pub mod staking;

pub use db::StateDb;
pub use engine::{AccountSummary, AccrualEngine, LeaderboardRow, Registration};
pub use kyc::KycRequest;
pub use mining::MiningClaim;
pub use notify::{Notification, Notifier, NotifyError, TracingNotifier};
pub use referral::{ReferralPayout, Upline};
pub use settlement::{DepositOutcome, ReconcileReport};
pub use staking::{EntryPayout, ExitedStake, StakeReceipt, StakingClaim, UnstakeOutcome};
