//! accrue: operator CLI for the Accrue reward ledger.
//!
//! Every subcommand opens the local state database, runs one engine
//! operation and prints the result as JSON on stdout. Logs go to stderr.
//!
//! Usage:
//!   accrue register      --handle <h> --contact <addr> --credential <hex> [--referrer <h>]
//!   accrue start-mining  --handle <h>
//!   accrue claim-mining  --handle <h>
//!   accrue stake         --handle <h> --amount <coins>
//!   accrue kyc-requests
//!   accrue withdraw      --handle <h> --amount <coins> --destination <addr>
//!   accrue reconcile     [--handle <h>]
//!   accrue run           [--sweep-secs <n>]
//!
//! Global options: --data-dir <path>, --params <json>, --now <unix_ts>.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use accrue_core::account::DepositObservation;
use accrue_core::params::AccrualParams;
use accrue_core::types::{parse_coins, AccountId, CredentialHash, SignedAmount};
use accrue_state::{AccrualEngine, Registration, StateDb};

mod daemon;

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "accrue", version, about = "Accrue reward ledger operator tool")]
struct Args {
    /// Directory for the persistent state database.
    #[arg(long, global = true, default_value = "~/.accrue/data")]
    data_dir: PathBuf,

    /// Path to an accrual params JSON file. Missing fields take defaults.
    #[arg(long, global = true)]
    params: Option<PathBuf>,

    /// Clock override (Unix seconds). Defaults to the system clock.
    #[arg(long, global = true)]
    now: Option<i64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an account.
    Register {
        #[arg(long)]
        handle: String,
        #[arg(long)]
        contact: String,
        /// Credential digest from the identity provider (64 hex chars).
        #[arg(long)]
        credential: String,
        /// Handle of the referring account.
        #[arg(long)]
        referrer: Option<String>,
    },

    /// Open a mining session.
    StartMining {
        #[arg(long)]
        handle: String,
    },

    /// Claim the mining reward accrued so far.
    ClaimMining {
        #[arg(long)]
        handle: String,
    },

    /// Lock coins in a new staking position.
    Stake {
        #[arg(long)]
        handle: String,
        /// Amount in coins, e.g. "10" or "0.25".
        #[arg(long)]
        amount: String,
    },

    /// Pay all staking epochs due.
    ClaimStaking {
        #[arg(long)]
        handle: String,
    },

    /// Exit every matured staking position.
    Unstake {
        #[arg(long)]
        handle: String,
    },

    /// Exit one locked position before maturity, forfeiting its rewards.
    UnstakeEarly {
        #[arg(long)]
        handle: String,
        #[arg(long)]
        entry: u32,
    },

    /// Submit the account for KYC review.
    KycSubmit {
        #[arg(long)]
        handle: String,
    },

    /// Approve a pending KYC submission and pay upline bonuses.
    KycApprove {
        #[arg(long)]
        handle: String,
        #[arg(long, default_value = "operator")]
        reviewer: String,
    },

    /// Reject a pending KYC submission.
    KycReject {
        #[arg(long)]
        handle: String,
        #[arg(long, default_value = "operator")]
        reviewer: String,
    },

    /// List KYC submissions awaiting review.
    KycRequests,

    /// Request a payout to an external address.
    Withdraw {
        #[arg(long)]
        handle: String,
        #[arg(long)]
        amount: String,
        #[arg(long)]
        destination: String,
    },

    /// Mark a withdrawal as paid.
    WithdrawApprove {
        #[arg(long)]
        id: u64,
    },

    /// Reject a withdrawal and release its hold.
    WithdrawReject {
        #[arg(long)]
        id: u64,
    },

    /// List withdrawals awaiting a decision.
    Withdrawals,

    /// Credit an observed on-chain deposit (idempotent per transaction id).
    Deposit {
        #[arg(long)]
        handle: String,
        #[arg(long)]
        tx_id: String,
        #[arg(long)]
        amount: String,
        #[arg(long, default_value = "")]
        sender: String,
    },

    /// Credit or debit an account by hand, e.g. --amount=-0.5.
    Adjust {
        #[arg(long)]
        handle: String,
        #[arg(long, allow_hyphen_values = true)]
        amount: String,
        #[arg(long)]
        reason: String,
    },

    /// Show an account summary.
    Account {
        #[arg(long)]
        handle: String,
    },

    /// Show reward history, newest first.
    History {
        #[arg(long)]
        handle: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Show the referral upline.
    Upline {
        #[arg(long)]
        handle: String,
        #[arg(long)]
        levels: Option<usize>,
    },

    /// Top balances.
    Leaderboard {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Check balances against ledgers (one account, or all).
    Reconcile {
        #[arg(long)]
        handle: Option<String>,
    },

    /// Close expired mining sessions.
    Sweep,

    /// Run the intake daemon: JSON-lines deposits on stdin plus a periodic sweep.
    Run {
        #[arg(long, default_value_t = 300)]
        sweep_secs: u64,
    },
}

#[derive(Serialize)]
struct UplineRow {
    level: usize,
    handle: String,
    account_id: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,accrue=debug")),
        )
        .init();

    let args = Args::parse();

    // ── State database ────────────────────────────────────────────────────────
    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let db = Arc::new(StateDb::open(&data_dir).context("opening state database")?);

    let params = load_params(args.params.as_deref())?;
    let engine = Arc::new(AccrualEngine::new(Arc::clone(&db), params));
    let now = args.now.unwrap_or_else(|| chrono::Utc::now().timestamp());

    let result = dispatch(&engine, args.command, now).await;
    db.flush().context("flushing state database")?;
    result
}

async fn dispatch(engine: &Arc<AccrualEngine>, command: Command, now: i64) -> anyhow::Result<()> {
    match command {
        Command::Register { handle, contact, credential, referrer } => {
            let credential_hash = CredentialHash::from_hex(&credential)
                .context("credential must be 32 bytes (64 hex chars)")?;
            let req = Registration { handle, contact, credential_hash, referred_by: referrer };
            let acc = engine.register_account(&req, now)?;
            print_json(&engine.summary(&acc.account_id)?)
        }

        Command::StartMining { handle } => {
            let id = lookup(engine, &handle)?;
            let expires_at = engine.start_mining(&id, now)?;
            print_json(&serde_json::json!({ "handle": handle, "expires_at": expires_at }))
        }

        Command::ClaimMining { handle } => {
            let id = lookup(engine, &handle)?;
            print_json(&engine.claim_mining(&id, now)?)
        }

        Command::Stake { handle, amount } => {
            let id = lookup(engine, &handle)?;
            print_json(&engine.stake(&id, parse_coins(&amount)?, now)?)
        }

        Command::ClaimStaking { handle } => {
            let id = lookup(engine, &handle)?;
            print_json(&engine.claim_staking_rewards(&id, now)?)
        }

        Command::Unstake { handle } => {
            let id = lookup(engine, &handle)?;
            print_json(&engine.unstake(&id, now)?)
        }

        Command::UnstakeEarly { handle, entry } => {
            let id = lookup(engine, &handle)?;
            print_json(&engine.unstake_early(&id, entry, now)?)
        }

        Command::KycSubmit { handle } => {
            let id = lookup(engine, &handle)?;
            print_json(&engine.submit_kyc(&id, now)?)
        }

        Command::KycApprove { handle, reviewer } => {
            let id = lookup(engine, &handle)?;
            print_json(&engine.approve_kyc(&id, &reviewer, now)?)
        }

        Command::KycReject { handle, reviewer } => {
            let id = lookup(engine, &handle)?;
            let retry_after = engine.reject_kyc(&id, &reviewer, now)?;
            print_json(&serde_json::json!({ "handle": handle, "retry_after": retry_after }))
        }

        Command::KycRequests => print_json(&engine.pending_kyc()?),

        Command::Withdraw { handle, amount, destination } => {
            let id = lookup(engine, &handle)?;
            print_json(&engine.request_withdrawal(&id, parse_coins(&amount)?, &destination, now)?)
        }

        Command::WithdrawApprove { id } => print_json(&engine.approve_withdrawal(id, now)?),

        Command::WithdrawReject { id } => print_json(&engine.reject_withdrawal(id, now)?),

        Command::Withdrawals => print_json(&engine.pending_withdrawals()?),

        Command::Deposit { handle, tx_id, amount, sender } => {
            let id = lookup(engine, &handle)?;
            let obs = DepositObservation {
                transaction_id: tx_id,
                amount: parse_coins(&amount)?,
                sender_address: sender,
                observed_at: now,
            };
            print_json(&engine.ingest_deposit(&id, &obs, now)?)
        }

        Command::Adjust { handle, amount, reason } => {
            let id = lookup(engine, &handle)?;
            print_json(&engine.admin_adjust(&id, parse_signed_coins(&amount)?, &reason, now)?)
        }

        Command::Account { handle } => {
            let id = lookup(engine, &handle)?;
            print_json(&engine.summary(&id)?)
        }

        Command::History { handle, limit } => {
            let id = lookup(engine, &handle)?;
            let rows: Vec<_> = engine.history(&id)?.into_iter().take(limit).collect();
            print_json(&rows)
        }

        Command::Upline { handle, levels } => {
            let id = lookup(engine, &handle)?;
            let levels = levels.unwrap_or(engine.params.upline_max_levels);
            let rows: Vec<_> = engine
                .resolve_upline(&id, levels)?
                .into_iter()
                .enumerate()
                .map(|(i, a)| UplineRow {
                    level: i + 1,
                    handle: a.handle,
                    account_id: a.account_id.to_b58(),
                })
                .collect();
            print_json(&rows)
        }

        Command::Leaderboard { limit } => print_json(&engine.leaderboard(limit)?),

        Command::Reconcile { handle } => match handle {
            Some(handle) => {
                let id = lookup(engine, &handle)?;
                print_json(&engine.reconcile_balance(&id)?)
            }
            None => {
                let reports = engine.reconcile_all()?;
                let drifted = reports.iter().filter(|r| !r.in_balance).count();
                print_json(&reports)?;
                if drifted > 0 {
                    bail!("{drifted} account(s) out of balance");
                }
                Ok(())
            }
        },

        Command::Sweep => {
            let closed = engine.expire_stale_sessions(now)?;
            print_json(&serde_json::json!({ "closed_sessions": closed }))
        }

        Command::Run { sweep_secs } => daemon::run(Arc::clone(engine), sweep_secs).await,
    }
}

fn lookup(engine: &AccrualEngine, handle: &str) -> anyhow::Result<AccountId> {
    Ok(engine.account_by_handle(handle)?.account_id)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("encoding output")?);
    Ok(())
}

/// Decimal coin amount with an optional leading sign.
fn parse_signed_coins(s: &str) -> anyhow::Result<SignedAmount> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let units = SignedAmount::try_from(parse_coins(digits)?).context("amount out of range")?;
    Ok(if negative { -units } else { units })
}

/// Load accrual params from a JSON file, or fall back to the defaults.
fn load_params(path: Option<&Path>) -> anyhow::Result<AccrualParams> {
    if let Some(p) = path {
        let json = std::fs::read_to_string(p)
            .with_context(|| format!("reading params from {}", p.display()))?;
        return AccrualParams::from_json(&json).context("parsing params JSON");
    }
    info!("no --params given; using default accrual params");
    Ok(AccrualParams::default())
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
