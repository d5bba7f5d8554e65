//! Intake daemon: deposit observations arrive as JSON lines on stdin and are
//! applied in order by a single consumer; a timer closes stale mining
//! sessions in the background.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use accrue_core::account::DepositObservation;
use accrue_core::error::AccrueError;
use accrue_core::types::{parse_coins, Timestamp};
use accrue_state::{AccrualEngine, DepositOutcome};

/// One line of observer input.
#[derive(Debug, Deserialize)]
pub struct DepositLine {
    pub handle: String,
    pub transaction_id: String,
    /// Decimal coin amount.
    pub amount: String,
    #[serde(default)]
    pub sender_address: String,
    pub observed_at: Option<Timestamp>,
}

impl DepositLine {
    fn into_observation(self, now: Timestamp) -> Result<(String, DepositObservation), AccrueError> {
        let amount = parse_coins(&self.amount)?;
        Ok((
            self.handle,
            DepositObservation {
                transaction_id: self.transaction_id,
                amount,
                sender_address: self.sender_address,
                observed_at: self.observed_at.unwrap_or(now),
            },
        ))
    }
}

pub async fn run(engine: Arc<AccrualEngine>, sweep_secs: u64) -> anyhow::Result<()> {
    let (line_tx, mut line_rx) = tokio::sync::mpsc::channel::<DepositLine>(512);

    // ── stdin reader ──────────────────────────────────────────────────────────
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match serde_json::from_str::<DepositLine>(&line) {
                    Ok(obs) => {
                        if line_tx.send(obs).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "malformed deposit line skipped"),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
    });

    // ── housekeeping sweep ────────────────────────────────────────────────────
    let sweeper = Arc::clone(&engine);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(sweep_secs.max(1)));
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now().timestamp();
            if let Err(e) = sweeper.expire_stale_sessions(now) {
                warn!(error = %e, "mining sweep failed");
            }
        }
    });

    // ── main loop: apply deposits in arrival order ────────────────────────────
    info!(sweep_secs, "intake daemon ready");
    while let Some(line) = line_rx.recv().await {
        let now = chrono::Utc::now().timestamp();
        match apply_line(&engine, line, now) {
            Ok(DepositOutcome::Credited(r)) => {
                info!(tx = %r.transaction_id, amount = r.amount, "deposit applied")
            }
            Ok(DepositOutcome::Duplicate) => {}
            Err(e) => warn!(error = %e, kind = ?e.kind(), "deposit rejected"),
        }
    }

    info!("stdin closed; daemon stopping");
    engine.db.flush()?;
    Ok(())
}

fn apply_line(engine: &AccrualEngine, line: DepositLine, now: Timestamp) -> Result<DepositOutcome, AccrueError> {
    let (handle, obs) = line.into_observation(now)?;
    let account = engine.account_by_handle(&handle)?;
    engine.ingest_deposit(&account.account_id, &obs, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use accrue_core::params::AccrualParams;
    use accrue_core::types::CredentialHash;
    use accrue_state::{Registration, StateDb};

    fn temp_engine(name: &str) -> AccrualEngine {
        let dir = std::env::temp_dir().join(format!("accrue_daemon_test_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        AccrualEngine::new(Arc::new(StateDb::open(&dir).unwrap()), AccrualParams::default())
    }

    #[test]
    fn json_lines_credit_once() {
        let engine = temp_engine("lines");
        engine
            .register_account(
                &Registration {
                    handle: "alice".into(),
                    contact: "alice@example.com".into(),
                    credential_hash: CredentialHash([1; 32]),
                    referred_by: None,
                },
                100,
            )
            .unwrap();

        let raw = r#"{"handle":"alice","transaction_id":"0xabc","amount":"1.5"}"#;
        let line: DepositLine = serde_json::from_str(raw).unwrap();
        assert!(matches!(apply_line(&engine, line, 200).unwrap(), DepositOutcome::Credited(_)));
        let line: DepositLine = serde_json::from_str(raw).unwrap();
        assert_eq!(apply_line(&engine, line, 201).unwrap(), DepositOutcome::Duplicate);
        assert_eq!(engine.account_by_handle("alice").unwrap().balance, 1_500_000_000);
    }

    #[test]
    fn unknown_handle_is_rejected() {
        let engine = temp_engine("unknown");
        let line: DepositLine =
            serde_json::from_str(r#"{"handle":"bob","transaction_id":"t","amount":"1"}"#).unwrap();
        let err = apply_line(&engine, line, 1).unwrap_err();
        assert!(matches!(err, AccrueError::UnknownAccount(_)));
    }
}
