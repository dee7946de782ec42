use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::database::ledger::{DonationKey, DonationLedger, TerminalStatus};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// How often the worker wakes up to scan for stale donations.
    pub poll_interval: Duration,
    /// Age from `created_at` after which a pending donation is abandoned and
    /// marked `failed`. Must comfortably exceed the gateways' own retry
    /// windows so a late webhook still finds a pending row.
    pub pending_timeout: Duration,
    /// Maximum number of stale donations processed per cycle.
    pub batch_size: i64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300),
            pending_timeout: Duration::from_secs(24 * 3600),
            batch_size: 200,
        }
    }
}

impl SweeperConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.poll_interval = Duration::from_secs(
            std::env::var("SWEEPER_POLL_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.poll_interval.as_secs()),
        );
        cfg.pending_timeout = Duration::from_secs(
            std::env::var("SWEEPER_PENDING_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.pending_timeout.as_secs()),
        );
        cfg.batch_size = std::env::var("SWEEPER_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.batch_size);
        cfg
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Periodically fails pending donations whose gateway never called back.
///
/// The failure goes through the same conditional transition as webhook
/// reconciliation, so a callback racing the sweeper is harmless: whichever
/// side wins the guarded UPDATE decides the terminal state and the loser
/// becomes a no-op.
pub struct StaleDonationSweeper {
    ledger: Arc<dyn DonationLedger>,
    config: SweeperConfig,
}

impl StaleDonationSweeper {
    pub fn new(ledger: Arc<dyn DonationLedger>, config: SweeperConfig) -> Self {
        Self { ledger, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            pending_timeout_secs = self.config.pending_timeout.as_secs(),
            batch_size = self.config.batch_size,
            "stale donation sweeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("stale donation sweeper stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.run_cycle().await {
                        warn!(error = %e, "sweeper cycle failed");
                    }
                }
            }
        }

        info!("stale donation sweeper stopped");
    }

    async fn run_cycle(&self) -> anyhow::Result<()> {
        let stale = self
            .ledger
            .find_stale_pending(self.config.pending_timeout, self.config.batch_size)
            .await?;

        if stale.is_empty() {
            return Ok(());
        }

        info!(count = stale.len(), "sweeping stale pending donations");
        let mut swept = 0u64;
        for donation in stale {
            let affected = self
                .ledger
                .transition_if_pending(
                    DonationKey::Id(donation.id),
                    TerminalStatus::Failed,
                    None,
                    Some("pending timeout exceeded"),
                )
                .await?;
            if affected == 1 {
                swept += 1;
                warn!(
                    donation_id = %donation.id,
                    created_at = %donation.created_at,
                    "stale pending donation marked failed"
                );
            }
            // affected == 0 means a webhook landed between the scan and the
            // update; the row is already terminal and stays as-is.
        }

        info!(swept, "sweeper cycle complete");
        Ok(())
    }
}
