//! Channel renewal before expiration.
//!
//! Watch channels expire on the remote side. [`RenewalTask`] periodically
//! re-registers every active channel that is about to lapse, carrying the
//! sync position over to the new channel.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::SyncResult;
use crate::manager::ChannelManager;
use crate::shutdown::ShutdownSignal;
use crate::store::SyncStore;

/// Renewal settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalConfig {
    /// Channels expiring within this window are renewed.
    pub margin: Duration,
    /// How often to look for expiring channels.
    pub check_interval: Duration,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            margin: Duration::from_secs(3600),        // 1 hour
            check_interval: Duration::from_secs(300), // 5 minutes
        }
    }
}

impl RenewalConfig {
    /// Builder: set the renewal margin.
    pub fn with_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    /// Builder: set the check interval.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }
}

/// Result of one renewal pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenewalReport {
    /// (old channel id, new channel id) pairs.
    pub renewed: Vec<(String, String)>,
    /// Channels whose renewal failed; retried on the next pass.
    pub failed: Vec<String>,
}

/// Periodic renewal of expiring channels.
pub struct RenewalTask {
    manager: Arc<ChannelManager>,
    store: Arc<dyn SyncStore>,
    config: RenewalConfig,
}

impl RenewalTask {
    pub fn new(
        manager: Arc<ChannelManager>,
        store: Arc<dyn SyncStore>,
        config: RenewalConfig,
    ) -> Self {
        Self {
            manager,
            store,
            config,
        }
    }

    /// Renews every active channel expiring within the margin, once.
    pub async fn renew_due(&self) -> SyncResult<RenewalReport> {
        let margin = chrono::Duration::from_std(self.config.margin)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let due = self.store.channels_expiring_before(Utc::now() + margin)?;

        let mut report = RenewalReport::default();
        for channel in due {
            debug!(
                channel_id = %channel.channel_id,
                expiration = %channel.expiration,
                "renewing expiring channel"
            );
            match self.manager.renew(&channel.channel_id).await {
                Ok(renewed) => report
                    .renewed
                    .push((channel.channel_id, renewed.channel_id)),
                Err(e) => {
                    warn!(channel_id = %channel.channel_id, error = %e, "channel renewal failed");
                    report.failed.push(channel.channel_id);
                }
            }
        }
        Ok(report)
    }

    /// Runs renewal passes until `shutdown` fires.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        info!(
            margin_secs = self.config.margin.as_secs(),
            interval_secs = self.config.check_interval.as_secs(),
            "Renewal task started"
        );

        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.renew_due().await {
                        Ok(report) if !report.renewed.is_empty() || !report.failed.is_empty() => {
                            info!(
                                renewed = report.renewed.len(),
                                failed = report.failed.len(),
                                "Renewal pass finished"
                            );
                        }
                        Ok(_) => debug!("No channels due for renewal"),
                        Err(e) => warn!(error = %e, "Renewal pass failed"),
                    }
                }
                _ = shutdown.wait() => {
                    info!("Renewal task stopping");
                    break;
                }
            }
        }
    }
}
