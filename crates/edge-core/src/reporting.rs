// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION Edge.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Outbox delivery.
//!
//! The worker drains the durable report outbox oldest-first through a
//! pluggable transport. Reports are removed only after the transport accepts
//! them; a transport fault stops the current batch so ordering is preserved,
//! and the worker backs off exponentially before retrying. Everything the
//! device wants to say survives restarts because it lives in the outbox, not
//! in channels.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{EdgeError, Result};
use crate::store::{ReportKind, ScheduleStore};

/// How many reports one drain pass hands to the transport.
const DELIVERY_BATCH: usize = 16;

/// First retry delay after a delivery failure.
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Retry delay ceiling during a long broker outage.
const BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Outbound path for device reports. The MQTT client implements this in the
/// binary; tests substitute a recording fake.
#[async_trait]
pub trait ReportTransport: Send + Sync {
    /// Hand one serialized report to the transport. Returning `Ok` means the
    /// transport has accepted responsibility for it (at-least-once).
    async fn publish(&self, kind: ReportKind, payload: &str) -> anyhow::Result<()>;

    /// Transport name for logging
    fn name(&self) -> &str;
}

/// Retry delay after `consecutive_failures` failed drain passes.
fn backoff_delay(consecutive_failures: u32) -> Duration {
    let exp = consecutive_failures.saturating_sub(1).min(16);
    BACKOFF_BASE
        .saturating_mul(2u32.saturating_pow(exp))
        .min(BACKOFF_MAX)
}

/// Drains the report outbox through a transport.
pub struct DeliveryWorker {
    store: Arc<ScheduleStore>,
    transport: Arc<dyn ReportTransport>,
    poll_interval: Duration,
    consecutive_failures: u32,
}

impl std::fmt::Debug for DeliveryWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryWorker")
            .field("transport", &self.transport.name())
            .field("poll_interval", &self.poll_interval)
            .field("consecutive_failures", &self.consecutive_failures)
            .finish_non_exhaustive()
    }
}

impl DeliveryWorker {
    pub fn new(
        store: Arc<ScheduleStore>,
        transport: Arc<dyn ReportTransport>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            poll_interval,
            consecutive_failures: 0,
        }
    }

    /// One drain pass: publish up to a batch of pending reports, oldest
    /// first. Stops at the first transport failure so later reports never
    /// overtake earlier ones. Returns how many were delivered.
    pub async fn run_once(&self) -> Result<usize> {
        let pending = self.store.pending_reports(DELIVERY_BATCH)?;
        if pending.is_empty() {
            return Ok(0);
        }

        let mut delivered = 0;
        for entry in pending {
            match self.transport.publish(entry.kind, &entry.payload).await {
                Ok(()) => {
                    self.store.mark_delivered(entry.id)?;
                    debug!(identity = %entry.identity, "report delivered");
                    delivered += 1;
                }
                Err(e) => {
                    self.store.record_attempt(entry.id)?;
                    warn!(
                        identity = %entry.identity,
                        attempts = entry.attempts + 1,
                        transport = self.transport.name(),
                        "report delivery failed: {e}"
                    );
                    return Err(EdgeError::Transport(e.to_string()));
                }
            }
        }
        Ok(delivered)
    }

    /// Drain until empty, then keep polling. Exits when the shutdown signal
    /// fires.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let delay = if self.consecutive_failures > 0 {
                backoff_delay(self.consecutive_failures)
            } else {
                self.poll_interval
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    info!("delivery worker stopping");
                    return;
                }
            }

            match self.run_once().await {
                Ok(_) => self.consecutive_failures = 0,
                Err(_) => {
                    self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                }
            }
        }
    }

    /// Best-effort drain for shutdown: keep pushing until the outbox is
    /// empty or the deadline passes. Whatever remains is delivered after the
    /// next start.
    pub async fn flush(&self, timeout: Duration) -> Result<usize> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut total = 0;

        loop {
            match self.run_once().await {
                Ok(0) => return Ok(total),
                Ok(n) => total += n,
                Err(e) => {
                    warn!("flush interrupted: {e}");
                    return Ok(total);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                let remaining = self.store.outbox_len()?;
                warn!(remaining, "flush deadline reached with reports pending");
                return Ok(total);
            }
        }
    }
}
