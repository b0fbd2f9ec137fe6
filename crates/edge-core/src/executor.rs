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

//! Clock-driven interval execution.
//!
//! The executor decides the active interval purely from wall-clock time and
//! the locally stored schedule — never from a cloud round-trip — so a device
//! reconnecting after an outage resumes the correct interval immediately.
//! One execution record is emitted per completed interval, not per tick.
//!
//! Failure containment: an actuation error marks that interval's record
//! FAILED and is reported, but never blocks later intervals.

use chrono::{DateTime, Utc};
use edge_types::messages::{ExecutionResult, ExecutionStatus};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::actuation::BatteryActuator;
use crate::store::{ActiveInterval, ScheduleStore};

/// What the executor is driving right now.
#[derive(Debug, Clone, PartialEq)]
enum ExecutorState {
    /// No current schedule, or no interval covers the present time
    /// (day-rollover gap). The battery is commanded to idle.
    Idle,
    Executing(Executing),
}

#[derive(Debug, Clone, PartialEq)]
struct Executing {
    schedule_id: String,
    trace_id: String,
    interval_index: u32,
    scheduled_rate_kw: f64,
    /// Set when commanding this interval's rate failed; finalizes the
    /// interval's record as FAILED.
    actuation_error: Option<String>,
}

/// Per-device interval execution state machine, driven by a periodic tick.
pub struct IntervalExecutor {
    device_id: String,
    store: Arc<ScheduleStore>,
    actuator: Arc<dyn BatteryActuator>,
    outbox_capacity: usize,
    state: ExecutorState,
    /// Whether the idle command already reached the actuator, so steady
    /// idle does not re-command 0 kW every tick.
    idle_commanded: bool,
}

impl std::fmt::Debug for IntervalExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalExecutor")
            .field("device_id", &self.device_id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl IntervalExecutor {
    pub fn new(
        device_id: impl Into<String>,
        store: Arc<ScheduleStore>,
        actuator: Arc<dyn BatteryActuator>,
        outbox_capacity: usize,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            store,
            actuator,
            outbox_capacity,
            state: ExecutorState::Idle,
            idle_commanded: false,
        }
    }

    /// Next interval boundary of the current schedule after `now`, for
    /// aligning wake-ups with transitions.
    pub fn next_boundary(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.store.next_boundary(now)
    }

    /// Advance the state machine to the interval covering `now`.
    ///
    /// Called on a fixed cadence regardless of connectivity. When the
    /// active interval changed, the previous one is finalized into an
    /// execution record before the new rate is commanded. All failures are
    /// contained: a tick never aborts the execution loop.
    pub async fn tick(&mut self, now: DateTime<Utc>) {
        let active = self.store.interval_for(now);

        if let (ExecutorState::Executing(executing), Some(active)) = (&self.state, &active)
            && executing.schedule_id == active.schedule_id
            && executing.interval_index == active.interval_index
        {
            // Still inside the same interval; nothing to do.
            debug!(
                schedule_id = %executing.schedule_id,
                interval = executing.interval_index,
                "tick: interval unchanged"
            );
            return;
        }

        if matches!(self.state, ExecutorState::Idle) && active.is_none() && self.idle_commanded {
            debug!("tick: idle, no active interval");
            return;
        }

        if let ExecutorState::Executing(previous) =
            std::mem::replace(&mut self.state, ExecutorState::Idle)
        {
            self.finalize(previous, now).await;
        }

        match active {
            Some(interval) => self.begin(interval).await,
            None => {
                // Explicit safe state: expired or missing schedule, gap in
                // coverage, or end of day with no next schedule yet.
                match self.actuator.set_rate_kw(0.0).await {
                    Ok(()) => {
                        info!("no interval covers current time, battery idle");
                        self.idle_commanded = true;
                    }
                    // Retried on the next tick.
                    Err(e) => {
                        warn!(actuator = self.actuator.name(), "failed to command idle: {e}");
                    }
                }
                self.state = ExecutorState::Idle;
            }
        }
    }

    /// Command the battery to idle, e.g. before process exit.
    pub async fn safe_idle(&mut self) {
        if let Err(e) = self.actuator.set_rate_kw(0.0).await {
            warn!(actuator = self.actuator.name(), "failed to command idle: {e}");
        }
        self.state = ExecutorState::Idle;
        self.idle_commanded = true;
    }

    async fn begin(&mut self, interval: ActiveInterval) {
        self.idle_commanded = false;
        let actuation_error = match self.actuator.set_rate_kw(interval.rate_kw).await {
            Ok(()) => {
                info!(
                    schedule_id = %interval.schedule_id,
                    interval = interval.interval_index,
                    rate_kw = interval.rate_kw,
                    "interval started"
                );
                None
            }
            Err(e) => {
                // Contained: this interval's record will be FAILED, the next
                // interval gets a fresh attempt.
                warn!(
                    schedule_id = %interval.schedule_id,
                    interval = interval.interval_index,
                    rate_kw = interval.rate_kw,
                    "actuation failed: {e}"
                );
                Some(e.to_string())
            }
        };

        self.state = ExecutorState::Executing(Executing {
            schedule_id: interval.schedule_id,
            trace_id: interval.trace_id,
            interval_index: interval.interval_index,
            scheduled_rate_kw: interval.rate_kw,
            actuation_error,
        });
    }

    /// Turn a finished interval into its immutable execution record and
    /// queue the result for delivery. The record is durable before the
    /// result can ever reach the transport.
    async fn finalize(&self, executing: Executing, now: DateTime<Utc>) {
        let actual_rate_kw = self.actuator.current_rate_kw().await;

        let (status, error_reason) = match executing.actuation_error {
            None => (ExecutionStatus::Completed, None),
            Some(reason) => (ExecutionStatus::Failed, Some(reason)),
        };

        let result = ExecutionResult {
            schedule_id: executing.schedule_id.clone(),
            device_id: self.device_id.clone(),
            interval_index: executing.interval_index,
            scheduled_rate_kw: executing.scheduled_rate_kw,
            actual_rate_kw,
            status,
            timestamp: now,
            trace_id: executing.trace_id,
            error_reason,
        };

        match self.store.record_execution(&result, self.outbox_capacity) {
            Ok(()) => {
                info!(
                    schedule_id = %result.schedule_id,
                    interval = result.interval_index,
                    status = result.status.as_str(),
                    scheduled_kw = result.scheduled_rate_kw,
                    actual_kw = result.actual_rate_kw,
                    "interval finalized"
                );
            }
            Err(e) => {
                // A storage fault loses this record but must not stop
                // execution of subsequent intervals.
                error!(
                    schedule_id = %result.schedule_id,
                    interval = result.interval_index,
                    "failed to persist execution record: {e}"
                );
            }
        }
    }
}
