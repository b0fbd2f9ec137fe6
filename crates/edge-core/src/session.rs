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

//! Schedule message intake.
//!
//! One session per device: it takes raw schedule payloads off the transport,
//! runs the receive → validate → apply pipeline, and leaves the appropriate
//! acks in the outbox. Delivery is at-least-once, so every step here must be
//! idempotent; the cloud learns outcomes only through acks, never through
//! the transport's own semantics.

use chrono::Utc;
use edge_types::messages::{AckStatus, Acknowledgement};
use edge_types::schedule::Schedule;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;
use crate::store::{ApplyOutcome, ScheduleStore};
use crate::validator::{self, DeviceLimits};

/// What the pipeline decided about one incoming payload, for logging and
/// tests. The cloud-visible outcome is whatever acks entered the outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// Schedule durably applied; RECEIVED and APPLIED acks enqueued
    Applied,
    /// Redelivery of the current schedule; APPLIED ack re-enqueued
    Duplicate,
    /// Rejected with a FAILED ack carrying the reason
    Rejected(String),
    /// Payload was not parseable JSON; nothing to ack against
    Unaddressable,
}

/// Device-side intake pipeline for schedule messages.
#[derive(Debug)]
pub struct DeviceSession {
    device_id: String,
    limits: DeviceLimits,
    store: Arc<ScheduleStore>,
    outbox_capacity: usize,
}

impl DeviceSession {
    pub fn new(
        device_id: impl Into<String>,
        limits: DeviceLimits,
        store: Arc<ScheduleStore>,
        outbox_capacity: usize,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            limits,
            store,
            outbox_capacity,
        }
    }

    /// Run one raw payload through receive → validate → apply.
    ///
    /// Ack ordering is fixed: RECEIVED before the apply attempt, then
    /// exactly one of APPLIED or FAILED. The schedule row is durable before
    /// the APPLIED ack can exist, so a crash between the two resolves as a
    /// redelivery, never as a phantom ack.
    pub fn handle_schedule_payload(&self, payload: &[u8]) -> Result<IntakeOutcome> {
        let schedule: Schedule = match serde_json::from_slice(payload) {
            Ok(schedule) => schedule,
            Err(e) => {
                // Without a schedule_id there is nothing to address an ack
                // to; the cloud's redelivery covers the loss.
                warn!("dropping unparseable schedule payload: {e}");
                return Ok(IntakeOutcome::Unaddressable);
            }
        };

        let trace_id = schedule.effective_trace_id();
        info!(
            schedule_id = %schedule.schedule_id,
            trace_id = %trace_id,
            intervals = schedule.intervals.len(),
            "schedule received"
        );

        if schedule.device_id != self.device_id {
            let reason = format!(
                "schedule addressed to '{}', this device is '{}'",
                schedule.device_id, self.device_id
            );
            return self.reject(&schedule, &trace_id, reason);
        }

        if let Err(e) = validator::validate(&schedule, &self.limits) {
            return self.reject(&schedule, &trace_id, e.to_string());
        }

        self.store.enqueue_ack(
            &Acknowledgement::new(
                &schedule.schedule_id,
                &self.device_id,
                AckStatus::Received,
                &trace_id,
            ),
            self.outbox_capacity,
        )?;

        match self.store.apply(&schedule, Utc::now())? {
            ApplyOutcome::Applied => {
                self.store.enqueue_ack(
                    &Acknowledgement::new(
                        &schedule.schedule_id,
                        &self.device_id,
                        AckStatus::Applied,
                        &trace_id,
                    ),
                    self.outbox_capacity,
                )?;
                info!(schedule_id = %schedule.schedule_id, trace_id = %trace_id, "schedule applied");
                Ok(IntakeOutcome::Applied)
            }
            ApplyOutcome::Duplicate => {
                // The cloud is retrying; answer again even though the
                // original APPLIED ack may already have been delivered.
                self.store.reenqueue_ack(
                    &Acknowledgement::new(
                        &schedule.schedule_id,
                        &self.device_id,
                        AckStatus::Applied,
                        &trace_id,
                    ),
                    self.outbox_capacity,
                )?;
                info!(schedule_id = %schedule.schedule_id, "duplicate schedule, re-acknowledged");
                Ok(IntakeOutcome::Duplicate)
            }
            ApplyOutcome::Superseded => {
                let reason = "superseded by a newer schedule already applied".to_string();
                self.reject(&schedule, &trace_id, reason)
            }
        }
    }

    fn reject(&self, schedule: &Schedule, trace_id: &str, reason: String) -> Result<IntakeOutcome> {
        warn!(
            schedule_id = %schedule.schedule_id,
            trace_id = %trace_id,
            "schedule rejected: {reason}"
        );
        self.store
            .record_rejection(schedule, Utc::now(), &reason)?;
        self.store.enqueue_ack(
            &Acknowledgement::new(
                &schedule.schedule_id,
                &self.device_id,
                AckStatus::Failed,
                trace_id,
            )
            .with_error(&reason),
            self.outbox_capacity,
        )?;
        Ok(IntakeOutcome::Rejected(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use edge_types::schedule::ScheduleInterval;

    const CAPACITY: usize = 1024;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn full_day_schedule(id: &str, issued_offset_hours: i64) -> Schedule {
        Schedule {
            schedule_id: id.to_string(),
            device_id: "device-001".to_string(),
            version: 1,
            issued_at: chrono::Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
                + chrono::Duration::hours(issued_offset_hours),
            intervals: vec![
                ScheduleInterval {
                    start_time: t(0, 0),
                    end_time: t(12, 0),
                    rate_kw: 5.0,
                },
                ScheduleInterval {
                    start_time: t(12, 0),
                    end_time: t(0, 0),
                    rate_kw: -3.0,
                },
            ],
            max_power_kw: Some(10.0),
            mode: None,
            trace_id: Some("trace-1".to_string()),
        }
    }

    fn session() -> (DeviceSession, Arc<ScheduleStore>) {
        let store = Arc::new(ScheduleStore::open_in_memory().unwrap());
        let session = DeviceSession::new(
            "device-001",
            DeviceLimits::default(),
            Arc::clone(&store),
            CAPACITY,
        );
        (session, store)
    }

    fn payload(schedule: &Schedule) -> Vec<u8> {
        serde_json::to_vec(schedule).unwrap()
    }

    fn outbox_identities(store: &ScheduleStore) -> Vec<String> {
        store
            .pending_reports(100)
            .unwrap()
            .into_iter()
            .map(|e| e.identity)
            .collect()
    }

    #[test]
    fn valid_schedule_yields_received_then_applied() {
        let (session, store) = session();
        let schedule = full_day_schedule("2025-06-01", 0);

        let outcome = session.handle_schedule_payload(&payload(&schedule)).unwrap();
        assert_eq!(outcome, IntakeOutcome::Applied);
        assert_eq!(
            outbox_identities(&store),
            vec!["ack:2025-06-01:RECEIVED", "ack:2025-06-01:APPLIED"]
        );
        assert_eq!(store.current().unwrap().schedule.schedule_id, "2025-06-01");
    }

    #[test]
    fn invalid_schedule_yields_single_failed_ack() {
        let (session, store) = session();
        let mut schedule = full_day_schedule("2025-06-01", 0);
        schedule.intervals[0].rate_kw = 99.0; // over max_power_kw

        let outcome = session.handle_schedule_payload(&payload(&schedule)).unwrap();
        assert!(matches!(outcome, IntakeOutcome::Rejected(_)));
        // No RECEIVED ack for a schedule that never passed validation.
        assert_eq!(outbox_identities(&store), vec!["ack:2025-06-01:FAILED"]);
        assert!(store.current().is_none());

        let failed = &store.pending_reports(1).unwrap()[0];
        let ack: Acknowledgement = serde_json::from_str(&failed.payload).unwrap();
        assert!(ack.error_reason.unwrap().contains("exceeds power limit"));
    }

    #[test]
    fn duplicate_delivery_reacknowledges_without_reapplying() {
        let (session, store) = session();
        let schedule = full_day_schedule("2025-06-01", 0);
        session.handle_schedule_payload(&payload(&schedule)).unwrap();

        // Simulate the first round of acks having been delivered.
        for entry in store.pending_reports(10).unwrap() {
            store.mark_delivered(entry.id).unwrap();
        }

        let outcome = session.handle_schedule_payload(&payload(&schedule)).unwrap();
        assert_eq!(outcome, IntakeOutcome::Duplicate);
        assert_eq!(store.current().unwrap().schedule.schedule_id, "2025-06-01");
        // The retrying cloud gets its APPLIED ack again; it dedupes on its
        // side by (schedule_id, status).
        let identities = outbox_identities(&store);
        assert!(identities.contains(&"ack:2025-06-01:APPLIED".to_string()));
    }

    #[test]
    fn stale_schedule_is_refused_with_reason() {
        let (session, store) = session();
        session
            .handle_schedule_payload(&payload(&full_day_schedule("2025-06-02", 24)))
            .unwrap();

        let outcome = session
            .handle_schedule_payload(&payload(&full_day_schedule("2025-06-01", 0)))
            .unwrap();
        assert!(matches!(outcome, IntakeOutcome::Rejected(_)));
        assert_eq!(store.current().unwrap().schedule.schedule_id, "2025-06-02");

        let identities = outbox_identities(&store);
        assert!(identities.contains(&"ack:2025-06-01:FAILED".to_string()));
    }

    #[test]
    fn unparseable_payload_is_dropped() {
        let (session, store) = session();
        let outcome = session.handle_schedule_payload(b"not json").unwrap();
        assert_eq!(outcome, IntakeOutcome::Unaddressable);
        assert_eq!(store.outbox_len().unwrap(), 0);
    }

    #[test]
    fn schedule_for_another_device_is_refused() {
        let (session, store) = session();
        let mut schedule = full_day_schedule("2025-06-01", 0);
        schedule.device_id = "device-999".to_string();

        let outcome = session.handle_schedule_payload(&payload(&schedule)).unwrap();
        assert!(matches!(outcome, IntakeOutcome::Rejected(_)));
        assert!(store.current().is_none());
    }

    #[test]
    fn newer_schedule_supersedes_current() {
        let (session, store) = session();
        session
            .handle_schedule_payload(&payload(&full_day_schedule("2025-06-01", 0)))
            .unwrap();

        let outcome = session
            .handle_schedule_payload(&payload(&full_day_schedule("2025-06-02", 24)))
            .unwrap();
        assert_eq!(outcome, IntakeOutcome::Applied);
        assert_eq!(store.current().unwrap().schedule.schedule_id, "2025-06-02");
    }
}
