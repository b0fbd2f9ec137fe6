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

//! End-to-end pipeline tests: intake, execution and report delivery wired
//! together the way the binary wires them, with a recording transport in
//! place of MQTT.

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use edge_core::{
    DeliveryWorker, DeviceLimits, DeviceSession, IntakeOutcome, IntervalExecutor, ReportKind,
    ReportTransport, ScheduleStore, SimulatedActuator,
};
use edge_types::messages::{Acknowledgement, ExecutionResult};
use edge_types::schedule::{Schedule, ScheduleInterval};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

const CAPACITY: usize = 1024;

#[derive(Default)]
struct RecordingTransport {
    published: Mutex<Vec<(ReportKind, String)>>,
    offline: Mutex<bool>,
}

impl RecordingTransport {
    fn set_offline(&self, offline: bool) {
        *self.offline.lock() = offline;
    }

    fn published(&self) -> Vec<(ReportKind, String)> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl ReportTransport for RecordingTransport {
    async fn publish(&self, kind: ReportKind, payload: &str) -> anyhow::Result<()> {
        if *self.offline.lock() {
            anyhow::bail!("broker unreachable");
        }
        self.published.lock().push((kind, payload.to_string()));
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

struct Harness {
    store: Arc<ScheduleStore>,
    session: DeviceSession,
    executor: IntervalExecutor,
    worker: DeliveryWorker,
    actuator: SimulatedActuator,
    transport: Arc<RecordingTransport>,
}

fn harness(store: Arc<ScheduleStore>) -> Harness {
    let actuator = SimulatedActuator::new();
    let transport = Arc::new(RecordingTransport::default());
    Harness {
        session: DeviceSession::new(
            "device-001",
            DeviceLimits::default(),
            Arc::clone(&store),
            CAPACITY,
        ),
        executor: IntervalExecutor::new(
            "device-001",
            Arc::clone(&store),
            Arc::new(actuator.clone()),
            CAPACITY,
        ),
        worker: DeliveryWorker::new(
            Arc::clone(&store),
            Arc::clone(&transport) as Arc<dyn ReportTransport>,
            Duration::from_millis(10),
        ),
        store,
        actuator,
        transport,
    }
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, h, m, 0).unwrap()
}

/// Full-day schedule: charge 5 kW until 00:30, discharge 3 kW until 01:00,
/// idle for the rest of the day.
fn schedule(id: &str, issued_offset_hours: i64) -> Schedule {
    Schedule {
        schedule_id: id.to_string(),
        device_id: "device-001".to_string(),
        version: 1,
        issued_at: at(0, 0) + chrono::Duration::hours(issued_offset_hours),
        intervals: vec![
            ScheduleInterval {
                start_time: t(0, 0),
                end_time: t(0, 30),
                rate_kw: 5.0,
            },
            ScheduleInterval {
                start_time: t(0, 30),
                end_time: t(1, 0),
                rate_kw: -3.0,
            },
            ScheduleInterval {
                start_time: t(1, 0),
                end_time: t(0, 0),
                rate_kw: 0.0,
            },
        ],
        max_power_kw: Some(10.0),
        mode: None,
        trace_id: Some("trace-1".to_string()),
    }
}

fn payload(schedule: &Schedule) -> Vec<u8> {
    serde_json::to_vec(schedule).unwrap()
}

#[tokio::test]
async fn apply_execute_report_round_trip() {
    let mut h = harness(Arc::new(ScheduleStore::open_in_memory().unwrap()));

    let outcome = h.session.handle_schedule_payload(&payload(&schedule("2025-06-01", 0))).unwrap();
    assert_eq!(outcome, IntakeOutcome::Applied);

    h.executor.tick(at(0, 15)).await;
    assert_eq!(h.actuator.rate_kw(), 5.0);
    h.executor.tick(at(0, 45)).await;
    assert_eq!(h.actuator.rate_kw(), -3.0);
    h.executor.tick(at(1, 15)).await;

    h.worker.flush(Duration::from_secs(5)).await.unwrap();
    assert_eq!(h.store.outbox_len().unwrap(), 0);

    // Acks first (enqueued at intake), then results in interval order.
    let published = h.transport.published();
    assert_eq!(published.len(), 4);

    let received: Acknowledgement = serde_json::from_str(&published[0].1).unwrap();
    assert_eq!(received.status.as_str(), "RECEIVED");
    let applied: Acknowledgement = serde_json::from_str(&published[1].1).unwrap();
    assert_eq!(applied.status.as_str(), "APPLIED");
    assert_eq!(applied.trace_id, "trace-1");

    let first: ExecutionResult = serde_json::from_str(&published[2].1).unwrap();
    assert_eq!(first.interval_index, 0);
    assert_eq!(first.scheduled_rate_kw, 5.0);
    assert_eq!(first.actual_rate_kw, 5.0);
    assert_eq!(first.trace_id, "trace-1");
    let second: ExecutionResult = serde_json::from_str(&published[3].1).unwrap();
    assert_eq!(second.interval_index, 1);
}

#[tokio::test]
async fn execution_continues_through_transport_outage() {
    let mut h = harness(Arc::new(ScheduleStore::open_in_memory().unwrap()));
    h.session.handle_schedule_payload(&payload(&schedule("2025-06-01", 0))).unwrap();
    h.transport.set_offline(true);

    // Two interval boundaries pass while the broker is unreachable.
    h.executor.tick(at(0, 15)).await;
    assert!(h.worker.run_once().await.is_err());
    h.executor.tick(at(0, 45)).await;
    h.executor.tick(at(1, 15)).await;
    assert_eq!(h.actuator.commanded_rates(), vec![5.0, -3.0, 0.0]);

    // Everything queued while offline arrives once connectivity returns.
    h.transport.set_offline(false);
    h.worker.flush(Duration::from_secs(5)).await.unwrap();
    assert_eq!(h.store.outbox_len().unwrap(), 0);
    assert_eq!(h.transport.published().len(), 4);
}

#[tokio::test]
async fn rejected_schedule_never_reaches_the_battery() {
    let mut h = harness(Arc::new(ScheduleStore::open_in_memory().unwrap()));
    let mut bad = schedule("2025-06-01", 0);
    bad.intervals[0].rate_kw = 99.0;

    let outcome = h.session.handle_schedule_payload(&payload(&bad)).unwrap();
    assert!(matches!(outcome, IntakeOutcome::Rejected(_)));

    h.executor.tick(at(0, 15)).await;
    // No schedule applied: the executor commands idle, nothing else.
    assert_eq!(h.actuator.commanded_rates(), vec![0.0]);

    h.worker.flush(Duration::from_secs(5)).await.unwrap();
    let published = h.transport.published();
    assert_eq!(published.len(), 1);
    let ack: Acknowledgement = serde_json::from_str(&published[0].1).unwrap();
    assert_eq!(ack.status.as_str(), "FAILED");
    assert!(ack.error_reason.is_some());
}

#[tokio::test]
async fn replacement_schedule_takes_over_between_ticks() {
    let mut h = harness(Arc::new(ScheduleStore::open_in_memory().unwrap()));
    h.session.handle_schedule_payload(&payload(&schedule("2025-06-01", 0))).unwrap();
    h.executor.tick(at(0, 15)).await;
    assert_eq!(h.actuator.rate_kw(), 5.0);

    // A newer same-day schedule arrives mid-interval with a different plan.
    let mut replacement = schedule("2025-06-01-rev2", 1);
    replacement.intervals[0].rate_kw = -8.0;
    h.session.handle_schedule_payload(&payload(&replacement)).unwrap();

    h.executor.tick(at(0, 20)).await;
    assert_eq!(h.actuator.rate_kw(), -8.0);

    // The interrupted interval of the old schedule still gets its record.
    let records = h.store.execution_records("2025-06-01").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].interval_index, 0);
}

#[tokio::test]
async fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("edge.db");

    {
        let mut h = harness(Arc::new(ScheduleStore::open(&path).unwrap()));
        h.session.handle_schedule_payload(&payload(&schedule("2025-06-01", 0))).unwrap();
        h.executor.tick(at(0, 15)).await;
        // Process dies with acks still undelivered.
    }

    let mut h = harness(Arc::new(ScheduleStore::open(&path).unwrap()));

    // The executor resumes the correct interval from the clock alone.
    h.executor.tick(at(0, 45)).await;
    assert_eq!(h.actuator.rate_kw(), -3.0);

    // Undelivered acks from the previous run drain now. The interval that
    // was in flight when the process died has no record: execution state is
    // in memory and a crashed interval's actual rate is unknowable.
    h.worker.flush(Duration::from_secs(5)).await.unwrap();
    let published = h.transport.published();
    let kinds: Vec<ReportKind> = published.iter().map(|p| p.0).collect();
    assert_eq!(kinds, vec![ReportKind::Ack, ReportKind::Ack]);
    assert!(h.store.execution_records("2025-06-01").unwrap().is_empty());
}
