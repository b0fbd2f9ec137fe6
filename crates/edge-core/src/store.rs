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

//! Durable device-local schedule state.
//!
//! Holds at most one "current" schedule plus recent history keyed by schedule
//! identity, the per-interval execution records, and the report outbox. All
//! access goes through one mutex so a reader deciding the active interval
//! sees either the fully-old or the fully-new schedule, never a partial one.
//!
//! Crash-safe commit ordering: the schedule row is durable before the APPLIED
//! ack is enqueued, and an execution record is durable in the same
//! transaction as its outbound result.

use chrono::{DateTime, Utc};
use edge_types::messages::{Acknowledgement, ExecutionResult};
use edge_types::schedule::Schedule;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;

use crate::error::Result;

/// Outcome of offering a validated schedule to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The schedule became the device's current schedule
    Applied,
    /// Same `schedule_id` as the current schedule — idempotent no-op,
    /// still eligible for re-acknowledgement
    Duplicate,
    /// A different schedule with an `issued_at` not newer than the current
    /// one — stale out-of-order delivery, not applied
    Superseded,
}

/// Lifecycle state of a stored schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleStatus {
    Received,
    Applied,
    Rejected,
    Superseded,
}

impl ScheduleStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::Applied => "APPLIED",
            Self::Rejected => "REJECTED",
            Self::Superseded => "SUPERSEDED",
        }
    }
}

/// The current schedule plus device-local metadata.
#[derive(Debug, Clone)]
pub struct AppliedSchedule {
    pub schedule: Schedule,
    pub received_at: DateTime<Utc>,
    pub applied_at: DateTime<Utc>,
}

/// The interval the executor should be driving right now, resolved from the
/// current schedule and a wall-clock instant.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveInterval {
    pub schedule_id: String,
    pub trace_id: String,
    pub interval_index: u32,
    pub rate_kw: f64,
}

/// One completed interval, as persisted. Immutable once created; retained
/// until reported at least once, then eligible for pruning.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub schedule_id: String,
    pub interval_index: u32,
    pub scheduled_rate_kw: f64,
    pub actual_rate_kw: f64,
    pub status: String,
    pub error_reason: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Pending outbound report, drained oldest-first by the delivery worker.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: i64,
    pub identity: String,
    pub kind: ReportKind,
    pub payload: String,
    pub attempts: u32,
}

/// Which outbound topic a report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Ack,
    ExecutionResult,
}

impl ReportKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::ExecutionResult => "execution_result",
        }
    }

    fn parse(s: &str) -> Self {
        if s == "ack" {
            Self::Ack
        } else {
            Self::ExecutionResult
        }
    }
}

struct StoreInner {
    conn: Connection,
    current: Option<AppliedSchedule>,
}

pub struct ScheduleStore {
    inner: Mutex<StoreInner>,
}

impl std::fmt::Debug for ScheduleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleStore").finish_non_exhaustive()
    }
}

impl ScheduleStore {
    /// Open (and migrate) the device database, reloading the current
    /// schedule so execution resumes correctly after a restart.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schedules (
                schedule_id   TEXT PRIMARY KEY,
                device_id     TEXT NOT NULL,
                received_at   TEXT NOT NULL,
                applied_at    TEXT,
                status        TEXT NOT NULL,
                error_reason  TEXT,
                payload_json  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS current_schedule (
                slot         INTEGER PRIMARY KEY CHECK (slot = 1),
                schedule_id  TEXT NOT NULL REFERENCES schedules(schedule_id)
            );

            CREATE TABLE IF NOT EXISTS execution_records (
                schedule_id        TEXT NOT NULL,
                interval_index     INTEGER NOT NULL,
                scheduled_rate_kw  REAL NOT NULL,
                actual_rate_kw     REAL NOT NULL,
                status             TEXT NOT NULL,
                error_reason       TEXT,
                completed_at       TEXT NOT NULL,
                PRIMARY KEY (schedule_id, interval_index)
            );

            CREATE TABLE IF NOT EXISTS report_outbox (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                identity    TEXT NOT NULL UNIQUE,
                kind        TEXT NOT NULL,
                payload     TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                attempts    INTEGER NOT NULL DEFAULT 0
            );",
        )?;

        let current = load_current(&conn)?;
        Ok(Self {
            inner: Mutex::new(StoreInner { conn, current }),
        })
    }

    /// Offer a validated schedule. Idempotent on `schedule_id`; stale
    /// out-of-order deliveries are refused as `Superseded`.
    pub fn apply(&self, schedule: &Schedule, received_at: DateTime<Utc>) -> Result<ApplyOutcome> {
        let mut inner = self.inner.lock();

        if let Some(current) = &inner.current {
            if current.schedule.schedule_id == schedule.schedule_id {
                return Ok(ApplyOutcome::Duplicate);
            }
            if schedule.issued_at <= current.schedule.issued_at {
                return Ok(ApplyOutcome::Superseded);
            }
        }

        let applied_at = Utc::now();
        let payload = serde_json::to_string(schedule)?;

        let tx = inner.conn.transaction()?;
        tx.execute(
            "UPDATE schedules SET status = ?1 WHERE status = ?2",
            params![
                ScheduleStatus::Superseded.as_str(),
                ScheduleStatus::Applied.as_str()
            ],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO schedules
                 (schedule_id, device_id, received_at, applied_at, status, payload_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                schedule.schedule_id,
                schedule.device_id,
                received_at,
                applied_at,
                ScheduleStatus::Applied.as_str(),
                payload,
            ],
        )?;
        tx.execute(
            "INSERT INTO current_schedule (slot, schedule_id) VALUES (1, ?1)
             ON CONFLICT(slot) DO UPDATE SET schedule_id = excluded.schedule_id",
            params![schedule.schedule_id],
        )?;
        tx.commit()?;

        inner.current = Some(AppliedSchedule {
            schedule: schedule.clone(),
            received_at,
            applied_at,
        });

        Ok(ApplyOutcome::Applied)
    }

    /// Record a rejected schedule in history so duplicate rejections are
    /// observable locally. Never touches the current schedule.
    pub fn record_rejection(
        &self,
        schedule: &Schedule,
        received_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<()> {
        let inner = self.inner.lock();
        let payload = serde_json::to_string(schedule)?;
        inner.conn.execute(
            "INSERT OR IGNORE INTO schedules
                 (schedule_id, device_id, received_at, status, error_reason, payload_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                schedule.schedule_id,
                schedule.device_id,
                received_at,
                ScheduleStatus::Rejected.as_str(),
                reason,
                payload,
            ],
        )?;
        Ok(())
    }

    /// The currently applied schedule, if any.
    pub fn current(&self) -> Option<AppliedSchedule> {
        self.inner.lock().current.clone()
    }

    /// Resolve the interval the executor should drive at the given instant.
    /// Exactly one interval or none: validation guarantees no overlap.
    ///
    /// A schedule governs only its scheduling day. Once `now` is on a later
    /// day the schedule is expired and nothing resolves — yesterday's plan
    /// must not replay while the device waits for today's.
    pub fn interval_for(&self, now: DateTime<Utc>) -> Option<ActiveInterval> {
        let inner = self.inner.lock();
        let applied = inner.current.as_ref()?;
        if now.date_naive() != applied.schedule.scheduling_day() {
            return None;
        }
        let (index, interval) = applied.schedule.interval_at(now.time())?;
        Some(ActiveInterval {
            schedule_id: applied.schedule.schedule_id.clone(),
            trace_id: applied.schedule.effective_trace_id(),
            interval_index: index as u32,
            rate_kw: interval.rate_kw,
        })
    }

    /// The next instant after `now` at which the active interval changes:
    /// an interval start or end of the current schedule. None once the
    /// schedule's day is over. Used to align executor wake-ups with
    /// boundaries instead of acting on them up to a tick late.
    pub fn next_boundary(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        use chrono::Timelike;

        let inner = self.inner.lock();
        let applied = inner.current.as_ref()?;
        let day = applied.schedule.scheduling_day();
        let today = now.date_naive();
        if today > day {
            return None;
        }

        let now_secs = now.time().num_seconds_from_midnight();
        let next = applied
            .schedule
            .intervals
            .iter()
            .flat_map(|i| [i.start_seconds(), i.end_seconds()])
            .filter(|&b| today < day || b > now_secs)
            .min()?;

        let midnight = day.and_time(chrono::NaiveTime::MIN).and_utc();
        Some(midnight + chrono::Duration::seconds(i64::from(next)))
    }

    /// Persist a completed interval and enqueue its result in one
    /// transaction, so a crash never loses a record that was reported nor
    /// reports a record that was lost.
    pub fn record_execution(&self, result: &ExecutionResult, capacity: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        let payload = serde_json::to_string(result)?;

        let tx = inner.conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO execution_records
                 (schedule_id, interval_index, scheduled_rate_kw, actual_rate_kw,
                  status, error_reason, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                result.schedule_id,
                result.interval_index,
                result.scheduled_rate_kw,
                result.actual_rate_kw,
                result.status.as_str(),
                result.error_reason,
                result.timestamp,
            ],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO report_outbox (identity, kind, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                result.identity(),
                ReportKind::ExecutionResult.as_str(),
                payload,
                Utc::now(),
            ],
        )?;
        enforce_outbox_capacity(&tx, capacity)?;
        tx.commit()?;
        Ok(())
    }

    /// Enqueue an acknowledgement for delivery. Identity-deduplicated:
    /// one ack per schedule lifecycle transition ever enters the outbox.
    pub fn enqueue_ack(&self, ack: &Acknowledgement, capacity: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        let payload = serde_json::to_string(ack)?;

        let tx = inner.conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO report_outbox (identity, kind, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![ack.identity(), ReportKind::Ack.as_str(), payload, Utc::now()],
        )?;
        enforce_outbox_capacity(&tx, capacity)?;
        tx.commit()?;
        Ok(())
    }

    /// Re-enqueue an ack even if the same transition was delivered before.
    /// Used for duplicate schedule deliveries, where the cloud is retrying
    /// and expects the APPLIED ack again.
    pub fn reenqueue_ack(&self, ack: &Acknowledgement, capacity: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        let payload = serde_json::to_string(ack)?;

        let tx = inner.conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO report_outbox (identity, kind, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![ack.identity(), ReportKind::Ack.as_str(), payload, Utc::now()],
        )?;
        enforce_outbox_capacity(&tx, capacity)?;
        tx.commit()?;
        Ok(())
    }

    /// Oldest pending reports, up to `limit`.
    pub fn pending_reports(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let inner = self.inner.lock();
        let mut stmt = inner.conn.prepare(
            "SELECT id, identity, kind, payload, attempts
             FROM report_outbox ORDER BY id ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(OutboxEntry {
                id: row.get(0)?,
                identity: row.get(1)?,
                kind: ReportKind::parse(&row.get::<_, String>(2)?),
                payload: row.get(3)?,
                attempts: row.get(4)?,
            })
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Count a failed delivery attempt.
    pub fn record_attempt(&self, id: i64) -> Result<()> {
        let inner = self.inner.lock();
        inner.conn.execute(
            "UPDATE report_outbox SET attempts = attempts + 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// Remove a report after it reached the transport boundary.
    pub fn mark_delivered(&self, id: i64) -> Result<()> {
        let inner = self.inner.lock();
        inner
            .conn
            .execute("DELETE FROM report_outbox WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Number of reports waiting for delivery.
    pub fn outbox_len(&self) -> Result<usize> {
        let inner = self.inner.lock();
        let count: i64 =
            inner
                .conn
                .query_row("SELECT COUNT(*) FROM report_outbox", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Execution records for one schedule, ordered by interval index.
    pub fn execution_records(&self, schedule_id: &str) -> Result<Vec<ExecutionRecord>> {
        let inner = self.inner.lock();
        let mut stmt = inner.conn.prepare(
            "SELECT schedule_id, interval_index, scheduled_rate_kw, actual_rate_kw,
                    status, error_reason, completed_at
             FROM execution_records WHERE schedule_id = ?1 ORDER BY interval_index ASC",
        )?;
        let rows = stmt.query_map(params![schedule_id], |row| {
            Ok(ExecutionRecord {
                schedule_id: row.get(0)?,
                interval_index: row.get(1)?,
                scheduled_rate_kw: row.get(2)?,
                actual_rate_kw: row.get(3)?,
                status: row.get(4)?,
                error_reason: row.get(5)?,
                completed_at: row.get(6)?,
            })
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Prune execution records that were reported (no pending outbox row)
    /// and completed before the cutoff. Returns the number deleted.
    pub fn prune_reported_records(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let inner = self.inner.lock();
        let deleted = inner.conn.execute(
            "DELETE FROM execution_records
             WHERE completed_at < ?1
               AND NOT EXISTS (
                   SELECT 1 FROM report_outbox
                   WHERE identity = 'result:' || execution_records.schedule_id
                                  || ':' || execution_records.interval_index
               )",
            params![cutoff],
        )?;
        Ok(deleted)
    }
}

/// Drop oldest reports once the outbox exceeds capacity, so a long
/// reporting outage can never grow the database without bound.
fn enforce_outbox_capacity(tx: &rusqlite::Transaction<'_>, capacity: usize) -> Result<()> {
    let count: i64 = tx.query_row("SELECT COUNT(*) FROM report_outbox", [], |row| row.get(0))?;
    let excess = count - capacity as i64;
    if excess > 0 {
        tx.execute(
            "DELETE FROM report_outbox WHERE id IN
                 (SELECT id FROM report_outbox ORDER BY id ASC LIMIT ?1)",
            params![excess],
        )?;
        tracing::warn!(dropped = excess, "report outbox over capacity, dropped oldest");
    }
    Ok(())
}

fn load_current(conn: &Connection) -> Result<Option<AppliedSchedule>> {
    let row = conn
        .query_row(
            "SELECT s.payload_json, s.received_at, s.applied_at
             FROM current_schedule c JOIN schedules s ON s.schedule_id = c.schedule_id
             WHERE c.slot = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, DateTime<Utc>>(1)?,
                    row.get::<_, DateTime<Utc>>(2)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((payload, received_at, applied_at)) => {
            let schedule: Schedule = serde_json::from_str(&payload)?;
            Ok(Some(AppliedSchedule {
                schedule,
                received_at,
                applied_at,
            }))
        }
        None => Ok(None),
    }
}
