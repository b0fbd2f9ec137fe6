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

//! Daily battery schedule as delivered over the wire.
//!
//! A schedule slices one day into contiguous intervals, each with a single
//! signed target rate. The sign of `rate_kw` is the sole source of truth for
//! the operating mode: positive = charge, negative = discharge, zero = idle.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Seconds in a full scheduling day.
pub const DAY_SECONDS: u32 = 24 * 3600;

/// A single time slice of the daily schedule with one target rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleInterval {
    /// Wall-clock start of this interval (inclusive)
    pub start_time: NaiveTime,

    /// Wall-clock end of this interval (exclusive).
    /// `00:00:00` on the final interval means end of day.
    pub end_time: NaiveTime,

    /// Signed power rate in kW (positive = charge, negative = discharge)
    pub rate_kw: f64,
}

impl ScheduleInterval {
    /// Start of the interval as seconds from midnight.
    pub fn start_seconds(&self) -> u32 {
        seconds_from_midnight(self.start_time)
    }

    /// End of the interval as seconds from midnight.
    /// A midnight end time maps to 86400 (end of day) rather than 0.
    pub fn end_seconds(&self) -> u32 {
        let secs = seconds_from_midnight(self.end_time);
        if secs == 0 { DAY_SECONDS } else { secs }
    }

    /// Whether the given wall-clock time falls inside this interval.
    pub fn contains(&self, time: NaiveTime) -> bool {
        let t = seconds_from_midnight(time);
        t >= self.start_seconds() && t < self.end_seconds()
    }
}

/// Versioned daily schedule message for one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// Opaque schedule identity; unique per device per day.
    /// Duplicate delivery of the same id must be an idempotent no-op.
    pub schedule_id: String,

    /// Target device
    pub device_id: String,

    /// Message schema version; unsupported versions are rejected wholesale
    pub version: u32,

    /// When the cloud issued this schedule
    pub issued_at: chrono::DateTime<chrono::Utc>,

    /// Ordered, contiguous intervals; may cover the full day or part of it
    pub intervals: Vec<ScheduleInterval>,

    /// Per-schedule power bound in kW; the device default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_power_kw: Option<f64>,

    /// Advisory mode label some producers attach. Accepted on the wire but
    /// ignored entirely: the sign of `rate_kw` decides charge/discharge/idle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    /// Correlation id threading the whole schedule lifecycle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl Schedule {
    /// The day this schedule governs: the UTC date of `issued_at`.
    ///
    /// A schedule is a one-day plan. Outside its day it is expired; the
    /// device idles rather than replaying yesterday's intervals.
    pub fn scheduling_day(&self) -> chrono::NaiveDate {
        self.issued_at.date_naive()
    }

    /// Find the interval covering the given wall-clock time.
    ///
    /// Returns the interval index alongside the interval. On a valid
    /// (validated) schedule at most one interval can match.
    pub fn interval_at(&self, time: NaiveTime) -> Option<(usize, &ScheduleInterval)> {
        self.intervals
            .iter()
            .enumerate()
            .find(|(_, interval)| interval.contains(time))
    }

    /// Power bound to enforce: the message's own limit when present,
    /// otherwise the device-side default.
    pub fn effective_max_power_kw(&self, device_default_kw: f64) -> f64 {
        self.max_power_kw.unwrap_or(device_default_kw)
    }

    /// Correlation id for acks and execution results. Falls back to an id
    /// derived from the schedule identity so correlation never breaks.
    pub fn effective_trace_id(&self) -> String {
        self.trace_id
            .clone()
            .unwrap_or_else(|| format!("sched-{}", self.schedule_id))
    }
}

fn seconds_from_midnight(time: NaiveTime) -> u32 {
    use chrono::Timelike;
    time.num_seconds_from_midnight()
}
