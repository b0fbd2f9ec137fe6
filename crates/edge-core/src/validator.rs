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

//! Incoming schedule validation.
//!
//! Pure check of (schedule, device limits); the caller records the outcome.
//! Checks run in order and short-circuit on the first failure: schema,
//! version, interval coverage, per-interval power bound. Rejecting unknown
//! versions wholesale is a safety requirement — an incompatible schedule
//! must never be partially applied to hardware.

use edge_types::schedule::Schedule;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Schedule schema versions this firmware understands.
pub const SUPPORTED_SCHEDULE_VERSIONS: &[u32] = &[1, 2];

/// Upper bound on interval count. 192 allows tiles down to 7.5 minutes;
/// anything beyond that is a malformed or hostile message.
pub const MAX_INTERVALS: usize = 192;

/// Device-side constraints an incoming schedule is checked against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceLimits {
    /// Hard per-interval power bound (kW) when the message carries none
    pub max_power_kw: f64,

    /// Supported schedule schema versions
    pub supported_versions: Vec<u32>,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_power_kw: 50.0,
            supported_versions: SUPPORTED_SCHEDULE_VERSIONS.to_vec(),
        }
    }
}

/// Validate an incoming schedule against device limits.
///
/// A `mode` field on the message, if present, is ignored entirely: the sign
/// of `rate_kw` is the sole source of truth for charge/discharge/idle.
pub fn validate(schedule: &Schedule, limits: &DeviceLimits) -> Result<(), ValidationError> {
    check_schema(schedule)?;
    check_version(schedule, limits)?;
    check_coverage(schedule)?;
    check_power_bounds(schedule, limits)?;
    Ok(())
}

fn check_schema(schedule: &Schedule) -> Result<(), ValidationError> {
    if schedule.schedule_id.trim().is_empty() {
        return Err(ValidationError::Schema(
            "schedule_id must not be empty".to_string(),
        ));
    }
    if schedule.device_id.trim().is_empty() {
        return Err(ValidationError::Schema(
            "device_id must not be empty".to_string(),
        ));
    }
    if schedule.intervals.is_empty() {
        return Err(ValidationError::Schema(
            "intervals must be a non-empty array".to_string(),
        ));
    }
    if schedule.intervals.len() > MAX_INTERVALS {
        return Err(ValidationError::Schema(format!(
            "too many intervals: {} (max {MAX_INTERVALS})",
            schedule.intervals.len()
        )));
    }
    for (i, interval) in schedule.intervals.iter().enumerate() {
        if !interval.rate_kw.is_finite() {
            return Err(ValidationError::Schema(format!(
                "interval {i}: rate_kw must be a finite number"
            )));
        }
    }
    if let Some(max) = schedule.max_power_kw
        && (!max.is_finite() || max <= 0.0)
    {
        return Err(ValidationError::Schema(format!(
            "max_power_kw must be a positive finite number, got {max}"
        )));
    }
    Ok(())
}

fn check_version(schedule: &Schedule, limits: &DeviceLimits) -> Result<(), ValidationError> {
    if limits.supported_versions.contains(&schedule.version) {
        Ok(())
    } else {
        Err(ValidationError::Version {
            version: schedule.version,
            supported: limits.supported_versions.clone(),
        })
    }
}

/// Intervals must be contiguous and in order: each starts where the previous
/// one ends, no gaps, no overlaps. Out-of-order lists are rejected — the
/// device never sorts on the cloud's behalf. A schedule may cover only part
/// of the day; the executor idles outside its span.
fn check_coverage(schedule: &Schedule) -> Result<(), ValidationError> {
    let mut cursor: Option<u32> = None;

    for (i, interval) in schedule.intervals.iter().enumerate() {
        let start = interval.start_seconds();
        let end = interval.end_seconds();

        if end <= start {
            return Err(ValidationError::Coverage(format!(
                "interval {i} ends at or before its start ({} -> {})",
                interval.start_time, interval.end_time
            )));
        }
        match cursor {
            Some(c) if start > c => {
                return Err(ValidationError::Coverage(format!(
                    "gap before interval {i}: previous interval ends at {c}s from midnight, next starts at {start}s"
                )));
            }
            Some(c) if start < c => {
                return Err(ValidationError::Coverage(format!(
                    "interval {i} overlaps or is out of order: starts at {start}s, previous coverage ends at {c}s"
                )));
            }
            _ => {}
        }
        cursor = Some(end);
    }

    Ok(())
}

fn check_power_bounds(schedule: &Schedule, limits: &DeviceLimits) -> Result<(), ValidationError> {
    let max_power_kw = schedule.effective_max_power_kw(limits.max_power_kw);

    for (i, interval) in schedule.intervals.iter().enumerate() {
        if interval.rate_kw.abs() > max_power_kw {
            return Err(ValidationError::LimitViolation {
                interval_index: i,
                rate_kw: interval.rate_kw,
                max_power_kw,
            });
        }
    }
    Ok(())
}
