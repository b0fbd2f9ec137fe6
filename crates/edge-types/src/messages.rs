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

//! Device-to-cloud report messages.
//!
//! The cloud deduplicates by message identity, so repeated delivery of the
//! same ack or execution result is harmless. Identity is
//! `schedule_id` + lifecycle status for acks and `schedule_id` +
//! `interval_index` for execution results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a schedule lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AckStatus {
    /// Message received and validated, not yet applied
    Received,
    /// Schedule durably applied as the device's current schedule
    Applied,
    /// Schedule rejected or could not be applied (see `error_reason`)
    Failed,
}

impl AckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::Applied => "APPLIED",
            Self::Failed => "FAILED",
        }
    }
}

/// Status report on schedule receipt/application, published to
/// `devices/{device_id}/ack`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub schedule_id: String,
    pub device_id: String,
    pub status: AckStatus,
    pub timestamp: DateTime<Utc>,

    /// Correlation id threading the schedule lifecycle
    pub trace_id: String,

    /// Human-readable rejection reason, present on FAILED acks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl Acknowledgement {
    pub fn new(
        schedule_id: impl Into<String>,
        device_id: impl Into<String>,
        status: AckStatus,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            schedule_id: schedule_id.into(),
            device_id: device_id.into(),
            status,
            timestamp: Utc::now(),
            trace_id: trace_id.into(),
            error_reason: None,
        }
    }

    pub fn with_error(mut self, reason: impl Into<String>) -> Self {
        self.error_reason = Some(reason.into());
        self
    }

    /// Stable identity for outbox deduplication: one ack per schedule
    /// lifecycle transition.
    pub fn identity(&self) -> String {
        format!("ack:{}:{}", self.schedule_id, self.status.as_str())
    }
}

/// Outcome of one executed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

/// Per-interval report of scheduled vs. actual behavior, published to
/// `devices/{device_id}/execution_result` once per completed interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub schedule_id: String,
    pub device_id: String,

    /// Index of the interval within its schedule
    pub interval_index: u32,

    /// Rate the schedule asked for (kW)
    pub scheduled_rate_kw: f64,

    /// Rate the actuator reported when the interval ended (kW)
    pub actual_rate_kw: f64,

    pub status: ExecutionStatus,
    pub timestamp: DateTime<Utc>,

    /// Correlation id threading the schedule lifecycle
    pub trace_id: String,

    /// Actuation failure detail, present on FAILED results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl ExecutionResult {
    /// Stable identity for outbox deduplication: one result per completed
    /// interval.
    pub fn identity(&self) -> String {
        format!("result:{}:{}", self.schedule_id, self.interval_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_serializes_screaming_snake_status() {
        let ack = Acknowledgement::new("2025-06-01", "device-001", AckStatus::Applied, "trace-1");
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json["status"], "APPLIED");
        assert_eq!(json["schedule_id"], "2025-06-01");
        assert!(json.get("error_reason").is_none());
    }

    #[test]
    fn failed_ack_carries_reason() {
        let ack = Acknowledgement::new("2025-06-01", "device-001", AckStatus::Failed, "trace-1")
            .with_error("power bound exceeded");
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json["status"], "FAILED");
        assert_eq!(json["error_reason"], "power bound exceeded");
    }

    #[test]
    fn ack_identity_distinguishes_transitions() {
        let received =
            Acknowledgement::new("2025-06-01", "device-001", AckStatus::Received, "trace-1");
        let applied =
            Acknowledgement::new("2025-06-01", "device-001", AckStatus::Applied, "trace-1");
        assert_ne!(received.identity(), applied.identity());
        assert_eq!(applied.identity(), "ack:2025-06-01:APPLIED");
    }

    #[test]
    fn result_identity_is_schedule_and_index() {
        let result = ExecutionResult {
            schedule_id: "2025-06-01".to_string(),
            device_id: "device-001".to_string(),
            interval_index: 7,
            scheduled_rate_kw: 5.0,
            actual_rate_kw: 4.8,
            status: ExecutionStatus::Completed,
            timestamp: Utc::now(),
            trace_id: "trace-1".to_string(),
            error_reason: None,
        };
        assert_eq!(result.identity(), "result:2025-06-01:7");
    }
}
