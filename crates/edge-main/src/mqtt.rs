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

//! MQTT topics and the outbound report transport.
//!
//! All device traffic lives under `devices/{device_id}/`. Everything is
//! QoS 1: the at-least-once duplicates this produces are absorbed by
//! identity-based deduplication on both ends.

use async_trait::async_trait;
use edge_core::{ReportKind, ReportTransport};
use rumqttc::{AsyncClient, QoS};

pub fn schedule_topic(device_id: &str) -> String {
    format!("devices/{device_id}/schedule")
}

pub fn ack_topic(device_id: &str) -> String {
    format!("devices/{device_id}/ack")
}

pub fn result_topic(device_id: &str) -> String {
    format!("devices/{device_id}/execution_result")
}

/// Retained presence topic; the last will marks the device offline.
pub fn status_topic(device_id: &str) -> String {
    format!("devices/{device_id}/status")
}

/// Publishes outbox reports to the device's ack and result topics.
#[derive(Debug)]
pub struct MqttReportTransport {
    client: AsyncClient,
    ack_topic: String,
    result_topic: String,
}

impl MqttReportTransport {
    pub fn new(client: AsyncClient, device_id: &str) -> Self {
        Self {
            client,
            ack_topic: ack_topic(device_id),
            result_topic: result_topic(device_id),
        }
    }
}

#[async_trait]
impl ReportTransport for MqttReportTransport {
    async fn publish(&self, kind: ReportKind, payload: &str) -> anyhow::Result<()> {
        let topic = match kind {
            ReportKind::Ack => &self.ack_topic,
            ReportKind::ExecutionResult => &self.result_topic,
        };
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
            .await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "mqtt"
    }
}
