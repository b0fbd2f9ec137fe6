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

//! FluxION Edge - device agent binary.
//!
//! Wires the schedule pipeline to an MQTT broker: intake from
//! `devices/{device_id}/schedule`, reports out through the durable outbox,
//! and a clock ticker driving the interval executor. Execution never waits
//! on the broker; losing connectivity only pauses reporting.
//!
//! Shutdown (SIGINT/SIGTERM) commands the battery to idle, drains the
//! outbox best-effort, and marks the retained status topic offline.

mod config;
mod mqtt;

use clap::Parser;
use edge_core::{
    BatteryActuator, DeliveryWorker, DeviceSession, IntervalExecutor, ReportTransport,
    ScheduleStore, SimulatedActuator,
};
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::mqtt::MqttReportTransport;

/// How often reported execution records are pruned.
const PRUNE_INTERVAL_SECS: u64 = 6 * 3600;

#[derive(Debug, Parser)]
#[command(name = "fluxion-edge", about = "FluxION Edge battery schedule agent")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "/data/fluxion-edge.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;
    info!(
        device_id = %config.device_id,
        broker = %config.mqtt_host,
        "starting FluxION Edge"
    );

    // Storage
    if let Some(parent) = Path::new(&config.storage_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(ScheduleStore::open(Path::new(&config.storage_path))?);
    if let Some(current) = store.current() {
        info!(
            schedule_id = %current.schedule.schedule_id,
            "resuming with persisted schedule"
        );
    }

    let session = DeviceSession::new(
        &config.device_id,
        config.device_limits(),
        Arc::clone(&store),
        config.outbox_capacity,
    );

    // Hardware integrations implement BatteryActuator; the stock build
    // ships the in-process simulator.
    let actuator: Arc<dyn BatteryActuator> = Arc::new(SimulatedActuator::new());

    // MQTT
    let status_topic = mqtt::status_topic(&config.device_id);
    let schedule_topic = mqtt::schedule_topic(&config.device_id);

    let mut mqttoptions = MqttOptions::new(config.client_id(), &config.mqtt_host, config.mqtt_port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    mqttoptions.set_clean_session(false);
    mqttoptions.set_last_will(LastWill::new(
        &status_topic,
        b"offline".to_vec(),
        QoS::AtLeastOnce,
        true,
    ));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Interval executor ticker
    let executor_task = {
        let mut executor = IntervalExecutor::new(
            &config.device_id,
            Arc::clone(&store),
            Arc::clone(&actuator),
            config.outbox_capacity,
        );
        let mut shutdown = shutdown_rx.clone();
        let tick_interval = Duration::from_secs(config.tick_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            loop {
                // Wake on the next interval boundary as well as the fixed
                // ticker, so transitions land on the boundary instead of up
                // to a tick late. Padded slightly so the wake falls inside
                // the new interval.
                let boundary_delay = executor
                    .next_boundary(chrono::Utc::now())
                    .and_then(|b| (b - chrono::Utc::now()).to_std().ok())
                    .map(|d| d + Duration::from_millis(100));
                let boundary_wake = async {
                    match boundary_delay {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => std::future::pending().await,
                    }
                };

                tokio::select! {
                    _ = ticker.tick() => executor.tick(chrono::Utc::now()).await,
                    () = boundary_wake => executor.tick(chrono::Utc::now()).await,
                    _ = shutdown.changed() => {
                        executor.safe_idle().await;
                        info!("executor stopped, battery idle");
                        return;
                    }
                }
            }
        })
    };

    // Report delivery
    let transport: Arc<dyn ReportTransport> =
        Arc::new(MqttReportTransport::new(client.clone(), &config.device_id));
    let worker_task = {
        let worker = DeliveryWorker::new(
            Arc::clone(&store),
            Arc::clone(&transport),
            Duration::from_secs(config.report_poll_secs),
        );
        tokio::spawn(worker.run(shutdown_rx.clone()))
    };

    // Record retention
    {
        let prune_store = Arc::clone(&store);
        let retention = config.prune_retention_days;
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(PRUNE_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let cutoff = chrono::Utc::now() - chrono::Duration::days(retention);
                        match prune_store.prune_reported_records(cutoff) {
                            Ok(n) if n > 0 => info!(deleted = n, "pruned reported execution records"),
                            Ok(_) => {}
                            Err(e) => error!("record prune failed: {e}"),
                        }
                    }
                    _ = shutdown.changed() => return,
                }
            }
        });
    }

    // Initial subscription (re-issued on every reconnect in ConnAck handler).
    client.subscribe(&schedule_topic, QoS::AtLeastOnce).await?;

    // Signal handling
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let exit_reason: &str;

    loop {
        tokio::select! {
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::Publish(p))) => {
                        if p.topic == schedule_topic {
                            if let Err(e) = session.handle_schedule_payload(&p.payload) {
                                error!("schedule intake failed: {e}");
                            }
                        } else {
                            warn!(topic = %p.topic, "unhandled topic");
                        }
                    }

                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt connected");

                        // Re-subscribe on every (re)connect; the broker may
                        // have lost our session even with clean_session(false).
                        if let Err(e) = client.subscribe(&schedule_topic, QoS::AtLeastOnce).await {
                            error!("re-subscribe failed: {e}");
                        }

                        // Announce online status (retained)
                        let _ = client
                            .publish(&status_topic, QoS::AtLeastOnce, true, b"online".to_vec())
                            .await;
                    }

                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!("mqtt disconnected, execution continues from local state");
                    }

                    Ok(_) => {}

                    Err(e) => {
                        error!("mqtt error: {e}");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }

            _ = &mut ctrl_c => {
                exit_reason = "SIGINT";
                break;
            }

            _ = sigterm.recv() => {
                exit_reason = "SIGTERM";
                break;
            }
        }
    }

    warn!(signal = exit_reason, "shutting down");
    let _ = shutdown_tx.send(true);
    let _ = executor_task.await;
    let _ = worker_task.await;

    // Keep the network driven while the final flush and the offline
    // announcement go out.
    let drain_task = tokio::spawn(async move {
        loop {
            if eventloop.poll().await.is_err() {
                return;
            }
        }
    });

    let flusher = DeliveryWorker::new(
        Arc::clone(&store),
        Arc::clone(&transport),
        Duration::from_secs(config.report_poll_secs),
    );
    let flushed = flusher
        .flush(Duration::from_secs(config.flush_timeout_secs))
        .await?;
    info!(flushed, "final outbox flush done");

    let _ = client
        .publish(&status_topic, QoS::AtLeastOnce, true, b"offline".to_vec())
        .await;
    let _ = client.disconnect().await;
    let _ = drain_task.await;

    info!("shutdown complete");
    Ok(())
}
