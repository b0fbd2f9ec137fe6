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

//! Battery actuation capability.
//!
//! Physical control (Modbus, vendor SDK, inverter entity writes) lives
//! behind this trait; the executor never knows the transport.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// Device-local capability to drive the battery at a signed rate.
/// Positive = charge, negative = discharge, zero = idle.
#[async_trait]
pub trait BatteryActuator: Send + Sync {
    /// Command the battery to the given rate.
    async fn set_rate_kw(&self, rate_kw: f64) -> Result<()>;

    /// Rate the hardware currently reports. Sampled when an interval is
    /// finalized to fill `actual_rate_kw` on execution results.
    async fn current_rate_kw(&self) -> f64;

    /// Capability name for logging
    fn name(&self) -> &str;
}

/// In-process actuator that tracks the last commanded rate.
///
/// Stands in for real hardware in the default binary wiring and in tests,
/// where it can also be armed to fail the next commands.
#[derive(Debug, Clone, Default)]
pub struct SimulatedActuator {
    state: Arc<Mutex<SimulatedState>>,
}

#[derive(Debug, Default)]
struct SimulatedState {
    rate_kw: f64,
    fail_next: u32,
    commands: Vec<f64>,
}

impl SimulatedActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` `set_rate_kw` calls fail with the given reason's
    /// shape ("simulated actuation failure").
    pub fn fail_next_commands(&self, n: u32) {
        self.state.lock().fail_next = n;
    }

    /// Every rate commanded so far, in order.
    pub fn commanded_rates(&self) -> Vec<f64> {
        self.state.lock().commands.clone()
    }

    /// The last successfully commanded rate.
    pub fn rate_kw(&self) -> f64 {
        self.state.lock().rate_kw
    }
}

#[async_trait]
impl BatteryActuator for SimulatedActuator {
    async fn set_rate_kw(&self, rate_kw: f64) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            anyhow::bail!("simulated actuation failure at {rate_kw} kW");
        }
        state.rate_kw = rate_kw;
        state.commands.push(rate_kw);
        Ok(())
    }

    async fn current_rate_kw(&self) -> f64 {
        self.state.lock().rate_kw
    }

    fn name(&self) -> &str {
        "simulated"
    }
}
