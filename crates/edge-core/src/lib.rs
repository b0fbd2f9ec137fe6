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

//! Device-side schedule coordination core.
//!
//! Everything between the transport and the battery: schedule intake and
//! validation, the durable local store, the clock-driven interval executor,
//! and outbox-backed report delivery. The transport itself stays outside
//! this crate behind the [`ReportTransport`] and [`BatteryActuator`] traits.

pub mod actuation;
pub mod error;
pub mod executor;
pub mod reporting;
pub mod session;
pub mod store;
pub mod validator;

pub use actuation::{BatteryActuator, SimulatedActuator};
pub use error::{EdgeError, Result, ValidationError};
pub use executor::IntervalExecutor;
pub use reporting::{DeliveryWorker, ReportTransport};
pub use session::{DeviceSession, IntakeOutcome};
pub use store::{ApplyOutcome, OutboxEntry, ReportKind, ScheduleStore};
pub use validator::{DeviceLimits, MAX_INTERVALS, SUPPORTED_SCHEDULE_VERSIONS, validate};
