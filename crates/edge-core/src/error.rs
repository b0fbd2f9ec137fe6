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

//! Error types for the edge-core crate.
//!
//! Validation failures carry a human-readable reason because their Display
//! output is sent back to the cloud verbatim in FAILED acks.

use thiserror::Error;

/// Why an incoming schedule was rejected. Rejection is always wholesale:
/// no schedule is ever partially applied.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("malformed schedule: {0}")]
    Schema(String),

    #[error("unsupported schedule version {version}, supported: {supported:?}")]
    Version { version: u32, supported: Vec<u32> },

    #[error("interval coverage error: {0}")]
    Coverage(String),

    #[error(
        "interval {interval_index}: rate {rate_kw} kW exceeds power limit of {max_power_kw} kW"
    )]
    LimitViolation {
        interval_index: usize,
        rate_kw: f64,
        max_power_kw: f64,
    },
}

#[derive(Debug, Error)]
pub enum EdgeError {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("actuation error: {0}")]
    Actuation(String),

    #[error("transport unavailable: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, EdgeError>;
