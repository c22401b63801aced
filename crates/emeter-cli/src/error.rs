// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI errors.

use thiserror::Error;

use emeter_bus::BusError;
use emeter_core::CoreError;

/// Everything that can go wrong driving a meter from the command line.
#[derive(Debug, Error)]
pub enum CliError {
    /// Bus could not be opened or configured.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Meter operation failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The meter did not answer within the wait window.
    #[error("no reply from the meter (check wiring, address and model)")]
    NoReply,

    /// Arguments were inconsistent with the selected model.
    #[error("{0}")]
    BadArguments(String),
}
