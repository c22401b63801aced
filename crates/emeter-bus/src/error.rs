// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Bus-level errors.
//!
//! Port construction is the only fatal point: if the serial device cannot be
//! opened with the requested configuration there is nothing to arbitrate.
//! Runtime transport hiccups are handled inside the port tasks (flush and
//! carry on) and surface as statistics, not errors.

use thiserror::Error;

/// Errors raised while configuring or opening a bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The serial device path does not exist.
    #[error("serial device '{path}' not found")]
    DeviceNotFound {
        /// Configured device path.
        path: String,
    },

    /// The serial device exists but could not be opened.
    #[error("access to serial device '{path}' denied")]
    AccessDenied {
        /// Configured device path.
        path: String,
    },

    /// The driver refused the line configuration.
    #[error("serial device '{path}' rejected configuration: {message}")]
    ConfigRejected {
        /// Configured device path.
        path: String,
        /// Driver-reported reason.
        message: String,
    },

    /// A configuration field failed validation before any I/O was attempted.
    #[error("invalid configuration for '{field}': {message}")]
    InvalidConfig {
        /// Offending field.
        field: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// Underlying I/O failure outside the mapped cases.
    #[error("bus I/O error: {0}")]
    Io(#[from] std::io::Error),
}
