// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Device- and pool-level errors.

use thiserror::Error;

use emeter_bus::BusError;
use emeter_proto::MeterModel;

/// Errors raised by meter and pool operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The meter has no port to transmit through.
    #[error("meter {meter} is not attached to a port")]
    NotAttached {
        /// Meter id.
        meter: u8,
    },

    /// The meter is already bound to a port.
    #[error("meter {meter} is already attached to a port")]
    AlreadyAttached {
        /// Meter id.
        meter: u8,
    },

    /// The port refused the request (stopped or queue full).
    #[error("port {port} rejected the request (stopped or queue full)")]
    Enqueue {
        /// Port id.
        port: u8,
    },

    /// The operation does not exist on this meter model.
    #[error("operation requires the {required} model, meter {meter} is {actual}")]
    UnsupportedModel {
        /// Meter id.
        meter: u8,
        /// Model the operation is defined on.
        required: MeterModel,
        /// Model the meter actually is.
        actual: MeterModel,
    },

    /// The poll period is below the arbitration minimum.
    #[error("poll period {period_ms} ms is below the {min_ms} ms minimum")]
    PollRateTooFast {
        /// Requested period.
        period_ms: u64,
        /// Enforced minimum.
        min_ms: u64,
    },

    /// A port with this id is already registered.
    #[error("port {0} already registered")]
    DuplicatePort(u8),

    /// A meter with this id is already registered.
    #[error("meter {0} already registered")]
    DuplicateMeter(u8),

    /// The slave address is broadcast, catch-all or out of range.
    #[error("slave address {addr:#04x} is not assignable to a pooled meter")]
    InvalidAddress {
        /// Offending address.
        addr: u8,
    },

    /// Another meter on the same port already claims this address.
    #[error("slave address {addr:#04x} already in use on port {port}")]
    AddressInUse {
        /// Port id.
        port: u8,
        /// Contested address.
        addr: u8,
    },

    /// No port with this id is registered.
    #[error("port {0} not found")]
    PortNotFound(u8),

    /// No meter with this id is registered.
    #[error("meter {0} not found")]
    MeterNotFound(u8),

    /// Bus construction failed.
    #[error(transparent)]
    Bus(#[from] BusError),
}
