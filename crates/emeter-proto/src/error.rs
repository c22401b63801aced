// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol-level errors.

use thiserror::Error;

/// Errors produced while building or parsing meter frames.
///
/// These describe why a frame could not be applied to device state. They are
/// distinct from [`MeterFault`](crate::state::MeterFault), which records what
/// the *device itself* reported in an exception reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    /// CRC verification failed on a received frame.
    #[error("CRC-16 check failed")]
    BadCrc,

    /// The reply carries a different slave address than the target device.
    #[error("reply from slave {actual:#04x}, expected {expected:#04x}")]
    AddressMismatch {
        /// Address the device is configured with.
        expected: u8,
        /// Address found in the reply.
        actual: u8,
    },

    /// The function byte is not part of the dialect.
    #[error("unknown function code {0:#04x}")]
    UnknownFunction(u8),

    /// The declared body length does not match the model's register window.
    #[error("body length {actual} bytes, expected {expected}")]
    LengthMismatch {
        /// Length the model's register map requires.
        expected: usize,
        /// Length byte found in the reply.
        actual: usize,
    },
}
