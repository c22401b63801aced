// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # emeter-proto
//!
//! Wire protocol for PZEM-style serial energy meters.
//!
//! The meters speak a vendor dialect of MODBUS-RTU over 9600-baud serial
//! lines: the standard read-holding / read-input / write-single functions,
//! plus vendor opcodes for calibration (`0x41`) and energy-counter reset
//! (`0x42`). This crate is the pure, I/O-free part of the stack:
//!
//! - **CRC-16/MODBUS** compute and verify ([`crc`])
//! - **Frame codec**: request builders and reply accessors ([`frame`])
//! - **Register maps** and per-model request builders ([`ac`], [`dc`])
//! - **Device state**: typed metrics and the reply parser ([`state`])
//!
//! Transport, queuing and device pooling live in `emeter-bus` and
//! `emeter-core`; this crate only produces and consumes byte frames.
//!
//! ## Frame layout
//!
//! ```text
//! ┌──────┬──────┬─────────────────┬─────────┐
//! │ addr │ func │     payload     │ crc16   │
//! │ 1 B  │ 1 B  │   0..n bytes    │ 2 B LE  │
//! └──────┴──────┴─────────────────┴─────────┘
//! ```
//!
//! All multi-byte scalars inside a frame are big-endian; the trailing CRC is
//! little-endian. 32-bit metric values span two registers, low word first.
//!
//! ## Example
//!
//! ```
//! use emeter_proto::{ac, crc, frame::ADDR_ANY};
//!
//! // The canonical "read all metrics" request for an AC meter at addr 0x01.
//! let req = ac::read_metrics(0x01);
//! assert_eq!(req.bytes(), &[0x01, 0x04, 0x00, 0x00, 0x00, 0x0A, 0x70, 0x0D]);
//! assert!(crc::verify(req.bytes()));
//!
//! // Broadcast frames never expect a reply.
//! let probe = ac::read_holdings(ADDR_ANY);
//! assert!(probe.wait_for_reply());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod ac;
pub mod crc;
pub mod dc;
pub mod error;
pub mod frame;
pub mod state;

pub use ac::AcMetrics;
pub use dc::{DcMetrics, Shunt};
pub use error::ProtoError;
pub use frame::{FunctionCode, Reply, Request};
pub use state::{MeterFault, MeterModel, MeterSettings, MeterState, Metrics};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
