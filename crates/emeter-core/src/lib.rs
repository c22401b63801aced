// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # emeter-core
//!
//! Device model and pooling for PZEM-style energy meters.
//!
//! A [`Meter`] is one logical device: a model tag, a slave address, the
//! last-known state, and the requests that can be sent to it. A [`Pool`]
//! multiplexes many meters across one or more serial ports, routing each
//! reply to the right meter by `(port, slave address)` and fanning out
//! periodic polls.
//!
//! ## Ownership of the receive path
//!
//! A port has exactly one receive handler. A standalone meter claims it
//! ([`PortAttach::Exclusive`]); meters inside a pool are attached
//! transmit-only and the pool's dispatcher claims the handler instead. The
//! two modes cannot be mixed on one port.
//!
//! ## Example
//!
//! ```rust,ignore
//! use emeter_bus::{Port, SerialConfig};
//! use emeter_core::{Meter, PortAttach};
//! use emeter_proto::MeterModel;
//! use std::sync::Arc;
//!
//! let port = Arc::new(Port::serial(1, &SerialConfig::default_ac("/dev/ttyUSB0"), "")?);
//! let meter = Meter::new(1, MeterModel::AcV3, 0x10, "workshop feed");
//! meter.attach_port(port.clone(), PortAttach::Exclusive)?;
//! port.start().await;
//!
//! meter.attach_callback(|id, reply| println!("meter {id}: {reply}"));
//! meter.autopoll(true);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod clock;
pub mod error;
pub mod meter;
pub mod pool;

pub use error::CoreError;
pub use meter::{Meter, PortAttach, ReplyCallback, POLL_MIN_PERIOD_MS, POLL_PERIOD_MS};
pub use pool::Pool;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
