// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # emeter-bus
//!
//! Half-duplex bus arbitration for PZEM-style energy meters.
//!
//! MODBUS-RTU is single-master: on a shared serial line only one
//! request/response transaction may be in flight, and back-to-back requests
//! from the host would collide with a meter still transmitting its reply.
//! The [`Port`] owns one serial line and enforces exactly that:
//!
//! - requests go through a bounded FIFO and are written in enqueue order;
//! - a *ready-to-send* permit, released by the receive path after every
//!   completed (or errored) receive cycle, gates each request that expects a
//!   reply — bounded by [`REPLY_TIMEOUT`] so a dead meter cannot wedge the
//!   queue;
//! - received frames are handed to a single attached handler as
//!   [`Reply`](emeter_proto::Reply) values with their CRC verdict already
//!   computed.
//!
//! The byte transport is abstracted behind [`BusSource`]/[`BusSink`], with a
//! `tokio-serial` implementation for real hardware and an in-process
//! [`NullCable`] that cross-wires two ports for tests.
//!
//! ## Example
//!
//! ```rust,ignore
//! use emeter_bus::{Port, SerialConfig};
//! use emeter_proto::ac;
//!
//! let cfg = SerialConfig::default_ac("/dev/ttyUSB0");
//! let port = Port::serial(1, &cfg, "meter bus")?;
//! port.attach_rx_handler(|reply| println!("{reply}"));
//! port.start().await;
//! port.enqueue(ac::read_metrics(0x01));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod link;
pub mod nullcable;
pub mod port;

pub use config::{DataBits, FlowControl, Parity, SerialConfig, SerialConfigBuilder, StopBits};
pub use error::BusError;
pub use link::{BusEvent, BusSink, BusSource};
pub use nullcable::NullCable;
pub use port::{Port, PortStats, REPLY_TIMEOUT, TX_QUEUE_DEPTH};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
