// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # emeter-series
//!
//! In-memory time-series retention for meter readings.
//!
//! Meters produce a reading roughly once per second; hosts usually want a
//! bounded rolling window of them, often at a coarser cadence. This crate
//! layers that on top of the reply stream:
//!
//! - [`RingBuffer`]: fixed-capacity overwrite-on-full storage with
//!   random-access indexing and double-ended iterators;
//! - [`TimeSeries`]: interval gating, gap filling and optional per-interval
//!   averaging over a ring buffer;
//! - [`SeriesContainer`]: several series of different cadences fed from one
//!   sample stream;
//! - [`Averager`] and the per-model mean averagers for the metric structs.
//!
//! Timestamps are plain `u32` counters in whatever unit the caller prefers
//! (seconds, milliseconds, ticks); only differences matter and wrap-around
//! is handled as long as pushes keep coming at a regular pace.
//!
//! ## Example
//!
//! ```
//! use emeter_series::TimeSeries;
//!
//! let mut ts: TimeSeries<u32> = TimeSeries::new(1, 60, 10, 0, "one-minute window");
//! ts.push(100, 10);
//! ts.push(110, 20);
//! assert_eq!(ts.len(), 2);
//! assert_eq!(ts.back(), Some(&110));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod average;
pub mod container;
pub mod error;
pub mod ring;
pub mod timeseries;

pub use average::{AcMeanAverage, Averager, DcMeanAverage};
pub use container::SeriesContainer;
pub use error::SeriesError;
pub use ring::RingBuffer;
pub use timeseries::TimeSeries;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
