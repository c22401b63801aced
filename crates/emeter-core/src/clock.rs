// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Monotonic time source.
//!
//! Meter state carries request/reply timestamps in monotonic microseconds,
//! used only for stale-data detection and logging. The epoch is the first
//! call in the process, which keeps the values small and wrap-free for
//! centuries.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Microseconds since the first call in this process.
pub fn monotonic_us() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_micros() as u64
}
