// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Series container errors.

use thiserror::Error;

/// Errors raised by [`SeriesContainer`](crate::SeriesContainer) bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeriesError {
    /// A series with this id already exists in the container.
    #[error("series id {0} already in use")]
    DuplicateId(u8),

    /// All 255 assignable ids are taken.
    #[error("no free series id left")]
    IdsExhausted,

    /// Zero is reserved to mean "allocate an id for me".
    #[error("series capacity must be non-zero")]
    ZeroCapacity,

    /// A series interval of zero would gate nothing.
    #[error("series interval must be non-zero")]
    ZeroInterval,
}
