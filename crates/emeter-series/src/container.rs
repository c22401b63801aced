// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! A set of time series fed from one sample stream.
//!
//! Typical use: one container per meter, with a 1-second raw series, a
//! 1-minute averaged series and a 1-hour averaged series all fed from the
//! same reply callback. `push` broadcasts each sample; every series applies
//! its own interval gating.

use crate::error::SeriesError;
use crate::timeseries::TimeSeries;

/// Ordered collection of [`TimeSeries`] sharing one source stream.
pub struct SeriesContainer<T> {
    series: Vec<TimeSeries<T>>,
}

impl<T: Clone> SeriesContainer<T> {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self { series: Vec::new() }
    }

    /// Number of series.
    #[inline]
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// `true` when the container holds no series.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Adds a series and returns its id.
    ///
    /// `id = 0` requests automatic allocation of the smallest unused
    /// positive id; an explicit id must be unused.
    pub fn add_series(
        &mut self,
        capacity: usize,
        interval: u32,
        start: u32,
        descr: impl Into<String>,
        id: u8,
    ) -> Result<u8, SeriesError> {
        if capacity == 0 {
            return Err(SeriesError::ZeroCapacity);
        }
        if interval == 0 {
            return Err(SeriesError::ZeroInterval);
        }

        let id = if id == 0 {
            self.smallest_free_id()?
        } else {
            if self.get(id).is_some() {
                return Err(SeriesError::DuplicateId(id));
            }
            id
        };

        self.series
            .push(TimeSeries::new(id, capacity, interval, start, descr));
        Ok(id)
    }

    /// Adds an already-built series (e.g. one carrying an averager).
    pub fn add(&mut self, ts: TimeSeries<T>) -> Result<u8, SeriesError> {
        let id = ts.id();
        if id == 0 {
            return Err(SeriesError::DuplicateId(0));
        }
        if self.get(id).is_some() {
            return Err(SeriesError::DuplicateId(id));
        }
        self.series.push(ts);
        Ok(id)
    }

    /// Removes and destroys a series. Returns `false` for an unknown id.
    pub fn remove(&mut self, id: u8) -> bool {
        let before = self.series.len();
        self.series.retain(|ts| ts.id() != id);
        self.series.len() != before
    }

    /// Destroys every series.
    pub fn purge(&mut self) {
        self.series.clear();
    }

    /// Empties every series without destroying it, restarting all time
    /// bases at `now`.
    pub fn clear(&mut self, now: u32) {
        for ts in &mut self.series {
            ts.clear(now);
        }
    }

    /// Broadcasts a sample to every series.
    pub fn push(&mut self, value: &T, now: u32) {
        for ts in &mut self.series {
            ts.push(value.clone(), now);
        }
    }

    /// Shared access to a series by id.
    pub fn get(&self, id: u8) -> Option<&TimeSeries<T>> {
        self.series.iter().find(|ts| ts.id() == id)
    }

    /// Exclusive access to a series by id.
    pub fn get_mut(&mut self, id: u8) -> Option<&mut TimeSeries<T>> {
        self.series.iter_mut().find(|ts| ts.id() == id)
    }

    /// Iterates the series in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &TimeSeries<T>> {
        self.series.iter()
    }

    fn smallest_free_id(&self) -> Result<u8, SeriesError> {
        (1..=u8::MAX)
            .find(|id| self.get(*id).is_none())
            .ok_or(SeriesError::IdsExhausted)
    }
}

impl<T: Clone> Default for SeriesContainer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for SeriesContainer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesContainer")
            .field("series", &self.series.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
