// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Time-series integration tests
//!
//! Ring-buffer laws, interval gating and the averager hand-off, driven with
//! real metric structs the way a reply callback would.

use emeter_proto::AcMetrics;
use emeter_series::{AcMeanAverage, Averager, RingBuffer, SeriesContainer, TimeSeries};

fn ac(voltage: u16, energy: u32) -> AcMetrics {
    AcMetrics {
        voltage,
        energy,
        ..AcMetrics::default()
    }
}

// =============================================================================
// Ring buffer laws
// =============================================================================

#[test]
fn test_size_law_and_newest_at_back() {
    let mut rb = RingBuffer::new(5);
    for n in 0..12u32 {
        rb.push_back(n);
        assert_eq!(rb.len(), ((n + 1) as usize).min(5));
        assert_eq!(rb.back(), Some(&n));
    }
}

#[test]
fn test_iterator_symmetry_law() {
    // *(begin + k) equals *((rend - 1) - k) for every k in range.
    let mut rb = RingBuffer::new(7);
    for n in 0..10u32 {
        rb.push_back(n * n);
    }

    let len = rb.len();
    for k in 0..len {
        let forward = rb.iter().nth(k).copied();
        let backward = rb.iter().rev().nth(len - 1 - k).copied();
        assert_eq!(forward, backward, "mismatch at offset {k}");
    }
}

// =============================================================================
// TimeSeries gating
// =============================================================================

#[test]
fn test_one_sample_per_interval() {
    let mut ts: TimeSeries<AcMetrics> = TimeSeries::new(1, 8, 10, 0, "raw");
    for n in 1..=4u32 {
        ts.push(ac(2200 + n as u16, n), n * 10);
    }
    assert_eq!(ts.len(), 4);
    assert_eq!(ts.back().unwrap().voltage, 2204);
}

#[test]
fn test_mid_interval_sample_dropped_without_averager() {
    let mut ts: TimeSeries<AcMetrics> = TimeSeries::new(1, 8, 10, 0, "raw");
    ts.push(ac(2200, 1), 10);
    ts.push(ac(9999, 2), 15);
    ts.push(ac(2210, 3), 20);

    assert_eq!(ts.len(), 2);
    assert_eq!(ts.get(0).unwrap().voltage, 2200);
    assert_eq!(ts.get(1).unwrap().voltage, 2210);
}

#[test]
fn test_gap_larger_than_buffer_restarts_series() {
    let mut ts: TimeSeries<AcMetrics> = TimeSeries::new(1, 4, 10, 0, "raw");
    for n in 1..=4u32 {
        ts.push(ac(2200, n), n * 10);
    }
    assert_eq!(ts.len(), 4);

    ts.push(ac(2300, 99), 1000);
    assert_eq!(ts.len(), 1);
    assert_eq!(ts.back().unwrap().voltage, 2300);
    assert_eq!(ts.last_timestamp(), 1000);
}

// =============================================================================
// Averager hand-off
// =============================================================================

/// Capacity 4, interval 10, start 0, mean averager. Pushes at t = 3, 7, 11.
/// After the third push exactly one element is stored — the mean of the
/// first two samples — and the third sample is retained inside the averager
/// for the next interval.
#[test]
fn test_mean_averager_interval_hand_off() {
    let mut ts: TimeSeries<AcMetrics> = TimeSeries::new(1, 4, 10, 0, "averaged")
        .with_averager(Box::new(AcMeanAverage::new()));

    ts.push(ac(10, 100), 3);
    ts.push(ac(20, 101), 7);
    assert!(ts.is_empty(), "in-interval samples go to the averager");

    ts.push(ac(30, 102), 11);
    assert_eq!(ts.len(), 1);
    let stored = ts.back().unwrap();
    assert_eq!(stored.voltage, 15, "mean of the two consumed samples");
    assert_eq!(stored.energy, 101, "energy assigned from the last consumed sample");

    // The 30 V sample seeds the next interval's aggregate.
    ts.push(ac(50, 103), 21);
    assert_eq!(ts.len(), 2);
    assert_eq!(ts.back().unwrap().voltage, 30);
}

#[test]
fn test_averager_direct_store_on_regular_cadence() {
    let mut ts: TimeSeries<AcMetrics> = TimeSeries::new(1, 8, 10, 0, "averaged")
        .with_averager(Box::new(AcMeanAverage::new()));

    // No in-interval extras: the pushed values land unmodified.
    ts.push(ac(2200, 1), 10);
    ts.push(ac(2210, 2), 20);
    assert_eq!(ts.len(), 2);
    assert_eq!(ts.get(0).unwrap().voltage, 2200);
    assert_eq!(ts.get(1).unwrap().voltage, 2210);
}

#[test]
fn test_averager_trait_object_contract() {
    let mut avg: Box<dyn Averager<AcMetrics>> = Box::new(AcMeanAverage::new());
    avg.push(&ac(100, 5));
    avg.push(&ac(200, 6));
    assert_eq!(avg.count(), 2);
    assert_eq!(avg.get().voltage, 150);
    avg.reset();
    assert_eq!(avg.count(), 0);
}

// =============================================================================
// Container
// =============================================================================

#[test]
fn test_container_feeds_mixed_cadences() {
    let mut c: SeriesContainer<AcMetrics> = SeriesContainer::new();
    let raw = c.add_series(60, 1, 0, "every second", 0).unwrap();
    c.add(
        TimeSeries::new(9, 60, 5, 0, "five-second mean")
            .with_averager(Box::new(AcMeanAverage::new())),
    )
    .unwrap();

    // Ten seconds of 1 Hz samples with a rising voltage.
    for t in 1..=10u32 {
        c.push(&ac(2200 + t as u16, t), t);
    }

    assert_eq!(c.get(raw).unwrap().len(), 10);

    let averaged = c.get(9).unwrap();
    assert_eq!(averaged.len(), 2);
    // First stored element aggregates the samples from t = 1..=4.
    assert_eq!(averaged.get(0).unwrap().voltage, 2202);
}

#[test]
fn test_container_id_allocation_and_removal() {
    let mut c: SeriesContainer<u32> = SeriesContainer::new();
    assert_eq!(c.add_series(4, 1, 0, "a", 0).unwrap(), 1);
    assert_eq!(c.add_series(4, 1, 0, "b", 0).unwrap(), 2);
    assert!(c.remove(1));
    assert_eq!(c.add_series(4, 1, 0, "c", 0).unwrap(), 1);
    assert!(c.add_series(4, 1, 0, "dup", 2).is_err());
}
