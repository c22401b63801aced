// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Virtual null-modem cable for in-process testing.
//!
//! Two ports are cross-wired through channels: whatever A transmits arrives
//! at B's receive side as a complete frame, and vice versa. The pair shares
//! nothing beyond the wiring, so end-to-end tests exercise the real port
//! tasks, queues and ready-to-send gating without hardware.

use std::io;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::link::{BusEvent, BusSink, BusSource};
use crate::port::Port;

/// Transmit half of an in-memory link.
pub struct NullSink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

/// Receive half of an in-memory link.
pub struct NullSource {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl BusSink for NullSink {
    async fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.tx
            .send(bytes.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer end dropped"))
    }
}

#[async_trait]
impl BusSource for NullSource {
    async fn next_event(&mut self) -> BusEvent {
        match self.rx.recv().await {
            Some(bytes) => BusEvent::Frame(bytes),
            None => BusEvent::Closed,
        }
    }

    async fn flush_input(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}

/// Builds two cross-wired link pairs: what goes into the first sink comes
/// out of the second source, and vice versa.
pub fn link_pair() -> ((NullSink, NullSource), (NullSink, NullSource)) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();

    (
        (NullSink { tx: a_tx }, NullSource { rx: a_rx }),
        (NullSink { tx: b_tx }, NullSource { rx: b_rx }),
    )
}

/// A pair of cross-connected ports.
pub struct NullCable;

impl NullCable {
    /// Creates the two ends of the cable as full ports.
    ///
    /// The ports start stopped; call [`Port::start`] on each end. One end
    /// usually plays the host, the other a scripted meter.
    pub fn new(id_a: u8, id_b: u8) -> (Port, Port) {
        let ((a_sink, a_source), (b_sink, b_source)) = link_pair();

        let a = Port::with_link(
            id_a,
            Box::new(a_source),
            Box::new(a_sink),
            format!("null-cable-{id_a}"),
        );
        let b = Port::with_link(
            id_b,
            Box::new(b_source),
            Box::new(b_sink),
            format!("null-cable-{id_b}"),
        );

        (a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_link_pair_cross_wiring() {
        let ((mut a_sink, mut a_source), (mut b_sink, mut b_source)) = link_pair();

        a_sink.write_frame(&[1, 2, 3]).await.unwrap();
        assert_eq!(b_source.next_event().await, BusEvent::Frame(vec![1, 2, 3]));

        b_sink.write_frame(&[9]).await.unwrap();
        assert_eq!(a_source.next_event().await, BusEvent::Frame(vec![9]));
    }

    #[tokio::test]
    async fn test_closed_when_peer_drops() {
        let ((a_sink, _a_source), (_b_sink, mut b_source)) = link_pair();
        drop(a_sink);
        assert_eq!(b_source.next_event().await, BusEvent::Closed);
    }

    #[tokio::test]
    async fn test_flush_discards_buffered_frames() {
        let ((mut a_sink, _a_source), (_b_sink, mut b_source)) = link_pair();

        a_sink.write_frame(&[1]).await.unwrap();
        a_sink.write_frame(&[2]).await.unwrap();
        b_source.flush_input().await;

        a_sink.write_frame(&[3]).await.unwrap();
        assert_eq!(b_source.next_event().await, BusEvent::Frame(vec![3]));
    }
}
