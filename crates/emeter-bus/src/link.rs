// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Byte-link abstraction between a port and its transport.
//!
//! A [`Port`](crate::port::Port) never touches a serial device directly; it
//! drives a [`BusSource`]/[`BusSink`] pair. The serial implementation below
//! assembles frames by watching for line idle (MODBUS-RTU separates frames
//! with silence); the null-cable implementation in [`crate::nullcable`]
//! moves whole frames through in-process channels.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::time::timeout;
use tokio_serial::SerialStream;

/// Idle time that ends a frame.
///
/// The MODBUS-RTU inter-frame gap is 3.5 character times — about 4 ms at
/// 9600 baud. 10 ms keeps a margin for USB-serial adapters that batch
/// their reads.
pub const FRAME_GAP: Duration = Duration::from_millis(10);

/// Upper bound on an assembled frame.
///
/// The longest dialect frame is 25 bytes; anything past this is line noise
/// or a babbling device.
pub const MAX_FRAME_LEN: usize = 256;

// =============================================================================
// Events
// =============================================================================

/// What the receive side of a link can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// A complete frame was assembled.
    Frame(Vec<u8>),
    /// The line reported a framing or parity problem.
    FramingError,
    /// A break condition was detected.
    Break,
    /// Receive buffering overran; input should be flushed.
    Overrun,
    /// The transport is gone; no further events will arrive.
    Closed,
}

// =============================================================================
// Traits
// =============================================================================

/// Receive side of a byte link. Owned by a port's receive task.
#[async_trait]
pub trait BusSource: Send {
    /// Waits for the next event. Cancel-safe: dropping the future must not
    /// lose an assembled frame boundary beyond the bytes already read.
    async fn next_event(&mut self) -> BusEvent;

    /// Discards any buffered input.
    async fn flush_input(&mut self);
}

/// Transmit side of a byte link. Owned by a port's transmit task.
#[async_trait]
pub trait BusSink: Send {
    /// Writes one complete frame.
    async fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()>;
}

// =============================================================================
// Serial implementation
// =============================================================================

/// Frame-assembling reader over a serial stream.
pub struct SerialSource {
    reader: ReadHalf<SerialStream>,
}

/// Frame writer over a serial stream.
pub struct SerialSink {
    writer: WriteHalf<SerialStream>,
}

/// Splits a serial stream into a link pair.
pub fn split_serial(stream: SerialStream) -> (SerialSource, SerialSink) {
    let (reader, writer) = tokio::io::split(stream);
    (SerialSource { reader }, SerialSink { writer })
}

impl SerialSource {
    fn map_read_error(error: &io::Error) -> BusEvent {
        match error.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::NotFound
            | io::ErrorKind::NotConnected => BusEvent::Closed,
            io::ErrorKind::InvalidData => BusEvent::FramingError,
            _ => BusEvent::FramingError,
        }
    }
}

#[async_trait]
impl BusSource for SerialSource {
    async fn next_event(&mut self) -> BusEvent {
        let mut chunk = [0u8; 64];

        // Block until the line wakes up.
        let n = match self.reader.read(&mut chunk).await {
            Ok(0) => return BusEvent::Closed,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "serial read error");
                return Self::map_read_error(&e);
            }
        };

        let mut frame = chunk[..n].to_vec();

        // Keep reading until the inter-frame gap elapses.
        loop {
            match timeout(FRAME_GAP, self.reader.read(&mut chunk)).await {
                Err(_) => break, // line idle, frame complete
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => {
                    frame.extend_from_slice(&chunk[..n]);
                    if frame.len() > MAX_FRAME_LEN {
                        return BusEvent::Overrun;
                    }
                }
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "serial read error mid-frame");
                    return Self::map_read_error(&e);
                }
            }
        }

        BusEvent::Frame(frame)
    }

    async fn flush_input(&mut self) {
        let mut chunk = [0u8; 64];
        while let Ok(Ok(n)) = timeout(Duration::from_millis(1), self.reader.read(&mut chunk)).await
        {
            if n == 0 {
                break;
            }
        }
    }
}

#[async_trait]
impl BusSink for SerialSink {
    async fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await
    }
}
