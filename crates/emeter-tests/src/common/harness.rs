// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Null-cable responder harness.
//!
//! Wires a scripted responder onto the device side of a null cable so the
//! host side talks to something that behaves like real hardware, including
//! configurable reply latency.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use emeter_bus::Port;
use emeter_proto::Request;

/// An ordered log of labelled events, for asserting interleavings.
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    /// Snapshot of the events so far.
    pub fn snapshot(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

/// Attaches a scripted responder to the device side of a null cable.
///
/// `script` maps each received request frame to an optional reply and an
/// optional artificial latency; the reply is enqueued on the same port
/// (without the reply-wait flag, as a real meter answers unprompted).
///
/// The handler itself never blocks: delayed replies are shipped from a
/// spawned task, which keeps the port's receive loop live.
pub fn attach_responder(
    port: &Arc<Port>,
    mut script: impl FnMut(&[u8]) -> Option<(Vec<u8>, Duration)> + Send + 'static,
) {
    let weak = Arc::downgrade(port);
    port.attach_rx_handler(move |request| {
        let Some((reply, delay)) = script(request.bytes()) else {
            return;
        };
        let Some(port) = weak.upgrade() else { return };

        if delay.is_zero() {
            port.enqueue(Request::from_bytes(reply, false));
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                port.enqueue(Request::from_bytes(reply, false));
            });
        }
    });
}

/// Convenience wrapper: a responder with no artificial latency.
pub fn attach_instant_responder(
    port: &Arc<Port>,
    mut script: impl FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
) {
    attach_responder(port, move |req| {
        script(req).map(|reply| (reply, Duration::ZERO))
    });
}
