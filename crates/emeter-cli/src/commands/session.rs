// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! One meter on one bus, wired for request/reply command flows.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use emeter_bus::{Port, SerialConfig};
use emeter_core::{Meter, PortAttach};
use emeter_proto::{MeterModel, Reply};

use crate::cli::{Cli, ModelArg};
use crate::error::CliError;

/// How long a command waits for the meter to answer. Generous next to the
/// 100 ms bus timeout; commands are interactive, not real-time.
const REPLY_WAIT: Duration = Duration::from_secs(2);

/// A serial port, a meter bound to it exclusively, and a channel carrying
/// every reply out of the receive task.
pub struct Session {
    port: Arc<Port>,
    meter: Meter,
    replies: mpsc::UnboundedReceiver<Reply>,
}

impl Session {
    /// Opens the bus described by the global options and wires the meter.
    pub async fn open(cli: &Cli) -> Result<Self, CliError> {
        let config = match cli.model {
            ModelArg::Ac => SerialConfig::default_ac(&cli.port),
            ModelArg::Dc => SerialConfig::default_dc(&cli.port),
        };
        let model: MeterModel = cli.model.into();

        let port = Arc::new(Port::serial(0, &config, "cli bus")?);
        let meter = Meter::new(0, model, cli.addr, "cli meter");
        meter.attach_port(port.clone(), PortAttach::Exclusive)?;

        let (tx, replies) = mpsc::unbounded_channel();
        meter.attach_callback(move |_, reply| {
            let _ = tx.send(reply.clone());
        });

        port.start().await;
        tracing::debug!(port = %cli.port, model = %model, addr = cli.addr, "session opened");

        Ok(Self {
            port,
            meter,
            replies,
        })
    }

    /// The meter handle.
    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    /// Waits for the next reply routed to the meter.
    pub async fn next_reply(&mut self) -> Result<Reply, CliError> {
        tokio::time::timeout(REPLY_WAIT, self.replies.recv())
            .await
            .map_err(|_| CliError::NoReply)?
            .ok_or(CliError::NoReply)
    }

    /// Prints the model-specific pretty dump of a reply.
    pub fn describe(&self, reply: &Reply) {
        print!("{}", self.meter.model().describe(reply));
    }

    /// Stops the port, draining anything still queued.
    pub async fn close(self) {
        self.port.stop().await;
    }
}
