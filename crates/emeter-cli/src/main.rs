// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! `emeter` — provisioning and monitoring tool for serial energy meters.
//!
//! One meter on one bus per invocation: probe a factory-fresh device for
//! its address, assign a new one, poll metrics, watch them continuously,
//! reset the energy counter, read and write alarm thresholds, select the
//! DC shunt range.

use clap::Parser;

mod cli;
mod commands;
mod error;
mod logging;

use cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.log_format);

    if let Err(e) = commands::run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
