// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! `probe` — discover the configured slave address of a solitary meter.

use crate::cli::Cli;
use crate::commands::Session;
use crate::error::CliError;

pub async fn run(cli: &Cli) -> Result<(), CliError> {
    let mut session = Session::open(cli).await?;

    session.meter().read_settings()?;
    let reply = session.next_reply().await?;
    session.describe(&reply);

    let state = session.meter().state();
    println!("Configured slave address: {:#04x} ({})", state.addr, state.addr);

    session.close().await;
    Ok(())
}
