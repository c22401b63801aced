// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! `reset-energy` — zero the cumulative energy counter.

use crate::cli::Cli;
use crate::commands::Session;
use crate::error::CliError;

pub async fn run(cli: &Cli) -> Result<(), CliError> {
    let mut session = Session::open(cli).await?;

    session.meter().reset_energy()?;
    let reply = session.next_reply().await?;
    session.describe(&reply);

    session.close().await;
    Ok(())
}
