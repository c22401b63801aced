// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! `poll` — one-shot metrics read.

use crate::cli::Cli;
use crate::commands::Session;
use crate::error::CliError;

pub async fn run(cli: &Cli) -> Result<(), CliError> {
    let mut session = Session::open(cli).await?;

    session.meter().poll()?;
    let reply = session.next_reply().await?;
    session.describe(&reply);

    session.close().await;
    Ok(())
}
