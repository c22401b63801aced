// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Command implementations.

mod configure;
mod monitor;
mod poll;
mod probe;
mod reset;
mod session;

use crate::cli::{Cli, Commands};
use crate::error::CliError;

pub use session::Session;

/// Dispatches the parsed command line.
pub async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command.clone() {
        Commands::Probe => probe::run(&cli).await,
        Commands::SetAddr { new_addr } => configure::set_addr(&cli, new_addr).await,
        Commands::Poll => poll::run(&cli).await,
        Commands::Monitor { rate } => monitor::run(&cli, rate).await,
        Commands::ResetEnergy => reset::run(&cli).await,
        Commands::Thresholds => configure::thresholds(&cli).await,
        Commands::SetAlarm { value, low } => configure::set_alarm(&cli, value, low).await,
        Commands::SetShunt { range } => configure::set_shunt(&cli, range.into()).await,
    }
}
