// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration commands: slave address, alarm thresholds, shunt range.

use emeter_proto::{MeterModel, MeterSettings, Shunt};

use crate::cli::Cli;
use crate::commands::Session;
use crate::error::CliError;

pub async fn set_addr(cli: &Cli, new_addr: u8) -> Result<(), CliError> {
    let mut session = Session::open(cli).await?;

    session.meter().set_address(new_addr)?;
    let reply = session.next_reply().await?;
    session.describe(&reply);

    let state = session.meter().state();
    println!("Meter now answers at {:#04x}", state.addr);

    session.close().await;
    Ok(())
}

pub async fn thresholds(cli: &Cli) -> Result<(), CliError> {
    let mut session = Session::open(cli).await?;

    session.meter().read_settings()?;
    let reply = session.next_reply().await?;
    session.describe(&reply);

    match session.meter().state().settings {
        MeterSettings::Ac { alarm_threshold } => {
            println!("Power alarm threshold: {alarm_threshold} W");
        }
        MeterSettings::Dc {
            alarm_high,
            alarm_low,
            shunt,
        } => {
            println!("High-voltage alarm: {:.2} V", f32::from(alarm_high) / 100.0);
            println!("Low-voltage alarm:  {:.2} V", f32::from(alarm_low) / 100.0);
            println!("Shunt range:        {shunt}");
        }
    }

    session.close().await;
    Ok(())
}

pub async fn set_alarm(cli: &Cli, value: u16, low: bool) -> Result<(), CliError> {
    let mut session = Session::open(cli).await?;

    let model: MeterModel = cli.model.into();
    match model {
        MeterModel::AcV3 if low => {
            session.close().await;
            return Err(CliError::BadArguments(
                "--low only applies to DC meters; AC has a single power alarm".into(),
            ));
        }
        MeterModel::AcV3 => session.meter().set_alarm_threshold(value)?,
        MeterModel::Dc if low => session.meter().set_alarm_low(value)?,
        MeterModel::Dc => session.meter().set_alarm_high(value)?,
    }

    let reply = session.next_reply().await?;
    session.describe(&reply);

    session.close().await;
    Ok(())
}

pub async fn set_shunt(cli: &Cli, shunt: Shunt) -> Result<(), CliError> {
    let mut session = Session::open(cli).await?;

    session.meter().set_shunt(shunt)?;
    let reply = session.next_reply().await?;
    session.describe(&reply);

    session.close().await;
    Ok(())
}
