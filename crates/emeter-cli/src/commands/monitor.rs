// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! `monitor` — continuous polling until interrupted.

use crate::cli::Cli;
use crate::commands::Session;
use crate::error::CliError;

pub async fn run(cli: &Cli, rate_ms: u64) -> Result<(), CliError> {
    let mut session = Session::open(cli).await?;

    session.meter().set_pollrate(rate_ms)?;
    session.meter().autopoll(true);
    eprintln!("polling every {rate_ms} ms, Ctrl-C to stop");

    loop {
        let next = tokio::select! {
            _ = tokio::signal::ctrl_c() => None,
            reply = session.next_reply() => Some(reply),
        };

        match next {
            None => break,
            Some(Ok(reply)) => {
                println!("--- {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"));
                session.describe(&reply);
            }
            Some(Err(CliError::NoReply)) => {
                eprintln!("no reply (meter stale?)");
            }
            Some(Err(e)) => return Err(e),
        }
    }

    session.meter().autopoll(false);
    session.close().await;
    Ok(())
}
