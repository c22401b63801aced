// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Argument parsing and command definitions.

use clap::{Parser, Subcommand, ValueEnum};

use emeter_proto::{frame, MeterModel, Shunt};

/// Provisioning and monitoring tool for PZEM-style serial energy meters.
#[derive(Parser, Debug)]
#[command(
    name = "emeter",
    version,
    about = "Talk to PZEM-style energy meters over a serial bus",
    propagate_version = true
)]
pub struct Cli {
    /// Serial device path, e.g. /dev/ttyUSB0 or COM3
    #[arg(short, long, env = "EMETER_PORT", global = true, default_value = "/dev/ttyUSB0")]
    pub port: String,

    /// Meter model on the bus
    #[arg(short, long, env = "EMETER_MODEL", global = true, value_enum, default_value = "ac")]
    pub model: ModelArg,

    /// Slave address to talk to; defaults to the catch-all address, which
    /// works when exactly one meter is on the bus
    #[arg(short, long, global = true, value_parser = parse_addr, default_value = "0xF8")]
    pub addr: u8,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "EMETER_LOG_LEVEL", global = true, default_value = "warn")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "EMETER_LOG_FORMAT", global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Meter model selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModelArg {
    /// Single-phase AC meter (9600 8N1)
    Ac,
    /// DC meter with shunt (9600 8N2)
    Dc,
}

impl From<ModelArg> for MeterModel {
    fn from(m: ModelArg) -> Self {
        match m {
            ModelArg::Ac => MeterModel::AcV3,
            ModelArg::Dc => MeterModel::Dc,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text
    Text,
    /// JSON lines for log aggregation
    Json,
    /// Minimal single-line output
    Compact,
}

/// Shunt range selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ShuntArg {
    /// 100 A shunt
    #[value(name = "100a")]
    A100,
    /// 50 A shunt
    #[value(name = "50a")]
    A50,
    /// 200 A shunt
    #[value(name = "200a")]
    A200,
    /// 300 A shunt
    #[value(name = "300a")]
    A300,
}

impl From<ShuntArg> for Shunt {
    fn from(s: ShuntArg) -> Self {
        match s {
            ShuntArg::A100 => Shunt::A100,
            ShuntArg::A50 => Shunt::A50,
            ShuntArg::A200 => Shunt::A200,
            ShuntArg::A300 => Shunt::A300,
        }
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Read the settings block and report the configured slave address
    ///
    /// Run with the default catch-all address against a single-meter bus to
    /// discover a factory-fresh device.
    Probe,

    /// Write a new slave address to the meter
    SetAddr {
        /// New address (0x01..=0xF7)
        #[arg(value_parser = parse_addr)]
        new_addr: u8,
    },

    /// Poll the meter once and print its metrics
    Poll,

    /// Poll continuously and print every reply until interrupted
    Monitor {
        /// Poll period in milliseconds
        #[arg(long, default_value_t = 1000)]
        rate: u64,
    },

    /// Reset the meter's cumulative energy counter
    ResetEnergy,

    /// Read and print the configured alarm thresholds
    Thresholds,

    /// Set an alarm threshold (watts on AC, 0.01 V steps on DC)
    SetAlarm {
        /// Threshold value
        value: u16,
        /// Write the low threshold instead of the high one (DC only)
        #[arg(long)]
        low: bool,
    },

    /// Select the shunt current range (DC only)
    SetShunt {
        /// Shunt range
        #[arg(value_enum)]
        range: ShuntArg,
    },
}

/// Parses a slave address given as decimal or `0x`-prefixed hex.
fn parse_addr(s: &str) -> Result<u8, String> {
    let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    let addr = value.map_err(|e| format!("invalid address '{s}': {e}"))?;

    if frame::is_assignable_addr(addr) || addr == frame::ADDR_ANY {
        Ok(addr)
    } else {
        Err(format!(
            "address {addr:#04x} out of range (0x01..=0xF7, or 0xF8 for catch-all)"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_addr_formats() {
        assert_eq!(parse_addr("16").unwrap(), 16);
        assert_eq!(parse_addr("0x10").unwrap(), 0x10);
        assert_eq!(parse_addr("0xF8").unwrap(), 0xF8);
        assert!(parse_addr("0x00").is_err());
        assert!(parse_addr("0xFF").is_err());
        assert!(parse_addr("garbage").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["emeter", "--port", "/dev/ttyUSB1", "poll"]).unwrap();
        assert_eq!(cli.port, "/dev/ttyUSB1");
        assert!(matches!(cli.command, Commands::Poll));
        assert_eq!(cli.addr, 0xF8);
    }

    #[test]
    fn test_set_shunt_parses() {
        let cli = Cli::try_parse_from(["emeter", "--model", "dc", "set-shunt", "200a"]).unwrap();
        match cli.command {
            Commands::SetShunt { range } => assert_eq!(range, ShuntArg::A200),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
