// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! DC meter with an external shunt.
//!
//! Eight input registers starting at `0x0000`; four holding registers for
//! the two alarm thresholds, the slave address and the shunt range. Unlike
//! the AC model this device expects **two stop bits** on the serial line.
//!
//! Register scaling:
//!
//! | register | unit | width |
//! |---|---|---|
//! | voltage | 0.01 V | u16 |
//! | current | 0.01 A | u16 |
//! | power | 0.1 W | u32 (two regs, low word first) |
//! | energy | 1 Wh | u32 |
//! | alarm high / low | `0xFFFF` on / `0x0000` off | u16 each |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crc;
use crate::error::ProtoError;
use crate::frame::{self, be16, reg_pair, FunctionCode, Reply, Request};

pub use crate::frame::{reset_energy, set_slave_addr};

// =============================================================================
// Register map
// =============================================================================

/// First input register of the metrics window.
pub const RIR_BEGIN: u16 = 0x0000;
/// Number of input registers in the metrics window.
pub const RIR_COUNT: u16 = 0x0008;
/// Payload byte count of a full metrics reply.
pub const METRICS_BODY_LEN: u8 = 0x10;

/// Holding register: high-voltage alarm threshold, 0.01 V per LSB.
pub const RHR_ALARM_HIGH: u16 = 0x0000;
/// Holding register: low-voltage alarm threshold, 0.01 V per LSB.
pub const RHR_ALARM_LOW: u16 = 0x0001;
/// Holding register: shunt current range selector.
pub const RHR_SHUNT: u16 = 0x0003;
/// First holding register of the settings block.
pub const RHR_BEGIN: u16 = 0x0000;
/// Number of holding registers in the settings block.
pub const RHR_COUNT: u16 = 4;
/// Payload byte count of a full settings reply.
pub const HOLDINGS_BODY_LEN: u8 = (RHR_COUNT * 2) as u8;

/// Alarm register value meaning "alarm present".
pub const ALARM_PRESENT: u16 = 0xFFFF;

// Input register indices within the metrics window.
const RIR_VOLTAGE: usize = 0;
const RIR_CURRENT: usize = 1;
const RIR_POWER_L: usize = 2;
const RIR_ENERGY_L: usize = 4;
const RIR_ALARM_HIGH_FLAG: usize = 6;
const RIR_ALARM_LOW_FLAG: usize = 7;

// =============================================================================
// Shunt
// =============================================================================

/// External shunt current range.
///
/// The shunt tells the meter how to scale its current register; the wire
/// encoding is the vendor's selector code.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shunt {
    /// 100 A shunt (factory default, code 0).
    #[default]
    A100,
    /// 50 A shunt (code 1).
    A50,
    /// 200 A shunt (code 2).
    A200,
    /// 300 A shunt (code 3).
    A300,
}

impl Shunt {
    /// Wire selector code.
    #[inline]
    pub const fn code(self) -> u16 {
        match self {
            Self::A100 => 0,
            Self::A50 => 1,
            Self::A200 => 2,
            Self::A300 => 3,
        }
    }

    /// Decodes a selector code.
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::A100),
            1 => Some(Self::A50),
            2 => Some(Self::A200),
            3 => Some(Self::A300),
            _ => None,
        }
    }

    /// Full-scale current in amperes.
    #[inline]
    pub const fn amps(self) -> u16 {
        match self {
            Self::A100 => 100,
            Self::A50 => 50,
            Self::A200 => 200,
            Self::A300 => 300,
        }
    }
}

impl fmt::Display for Shunt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} A", self.amps())
    }
}

// =============================================================================
// Request builders
// =============================================================================

/// Request for the full metrics window.
pub fn read_metrics(addr: u8) -> Request {
    frame::command(FunctionCode::ReadInput, RIR_BEGIN, RIR_COUNT, addr)
}

/// Request for the settings block (thresholds, slave address, shunt).
pub fn read_holdings(addr: u8) -> Request {
    frame::command(FunctionCode::ReadHolding, RHR_BEGIN, RHR_COUNT, addr)
}

/// Sets the high-voltage alarm threshold, 0.01 V per LSB.
pub fn set_alarm_high(value: u16, addr: u8) -> Request {
    frame::command(FunctionCode::WriteSingle, RHR_ALARM_HIGH, value, addr)
}

/// Sets the low-voltage alarm threshold, 0.01 V per LSB.
pub fn set_alarm_low(value: u16, addr: u8) -> Request {
    frame::command(FunctionCode::WriteSingle, RHR_ALARM_LOW, value, addr)
}

/// Selects the shunt current range.
pub fn set_shunt(shunt: Shunt, addr: u8) -> Request {
    frame::command(FunctionCode::WriteSingle, RHR_SHUNT, shunt.code(), addr)
}

// =============================================================================
// Metrics
// =============================================================================

/// Raw register image of the DC metrics window.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DcMetrics {
    /// Voltage, 0.01 V per LSB.
    pub voltage: u16,
    /// Current, 0.01 A per LSB.
    pub current: u16,
    /// Power, 0.1 W per LSB.
    pub power: u32,
    /// Cumulative energy, 1 Wh per LSB.
    pub energy: u32,
    /// High-voltage alarm flag register.
    pub alarm_high: u16,
    /// Low-voltage alarm flag register.
    pub alarm_low: u16,
}

impl DcMetrics {
    /// Parses a full metrics reply.
    pub fn from_reply(reply: &Reply) -> Result<Self, ProtoError> {
        let bytes = reply.bytes();
        if reply.function() != Some(FunctionCode::ReadInput)
            || bytes.len() < 3
            || bytes[2] != METRICS_BODY_LEN
            || bytes.len() < 3 + METRICS_BODY_LEN as usize + 2
        {
            return Err(ProtoError::LengthMismatch {
                expected: METRICS_BODY_LEN as usize,
                actual: bytes.get(2).copied().unwrap_or(0) as usize,
            });
        }

        let regs = &bytes[3..];
        Ok(Self {
            voltage: be16(regs, RIR_VOLTAGE * 2),
            current: be16(regs, RIR_CURRENT * 2),
            power: reg_pair(regs, RIR_POWER_L * 2),
            energy: reg_pair(regs, RIR_ENERGY_L * 2),
            alarm_high: be16(regs, RIR_ALARM_HIGH_FLAG * 2),
            alarm_low: be16(regs, RIR_ALARM_LOW_FLAG * 2),
        })
    }

    /// Serializes the metrics back into a full read-input reply frame.
    pub fn to_reply(&self, addr: u8) -> Reply {
        let mut bytes = Vec::with_capacity(3 + METRICS_BODY_LEN as usize + 2);
        bytes.push(addr);
        bytes.push(FunctionCode::ReadInput.as_u8());
        bytes.push(METRICS_BODY_LEN);
        bytes.extend_from_slice(&self.voltage.to_be_bytes());
        bytes.extend_from_slice(&self.current.to_be_bytes());
        bytes.extend_from_slice(&((self.power & 0xFFFF) as u16).to_be_bytes());
        bytes.extend_from_slice(&((self.power >> 16) as u16).to_be_bytes());
        bytes.extend_from_slice(&((self.energy & 0xFFFF) as u16).to_be_bytes());
        bytes.extend_from_slice(&((self.energy >> 16) as u16).to_be_bytes());
        bytes.extend_from_slice(&self.alarm_high.to_be_bytes());
        bytes.extend_from_slice(&self.alarm_low.to_be_bytes());
        crc::append(&mut bytes);
        Reply::from_bytes(bytes)
    }

    /// Voltage in volts.
    #[inline]
    pub fn voltage_v(&self) -> f32 {
        f32::from(self.voltage) / 100.0
    }

    /// Current in amperes.
    #[inline]
    pub fn current_a(&self) -> f32 {
        f32::from(self.current) / 100.0
    }

    /// Power in watts.
    #[inline]
    pub fn power_w(&self) -> f32 {
        self.power as f32 / 10.0
    }

    /// Energy in watt-hours.
    #[inline]
    pub fn energy_wh(&self) -> u32 {
        self.energy
    }

    /// `true` when the high-voltage alarm flag is raised.
    #[inline]
    pub fn alarm_high_on(&self) -> bool {
        self.alarm_high == ALARM_PRESENT
    }

    /// `true` when the low-voltage alarm flag is raised.
    #[inline]
    pub fn alarm_low_on(&self) -> bool {
        self.alarm_low == ALARM_PRESENT
    }
}

impl fmt::Display for DcMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.2} V, {:.2} A, {:.1} W, {} Wh",
            self.voltage_v(),
            self.current_a(),
            self.power_w(),
            self.energy,
        )
    }
}

// =============================================================================
// Pretty dump
// =============================================================================

/// Renders a human-readable report of a reply, for debug sinks and the CLI.
pub fn describe(reply: &Reply) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "=== DC meter reply ===");

    match reply.function() {
        Some(FunctionCode::ReadInput) => match DcMetrics::from_reply(reply) {
            Ok(m) => {
                let _ = writeln!(out, "Voltage:    {:7.2} V", m.voltage_v());
                let _ = writeln!(out, "Current:    {:7.2} A", m.current_a());
                let _ = writeln!(out, "Power:      {:7.1} W", m.power_w());
                let _ = writeln!(out, "Energy:     {:7.3} kWh", m.energy as f32 / 1000.0);
                let _ = writeln!(out, "Alarm high: {}", if m.alarm_high_on() { "yes" } else { "no" });
                let _ = writeln!(out, "Alarm low:  {}", if m.alarm_low_on() { "yes" } else { "no" });
            }
            Err(e) => {
                let _ = writeln!(out, "Malformed metrics frame: {e}");
            }
        },
        Some(FunctionCode::ReadHolding) => {
            let bytes = reply.bytes();
            if bytes.len() >= 3 + HOLDINGS_BODY_LEN as usize + 2 && bytes[2] == HOLDINGS_BODY_LEN {
                let _ = writeln!(out, "Alarm high threshold: {}", be16(bytes, 3));
                let _ = writeln!(out, "Alarm low threshold:  {}", be16(bytes, 5));
                let _ = writeln!(out, "Slave address:        {:#04x}", bytes[8]);
                match Shunt::from_code(be16(bytes, 9)) {
                    Some(s) => {
                        let _ = writeln!(out, "Shunt range:          {s}");
                    }
                    None => {
                        let _ = writeln!(out, "Shunt range:          code {:#06x}", be16(bytes, 9));
                    }
                }
            } else {
                let _ = writeln!(out, "Partial holding-register frame");
            }
        }
        Some(FunctionCode::WriteSingle) => {
            let bytes = reply.bytes();
            if bytes.len() >= 6 {
                match be16(bytes, 2) {
                    RHR_ALARM_HIGH => {
                        let _ = writeln!(out, "Alarm high threshold changed to {}", be16(bytes, 4));
                    }
                    RHR_ALARM_LOW => {
                        let _ = writeln!(out, "Alarm low threshold changed to {}", be16(bytes, 4));
                    }
                    frame::REG_SLAVE_ADDR => {
                        let _ = writeln!(out, "Slave address changed to {:#04x}", bytes[5]);
                    }
                    RHR_SHUNT => {
                        let _ = writeln!(out, "Shunt range code changed to {}", be16(bytes, 4));
                    }
                    reg => {
                        let _ = writeln!(out, "Write echo for unknown register {reg:#06x}");
                    }
                }
            }
        }
        Some(FunctionCode::ResetEnergy) => {
            let _ = writeln!(out, "Energy counter reset");
        }
        Some(fc) if fc.is_exception() => {
            let _ = writeln!(
                out,
                "Exception {} (code {:#04x})",
                fc,
                reply.exception_code().unwrap_or(0)
            );
        }
        _ => {
            let _ = writeln!(out, "Unrecognized frame: {}", reply.hex());
        }
    }

    out
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics_reply(addr: u8, regs: [u16; 8]) -> Reply {
        let mut bytes = vec![addr, 0x04, METRICS_BODY_LEN];
        for r in regs {
            bytes.extend_from_slice(&r.to_be_bytes());
        }
        crc::append(&mut bytes);
        Reply::from_bytes(bytes)
    }

    #[test]
    fn test_read_metrics_frame() {
        let req = read_metrics(0x02);
        assert_eq!(&req.bytes()[..6], &[0x02, 0x04, 0x00, 0x00, 0x00, 0x08]);
        assert!(crate::crc::verify(req.bytes()));
    }

    #[test]
    fn test_parse_metrics() {
        // 12.34 V, 1.50 A, 18.5 W, 77 Wh, low alarm raised.
        let reply = metrics_reply(
            0x02,
            [1234, 150, 185, 0, 77, 0, 0x0000, 0xFFFF],
        );
        let m = DcMetrics::from_reply(&reply).unwrap();

        assert_eq!(m.voltage, 1234);
        assert_eq!(m.current, 150);
        assert_eq!(m.power, 185);
        assert_eq!(m.energy, 77);
        assert!(!m.alarm_high_on());
        assert!(m.alarm_low_on());

        assert!((m.voltage_v() - 12.34).abs() < 0.001);
        assert!((m.current_a() - 1.5).abs() < 0.001);
        assert!((m.power_w() - 18.5).abs() < 0.01);
    }

    #[test]
    fn test_metrics_round_trip() {
        let m = DcMetrics {
            voltage: 4880,
            current: 2000,
            power: 976_000,
            energy: 123_456,
            alarm_high: 0,
            alarm_low: 0,
        };
        let reply = m.to_reply(0x0B);
        assert!(reply.is_valid());
        assert_eq!(DcMetrics::from_reply(&reply).unwrap(), m);
    }

    #[test]
    fn test_parse_rejects_ac_sized_body() {
        let mut bytes = vec![0x02, 0x04, 0x14];
        bytes.extend_from_slice(&[0u8; 20]);
        crate::crc::append(&mut bytes);
        let reply = Reply::from_bytes(bytes);

        assert!(matches!(
            DcMetrics::from_reply(&reply),
            Err(ProtoError::LengthMismatch { expected: 16, actual: 20 })
        ));
    }

    #[test]
    fn test_shunt_codes() {
        assert_eq!(Shunt::A100.code(), 0);
        assert_eq!(Shunt::A300.code(), 3);
        assert_eq!(Shunt::from_code(2), Some(Shunt::A200));
        assert_eq!(Shunt::from_code(7), None);
        assert_eq!(Shunt::A50.amps(), 50);
    }

    #[test]
    fn test_set_shunt_frame() {
        let req = set_shunt(Shunt::A200, 0x02);
        assert_eq!(&req.bytes()[..6], &[0x02, 0x06, 0x00, 0x03, 0x00, 0x02]);
    }
}
