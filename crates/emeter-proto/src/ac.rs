// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Single-phase AC meter (hardware revision v3).
//!
//! Ten input registers starting at `0x0000` carry the live metrics; two
//! holding registers carry the power-alarm threshold and the slave address.
//! The meter refreshes its internal registers roughly once per second.
//!
//! Register scaling:
//!
//! | register | unit | width |
//! |---|---|---|
//! | voltage | 0.1 V | u16 |
//! | current | 0.001 A | u32 (two regs, low word first) |
//! | power | 0.1 W | u32 |
//! | energy | 1 Wh | u32 |
//! | frequency | 0.1 Hz | u16 |
//! | power factor | 0.01 | u16 |
//! | alarm | `0xFFFF` on / `0x0000` off | u16 |

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
pub const RIR_COUNT: u16 = 0x000A;
/// Payload byte count of a full metrics reply.
pub const METRICS_BODY_LEN: u8 = 0x14;

/// Holding register: power alarm threshold, 1 W per LSB.
pub const RHR_ALARM_THR: u16 = 0x0001;
/// First holding register of the settings block.
pub const RHR_BEGIN: u16 = 0x0001;
/// Number of holding registers in the settings block.
pub const RHR_COUNT: u16 = 2;
/// Payload byte count of a full settings reply.
pub const HOLDINGS_BODY_LEN: u8 = (RHR_COUNT * 2) as u8;

/// Alarm register value meaning "alarm present".
pub const ALARM_PRESENT: u16 = 0xFFFF;

// Input register indices within the metrics window.
const RIR_VOLTAGE: usize = 0;
const RIR_CURRENT_L: usize = 1;
const RIR_POWER_L: usize = 3;
const RIR_ENERGY_L: usize = 5;
const RIR_FREQUENCY: usize = 7;
const RIR_PF: usize = 8;
const RIR_ALARM: usize = 9;

// =============================================================================
// Request builders
// =============================================================================

/// Request for the full metrics window.
pub fn read_metrics(addr: u8) -> Request {
    frame::command(FunctionCode::ReadInput, RIR_BEGIN, RIR_COUNT, addr)
}

/// Request for the settings block (alarm threshold + slave address).
///
/// The two registers cannot be read individually: the device replies with an
/// indistinguishable two-byte image either way, so the whole block is always
/// fetched and picked apart on parse. Reading it through the catch-all
/// address is how a solitary meter reports its configured address during
/// provisioning.
pub fn read_holdings(addr: u8) -> Request {
    frame::command(FunctionCode::ReadHolding, RHR_BEGIN, RHR_COUNT, addr)
}

/// Sets the power alarm threshold in watts.
pub fn set_alarm_threshold(watts: u16, addr: u8) -> Request {
    frame::command(FunctionCode::WriteSingle, RHR_ALARM_THR, watts, addr)
}

// =============================================================================
// Metrics
// =============================================================================

/// Raw register image of the AC metrics window.
///
/// Fields keep the device's fixed-point units; the accessor methods scale to
/// floats.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcMetrics {
    /// Voltage, 0.1 V per LSB.
    pub voltage: u16,
    /// Current, 0.001 A per LSB.
    pub current: u32,
    /// Active power, 0.1 W per LSB.
    pub power: u32,
    /// Cumulative energy, 1 Wh per LSB.
    pub energy: u32,
    /// Line frequency, 0.1 Hz per LSB.
    pub frequency: u16,
    /// Power factor, 0.01 per LSB.
    pub pf: u16,
    /// Alarm register, `0xFFFF` when the power alarm is active.
    pub alarm: u16,
}

impl AcMetrics {
    /// Parses a full metrics reply.
    ///
    /// The reply must be a read-input frame whose length byte matches the
    /// model's 20-byte window; anything else is a length mismatch.
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
            current: reg_pair(regs, RIR_CURRENT_L * 2),
            power: reg_pair(regs, RIR_POWER_L * 2),
            energy: reg_pair(regs, RIR_ENERGY_L * 2),
            frequency: be16(regs, RIR_FREQUENCY * 2),
            pf: be16(regs, RIR_PF * 2),
            alarm: be16(regs, RIR_ALARM * 2),
        })
    }

    /// Serializes the metrics back into a full read-input reply frame.
    pub fn to_reply(&self, addr: u8) -> Reply {
        let mut bytes = Vec::with_capacity(3 + METRICS_BODY_LEN as usize + 2);
        bytes.push(addr);
        bytes.push(FunctionCode::ReadInput.as_u8());
        bytes.push(METRICS_BODY_LEN);
        bytes.extend_from_slice(&self.voltage.to_be_bytes());
        bytes.extend_from_slice(&((self.current & 0xFFFF) as u16).to_be_bytes());
        bytes.extend_from_slice(&((self.current >> 16) as u16).to_be_bytes());
        bytes.extend_from_slice(&((self.power & 0xFFFF) as u16).to_be_bytes());
        bytes.extend_from_slice(&((self.power >> 16) as u16).to_be_bytes());
        bytes.extend_from_slice(&((self.energy & 0xFFFF) as u16).to_be_bytes());
        bytes.extend_from_slice(&((self.energy >> 16) as u16).to_be_bytes());
        bytes.extend_from_slice(&self.frequency.to_be_bytes());
        bytes.extend_from_slice(&self.pf.to_be_bytes());
        bytes.extend_from_slice(&self.alarm.to_be_bytes());
        crc::append(&mut bytes);
        Reply::from_bytes(bytes)
    }

    /// Voltage in volts.
    #[inline]
    pub fn voltage_v(&self) -> f32 {
        f32::from(self.voltage) / 10.0
    }

    /// Current in amperes.
    #[inline]
    pub fn current_a(&self) -> f32 {
        self.current as f32 / 1000.0
    }

    /// Active power in watts.
    #[inline]
    pub fn power_w(&self) -> f32 {
        self.power as f32 / 10.0
    }

    /// Energy in watt-hours.
    #[inline]
    pub fn energy_wh(&self) -> u32 {
        self.energy
    }

    /// Line frequency in hertz.
    #[inline]
    pub fn frequency_hz(&self) -> f32 {
        f32::from(self.frequency) / 10.0
    }

    /// Power factor as a ratio.
    #[inline]
    pub fn power_factor(&self) -> f32 {
        f32::from(self.pf) / 100.0
    }

    /// `true` when the power alarm flag is raised.
    #[inline]
    pub fn alarm_on(&self) -> bool {
        self.alarm == ALARM_PRESENT
    }
}

impl fmt::Display for AcMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1} V, {:.3} A, {:.1} W, {} Wh, {:.1} Hz, pf {:.2}",
            self.voltage_v(),
            self.current_a(),
            self.power_w(),
            self.energy,
            self.frequency_hz(),
            self.power_factor(),
        )
    }
}

// =============================================================================
// Pretty dump
// =============================================================================

/// Renders a human-readable report of a reply, for debug sinks and the CLI.
///
/// Not part of the parsing contract: best-effort output, unknown frames get
/// a one-line note.
pub fn describe(reply: &Reply) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "=== AC meter reply ===");

    match reply.function() {
        Some(FunctionCode::ReadInput) => match AcMetrics::from_reply(reply) {
            Ok(m) => {
                let _ = writeln!(out, "Voltage:      {:7.1} V", m.voltage_v());
                let _ = writeln!(out, "Current:      {:7.3} A", m.current_a());
                let _ = writeln!(out, "Power:        {:7.1} W", m.power_w());
                let _ = writeln!(out, "Energy:       {:7.3} kWh", m.energy as f32 / 1000.0);
                let _ = writeln!(out, "Frequency:    {:7.1} Hz", m.frequency_hz());
                let _ = writeln!(out, "Power factor: {:7.2}", m.power_factor());
                let _ = writeln!(out, "Alarm:        {}", if m.alarm_on() { "yes" } else { "no" });
            }
            Err(e) => {
                let _ = writeln!(out, "Malformed metrics frame: {e}");
            }
        },
        Some(FunctionCode::ReadHolding) => {
            let bytes = reply.bytes();
            if bytes.len() >= 7 && bytes[2] == HOLDINGS_BODY_LEN {
                let _ = writeln!(out, "Alarm threshold: {} W", be16(bytes, 3));
                let _ = writeln!(out, "Slave address:   {:#04x}", bytes[6]);
            } else {
                let _ = writeln!(out, "Partial holding-register frame");
            }
        }
        Some(FunctionCode::WriteSingle) => {
            let bytes = reply.bytes();
            if bytes.len() >= 6 {
                match be16(bytes, 2) {
                    frame::REG_SLAVE_ADDR => {
                        let _ = writeln!(out, "Slave address changed to {:#04x}", bytes[5]);
                    }
                    RHR_ALARM_THR => {
                        let _ = writeln!(out, "Alarm threshold changed to {} W", be16(bytes, 4));
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

    fn metrics_reply(addr: u8, regs: [u16; 10]) -> Reply {
        let mut bytes = vec![addr, 0x04, METRICS_BODY_LEN];
        for r in regs {
            bytes.extend_from_slice(&r.to_be_bytes());
        }
        crc::append(&mut bytes);
        Reply::from_bytes(bytes)
    }

    #[test]
    fn test_read_metrics_canonical_frame() {
        let req = read_metrics(0x01);
        assert_eq!(
            req.bytes(),
            &[0x01, 0x04, 0x00, 0x00, 0x00, 0x0A, 0x70, 0x0D]
        );
    }

    #[test]
    fn test_parse_metrics() {
        // 225.7 V, 23 mA, 23.0 W, 34 Wh, 50.0 Hz, pf 1.00, no alarm.
        let reply = metrics_reply(
            0x01,
            [
                0x08D1, 0x0017, 0x0000, 0x00E6, 0x0000, 0x0022, 0x0000, 0x01F4, 0x0064, 0x0000,
            ],
        );
        let m = AcMetrics::from_reply(&reply).unwrap();

        assert_eq!(m.voltage, 2257);
        assert_eq!(m.current, 23);
        assert_eq!(m.power, 230);
        assert_eq!(m.energy, 34);
        assert_eq!(m.frequency, 500);
        assert_eq!(m.pf, 100);
        assert!(!m.alarm_on());

        assert!((m.voltage_v() - 225.7).abs() < 0.01);
        assert!((m.current_a() - 0.023).abs() < 1e-6);
        assert!((m.power_w() - 23.0).abs() < 0.01);
        assert!((m.frequency_hz() - 50.0).abs() < 0.01);
        assert!((m.power_factor() - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_parse_32bit_low_word_first() {
        // Current of 0x0001_0002 mA must come from regs (low=0x0002, high=0x0001).
        let reply = metrics_reply(
            0x01,
            [0, 0x0002, 0x0001, 0, 0, 0, 0, 0, 0, 0],
        );
        let m = AcMetrics::from_reply(&reply).unwrap();
        assert_eq!(m.current, 0x0001_0002);
    }

    #[test]
    fn test_metrics_round_trip() {
        let m = AcMetrics {
            voltage: 2257,
            current: 70_000,
            power: 123_456,
            energy: 999_999,
            frequency: 499,
            pf: 87,
            alarm: ALARM_PRESENT,
        };
        let reply = m.to_reply(0x05);
        assert!(reply.is_valid());
        assert_eq!(AcMetrics::from_reply(&reply).unwrap(), m);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        let mut bytes = vec![0x01, 0x04, 0x10];
        bytes.extend_from_slice(&[0u8; 16]);
        crc::append(&mut bytes);
        let reply = Reply::from_bytes(bytes);

        assert!(matches!(
            AcMetrics::from_reply(&reply),
            Err(ProtoError::LengthMismatch { expected: 20, actual: 16 })
        ));
    }

    #[test]
    fn test_parse_rejects_wrong_function() {
        let mut bytes = vec![0x01, 0x03, METRICS_BODY_LEN];
        bytes.extend_from_slice(&[0u8; 20]);
        crc::append(&mut bytes);
        let reply = Reply::from_bytes(bytes);

        assert!(AcMetrics::from_reply(&reply).is_err());
    }

    #[test]
    fn test_describe_metrics() {
        let reply = metrics_reply(
            0x01,
            [
                0x08D1, 0x0017, 0x0000, 0x00E6, 0x0000, 0x0022, 0x0000, 0x01F4, 0x0064, 0x0000,
            ],
        );
        let text = describe(&reply);
        assert!(text.contains("225.7"));
        assert!(text.contains("50.0"));
    }
}
