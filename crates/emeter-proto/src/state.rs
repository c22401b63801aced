// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Device model tags and the uniform meter state.
//!
//! The two meter variants share one state shape, dispatching on a
//! [`MeterModel`] tag: register maps and reply parsing differ, the
//! surrounding bookkeeping (address, error latch, request/reply stamps)
//! does not. [`MeterState::apply_reply`] is the single entry point through
//! which received frames mutate device state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ac::{self, AcMetrics};
use crate::dc::{self, DcMetrics, Shunt};
use crate::error::ProtoError;
use crate::frame::{self, be16, FunctionCode, Reply, Request};

/// The meter refreshes its internal registers roughly once per second;
/// polling faster returns the same values.
pub const REFRESH_PERIOD_MS: u64 = 1000;

/// Data older than two refresh periods counts as stale.
pub const STALE_AFTER_US: u64 = 2 * REFRESH_PERIOD_MS * 1000;

// =============================================================================
// Model tag
// =============================================================================

/// Supported meter models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeterModel {
    /// Single-phase AC meter, hardware revision v3. 9600 baud, 8N1.
    AcV3,
    /// DC meter with external shunt. 9600 baud, 8N2.
    Dc,
}

impl MeterModel {
    /// Model name for logs and config files.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AcV3 => "ac-v3",
            Self::Dc => "dc",
        }
    }

    /// Builds the read-input request for this model's metrics window.
    pub fn read_metrics(self, addr: u8) -> Request {
        match self {
            Self::AcV3 => ac::read_metrics(addr),
            Self::Dc => dc::read_metrics(addr),
        }
    }

    /// Builds the read-holding request for this model's settings block.
    pub fn read_holdings(self, addr: u8) -> Request {
        match self {
            Self::AcV3 => ac::read_holdings(addr),
            Self::Dc => dc::read_holdings(addr),
        }
    }

    /// Expected payload length of a full metrics reply, in bytes.
    pub const fn metrics_body_len(self) -> u8 {
        match self {
            Self::AcV3 => ac::METRICS_BODY_LEN,
            Self::Dc => dc::METRICS_BODY_LEN,
        }
    }

    /// Renders the model-specific pretty dump of a reply.
    pub fn describe(self, reply: &Reply) -> String {
        match self {
            Self::AcV3 => ac::describe(reply),
            Self::Dc => dc::describe(reply),
        }
    }
}

impl fmt::Display for MeterModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Faults
// =============================================================================

/// What the last failed exchange reported.
///
/// The first four variants are exception codes sent by the device itself;
/// [`Parse`](Self::Parse) means the reply arrived but did not match the
/// model's register map. A clean exchange clears the latch to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeterFault {
    /// Device rejected the function code (exception 0x01).
    IllegalFunction,
    /// Device rejected the register address (exception 0x02).
    IllegalAddress,
    /// Device rejected the data value (exception 0x03).
    IllegalData,
    /// Device-internal failure (exception 0x04).
    SlaveFailure,
    /// Device sent an exception code outside the documented set.
    Exception(u8),
    /// The reply could not be parsed against the register map.
    Parse,
}

impl MeterFault {
    /// Maps a wire exception code.
    pub const fn from_exception(code: u8) -> Self {
        match code {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalAddress,
            0x03 => Self::IllegalData,
            0x04 => Self::SlaveFailure,
            other => Self::Exception(other),
        }
    }
}

impl fmt::Display for MeterFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalFunction => write!(f, "illegal function"),
            Self::IllegalAddress => write!(f, "illegal address"),
            Self::IllegalData => write!(f, "illegal data"),
            Self::SlaveFailure => write!(f, "slave failure"),
            Self::Exception(code) => write!(f, "exception {code:#04x}"),
            Self::Parse => write!(f, "parse error"),
        }
    }
}

// =============================================================================
// Metrics and settings, model-tagged
// =============================================================================

/// Last-known metrics, shaped by the model tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum Metrics {
    /// AC metrics window.
    Ac(AcMetrics),
    /// DC metrics window.
    Dc(DcMetrics),
}

impl Metrics {
    /// Voltage in volts.
    pub fn voltage_v(&self) -> f32 {
        match self {
            Self::Ac(m) => m.voltage_v(),
            Self::Dc(m) => m.voltage_v(),
        }
    }

    /// Current in amperes.
    pub fn current_a(&self) -> f32 {
        match self {
            Self::Ac(m) => m.current_a(),
            Self::Dc(m) => m.current_a(),
        }
    }

    /// Power in watts.
    pub fn power_w(&self) -> f32 {
        match self {
            Self::Ac(m) => m.power_w(),
            Self::Dc(m) => m.power_w(),
        }
    }

    /// Cumulative energy in watt-hours.
    pub fn energy_wh(&self) -> u32 {
        match self {
            Self::Ac(m) => m.energy,
            Self::Dc(m) => m.energy,
        }
    }

    /// The AC window, if this is an AC meter.
    pub fn as_ac(&self) -> Option<&AcMetrics> {
        match self {
            Self::Ac(m) => Some(m),
            Self::Dc(_) => None,
        }
    }

    /// The DC window, if this is a DC meter.
    pub fn as_dc(&self) -> Option<&DcMetrics> {
        match self {
            Self::Ac(_) => None,
            Self::Dc(m) => Some(m),
        }
    }

    fn zero_energy(&mut self) {
        match self {
            Self::Ac(m) => m.energy = 0,
            Self::Dc(m) => m.energy = 0,
        }
    }
}

/// Configured device settings mirrored from the holding registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum MeterSettings {
    /// AC settings block.
    Ac {
        /// Power alarm threshold in watts.
        alarm_threshold: u16,
    },
    /// DC settings block.
    Dc {
        /// High-voltage alarm threshold, 0.01 V per LSB.
        alarm_high: u16,
        /// Low-voltage alarm threshold, 0.01 V per LSB.
        alarm_low: u16,
        /// Configured shunt range.
        shunt: Shunt,
    },
}

// =============================================================================
// MeterState
// =============================================================================

/// The full mutable state of one meter.
///
/// Timestamps are monotonic microseconds supplied by the caller, so the
/// parser stays clock-free and deterministic under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterState {
    /// Model tag; fixed for the lifetime of the device object.
    pub model: MeterModel,
    /// Configured slave address. Updated when a holding read or a
    /// write-single echo reports a different one.
    pub addr: u8,
    /// Fault latched by the most recent exchange, `None` when it was clean.
    pub last_error: Option<MeterFault>,
    /// When the last request was enqueued, µs monotonic.
    pub last_request_us: u64,
    /// When the last successfully parsed reply arrived, µs monotonic.
    pub last_reply_us: u64,
    /// Last-known metrics window.
    pub metrics: Metrics,
    /// Mirrored holding-register settings.
    pub settings: MeterSettings,
}

impl MeterState {
    /// Creates a zeroed state for the given model and address.
    pub fn new(model: MeterModel, addr: u8) -> Self {
        let (metrics, settings) = match model {
            MeterModel::AcV3 => (
                Metrics::Ac(AcMetrics::default()),
                MeterSettings::Ac { alarm_threshold: 0 },
            ),
            MeterModel::Dc => (
                Metrics::Dc(DcMetrics::default()),
                MeterSettings::Dc {
                    alarm_high: 0,
                    alarm_low: 0,
                    shunt: Shunt::default(),
                },
            ),
        };

        Self {
            model,
            addr,
            last_error: None,
            last_request_us: 0,
            last_reply_us: 0,
            metrics,
            settings,
        }
    }

    /// Stamps the request time; call when a poll is enqueued.
    #[inline]
    pub fn mark_request(&mut self, now_us: u64) {
        self.last_request_us = now_us;
    }

    /// Age of the last good reply in milliseconds.
    #[inline]
    pub fn data_age_ms(&self, now_us: u64) -> u64 {
        now_us.saturating_sub(self.last_reply_us) / 1000
    }

    /// `true` when no good reply arrived within two refresh periods.
    #[inline]
    pub fn is_stale(&self, now_us: u64) -> bool {
        now_us.saturating_sub(self.last_reply_us) > STALE_AFTER_US
    }

    /// Applies a received reply to the state.
    ///
    /// Frames with a bad CRC or a foreign slave address are rejected without
    /// touching anything. An exception reply latches the device's fault code
    /// and counts as delivered, but neither metrics nor the reply stamp move.
    /// Every other recognized frame updates its slice of the state, clears
    /// the fault latch and advances `last_reply_us`.
    pub fn apply_reply(&mut self, reply: &Reply, now_us: u64) -> Result<(), ProtoError> {
        if !reply.is_valid() {
            return Err(ProtoError::BadCrc);
        }
        if reply.slave_addr() != self.addr {
            return Err(ProtoError::AddressMismatch {
                expected: self.addr,
                actual: reply.slave_addr(),
            });
        }

        let Some(fc) = reply.function() else {
            self.last_error = Some(MeterFault::Parse);
            return Err(ProtoError::UnknownFunction(reply.function_raw()));
        };

        if fc.is_exception() {
            let code = reply.exception_code().unwrap_or(0);
            self.last_error = Some(MeterFault::from_exception(code));
            tracing::debug!(addr = self.addr, %fc, code, "meter reported exception");
            return Ok(());
        }

        match fc {
            FunctionCode::ReadInput => {
                if let Err(e) = self.apply_metrics(reply) {
                    self.last_error = Some(MeterFault::Parse);
                    return Err(e);
                }
            }
            FunctionCode::ReadHolding => self.apply_holdings(reply),
            FunctionCode::WriteSingle => self.apply_write_echo(reply),
            FunctionCode::ResetEnergy => self.metrics.zero_energy(),
            FunctionCode::Calibrate => {}
            // Exception codes were handled above.
            _ => {}
        }

        self.last_error = None;
        self.last_reply_us = now_us;
        Ok(())
    }

    fn apply_metrics(&mut self, reply: &Reply) -> Result<(), ProtoError> {
        match self.model {
            MeterModel::AcV3 => {
                self.metrics = Metrics::Ac(AcMetrics::from_reply(reply)?);
            }
            MeterModel::Dc => {
                self.metrics = Metrics::Dc(DcMetrics::from_reply(reply)?);
            }
        }
        Ok(())
    }

    /// Mirrors a full holding-block image into the settings.
    ///
    /// Partial images are ignored: the device answers single-register reads
    /// with the same shape, and those cannot be told apart reliably.
    fn apply_holdings(&mut self, reply: &Reply) {
        let bytes = reply.bytes();

        match self.model {
            MeterModel::AcV3 => {
                if bytes.len() >= 3 + ac::HOLDINGS_BODY_LEN as usize + 2
                    && bytes[2] == ac::HOLDINGS_BODY_LEN
                {
                    self.settings = MeterSettings::Ac {
                        alarm_threshold: be16(bytes, 3),
                    };
                    self.addr = bytes[6];
                }
            }
            MeterModel::Dc => {
                if bytes.len() >= 3 + dc::HOLDINGS_BODY_LEN as usize + 2
                    && bytes[2] == dc::HOLDINGS_BODY_LEN
                {
                    let shunt = Shunt::from_code(be16(bytes, 9));
                    if let MeterSettings::Dc {
                        alarm_high,
                        alarm_low,
                        shunt: shunt_slot,
                    } = &mut self.settings
                    {
                        *alarm_high = be16(bytes, 3);
                        *alarm_low = be16(bytes, 5);
                        if let Some(s) = shunt {
                            *shunt_slot = s;
                        }
                    }
                    self.addr = bytes[8];
                }
            }
        }
    }

    /// Mirrors a write-single echo into the settings, selected by the echoed
    /// register index.
    fn apply_write_echo(&mut self, reply: &Reply) {
        let bytes = reply.bytes();
        if bytes.len() < 6 {
            return;
        }
        let reg = be16(bytes, 2);
        let value = be16(bytes, 4);

        match self.model {
            MeterModel::AcV3 => match reg {
                frame::REG_SLAVE_ADDR => self.addr = bytes[5],
                ac::RHR_ALARM_THR => {
                    self.settings = MeterSettings::Ac {
                        alarm_threshold: value,
                    };
                }
                _ => {}
            },
            MeterModel::Dc => {
                let MeterSettings::Dc {
                    alarm_high,
                    alarm_low,
                    shunt,
                } = &mut self.settings
                else {
                    return;
                };
                match reg {
                    dc::RHR_ALARM_HIGH => *alarm_high = value,
                    dc::RHR_ALARM_LOW => *alarm_low = value,
                    frame::REG_SLAVE_ADDR => self.addr = bytes[5],
                    dc::RHR_SHUNT => {
                        if let Some(s) = Shunt::from_code(value) {
                            *shunt = s;
                        } else {
                            tracing::debug!(value, "ignoring unknown shunt code in write echo");
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc;

    fn reply(bytes: Vec<u8>) -> Reply {
        let mut b = bytes;
        crc::append(&mut b);
        Reply::from_bytes(b)
    }

    fn ac_state(addr: u8) -> MeterState {
        MeterState::new(MeterModel::AcV3, addr)
    }

    #[test]
    fn test_new_state_is_zeroed() {
        let st = ac_state(0x01);
        assert_eq!(st.addr, 0x01);
        assert_eq!(st.last_error, None);
        assert_eq!(st.metrics.energy_wh(), 0);
        assert_eq!(st.last_reply_us, 0);
    }

    #[test]
    fn test_metrics_reply_updates_state() {
        let mut st = ac_state(0x01);
        let m = AcMetrics {
            voltage: 2257,
            current: 23,
            power: 230,
            energy: 34,
            frequency: 500,
            pf: 100,
            alarm: 0,
        };
        st.apply_reply(&m.to_reply(0x01), 5_000_000).unwrap();

        assert_eq!(st.metrics.as_ac(), Some(&m));
        assert_eq!(st.last_error, None);
        assert_eq!(st.last_reply_us, 5_000_000);
    }

    #[test]
    fn test_bad_crc_rejected_without_side_effects() {
        let mut st = ac_state(0x01);
        let m = AcMetrics {
            voltage: 100,
            ..AcMetrics::default()
        };
        let mut bytes = m.to_reply(0x01).bytes().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let result = st.apply_reply(&Reply::from_bytes(bytes), 1_000);
        assert_eq!(result, Err(ProtoError::BadCrc));
        assert_eq!(st.metrics.as_ac().unwrap().voltage, 0);
        assert_eq!(st.last_error, None);
        assert_eq!(st.last_reply_us, 0);
    }

    #[test]
    fn test_foreign_address_rejected() {
        let mut st = ac_state(0x01);
        let m = AcMetrics::default();
        let result = st.apply_reply(&m.to_reply(0x02), 1_000);
        assert_eq!(
            result,
            Err(ProtoError::AddressMismatch {
                expected: 0x01,
                actual: 0x02
            })
        );
        assert_eq!(st.last_reply_us, 0);
    }

    #[test]
    fn test_length_mismatch_latches_parse_fault() {
        let mut st = ac_state(0x01);
        // DC-sized body against an AC model.
        let mut bytes = vec![0x01, 0x04, 0x10];
        bytes.extend_from_slice(&[0u8; 16]);
        let result = st.apply_reply(&reply(bytes), 1_000);

        assert!(matches!(result, Err(ProtoError::LengthMismatch { .. })));
        assert_eq!(st.last_error, Some(MeterFault::Parse));
        assert_eq!(st.last_reply_us, 0);
    }

    #[test]
    fn test_exception_latches_fault_without_reply_stamp() {
        let mut st = ac_state(0x01);
        let result = st.apply_reply(&reply(vec![0x01, 0x84, 0x02]), 9_000);

        assert_eq!(result, Ok(()));
        assert_eq!(st.last_error, Some(MeterFault::IllegalAddress));
        assert_eq!(st.last_reply_us, 0, "exception must not refresh the data stamp");
    }

    #[test]
    fn test_ac_holdings_update_threshold_and_addr() {
        // Probe through the catch-all address: the reply body carries the
        // device's real address, which replaces the provisional one.
        let mut st = ac_state(frame::ADDR_ANY);
        let body = vec![frame::ADDR_ANY, 0x03, 0x04, 0x07, 0xD0, 0x00, 0x0A];
        st.apply_reply(&reply(body), 1_000).unwrap();

        assert_eq!(st.addr, 0x0A);
        assert_eq!(
            st.settings,
            MeterSettings::Ac {
                alarm_threshold: 2000
            }
        );
    }

    #[test]
    fn test_dc_holdings_update_settings() {
        let mut st = MeterState::new(MeterModel::Dc, 0x0B);
        // alarm_high=3000, alarm_low=700, addr=0x0B, shunt code=2.
        let body = vec![
            0x0B, 0x03, 0x08, 0x0B, 0xB8, 0x02, 0xBC, 0x00, 0x0B, 0x00, 0x02,
        ];
        st.apply_reply(&reply(body), 1_000).unwrap();

        assert_eq!(
            st.settings,
            MeterSettings::Dc {
                alarm_high: 3000,
                alarm_low: 700,
                shunt: Shunt::A200,
            }
        );
    }

    #[test]
    fn test_write_echo_mirrors_address() {
        let mut st = ac_state(0x01);
        let body = vec![0x01, 0x06, 0x00, 0x02, 0x00, 0x15];
        st.apply_reply(&reply(body), 1_000).unwrap();
        assert_eq!(st.addr, 0x15);
    }

    #[test]
    fn test_write_echo_mirrors_dc_shunt() {
        let mut st = MeterState::new(MeterModel::Dc, 0x02);
        let body = vec![0x02, 0x06, 0x00, 0x03, 0x00, 0x01];
        st.apply_reply(&reply(body), 1_000).unwrap();
        assert_eq!(
            st.settings,
            MeterSettings::Dc {
                alarm_high: 0,
                alarm_low: 0,
                shunt: Shunt::A50,
            }
        );
    }

    #[test]
    fn test_reset_energy_echo_zeroes_counter() {
        let mut st = ac_state(0x01);
        if let Metrics::Ac(m) = &mut st.metrics {
            m.energy = 4242;
        }
        st.apply_reply(&reply(vec![0x01, 0x42]), 1_000).unwrap();
        assert_eq!(st.metrics.energy_wh(), 0);
    }

    #[test]
    fn test_staleness() {
        let mut st = ac_state(0x01);
        st.last_reply_us = 1_000_000;

        assert!(!st.is_stale(1_500_000));
        assert!(!st.is_stale(3_000_000));
        assert!(st.is_stale(3_000_001 + 1));
        assert_eq!(st.data_age_ms(2_000_000), 1000);
    }

    #[test]
    fn test_unknown_function_rejected() {
        let mut st = ac_state(0x01);
        let result = st.apply_reply(&reply(vec![0x01, 0x10, 0x00]), 1_000);
        assert_eq!(result, Err(ProtoError::UnknownFunction(0x10)));
        assert_eq!(st.last_error, Some(MeterFault::Parse));
    }

    #[test]
    fn test_state_serializes() {
        let st = MeterState::new(MeterModel::Dc, 0x05);
        let json = serde_json::to_string(&st).unwrap();
        assert!(json.contains("\"model\""));
        let back: MeterState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, st);
    }
}
