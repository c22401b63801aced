// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Canned frames and a scripted meter simulator.

use emeter_proto::{ac, crc, dc, AcMetrics, DcMetrics, FunctionCode, Shunt};

/// Frames a payload with address, function and CRC.
pub fn framed(addr: u8, function: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(4 + payload.len());
    bytes.push(addr);
    bytes.push(function);
    bytes.extend_from_slice(payload);
    crc::append(&mut bytes);
    bytes
}

/// A full AC holding-block reply: alarm threshold + slave address.
pub fn ac_holdings_reply(reply_addr: u8, alarm_thr: u16, configured_addr: u8) -> Vec<u8> {
    let mut payload = vec![ac::HOLDINGS_BODY_LEN];
    payload.extend_from_slice(&alarm_thr.to_be_bytes());
    payload.extend_from_slice(&u16::from(configured_addr).to_be_bytes());
    framed(reply_addr, FunctionCode::ReadHolding.as_u8(), &payload)
}

/// A full DC holding-block reply.
pub fn dc_holdings_reply(
    reply_addr: u8,
    alarm_high: u16,
    alarm_low: u16,
    configured_addr: u8,
    shunt: Shunt,
) -> Vec<u8> {
    let mut payload = vec![dc::HOLDINGS_BODY_LEN];
    payload.extend_from_slice(&alarm_high.to_be_bytes());
    payload.extend_from_slice(&alarm_low.to_be_bytes());
    payload.extend_from_slice(&u16::from(configured_addr).to_be_bytes());
    payload.extend_from_slice(&shunt.code().to_be_bytes());
    framed(reply_addr, FunctionCode::ReadHolding.as_u8(), &payload)
}

/// An exception reply (`function | 0x80`, one-byte code).
pub fn exception_reply(addr: u8, error_function: u8, code: u8) -> Vec<u8> {
    framed(addr, error_function, &[code])
}

// =============================================================================
// Scripted AC meter
// =============================================================================

/// A scripted single-phase AC meter.
///
/// Answers metrics reads, holding reads, write echoes and energy resets the
/// way the hardware does: replies echo the address byte the request used,
/// so a catch-all probe is answered on the catch-all address while the
/// body carries the configured one.
#[derive(Debug, Clone)]
pub struct SimAcMeter {
    /// Configured slave address.
    pub addr: u8,
    /// Live metrics served on read-input requests.
    pub metrics: AcMetrics,
    /// Configured power alarm threshold.
    pub alarm_thr: u16,
}

impl SimAcMeter {
    /// A meter with plausible household readings.
    pub fn new(addr: u8) -> Self {
        Self {
            addr,
            metrics: AcMetrics {
                voltage: 2257,
                current: 23,
                power: 230,
                energy: 34,
                frequency: 500,
                pf: 100,
                alarm: 0,
            },
            alarm_thr: 2300,
        }
    }

    /// Produces the reply bytes for a request frame, `None` when the meter
    /// would stay silent (foreign address, broadcast, bad CRC).
    pub fn respond(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        if request.len() < 4 || !crc::verify(request) {
            return None;
        }
        let req_addr = request[0];
        if req_addr == emeter_proto::frame::ADDR_BROADCAST {
            return None;
        }
        if req_addr != self.addr && req_addr != emeter_proto::frame::ADDR_ANY {
            return None;
        }

        match FunctionCode::from_wire(request[1])? {
            FunctionCode::ReadInput => Some(self.metrics.to_reply(req_addr).bytes().to_vec()),
            FunctionCode::ReadHolding => {
                Some(ac_holdings_reply(req_addr, self.alarm_thr, self.addr))
            }
            FunctionCode::WriteSingle => {
                // Apply the write, then echo the request verbatim.
                if request.len() >= 8 {
                    let reg = u16::from_be_bytes([request[2], request[3]]);
                    let value = u16::from_be_bytes([request[4], request[5]]);
                    match reg {
                        emeter_proto::frame::REG_SLAVE_ADDR => self.addr = value as u8,
                        ac::RHR_ALARM_THR => self.alarm_thr = value,
                        _ => return Some(exception_reply(req_addr, 0x86, 0x02)),
                    }
                }
                Some(request.to_vec())
            }
            FunctionCode::ResetEnergy => {
                self.metrics.energy = 0;
                Some(framed(req_addr, FunctionCode::ResetEnergy.as_u8(), &[]))
            }
            _ => Some(exception_reply(req_addr, request[1] | 0x80, 0x01)),
        }
    }
}

/// A scripted DC meter, same contract as [`SimAcMeter`].
#[derive(Debug, Clone)]
pub struct SimDcMeter {
    /// Configured slave address.
    pub addr: u8,
    /// Live metrics served on read-input requests.
    pub metrics: DcMetrics,
    /// High-voltage alarm threshold.
    pub alarm_high: u16,
    /// Low-voltage alarm threshold.
    pub alarm_low: u16,
    /// Configured shunt range.
    pub shunt: Shunt,
}

impl SimDcMeter {
    /// A meter with plausible battery-bank readings.
    pub fn new(addr: u8) -> Self {
        Self {
            addr,
            metrics: DcMetrics {
                voltage: 1280,
                current: 250,
                power: 320,
                energy: 77,
                alarm_high: 0,
                alarm_low: 0,
            },
            alarm_high: 3000,
            alarm_low: 1000,
            shunt: Shunt::A100,
        }
    }

    /// Produces the reply bytes for a request frame, `None` for silence.
    pub fn respond(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        if request.len() < 4 || !crc::verify(request) {
            return None;
        }
        let req_addr = request[0];
        if req_addr == emeter_proto::frame::ADDR_BROADCAST {
            return None;
        }
        if req_addr != self.addr && req_addr != emeter_proto::frame::ADDR_ANY {
            return None;
        }

        match FunctionCode::from_wire(request[1])? {
            FunctionCode::ReadInput => Some(self.metrics.to_reply(req_addr).bytes().to_vec()),
            FunctionCode::ReadHolding => Some(dc_holdings_reply(
                req_addr,
                self.alarm_high,
                self.alarm_low,
                self.addr,
                self.shunt,
            )),
            FunctionCode::WriteSingle => {
                if request.len() >= 8 {
                    let reg = u16::from_be_bytes([request[2], request[3]]);
                    let value = u16::from_be_bytes([request[4], request[5]]);
                    match reg {
                        dc::RHR_ALARM_HIGH => self.alarm_high = value,
                        dc::RHR_ALARM_LOW => self.alarm_low = value,
                        emeter_proto::frame::REG_SLAVE_ADDR => self.addr = value as u8,
                        dc::RHR_SHUNT => match Shunt::from_code(value) {
                            Some(s) => self.shunt = s,
                            None => return Some(exception_reply(req_addr, 0x86, 0x03)),
                        },
                        _ => return Some(exception_reply(req_addr, 0x86, 0x02)),
                    }
                }
                Some(request.to_vec())
            }
            FunctionCode::ResetEnergy => {
                self.metrics.energy = 0;
                Some(framed(req_addr, FunctionCode::ResetEnergy.as_u8(), &[]))
            }
            _ => Some(exception_reply(req_addr, request[1] | 0x80, 0x01)),
        }
    }
}
