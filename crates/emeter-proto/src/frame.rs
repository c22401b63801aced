// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Frame codec: request builders and reply accessors.
//!
//! A [`Request`] owns a fully framed byte sequence (CRC already appended)
//! together with the `wait_for_reply` flag that drives the half-duplex
//! arbitration in `emeter-bus`. A [`Reply`] owns raw bytes read off the wire
//! and derives its `valid` verdict from CRC verification at construction.
//!
//! Ownership follows the transit model of the library: requests move into a
//! port's transmit queue and are destroyed after the bytes are written;
//! replies are created in the receive path and passed to handlers by
//! reference.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crc;

// =============================================================================
// Slave addressing
// =============================================================================

/// Broadcast address. Slaves act on the request but never answer.
pub const ADDR_BROADCAST: u8 = 0x00;
/// Lowest assignable slave address.
pub const ADDR_MIN: u8 = 0x01;
/// Highest assignable slave address.
pub const ADDR_MAX: u8 = 0xF7;
/// Catch-all address every meter answers to.
///
/// Usable only when exactly one device sits on the bus, e.g. while
/// provisioning a factory-fresh meter whose address is unknown.
pub const ADDR_ANY: u8 = 0xF8;

/// Returns `true` for an address a meter may be assigned (`0x01..=0xF7`).
#[inline]
pub const fn is_assignable_addr(addr: u8) -> bool {
    addr >= ADDR_MIN && addr <= ADDR_MAX
}

// =============================================================================
// Function codes
// =============================================================================

/// Function codes of the vendor MODBUS dialect.
///
/// The high bit marks an exception reply; the low seven bits echo the
/// function that failed. Only the five request codes are ever transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read holding (read/write) registers.
    ReadHolding = 0x03,
    /// Read input (read-only) registers.
    ReadInput = 0x04,
    /// Write a single holding register.
    WriteSingle = 0x06,
    /// Factory calibration (passthrough only).
    Calibrate = 0x41,
    /// Reset the cumulative energy counter.
    ResetEnergy = 0x42,
    /// Exception reply to [`ReadHolding`](Self::ReadHolding).
    ReadHoldingError = 0x83,
    /// Exception reply to [`ReadInput`](Self::ReadInput).
    ReadInputError = 0x84,
    /// Exception reply to [`WriteSingle`](Self::WriteSingle).
    WriteError = 0x86,
    /// Exception reply to [`Calibrate`](Self::Calibrate).
    CalibrateError = 0xC1,
    /// Exception reply to [`ResetEnergy`](Self::ResetEnergy).
    ResetEnergyError = 0xC2,
}

impl FunctionCode {
    /// Decodes a wire byte, `None` for codes outside the dialect.
    pub const fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0x03 => Some(Self::ReadHolding),
            0x04 => Some(Self::ReadInput),
            0x06 => Some(Self::WriteSingle),
            0x41 => Some(Self::Calibrate),
            0x42 => Some(Self::ResetEnergy),
            0x83 => Some(Self::ReadHoldingError),
            0x84 => Some(Self::ReadInputError),
            0x86 => Some(Self::WriteError),
            0xC1 => Some(Self::CalibrateError),
            0xC2 => Some(Self::ResetEnergyError),
            _ => None,
        }
    }

    /// Returns the wire byte.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns `true` if the high (exception) bit is set.
    #[inline]
    pub const fn is_exception(self) -> bool {
        self.as_u8() & 0x80 != 0
    }

    /// Short name for logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadHolding => "read-holding",
            Self::ReadInput => "read-input",
            Self::WriteSingle => "write-single",
            Self::Calibrate => "calibrate",
            Self::ResetEnergy => "reset-energy",
            Self::ReadHoldingError => "read-holding-error",
            Self::ReadInputError => "read-input-error",
            Self::WriteError => "write-error",
            Self::CalibrateError => "calibrate-error",
            Self::ResetEnergyError => "reset-energy-error",
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Shared holding registers
// =============================================================================

/// Holding register storing the slave address. Same index on both models.
pub const REG_SLAVE_ADDR: u16 = 0x0002;

/// Factory calibration password.
pub const CAL_PASSWORD: u16 = 0x3721;

/// Length of the generic 8-byte command frame.
pub const GENERIC_FRAME_LEN: usize = 8;
/// Length of the short energy-reset frame.
pub const RESET_FRAME_LEN: usize = 4;
/// Smallest frame that can carry addr, function and CRC.
pub const MIN_FRAME_LEN: usize = 4;

// =============================================================================
// Request
// =============================================================================

/// An outbound frame, CRC appended, ready for the transmit queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    bytes: Vec<u8>,
    wait_for_reply: bool,
}

impl Request {
    /// Wraps already framed bytes.
    ///
    /// Prefer the typed builders ([`command`], [`reset_energy`], the model
    /// modules); this exists for passthrough scenarios.
    pub fn from_bytes(bytes: Vec<u8>, wait_for_reply: bool) -> Self {
        Self {
            bytes,
            wait_for_reply,
        }
    }

    /// The framed bytes, CRC included.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether the bus arbitrator should hold the line for a reply.
    #[inline]
    pub fn wait_for_reply(&self) -> bool {
        self.wait_for_reply
    }

    /// Target slave address byte.
    #[inline]
    pub fn slave_addr(&self) -> u8 {
        self.bytes.first().copied().unwrap_or(ADDR_BROADCAST)
    }

    /// Raw function byte.
    #[inline]
    pub fn function_raw(&self) -> u8 {
        self.bytes.get(1).copied().unwrap_or(0)
    }

    /// Frame length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` when the frame holds no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Hex dump for debug logging.
    pub fn hex(&self) -> String {
        hex_dump(&self.bytes)
    }
}

// =============================================================================
// Reply
// =============================================================================

/// An inbound frame as read off the wire.
///
/// The CRC verdict is computed once at construction; everything downstream
/// branches on [`is_valid`](Self::is_valid) instead of re-hashing the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    bytes: Vec<u8>,
    valid: bool,
}

impl Reply {
    /// Takes ownership of received bytes and computes the CRC verdict.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let valid = bytes.len() >= MIN_FRAME_LEN && crc::verify(&bytes);
        Self { bytes, valid }
    }

    /// Raw frame bytes, CRC included.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// `true` when the frame is long enough and its CRC checks out.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Slave address byte (`0x00` for an empty frame).
    #[inline]
    pub fn slave_addr(&self) -> u8 {
        self.bytes.first().copied().unwrap_or(ADDR_BROADCAST)
    }

    /// Raw function byte.
    #[inline]
    pub fn function_raw(&self) -> u8 {
        self.bytes.get(1).copied().unwrap_or(0)
    }

    /// Decoded function code, `None` outside the dialect.
    #[inline]
    pub fn function(&self) -> Option<FunctionCode> {
        FunctionCode::from_wire(self.function_raw())
    }

    /// `true` when the function byte carries the exception bit.
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_raw() & 0x80 != 0
    }

    /// The one-byte exception code of an error reply.
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            self.bytes.get(2).copied()
        } else {
            None
        }
    }

    /// Frame payload: everything between the function byte and the CRC.
    pub fn payload(&self) -> &[u8] {
        if self.bytes.len() < MIN_FRAME_LEN {
            return &[];
        }
        &self.bytes[2..self.bytes.len() - 2]
    }

    /// Frame length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` when the frame holds no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Hex dump for debug logging.
    pub fn hex(&self) -> String {
        hex_dump(&self.bytes)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reply[addr={:#04x} fn={:#04x} len={} crc={}]",
            self.slave_addr(),
            self.function_raw(),
            self.len(),
            if self.valid { "ok" } else { "bad" },
        )
    }
}

/// Reads a big-endian u16 at byte offset `at`. Callers length-check first.
pub(crate) fn be16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

/// Reads a 32-bit quantity spanning two registers, low word first.
pub(crate) fn reg_pair(bytes: &[u8], low_at: usize) -> u32 {
    u32::from(be16(bytes, low_at)) | u32::from(be16(bytes, low_at + 2)) << 16
}

fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{b:02x}"));
    }
    out
}

// =============================================================================
// Builders
// =============================================================================

/// Builds the generic 8-byte command frame: addr, function, register,
/// value, CRC. Big-endian register and value, little-endian CRC.
///
/// `wait_for_reply` is derived from the address: broadcasts never answer.
pub fn command(fc: FunctionCode, reg: u16, value: u16, addr: u8) -> Request {
    let mut bytes = Vec::with_capacity(GENERIC_FRAME_LEN);
    bytes.push(addr);
    bytes.push(fc.as_u8());
    bytes.extend_from_slice(&reg.to_be_bytes());
    bytes.extend_from_slice(&value.to_be_bytes());
    crc::append(&mut bytes);

    Request {
        bytes,
        wait_for_reply: addr != ADDR_BROADCAST,
    }
}

/// Builds the short energy-counter reset frame (no payload).
pub fn reset_energy(addr: u8) -> Request {
    let mut bytes = Vec::with_capacity(RESET_FRAME_LEN);
    bytes.push(addr);
    bytes.push(FunctionCode::ResetEnergy.as_u8());
    crc::append(&mut bytes);

    Request {
        bytes,
        wait_for_reply: addr != ADDR_BROADCAST,
    }
}

/// Builds a write to the slave-address holding register.
///
/// An out-of-range `new_addr` (outside `0x01..=0xF8`) is replaced by
/// `current_addr`, so the request degenerates to rewriting the device's
/// address with itself instead of transmitting a malformed write.
pub fn set_slave_addr(new_addr: u8, current_addr: u8) -> Request {
    let addr = if new_addr < ADDR_MIN || new_addr > ADDR_ANY {
        current_addr
    } else {
        new_addr
    };

    command(
        FunctionCode::WriteSingle,
        REG_SLAVE_ADDR,
        u16::from(addr),
        current_addr,
    )
}

/// Builds the factory calibration frame, addressed through the catch-all
/// address with the vendor password. The library forwards it verbatim and
/// interprets nothing beyond the generic exception path.
pub fn calibrate() -> Request {
    let mut bytes = Vec::with_capacity(6);
    bytes.push(ADDR_ANY);
    bytes.push(FunctionCode::Calibrate.as_u8());
    bytes.extend_from_slice(&CAL_PASSWORD.to_be_bytes());
    crc::append(&mut bytes);

    Request {
        bytes,
        wait_for_reply: true,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_code_round_trip() {
        for byte in [0x03u8, 0x04, 0x06, 0x41, 0x42, 0x83, 0x84, 0x86, 0xC1, 0xC2] {
            let fc = FunctionCode::from_wire(byte).unwrap();
            assert_eq!(fc.as_u8(), byte);
        }
        assert!(FunctionCode::from_wire(0x10).is_none());
        assert!(FunctionCode::from_wire(0xFF).is_none());
    }

    #[test]
    fn test_exception_bit() {
        assert!(!FunctionCode::ReadInput.is_exception());
        assert!(FunctionCode::ReadInputError.is_exception());
        assert!(FunctionCode::ResetEnergyError.is_exception());
    }

    #[test]
    fn test_command_frame_layout() {
        let req = command(FunctionCode::ReadInput, 0x0000, 0x000A, 0x01);
        assert_eq!(req.len(), GENERIC_FRAME_LEN);
        assert_eq!(
            req.bytes(),
            &[0x01, 0x04, 0x00, 0x00, 0x00, 0x0A, 0x70, 0x0D]
        );
        assert!(req.wait_for_reply());
        assert_eq!(req.slave_addr(), 0x01);
    }

    #[test]
    fn test_broadcast_never_waits() {
        let req = command(FunctionCode::WriteSingle, REG_SLAVE_ADDR, 0x05, ADDR_BROADCAST);
        assert!(!req.wait_for_reply());
    }

    #[test]
    fn test_reset_energy_frame() {
        let req = reset_energy(0x10);
        assert_eq!(req.len(), RESET_FRAME_LEN);
        assert_eq!(req.bytes()[0], 0x10);
        assert_eq!(req.bytes()[1], 0x42);
        assert!(crc::verify(req.bytes()));
    }

    #[test]
    fn test_set_slave_addr_clamps_to_noop() {
        // 0x00 and 0xFF are not assignable: the frame rewrites the current
        // address with itself instead of going out malformed.
        for bogus in [0x00u8, 0xFF] {
            let req = set_slave_addr(bogus, 0x07);
            assert_eq!(req.bytes()[0], 0x07);
            assert_eq!(&req.bytes()[2..6], &[0x00, 0x02, 0x00, 0x07]);
        }

        let req = set_slave_addr(0x0A, 0x07);
        assert_eq!(&req.bytes()[2..6], &[0x00, 0x02, 0x00, 0x0A]);
    }

    #[test]
    fn test_reply_crc_verdict() {
        let good = Reply::from_bytes(vec![0x01, 0x42, 0x80, 0x11]);
        assert!(crc::verify(good.bytes()) == good.is_valid());

        let mut bytes = vec![0x01, 0x04, 0x02, 0x00, 0x2A];
        crc::append(&mut bytes);
        let reply = Reply::from_bytes(bytes);
        assert!(reply.is_valid());
        assert_eq!(reply.slave_addr(), 0x01);
        assert_eq!(reply.function(), Some(FunctionCode::ReadInput));
        assert_eq!(reply.payload(), &[0x02, 0x00, 0x2A]);

        let truncated = Reply::from_bytes(vec![0x01, 0x04]);
        assert!(!truncated.is_valid());
        assert_eq!(truncated.payload(), &[] as &[u8]);
    }

    #[test]
    fn test_reply_exception_accessors() {
        let mut bytes = vec![0x01, 0x84, 0x02];
        crc::append(&mut bytes);
        let reply = Reply::from_bytes(bytes);

        assert!(reply.is_valid());
        assert!(reply.is_exception());
        assert_eq!(reply.function(), Some(FunctionCode::ReadInputError));
        assert_eq!(reply.exception_code(), Some(0x02));
    }

    #[test]
    fn test_hex_dump() {
        let req = reset_energy(0x01);
        let hex = req.hex();
        assert!(hex.starts_with("01 42"));
    }
}
