// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Protocol integration tests
//!
//! Wire-level checks against the vendor dialect: canonical frames, the AC
//! and DC register maps, the catch-all provisioning flow and the write
//! echo mirroring.

use emeter_proto::{
    ac, crc, dc, frame, FunctionCode, MeterFault, MeterModel, MeterSettings, MeterState, Reply,
    Shunt,
};
use emeter_tests::common::{ac_holdings_reply, dc_holdings_reply, exception_reply, framed};

// =============================================================================
// Canonical frames
// =============================================================================

#[test]
fn test_canonical_ac_metrics_request() {
    // The vendor-documented "read 10 input registers from addr 0x01" frame,
    // CRC little-endian on the wire.
    let req = ac::read_metrics(0x01);
    assert_eq!(
        req.bytes(),
        &[0x01, 0x04, 0x00, 0x00, 0x00, 0x0A, 0x70, 0x0D]
    );
    assert!(req.wait_for_reply());
}

#[test]
fn test_every_builder_emits_a_valid_frame() {
    let requests = [
        ac::read_metrics(0x01),
        ac::read_holdings(frame::ADDR_ANY),
        ac::set_alarm_threshold(2000, 0x01),
        dc::read_metrics(0x02),
        dc::read_holdings(0x02),
        dc::set_alarm_high(3000, 0x02),
        dc::set_alarm_low(900, 0x02),
        dc::set_shunt(Shunt::A300, 0x02),
        frame::set_slave_addr(0x10, frame::ADDR_ANY),
        frame::reset_energy(0x01),
        frame::calibrate(),
    ];

    for req in &requests {
        assert!(
            crc::verify(req.bytes()),
            "builder emitted bad CRC: {}",
            req.hex()
        );
    }
}

#[test]
fn test_request_fields_survive_framing() {
    // Parse back what the builder produced: the round-trip law for the
    // generic command frame.
    let req = frame::command(FunctionCode::WriteSingle, 0x0002, 0x0042, 0x11);
    let reply = Reply::from_bytes(req.bytes().to_vec());

    assert!(reply.is_valid());
    assert_eq!(reply.slave_addr(), 0x11);
    assert_eq!(reply.function(), Some(FunctionCode::WriteSingle));
    assert_eq!(reply.payload(), &[0x00, 0x02, 0x00, 0x42]);
}

// =============================================================================
// AC metrics parsing
// =============================================================================

#[test]
fn test_ac_metrics_reply_parses_to_expected_values() {
    // 225.7 V, 0.023 A, 23.0 W, 34 Wh, 50.0 Hz, pf 1.00, alarm off.
    // 32-bit quantities are two big-endian words, low word first.
    let body: [u8; 21] = [
        0x14, // 20 payload bytes
        0x08, 0xD1, // voltage
        0x00, 0x17, 0x00, 0x00, // current low, high
        0x00, 0xE6, 0x00, 0x00, // power low, high
        0x00, 0x22, 0x00, 0x00, // energy low, high
        0x01, 0xF4, // frequency
        0x00, 0x64, // power factor
        0x00, 0x00, // alarm
    ];
    let reply = Reply::from_bytes(framed(0x01, 0x04, &body));

    let mut state = MeterState::new(MeterModel::AcV3, 0x01);
    state.apply_reply(&reply, 1_000_000).unwrap();

    let m = state.metrics.as_ac().unwrap();
    assert_eq!(m.voltage, 2257);
    assert_eq!(m.current, 23);
    assert_eq!(m.power, 230);
    assert_eq!(m.energy, 34);
    assert_eq!(m.frequency, 500);
    assert_eq!(m.pf, 100);
    assert!(!m.alarm_on());

    // And the re-serialized frame is bit-exact.
    assert_eq!(m.to_reply(0x01).bytes(), reply.bytes());
}

#[test]
fn test_dc_metrics_round_trip() {
    let m = emeter_proto::DcMetrics {
        voltage: 1280,
        current: 250,
        power: 320,
        energy: 77,
        alarm_high: 0,
        alarm_low: 0xFFFF,
    };
    let reply = m.to_reply(0x0B);

    let mut state = MeterState::new(MeterModel::Dc, 0x0B);
    state.apply_reply(&reply, 42).unwrap();
    assert_eq!(state.metrics.as_dc(), Some(&m));
}

// =============================================================================
// Catch-all provisioning
// =============================================================================

#[test]
fn test_catch_all_probe_reports_configured_address() {
    // A solitary meter probed through 0xF8 answers on 0xF8 with its real
    // address inside the holding block.
    let mut state = MeterState::new(MeterModel::AcV3, frame::ADDR_ANY);

    let probe = ac::read_holdings(frame::ADDR_ANY);
    assert_eq!(probe.slave_addr(), 0xF8);

    let reply = Reply::from_bytes(ac_holdings_reply(frame::ADDR_ANY, 2300, 0x0A));
    state.apply_reply(&reply, 1_000).unwrap();

    assert_eq!(state.addr, 0x0A);
    assert_eq!(
        state.settings,
        MeterSettings::Ac {
            alarm_threshold: 2300
        }
    );
}

#[test]
fn test_dc_holdings_image() {
    let mut state = MeterState::new(MeterModel::Dc, 0x0B);
    let reply = Reply::from_bytes(dc_holdings_reply(0x0B, 3000, 900, 0x0B, Shunt::A200));
    state.apply_reply(&reply, 1_000).unwrap();

    assert_eq!(
        state.settings,
        MeterSettings::Dc {
            alarm_high: 3000,
            alarm_low: 900,
            shunt: Shunt::A200,
        }
    );
}

// =============================================================================
// Boundary behaviors
// =============================================================================

#[test]
fn test_out_of_range_address_becomes_noop_write() {
    for bogus in [0x00u8, 0xFF] {
        let req = frame::set_slave_addr(bogus, 0x07);
        // Still a well-formed write to the address register, but carrying
        // the current address: a self-assignment the device will echo.
        assert!(crc::verify(req.bytes()));
        assert_eq!(req.slave_addr(), 0x07);
        assert_eq!(&req.bytes()[2..6], &[0x00, 0x02, 0x00, 0x07]);
    }
}

#[test]
fn test_broadcast_request_expects_no_reply() {
    let req = frame::reset_energy(frame::ADDR_BROADCAST);
    assert!(!req.wait_for_reply());
}

#[test]
fn test_exception_codes_latch_per_kind() {
    let cases = [
        (0x83u8, 0x01u8, MeterFault::IllegalFunction),
        (0x84, 0x02, MeterFault::IllegalAddress),
        (0x86, 0x03, MeterFault::IllegalData),
        (0xC2, 0x04, MeterFault::SlaveFailure),
        (0xC1, 0x2A, MeterFault::Exception(0x2A)),
    ];

    for (function, code, expected) in cases {
        let mut state = MeterState::new(MeterModel::AcV3, 0x01);
        let reply = Reply::from_bytes(exception_reply(0x01, function, code));

        state.apply_reply(&reply, 500).unwrap();
        assert_eq!(state.last_error, Some(expected));
        assert_eq!(state.last_reply_us, 0, "exceptions must not refresh data age");
    }
}

#[test]
fn test_write_echo_round_trip_through_state() {
    // Host asks for a new address; the device echo is what actually moves
    // the state.
    let mut state = MeterState::new(MeterModel::AcV3, 0x07);
    let request = frame::set_slave_addr(0x15, 0x07);

    // The device echoes the request frame verbatim.
    let echo = Reply::from_bytes(request.bytes().to_vec());
    state.apply_reply(&echo, 9).unwrap();
    assert_eq!(state.addr, 0x15);
}
