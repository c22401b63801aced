// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # emeter-tests
//!
//! Shared fixtures and harnesses for the workspace integration tests.
//!
//! The tests themselves live in `tests/`; this library crate carries the
//! pieces they share: canned frames, a scripted meter simulator, and the
//! null-cable responder harness.

pub mod common;
