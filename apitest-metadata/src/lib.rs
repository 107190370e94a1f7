// Copyright (c) The apitest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Stable, machine-readable contracts for `run-api-tests`.
//!
//! Tools that wrap `run-api-tests` (bots, bisection scripts) depend on the exit codes documented
//! here to tell *why* a run did not pass.

mod exit_codes;

pub use exit_codes::*;
