// Copyright (c) The apitest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests that run fake test binaries end to end.
//!
//! The fake binaries are shell scripts that speak just enough of the gtest command line for
//! listing and running single tests. They're invoked through `/bin/sh` as the target runner, so
//! they never need to be executable.

#![cfg(unix)]

mod basic;
mod fixtures;
mod session;
