// Copyright (c) The apitest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs WebKit API tests out of gtest-style test binaries.
//!
//! Every test runs in its own process, spread across a pool of workers. The exit code tells wrapping
//! tools why a run didn't pass: see [`apitest_metadata::ApiTestExitCode`].

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::OutputContext;
