// Copyright (c) The apitest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for [run-api-tests](https://webkit.org), a runner for gtest-style API
//! test binaries.
//!
//! The data flow is one-directional: raw `--gtest_list_tests` output is turned into a
//! [`Catalog`](test_list::Catalog), narrowed by a [`TestSelector`](test_filter::TestSelector),
//! executed by a [`TestRunner`](runner::TestRunner) across independent workers, and finally
//! summarized by the [`reporter`].
//!
//! [`session::RunSession`] strings the phases together and decides the overall
//! [`RunOutcome`](session::RunOutcome).

pub mod config;
pub mod errors;
mod helpers;
pub mod partition;
pub mod provision;
pub mod reporter;
pub mod runner;
pub mod session;
pub mod signal;
mod stopwatch;
pub mod test_filter;
pub mod test_list;
