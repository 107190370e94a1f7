// Copyright (c) The apitest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `run-api-tests` failures.
///
/// A run that does not reach "all passed" exits with one of these codes, chosen in strict
/// precedence order: the build/environment check, then catalog collection, then the outcome of
/// the tests themselves.
///
/// Unknown/unexpected failures will always result in exit code 1 as well, since that's what
/// `color-eyre` uses. Wrappers that need to tell the two apart should look at stderr.
pub enum ApiTestExitCode {}

impl ApiTestExitCode {
    /// Every selected test passed or was intentionally disabled.
    pub const SUCCESS: i32 = 0;

    /// The test binaries were missing, or the execution target could not be provisioned.
    pub const BUILD_OR_ENVIRONMENT_CHECK_FAILED: i32 = 1;

    /// Listing the tests of some binary failed, or no tests matched.
    pub const CATALOG_COLLECTION_FAILED: i32 = 2;

    /// One or more selected tests failed, crashed, timed out, or never ran.
    pub const TESTS_FAILED: i32 = 3;

    /// A user issue happened while setting up the invocation, e.g. an invalid config file.
    pub const SETUP_ERROR: i32 = 96;

    /// Writing the report to the output stream failed.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
