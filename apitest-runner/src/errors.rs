// Copyright (c) The apitest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by run-api-tests.

use crate::test_list::OutputFormat;
use camino::Utf8PathBuf;
use config::ConfigError;
use std::{error::Error as StdError, fmt, process::ExitStatus};
use thiserror::Error;

/// Displays an error along with its chain of sources.
#[derive(Clone, Debug)]
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: StdError> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E: StdError> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        let mut current = self.error.source();
        if current.is_some() {
            write!(f, "\n  caused by:")?;
        }
        while let Some(source) = current {
            write!(f, "\n  - {source}")?;
            current = source.source();
        }

        Ok(())
    }
}

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    err: ConfigError,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, err: ConfigError) -> Self {
        Self {
            config_file: config_file.into(),
            err,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }
}

/// An error which indicates that a profile was requested but not known.
#[derive(Clone, Debug, Error)]
#[error("profile `{profile}` not found (known profiles: {})", .all_profiles.join(", "))]
pub struct ProfileNotFound {
    profile: String,
    all_profiles: Vec<String>,
}

impl ProfileNotFound {
    pub(crate) fn new(
        profile: impl Into<String>,
        all_profiles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut all_profiles: Vec<_> = all_profiles.into_iter().map(|s| s.into()).collect();
        all_profiles.sort_unstable();
        Self {
            profile: profile.into(),
            all_profiles,
        }
    }
}

/// Error returned while parsing a [`TestThreads`](crate::config::TestThreads) value.
#[derive(Clone, Debug, Error)]
#[error("unrecognized value for test-threads: {input}")]
pub struct TestThreadsParseError {
    /// The input that failed to parse.
    pub input: String,
}

impl TestThreadsParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// Error returned while parsing an [`OutputFormat`] value from a string.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized value for output format: {input}\n(known values: {})",
    OutputFormat::variants().join(", ")
)]
pub struct OutputFormatParseError {
    input: String,
}

impl OutputFormatParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error that occurs while collecting the catalog of tests from a test binary.
///
/// Any one of these aborts catalog collection as a whole: a partial catalog is never used.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CreateCatalogError {
    /// The command to list tests could not be started.
    #[error(
        "for `{binary_id}`, running command `{}` failed",
        shell_words::join(command)
    )]
    CommandExec {
        /// The binary ID for which listing tests failed.
        binary_id: String,

        /// The command that was run.
        command: Vec<String>,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The command to list tests exited with a non-zero status.
    #[error(
        "for `{binary_id}`, command `{}` {}\n--- stderr:\n{stderr}",
        shell_words::join(command),
        crate::helpers::display_exited_with(*exit_status)
    )]
    CommandFail {
        /// The binary ID for which listing tests failed.
        binary_id: String,

        /// The command that was run.
        command: Vec<String>,

        /// The exit status of the command.
        exit_status: ExitStatus,

        /// Standard error, lossily decoded.
        stderr: String,
    },

    /// The list output was not valid UTF-8.
    #[error("for `{binary_id}`, test list output was not valid UTF-8")]
    OutputNotUtf8 {
        /// The binary ID for which listing tests failed.
        binary_id: String,

        /// The underlying error.
        #[source]
        error: std::string::FromUtf8Error,
    },
}

impl CreateCatalogError {
    pub(crate) fn command_exec(
        binary_id: impl Into<String>,
        command: impl IntoIterator<Item = impl Into<String>>,
        error: std::io::Error,
    ) -> Self {
        Self::CommandExec {
            binary_id: binary_id.into(),
            command: command.into_iter().map(|s| s.into()).collect(),
            error,
        }
    }

    pub(crate) fn command_fail(
        binary_id: impl Into<String>,
        command: impl IntoIterator<Item = impl Into<String>>,
        exit_status: ExitStatus,
        stderr: &[u8],
    ) -> Self {
        Self::CommandFail {
            binary_id: binary_id.into(),
            command: command.into_iter().map(|s| s.into()).collect(),
            exit_status,
            stderr: String::from_utf8_lossy(stderr).into_owned(),
        }
    }

    /// Returns the ID of the binary that could not be queried.
    pub fn binary_id(&self) -> &str {
        match self {
            Self::CommandExec { binary_id, .. }
            | Self::CommandFail { binary_id, .. }
            | Self::OutputNotUtf8 { binary_id, .. } => binary_id,
        }
    }
}

/// An error that occurs while writing a list of tests.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteTestListError {
    /// An error occurred while writing the list to the provided output.
    #[error("error writing to output")]
    Io(#[source] std::io::Error),

    /// An error occurred while serializing JSON, or while writing it to the provided output.
    #[error("error serializing to JSON")]
    Json(#[source] serde_json::Error),
}

/// An error that occurs while checking the build or provisioning an execution target.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProvisionError {
    /// A test binary was not found where it was expected.
    #[error("test binary `{binary_id}` not found at `{path}`")]
    BinaryNotFound {
        /// The binary ID.
        binary_id: String,

        /// The path that was checked.
        path: Utf8PathBuf,
    },

    /// No test binaries were specified.
    #[error("no test binaries specified (hint: pass in --binary or set `binaries` in config)")]
    NoBinaries,

    /// The setup command could not be started.
    #[error("running setup command `{}` failed", shell_words::join(command))]
    SetupExec {
        /// The setup command.
        command: Vec<String>,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The setup command exited with a non-zero status.
    #[error(
        "setup command `{}` {}",
        shell_words::join(command),
        crate::helpers::display_exited_with(*exit_status)
    )]
    SetupFail {
        /// The setup command.
        command: Vec<String>,

        /// The exit status of the command.
        exit_status: ExitStatus,
    },
}

/// An error occurred while setting up the signal handler.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] std::io::Error);

/// An error that occurs while building the test runner.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TestRunnerBuildError {
    /// An error occurred while creating the Tokio runtime.
    #[error("error creating Tokio runtime")]
    TokioRuntimeCreate(#[source] std::io::Error),

    /// An error occurred while setting up signals.
    #[error("error setting up signals")]
    SignalHandlerSetupError(#[from] SignalHandlerSetupError),
}

/// An error that occurs while writing a report to the output stream.
#[derive(Debug, Error)]
#[error("error writing report to output")]
pub struct WriteReportError(#[from] std::io::Error);

/// An error that prevents a [`RunSession`](crate::session::RunSession) from producing an outcome.
///
/// Failures that have a documented exit code (environment, catalog, tests) are *not* errors: they
/// are reported as a [`RunOutcome`](crate::session::RunOutcome).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunSessionError {
    /// The test runner could not be built.
    #[error("error building test runner")]
    RunnerBuild(#[from] TestRunnerBuildError),

    /// Writing the test list in dump mode failed.
    #[error("error writing test list")]
    WriteTestList(#[from] WriteTestListError),

    /// Writing the report failed.
    #[error(transparent)]
    WriteReport(#[from] WriteReportError),
}
