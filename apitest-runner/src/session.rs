// Copyright (c) The apitest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A complete run: checking the build, collecting the catalog, selecting, executing and
//! reporting.
//!
//! Each phase can end the run early with a distinct [`RunOutcome`]. The phases are checked in a
//! fixed order, so the outcome always names the first thing that went wrong.

use crate::{
    config::{ApiTestProfile, TestThreads},
    errors::{DisplayErrorChain, RunSessionError, WriteReportError},
    provision::Provisioner,
    reporter::{RunSummary, TestReporter},
    runner::TestRunnerBuilder,
    signal::SignalHandlerKind,
    test_filter::TestSelector,
    test_list::{Catalog, OutputFormat, TestBinary},
};
use apitest_metadata::ApiTestExitCode;
use std::{io::Write, time::Duration};
use tracing::{error, info, warn};

/// The outcome of a run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunOutcome {
    /// Every selected test passed or was disabled, or the selection was dumped.
    Success,

    /// The build check or provisioning failed before any test binary was queried.
    BuildOrEnvironmentCheckFailed,

    /// A test binary couldn't be queried, or no tests matched the selection.
    CatalogCollectionFailed,

    /// At least one selected test didn't pass.
    TestsFailed,
}

impl RunOutcome {
    /// Returns the process exit code for this outcome.
    pub fn process_exit_code(self) -> i32 {
        match self {
            Self::Success => ApiTestExitCode::SUCCESS,
            Self::BuildOrEnvironmentCheckFailed => {
                ApiTestExitCode::BUILD_OR_ENVIRONMENT_CHECK_FAILED
            }
            Self::CatalogCollectionFailed => ApiTestExitCode::CATALOG_COLLECTION_FAILED,
            Self::TestsFailed => ApiTestExitCode::TESTS_FAILED,
        }
    }
}

/// Options for a [`RunSession`].
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Only write out the selected tests, without running them.
    pub dump: bool,

    /// The format used in dump mode.
    pub output_format: OutputFormat,

    /// Report every test as it finishes, and list skipped tests in the final report.
    pub verbose: bool,

    /// Colorize output.
    pub colorize: bool,

    /// Overrides the profile's number of workers.
    pub test_threads: Option<TestThreads>,

    /// Overrides the profile's per-test timeout.
    pub timeout: Option<Duration>,

    /// Overrides the profile's setting for running disabled tests.
    pub run_disabled: Option<bool>,

    /// The kind of signal handling to set up while tests run.
    pub signal_handler: SignalHandlerKind,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dump: false,
            output_format: OutputFormat::Plain,
            verbose: false,
            colorize: false,
            test_threads: None,
            timeout: None,
            run_disabled: None,
            signal_handler: SignalHandlerKind::Standard,
        }
    }
}

/// Strings together the phases of a run.
pub struct RunSession<'a> {
    provisioner: &'a dyn Provisioner,
    profile: ApiTestProfile<'a>,
    options: RunOptions,
}

impl<'a> RunSession<'a> {
    /// Creates a new session.
    pub fn new(
        provisioner: &'a dyn Provisioner,
        profile: ApiTestProfile<'a>,
        options: RunOptions,
    ) -> Self {
        Self {
            provisioner,
            profile,
            options,
        }
    }

    /// Runs the tests in `binaries` matching `patterns`, writing progress and the final report to
    /// `writer`.
    ///
    /// Returns an error only if the run couldn't be carried out at all, for example because
    /// `writer` failed. Failures with a documented outcome are returned as a [`RunOutcome`].
    pub fn run(
        &self,
        binaries: Vec<TestBinary>,
        patterns: &[String],
        mut writer: impl Write + Send,
    ) -> Result<RunOutcome, RunSessionError> {
        let test_threads = self
            .options
            .test_threads
            .unwrap_or_else(|| self.profile.test_threads());

        info!("checking build");
        if let Err(err) = self.provisioner.check_build(&binaries) {
            error!("build check failed: {}", DisplayErrorChain::new(&err));
            return Ok(RunOutcome::BuildOrEnvironmentCheckFailed);
        }

        // The target stays provisioned until `handle` goes out of scope, on every path below.
        let handle = match self.provisioner.acquire(test_threads.compute()) {
            Ok(handle) => handle,
            Err(err) => {
                error!(
                    "failed to provision execution target: {}",
                    DisplayErrorChain::new(&err)
                );
                return Ok(RunOutcome::BuildOrEnvironmentCheckFailed);
            }
        };

        info!("collecting tests");
        let mut catalog = match Catalog::new(binaries, handle.target()) {
            Ok(catalog) => catalog,
            Err(err) => {
                error!(
                    "failed to collect tests from `{}`: {}",
                    err.binary_id(),
                    DisplayErrorChain::new(&err)
                );
                return Ok(RunOutcome::CatalogCollectionFailed);
            }
        };
        if self.options.colorize {
            catalog.colorize();
        }

        let selected = TestSelector::new(patterns).select(&catalog);
        info!(
            "found {} tests ({} in catalog across {} binaries)",
            selected.len(),
            catalog.len(),
            catalog.binary_count()
        );
        if selected.is_empty() {
            writeln!(writer, "No tests found").map_err(WriteReportError::from)?;
            return Ok(RunOutcome::CatalogCollectionFailed);
        }

        if self.options.dump {
            catalog.write_tests(&selected, self.options.output_format, &mut writer)?;
            return Ok(RunOutcome::Success);
        }

        let mut builder = TestRunnerBuilder::default();
        builder.set_test_threads(test_threads);
        if let Some(timeout) = self.options.timeout {
            builder.set_timeout(timeout);
        }
        if let Some(run_disabled) = self.options.run_disabled {
            builder.set_run_disabled(run_disabled);
        }
        let mut runner = builder.build(
            &catalog,
            selected,
            &self.profile,
            handle.target().clone(),
            self.options.signal_handler,
        )?;

        let mut reporter = TestReporter::new(self.options.verbose);
        if self.options.colorize {
            reporter.colorize();
        }

        info!("running tests");
        let run_results =
            runner.try_execute(|event| reporter.report_event(&event, &mut writer))?;

        if let Some(reason) = run_results.cancel_reason() {
            warn!("run canceled due to {}", reason.to_static_str());
        }

        let summary = RunSummary::new(runner.selected(), run_results.results());
        info!(
            "Ran {} tests of {} with {} successful",
            summary.ran_count(),
            summary.selected_count,
            summary.passed
        );

        reporter.report_final(runner.selected(), run_results.results(), &mut writer)?;

        Ok(if summary.is_success() {
            RunOutcome::Success
        } else {
            RunOutcome::TestsFailed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ApiTestConfig,
        errors::ProvisionError,
        provision::{ExecutionTarget, ProvisionHandle},
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct FakeProvisioner {
        fail_build: bool,
        fail_acquire: bool,
        acquired: AtomicUsize,
    }

    impl Provisioner for FakeProvisioner {
        fn check_build(&self, _binaries: &[TestBinary]) -> Result<(), ProvisionError> {
            if self.fail_build {
                return Err(ProvisionError::NoBinaries);
            }
            Ok(())
        }

        fn acquire(&self, _worker_count: usize) -> Result<ProvisionHandle, ProvisionError> {
            if self.fail_acquire {
                return Err(ProvisionError::SetupFail {
                    command: vec!["false".to_owned()],
                    exit_status: failing_exit_status(),
                });
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(ProvisionHandle::new(ExecutionTarget::host()))
        }
    }

    fn failing_exit_status() -> std::process::ExitStatus {
        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                use std::os::unix::process::ExitStatusExt;
                std::process::ExitStatus::from_raw(1 << 8)
            } else if #[cfg(windows)] {
                use std::os::windows::process::ExitStatusExt;
                std::process::ExitStatus::from_raw(1)
            }
        }
    }

    fn run(provisioner: &FakeProvisioner, binaries: Vec<TestBinary>) -> RunOutcome {
        let config = ApiTestConfig::default_config();
        let profile = config.profile("default").expect("default profile exists");
        let options = RunOptions {
            signal_handler: SignalHandlerKind::Noop,
            ..RunOptions::default()
        };
        RunSession::new(provisioner, profile, options)
            .run(binaries, &[], Vec::new())
            .expect("session ran")
    }

    #[test]
    fn test_build_check_failure() {
        let provisioner = FakeProvisioner {
            fail_build: true,
            ..Default::default()
        };
        assert_eq!(
            run(&provisioner, vec![]),
            RunOutcome::BuildOrEnvironmentCheckFailed
        );
        assert_eq!(
            provisioner.acquired.load(Ordering::SeqCst),
            0,
            "nothing is provisioned if the build check fails"
        );
    }

    #[test]
    fn test_provision_failure() {
        let provisioner = FakeProvisioner {
            fail_acquire: true,
            ..Default::default()
        };
        assert_eq!(
            run(&provisioner, vec![]),
            RunOutcome::BuildOrEnvironmentCheckFailed
        );
    }

    #[test]
    fn test_catalog_failure() {
        let provisioner = FakeProvisioner::default();
        let missing = TestBinary::new("/nonexistent/apitest/TestWTF");
        assert_eq!(
            run(&provisioner, vec![missing]),
            RunOutcome::CatalogCollectionFailed
        );
    }

    #[test]
    fn test_no_binaries_means_no_tests() {
        let provisioner = FakeProvisioner::default();
        assert_eq!(
            run(&provisioner, vec![]),
            RunOutcome::CatalogCollectionFailed
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunOutcome::Success.process_exit_code(), 0);
        assert_eq!(
            RunOutcome::BuildOrEnvironmentCheckFailed.process_exit_code(),
            1
        );
        assert_eq!(RunOutcome::CatalogCollectionFailed.process_exit_code(), 2);
        assert_eq!(RunOutcome::TestsFailed.process_exit_code(), 3);
    }
}
