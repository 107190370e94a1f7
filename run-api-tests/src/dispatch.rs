// Copyright (c) The apitest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError,
    errors::Result,
    output::{OutputContext, OutputOpts},
};
use apitest_runner::{
    config::{ApiTestConfig, TestThreads},
    provision::HostProvisioner,
    session::{RunOptions, RunSession},
    signal::SignalHandlerKind,
    test_list::{OutputFormat, TestBinary},
};
use camino::Utf8PathBuf;
use clap::{Args, Parser};
use itertools::Itertools;
use std::{io::Write, time::Duration};
use tracing::debug;

/// Runs WebKit API tests out of gtest-style test binaries.
///
/// Each test runs in its own process. PATTERNS select tests by `Suite`, `Test`, `Suite.Test`,
/// `Binary.Suite` or `Binary.Suite.Test`; with no patterns, every test is selected.
#[derive(Debug, Parser)]
#[command(
    name = "run-api-tests",
    version,
    max_term_width = 100,
    styles = crate::output::clap_styles::style()
)]
pub struct RunApiTestsApp {
    /// Tests to run
    #[arg(value_name = "PATTERNS")]
    patterns: Vec<String>,

    #[command(flatten)]
    binary_opts: BinaryOpts,

    #[command(flatten)]
    runner_opts: RunnerOpts,

    #[command(flatten)]
    output: OutputOpts,
}

impl RunApiTestsApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, writing progress and the final report to `writer`.
    ///
    /// Returns the process exit code.
    pub fn exec(self, output: OutputContext, writer: impl Write + Send) -> Result<i32> {
        let config_root = current_dir()?;
        let config = ApiTestConfig::from_sources(
            &config_root,
            self.binary_opts.config_file.as_deref(),
        )?;
        let profile = config.profile(&self.binary_opts.profile)?;

        let binaries = self.binary_opts.test_binaries(&config);
        debug!(
            "test binaries: {}",
            binaries.iter().map(|binary| &binary.path).join(", ")
        );

        let provisioner = HostProvisioner::from_config(&config);
        let options = self.runner_opts.to_run_options(output);
        let outcome =
            RunSession::new(&provisioner, profile, options).run(binaries, &self.patterns, writer)?;
        Ok(outcome.process_exit_code())
    }
}

/// Options controlling which test binaries are used, and how they're configured.
#[derive(Debug, Args)]
#[command(next_help_heading = "Binary options")]
struct BinaryOpts {
    /// Directory containing the test binaries
    #[arg(
        long,
        value_name = "DIR",
        env = "APITEST_BUILD_DIR",
        default_value = "."
    )]
    build_dir: Utf8PathBuf,

    /// Test binary to run, relative to the build directory [default: from config]
    #[arg(long = "binary", value_name = "PATH")]
    binaries: Vec<Utf8PathBuf>,

    /// Config file [default: .config/apitest.toml in the current directory]
    #[arg(long, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    /// Config profile to use
    #[arg(
        long,
        short = 'P',
        value_name = "PROFILE",
        env = "APITEST_PROFILE",
        default_value = ApiTestConfig::DEFAULT_PROFILE
    )]
    profile: String,
}

impl BinaryOpts {
    fn test_binaries(&self, config: &ApiTestConfig) -> Vec<TestBinary> {
        let paths = if self.binaries.is_empty() {
            config.resolve_binaries(&self.build_dir)
        } else {
            // Absolute paths are kept as they are.
            self.binaries
                .iter()
                .map(|binary| self.build_dir.join(binary))
                .collect()
        };
        paths.into_iter().map(TestBinary::new).collect()
    }
}

/// Options controlling how tests are run.
#[derive(Debug, Args)]
#[command(next_help_heading = "Runner options")]
struct RunnerOpts {
    /// Print the selected tests instead of running them
    #[arg(long, short = 'd')]
    dump: bool,

    /// Output format for --dump [possible values: plain, json, json-pretty]
    #[arg(long, value_name = "FORMAT", default_value = "plain")]
    format: OutputFormat,

    /// Number of tests to run simultaneously [possible values: integer or "num-cpus"]
    /// [default: from profile]
    #[arg(
        long,
        short = 'j',
        visible_alias = "jobs",
        value_name = "N",
        env = "APITEST_TEST_THREADS",
        allow_negative_numbers = true
    )]
    child_processes: Option<TestThreads>,

    /// Time after which a running test is killed [default: from profile]
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Also run tests marked DISABLED_
    #[arg(long)]
    run_disabled: bool,
}

impl RunnerOpts {
    fn to_run_options(&self, output: OutputContext) -> RunOptions {
        RunOptions {
            dump: self.dump,
            output_format: self.format,
            verbose: output.verbose,
            colorize: output.colorize_stdout(),
            test_threads: self.child_processes,
            timeout: self.timeout,
            // Without the flag, the profile decides.
            run_disabled: self.run_disabled.then_some(true),
            signal_handler: SignalHandlerKind::Standard,
        }
    }
}

fn current_dir() -> Result<Utf8PathBuf> {
    let dir = std::env::current_dir().map_err(|err| ExpectedError::CurrentDirFailed { err })?;
    Utf8PathBuf::try_from(dir).map_err(|err| ExpectedError::CurrentDirInvalidUtf8 { err })
}
