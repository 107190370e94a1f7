// Copyright (c) The apitest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Checking the build and obtaining an execution target before any test runs.
//!
//! A [`Provisioner`] is consulted once per run. It first checks that the test binaries exist, then
//! hands out a [`ProvisionHandle`]: the execution target stays valid for as long as the handle is
//! alive, and is released when the handle is dropped.

use crate::{config::ApiTestConfig, errors::ProvisionError, test_list::TestBinary};
use camino::Utf8Path;
use indexmap::IndexMap;
use std::{fmt, process::Stdio};
use tracing::{debug, info, warn};

/// Environment variable passed to setup and teardown commands with the number of workers.
pub const WORKER_COUNT_ENV: &str = "APITEST_WORKER_COUNT";

/// Describes how test binaries are invoked on a provisioned target.
///
/// On the host this is usually empty. For simulators or devices, `runner` is an argv prefix that
/// spawns the binary on the target, and the environment must be prefixed so that the spawner
/// forwards it to the child.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExecutionTarget {
    runner: Vec<String>,
    env: IndexMap<String, String>,
}

impl ExecutionTarget {
    /// Returns a target that runs binaries directly on the host, with no extra environment.
    pub fn host() -> Self {
        Self::default()
    }

    /// Creates a new execution target.
    ///
    /// If `env_prefix` is specified, every environment variable that doesn't already start with
    /// the prefix gets it prepended.
    pub fn new(
        runner: impl IntoIterator<Item = impl Into<String>>,
        env: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
        env_prefix: Option<&str>,
    ) -> Self {
        let env = env
            .into_iter()
            .map(|(key, value)| {
                let key = key.into();
                let key = match env_prefix {
                    Some(prefix) if !key.starts_with(prefix) => format!("{prefix}{key}"),
                    _ => key,
                };
                (key, value.into())
            })
            .collect();
        Self {
            runner: runner.into_iter().map(Into::into).collect(),
            env,
        }
    }

    /// Returns the argv prefix used to run binaries on this target.
    pub fn runner(&self) -> &[String] {
        &self.runner
    }

    /// Returns the environment injected into every binary invocation, with prefixes applied.
    pub fn env(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.env
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Returns the full command line used to run `binary` with `args` on this target.
    pub fn argv(&self, binary: &Utf8Path, args: &[&str]) -> Vec<String> {
        self.runner
            .iter()
            .cloned()
            .chain(std::iter::once(binary.to_string()))
            .chain(args.iter().map(|&arg| arg.to_owned()))
            .collect()
    }

    /// Returns a blocking [`duct::Expression`] for running `binary` on this target.
    pub(crate) fn to_expression(&self, binary: &Utf8Path, args: &[&str]) -> duct::Expression {
        let argv = self.argv(binary, args);
        let mut expression = duct::cmd(&argv[0], &argv[1..]);
        for (key, value) in &self.env {
            expression = expression.env(key, value);
        }
        expression
    }

    /// Returns an async [`tokio::process::Command`] for running `binary` on this target.
    ///
    /// Standard input is closed, and standard output and error are piped.
    pub(crate) fn to_command(&self, binary: &Utf8Path, args: &[&str]) -> tokio::process::Command {
        let argv = self.argv(binary, args);
        let mut command = tokio::process::Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

/// An execution target, valid until this handle is dropped.
///
/// Dropping the handle runs the provisioner's release step, if any.
pub struct ProvisionHandle {
    target: ExecutionTarget,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ProvisionHandle {
    /// Creates a handle that needs no release step.
    pub fn new(target: ExecutionTarget) -> Self {
        Self {
            target,
            release: None,
        }
    }

    /// Creates a handle that calls `release` when dropped.
    pub fn with_release(target: ExecutionTarget, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            target,
            release: Some(Box::new(release)),
        }
    }

    /// Returns the execution target.
    pub fn target(&self) -> &ExecutionTarget {
        &self.target
    }
}

impl fmt::Debug for ProvisionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionHandle")
            .field("target", &self.target)
            .field("has_release", &self.release.is_some())
            .finish()
    }
}

impl Drop for ProvisionHandle {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Checks the build and provisions the environment tests run in.
pub trait Provisioner {
    /// Checks that the given binaries were built and are ready to be queried.
    fn check_build(&self, binaries: &[TestBinary]) -> Result<(), ProvisionError>;

    /// Acquires an execution target for `worker_count` workers.
    fn acquire(&self, worker_count: usize) -> Result<ProvisionHandle, ProvisionError>;
}

/// Provisions the local host, optionally with setup and teardown commands from the config.
#[derive(Clone, Debug, Default)]
pub struct HostProvisioner {
    target: ExecutionTarget,
    setup: Vec<String>,
    teardown: Vec<String>,
}

impl HostProvisioner {
    /// Creates a new provisioner that runs binaries through `target`.
    pub fn new(target: ExecutionTarget) -> Self {
        Self {
            target,
            setup: Vec::new(),
            teardown: Vec::new(),
        }
    }

    /// Creates a new provisioner from the `[target]` and `[env]` sections of the config.
    pub fn from_config(config: &ApiTestConfig) -> Self {
        let target_config = config.target();
        let target = ExecutionTarget::new(
            target_config.runner().iter().cloned(),
            config.env().map(|(key, value)| (key.to_owned(), value.to_owned())),
            target_config.env_prefix(),
        );
        Self {
            target,
            setup: target_config.setup().to_vec(),
            teardown: target_config.teardown().to_vec(),
        }
    }

    /// Sets the command run when the target is acquired.
    pub fn set_setup(&mut self, setup: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.setup = setup.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the command run when the target is released.
    pub fn set_teardown(
        &mut self,
        teardown: impl IntoIterator<Item = impl Into<String>>,
    ) -> &mut Self {
        self.teardown = teardown.into_iter().map(Into::into).collect();
        self
    }
}

impl Provisioner for HostProvisioner {
    fn check_build(&self, binaries: &[TestBinary]) -> Result<(), ProvisionError> {
        if binaries.is_empty() {
            return Err(ProvisionError::NoBinaries);
        }

        for binary in binaries {
            if !binary.path.is_file() {
                return Err(ProvisionError::BinaryNotFound {
                    binary_id: binary.binary_id.clone(),
                    path: binary.path.clone(),
                });
            }
            debug!("found test binary `{}` at {}", binary.binary_id, binary.path);
        }

        Ok(())
    }

    fn acquire(&self, worker_count: usize) -> Result<ProvisionHandle, ProvisionError> {
        if let Some((program, args)) = self.setup.split_first() {
            info!("setting up execution target for {worker_count} workers");
            let output = duct::cmd(program, args)
                .env(WORKER_COUNT_ENV, worker_count.to_string())
                .stdout_to_stderr()
                .unchecked()
                .run()
                .map_err(|error| ProvisionError::SetupExec {
                    command: self.setup.clone(),
                    error,
                })?;
            if !output.status.success() {
                return Err(ProvisionError::SetupFail {
                    command: self.setup.clone(),
                    exit_status: output.status,
                });
            }
        }

        if self.teardown.is_empty() {
            return Ok(ProvisionHandle::new(self.target.clone()));
        }

        let teardown = self.teardown.clone();
        Ok(ProvisionHandle::with_release(self.target.clone(), move || {
            run_teardown(&teardown, worker_count)
        }))
    }
}

fn run_teardown(teardown: &[String], worker_count: usize) {
    let Some((program, args)) = teardown.split_first() else {
        return;
    };
    debug!("tearing down execution target: {}", shell_words::join(teardown));

    match duct::cmd(program, args)
        .env(WORKER_COUNT_ENV, worker_count.to_string())
        .stdout_to_stderr()
        .unchecked()
        .run()
    {
        Ok(output) if output.status.success() => {}
        Ok(output) => warn!(
            "teardown command `{}` {}",
            shell_words::join(teardown),
            crate::helpers::display_exited_with(output.status)
        ),
        Err(error) => warn!(
            "running teardown command `{}` failed: {error}",
            shell_words::join(teardown)
        ),
    }
}
