// Copyright (c) The apitest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test runner.
//!
//! The main structure in this module is [`TestRunner`]. Selected tests are partitioned across
//! workers, each of which runs its slice one test at a time, every test in its own process. Workers
//! share nothing: each finished [`TestResult`] is sent over a channel to a single loop that owns
//! the result map and calls back into the caller.

use crate::{
    config::{ApiTestProfile, TestThreads},
    errors::TestRunnerBuildError,
    helpers::{AbortStatus, display_abort_status},
    partition::partition,
    provision::ExecutionTarget,
    signal::{SignalEvent, SignalHandler, SignalHandlerKind},
    stopwatch::StopwatchStart,
    test_list::{Catalog, TestIdentifier},
};
use camino::Utf8PathBuf;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    convert::Infallible,
    fmt, io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime},
};
use tokio::{
    io::AsyncReadExt,
    runtime::Runtime,
    sync::{Notify, mpsc::UnboundedSender},
};
use tracing::{debug, warn};

/// The argument used to run a single test out of a test binary.
pub const FILTER_ARG: &str = "--gtest_filter";

/// The argument that makes a test binary run tests marked `DISABLED_`.
pub const ALSO_RUN_DISABLED_ARG: &str = "--gtest_also_run_disabled_tests";

/// The map of results produced by a run, keyed by test.
pub type ResultMap = BTreeMap<TestIdentifier, TestResult>;

/// Test runner options.
#[derive(Debug, Default)]
pub struct TestRunnerBuilder {
    test_threads: Option<TestThreads>,
    timeout: Option<Duration>,
    leak_timeout: Option<Duration>,
    run_disabled: Option<bool>,
}

impl TestRunnerBuilder {
    /// Sets the number of workers to run tests on.
    pub fn set_test_threads(&mut self, test_threads: TestThreads) -> &mut Self {
        self.test_threads = Some(test_threads);
        self
    }

    /// Sets the per-test timeout.
    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets how long to wait for output to close after a test exits.
    pub fn set_leak_timeout(&mut self, leak_timeout: Duration) -> &mut Self {
        self.leak_timeout = Some(leak_timeout);
        self
    }

    /// Sets whether tests marked `DISABLED_` are run.
    pub fn set_run_disabled(&mut self, run_disabled: bool) -> &mut Self {
        self.run_disabled = Some(run_disabled);
        self
    }

    /// Creates a new test runner for the selected tests out of `catalog`.
    ///
    /// Settings not specified on the builder are taken from `profile`.
    pub fn build(
        self,
        catalog: &Catalog,
        selected: Vec<TestIdentifier>,
        profile: &ApiTestProfile<'_>,
        target: ExecutionTarget,
        handler_kind: SignalHandlerKind,
    ) -> Result<TestRunner, TestRunnerBuildError> {
        let test_threads = self
            .test_threads
            .unwrap_or_else(|| profile.test_threads())
            .compute();
        let timeout = self.timeout.unwrap_or_else(|| profile.timeout());
        let leak_timeout = self.leak_timeout.unwrap_or_else(|| profile.leak_timeout());
        let run_disabled = self.run_disabled.unwrap_or_else(|| profile.run_disabled());

        let binaries = selected
            .iter()
            .filter_map(|test| {
                let binary_id = test.binary();
                catalog
                    .binary_path(binary_id)
                    .map(|path| (binary_id.to_owned(), path.to_owned()))
            })
            .collect();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("apitest-runner-worker")
            .build()
            .map_err(TestRunnerBuildError::TokioRuntimeCreate)?;
        let _guard = runtime.enter();

        // This must be called from within the guard.
        let handler = handler_kind.build()?;

        Ok(TestRunner {
            inner: Arc::new(TestRunnerInner {
                binaries,
                target,
                timeout,
                leak_timeout,
                run_disabled,
            }),
            selected,
            test_threads,
            cancel: CancelHandle::new(),
            runtime,
            handler,
        })
    }
}

/// Context for running tests.
///
/// Created using [`TestRunnerBuilder::build`].
#[derive(Debug)]
pub struct TestRunner {
    inner: Arc<TestRunnerInner>,
    selected: Vec<TestIdentifier>,
    test_threads: usize,
    cancel: CancelHandle,
    runtime: Runtime,
    handler: SignalHandler,
}

impl TestRunner {
    /// Returns the tests this runner will run, in selection order.
    pub fn selected(&self) -> &[TestIdentifier] {
        &self.selected
    }

    /// Returns a handle that can be used to cancel the run from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Executes the selected tests, each one in its own process.
    ///
    /// The callback is called with events as the run progresses.
    pub fn execute<F>(&mut self, mut callback: F) -> RunResults
    where
        F: FnMut(TestEvent<'_>) + Send,
    {
        match self.try_execute::<Infallible, _>(|event| {
            callback(event);
            Ok(())
        }) {
            Ok(results) => results,
            Err(infallible) => match infallible {},
        }
    }

    /// Executes the selected tests, each one in its own process.
    ///
    /// Accepts a callback that is called with events as the run progresses. If the callback
    /// returns an error, no further tests are started, and the first error is returned once the
    /// tests that are already running finish.
    pub fn try_execute<E, F>(&mut self, mut callback: F) -> Result<RunResults, E>
    where
        F: FnMut(TestEvent<'_>) -> Result<(), E> + Send,
        E: Send,
    {
        let stopwatch = StopwatchStart::now();
        let slices = partition(&self.selected, self.test_threads);
        let worker_count = slices.len();

        callback(TestEvent::RunStarted {
            selected: &self.selected,
            worker_count,
        })?;

        let mut ctx = CallbackContext {
            callback,
            results: ResultMap::new(),
            running: 0,
            cancel_reason: None,
            first_error: None,
        };
        if self.cancel.is_canceled() {
            ctx.begin_cancel(CancelReason::Requested, &self.cancel);
        }

        let handler = &mut self.handler;
        let cancel = &self.cancel;
        let inner = &self.inner;

        self.runtime.block_on(async {
            let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
            for (worker, tests) in slices.into_iter().enumerate() {
                tokio::spawn(run_worker(
                    inner.clone(),
                    worker,
                    tests,
                    cancel.clone(),
                    sender.clone(),
                ));
            }
            // Drop the original sender so that the receiver completes once all workers are done.
            drop(sender);

            let mut signals_done = false;
            loop {
                tokio::select! {
                    event = receiver.recv() => {
                        match event {
                            Some(event) => ctx.handle_event(event, cancel),
                            None => break,
                        }
                    }
                    signal = handler.recv(), if !signals_done => {
                        match signal {
                            Some(signal) => {
                                let reason = match signal {
                                    SignalEvent::Interrupt => CancelReason::Interrupt,
                                    #[cfg(unix)]
                                    SignalEvent::Hangup | SignalEvent::Term => CancelReason::Signal,
                                };
                                ctx.begin_cancel(reason, cancel);
                            }
                            None => signals_done = true,
                        }
                    }
                    () = cancel.notified(), if ctx.cancel_reason.is_none() => {
                        ctx.begin_cancel(CancelReason::Requested, cancel);
                    }
                }
            }
        });

        let CallbackContext {
            mut callback,
            results,
            cancel_reason,
            first_error,
            ..
        } = ctx;

        let stopwatch_end = stopwatch.end();
        let results = RunResults {
            results,
            cancel_reason,
            start_time: stopwatch_end.start_time,
            elapsed: stopwatch_end.duration,
        };

        let finished = callback(TestEvent::RunFinished {
            results: &results,
            start_time: results.start_time,
            elapsed: results.elapsed,
        });

        match first_error {
            Some(err) => Err(err),
            None => finished.map(|()| results),
        }
    }
}

#[derive(Debug)]
struct TestRunnerInner {
    binaries: BTreeMap<String, Utf8PathBuf>,
    target: ExecutionTarget,
    timeout: Duration,
    leak_timeout: Duration,
    run_disabled: bool,
}

impl TestRunnerInner {
    /// Runs an individual test in its own process.
    async fn run_test(&self, test: TestIdentifier) -> TestResult {
        let stopwatch = StopwatchStart::now();

        let (status, output) = match self.run_test_inner(&test).await {
            Ok(status_and_output) => status_and_output,
            Err(error) => (
                TestStatus::Crashed,
                format!("failed to run `{test}`: {error}"),
            ),
        };

        let stopwatch_end = stopwatch.end();
        TestResult {
            test,
            status,
            output,
            start_time: stopwatch_end.start_time,
            duration: stopwatch_end.duration,
        }
    }

    async fn run_test_inner(&self, test: &TestIdentifier) -> io::Result<(TestStatus, String)> {
        let binary = self.binaries.get(test.binary()).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("test binary `{}` is not in the catalog", test.binary()),
            )
        })?;

        let filter = format!("{FILTER_ARG}={}", test.suite_and_test());
        let mut args = vec![filter.as_str()];
        if self.run_disabled {
            args.push(ALSO_RUN_DISABLED_ARG);
        }

        debug!(
            "running `{test}`: {}",
            shell_words::join(self.target.argv(binary, &args))
        );
        let mut child = self.target.to_command(binary, &args).spawn()?;

        let child_stdout = child.stdout.take();
        let child_stderr = child.stderr.take();
        let mut stdout = Vec::with_capacity(4096);
        let mut stderr = Vec::with_capacity(4096);
        let mut timed_out = false;

        let res = {
            let stdout_fut = async {
                if let Some(mut child_stdout) = child_stdout {
                    child_stdout.read_to_end(&mut stdout).await?;
                }
                Ok::<_, io::Error>(())
            };
            tokio::pin!(stdout_fut);
            let mut stdout_done = false;

            let stderr_fut = async {
                if let Some(mut child_stderr) = child_stderr {
                    child_stderr.read_to_end(&mut stderr).await?;
                }
                Ok::<_, io::Error>(())
            };
            tokio::pin!(stderr_fut);
            let mut stderr_done = false;

            let timeout = tokio::time::sleep(self.timeout);
            tokio::pin!(timeout);

            let res = loop {
                tokio::select! {
                    res = &mut stdout_fut, if !stdout_done => {
                        stdout_done = true;
                        res?;
                    }
                    res = &mut stderr_fut, if !stderr_done => {
                        stderr_done = true;
                        res?;
                    }
                    res = child.wait() => {
                        // The test finished executing.
                        break res;
                    }
                    () = &mut timeout, if !timed_out => {
                        timed_out = true;
                        // There's a race between killing the test and its own completion: ignore
                        // errors here, and let child.wait() pick up the exit status.
                        let _ = child.start_kill();
                    }
                }
            };

            // Give the pipes leak_timeout in total to close once the process has exited.
            // Grandchildren that inherited stdout or stderr can otherwise hold them open.
            let leak_sleep = tokio::time::sleep(self.leak_timeout);
            tokio::pin!(leak_sleep);
            loop {
                tokio::select! {
                    res = &mut stdout_fut, if !stdout_done => {
                        stdout_done = true;
                        res?;
                    }
                    res = &mut stderr_fut, if !stderr_done => {
                        stderr_done = true;
                        res?;
                    }
                    () = &mut leak_sleep, if !(stdout_done && stderr_done) => {
                        debug!("`{test}` left output pipes open after exiting");
                        break;
                    }
                    else => {
                        break;
                    }
                }
            }

            res
        };

        let exit_status = res?;
        let status = if timed_out {
            TestStatus::Timeout
        } else if exit_status.success() {
            TestStatus::Passed
        } else if let Some(abort_status) = AbortStatus::extract(exit_status) {
            debug!("`{test}` {}", display_abort_status(abort_status));
            TestStatus::Crashed
        } else {
            TestStatus::Failed
        };

        let mut output = String::from_utf8_lossy(&stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&stderr));
        Ok((status, output))
    }
}

async fn run_worker(
    inner: Arc<TestRunnerInner>,
    worker: usize,
    tests: Vec<TestIdentifier>,
    cancel: CancelHandle,
    sender: UnboundedSender<InternalEvent>,
) {
    for test in tests {
        // Cancellation is only observed between tests: a running test is never interrupted.
        if cancel.is_canceled() {
            break;
        }

        if !inner.run_disabled && test.is_disabled() {
            // Failure to send means the receiver was dropped.
            let _ = sender.send(InternalEvent::Finished {
                worker,
                result: TestResult::disabled(test),
            });
            continue;
        }

        let _ = sender.send(InternalEvent::Started {
            worker,
            test: test.clone(),
        });
        let result = inner.run_test(test).await;
        let _ = sender.send(InternalEvent::Finished { worker, result });
    }
}

#[derive(Debug)]
enum InternalEvent {
    Started {
        worker: usize,
        test: TestIdentifier,
    },
    Finished {
        worker: usize,
        result: TestResult,
    },
}

struct CallbackContext<F, E> {
    callback: F,
    results: ResultMap,
    running: usize,
    cancel_reason: Option<CancelReason>,
    first_error: Option<E>,
}

impl<F, E> CallbackContext<F, E>
where
    F: FnMut(TestEvent<'_>) -> Result<(), E>,
{
    fn handle_event(&mut self, event: InternalEvent, cancel: &CancelHandle) {
        match event {
            InternalEvent::Started { worker, test } => {
                self.running += 1;
                self.call(
                    TestEvent::TestStarted {
                        test: &test,
                        worker,
                        running: self.running,
                    },
                    cancel,
                );
            }
            InternalEvent::Finished { worker, result } => {
                if result.status != TestStatus::Disabled {
                    self.running -= 1;
                }
                let test = result.test.clone();
                // This is the only place results are merged into the map.
                if self.results.insert(test.clone(), result).is_some() {
                    warn!("`{test}` was run more than once");
                }
                let result = &self.results[&test];
                let event = TestEvent::TestFinished {
                    result,
                    worker,
                    running: self.running,
                };
                if let Err(err) = (self.callback)(event) {
                    self.record_error(err, cancel);
                }
            }
        }
    }

    fn begin_cancel(&mut self, reason: CancelReason, cancel: &CancelHandle) {
        cancel.set_canceled();
        if self.cancel_reason.is_some_and(|existing| existing >= reason) {
            return;
        }
        self.cancel_reason = Some(reason);
        let event = TestEvent::RunBeginCancel {
            reason,
            running: self.running,
        };
        self.call(event, cancel);
    }

    fn call(&mut self, event: TestEvent<'_>, cancel: &CancelHandle) {
        if let Err(err) = (self.callback)(event) {
            self.record_error(err, cancel);
        }
    }

    fn record_error(&mut self, err: E, cancel: &CancelHandle) {
        // Only the first error is kept. Errors that happen while canceling are ignored.
        if self.first_error.is_none() {
            self.first_error = Some(err);
            self.begin_cancel(CancelReason::ReportError, cancel);
        }
    }
}

/// The terminal state of a test.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestStatus {
    /// The test binary exited successfully.
    Passed,

    /// The test binary exited with a failing exit code.
    Failed,

    /// The test binary was terminated abnormally, or couldn't be started at all.
    Crashed,

    /// The test ran for longer than the timeout, and was killed.
    Timeout,

    /// The test is intentionally disabled, and wasn't run.
    Disabled,
}

impl TestStatus {
    /// Returns the human-readable name of this status.
    pub fn name(self) -> &'static str {
        match self {
            Self::Passed => "Passed",
            Self::Failed => "Failed",
            Self::Crashed => "Crashed",
            Self::Timeout => "Timeout",
            Self::Disabled => "Disabled",
        }
    }

    /// Returns true if this status counts towards a successful run.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Passed | Self::Disabled)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The result of running, or deciding not to run, a single test.
///
/// Created once per executed test, and never modified afterwards.
#[derive(Clone, Debug)]
pub struct TestResult {
    /// The test.
    pub test: TestIdentifier,

    /// The terminal state of the test.
    pub status: TestStatus,

    /// Standard output followed by standard error, lossily decoded.
    pub output: String,

    /// When the test started.
    pub start_time: SystemTime,

    /// How long the test took.
    pub duration: Duration,
}

impl TestResult {
    /// Creates a result for a test that isn't run because it's disabled.
    pub fn disabled(test: TestIdentifier) -> Self {
        Self::new(test, TestStatus::Disabled, "")
    }

    /// Creates a new result, with the current time and no duration.
    pub fn new(test: TestIdentifier, status: TestStatus, output: impl Into<String>) -> Self {
        Self {
            test,
            status,
            output: output.into(),
            start_time: SystemTime::now(),
            duration: Duration::ZERO,
        }
    }
}

/// The results of a test run.
///
/// If the run was canceled, only the tests that finished are present.
#[derive(Clone, Debug)]
pub struct RunResults {
    results: ResultMap,
    cancel_reason: Option<CancelReason>,
    start_time: SystemTime,
    elapsed: Duration,
}

impl RunResults {
    /// Returns the map of results, keyed by test.
    pub fn results(&self) -> &ResultMap {
        &self.results
    }

    /// Consumes `self`, returning the map of results.
    pub fn into_results(self) -> ResultMap {
        self.results
    }

    /// Returns the reason the run was canceled, if it was.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.cancel_reason
    }

    /// Returns the time at which the run started.
    pub fn start_time(&self) -> SystemTime {
        self.start_time
    }

    /// Returns how long the run took.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// The reason a run was canceled.
///
/// Ordered by severity: a more severe reason replaces a less severe one.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum CancelReason {
    /// Cancellation was requested through a [`CancelHandle`].
    Requested,

    /// An error occurred while reporting results.
    ReportError,

    /// A termination signal was received.
    Signal,

    /// An interrupt (Ctrl-C) was received.
    Interrupt,
}

impl CancelReason {
    /// Returns a short description of the reason.
    pub fn to_static_str(self) -> &'static str {
        match self {
            Self::Requested => "cancellation requested",
            Self::ReportError => "reporting error",
            Self::Signal => "signal",
            Self::Interrupt => "interrupt",
        }
    }
}

/// A handle used to cancel a run.
///
/// Once canceled, no further tests are started. Tests that are already running are allowed to
/// finish.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    canceled: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    fn new() -> Self {
        Self::default()
    }

    /// Cancels the run.
    pub fn cancel(&self) {
        self.set_canceled();
        // notify_one stores a permit if the run loop isn't currently waiting.
        self.state.notify.notify_one();
    }

    /// Returns true if the run has been canceled.
    pub fn is_canceled(&self) -> bool {
        self.state.canceled.load(Ordering::Acquire)
    }

    fn set_canceled(&self) {
        self.state.canceled.store(true, Ordering::Release);
    }

    async fn notified(&self) {
        self.state.notify.notified().await
    }
}

/// An event that occurs during a test run.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum TestEvent<'a> {
    /// The run started.
    RunStarted {
        /// The tests that will be run, in selection order.
        selected: &'a [TestIdentifier],

        /// The number of workers the tests are spread across.
        worker_count: usize,
    },

    /// A test started running.
    TestStarted {
        /// The test.
        test: &'a TestIdentifier,

        /// The worker the test is running on.
        worker: usize,

        /// The number of tests currently running, including this one.
        running: usize,
    },

    /// A test finished, or was found to be disabled.
    TestFinished {
        /// The result of the test.
        result: &'a TestResult,

        /// The worker the test ran on.
        worker: usize,

        /// The number of tests still running.
        running: usize,
    },

    /// Cancellation began: no further tests will be started.
    RunBeginCancel {
        /// The reason for cancellation.
        reason: CancelReason,

        /// The number of tests still running.
        running: usize,
    },

    /// The run finished.
    RunFinished {
        /// The results of the run.
        results: &'a RunResults,

        /// The time at which the run started.
        start_time: SystemTime,

        /// How long the run took.
        elapsed: Duration,
    },
}
