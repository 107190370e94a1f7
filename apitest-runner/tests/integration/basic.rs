// Copyright (c) The apitest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use apitest_runner::{
    config::TestThreads,
    reporter::RunSummary,
    runner::{CancelReason, RunResults, TestEvent, TestRunnerBuilder, TestStatus},
    signal::SignalHandlerKind,
    test_filter::TestSelector,
    test_list::{Catalog, TestIdentifier},
};
use pretty_assertions::assert_eq;
use std::{collections::BTreeMap, time::Duration};

fn run_tests(
    fixtures: &FixtureDir,
    catalog: &Catalog,
    selected: Vec<TestIdentifier>,
    configure: impl FnOnce(&mut TestRunnerBuilder),
) -> (Vec<TestIdentifier>, RunResults) {
    let config = fixtures.config();
    let profile = config.profile("default").expect("default profile exists");

    let mut builder = TestRunnerBuilder::default();
    configure(&mut builder);
    let mut runner = builder
        .build(
            catalog,
            selected,
            &profile,
            sh_target(),
            SignalHandlerKind::Noop,
        )
        .expect("runner built");

    let mut started = Vec::new();
    let results = runner.execute(|event| {
        if let TestEvent::TestStarted { test, .. } = event {
            started.push(test.clone());
        }
    });
    started.sort();
    (started, results)
}

fn statuses(results: &RunResults) -> BTreeMap<&str, TestStatus> {
    results
        .results()
        .iter()
        .map(|(test, result)| (test.suite_and_test(), result.status))
        .collect()
}

#[test]
fn test_catalog_from_fake_binary() {
    let fixtures = FixtureDir::new();
    let catalog = fake_catalog(&fixtures);

    let names: Vec<_> = catalog.iter().map(|test| test.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "FakeTests.Basic.Crash",
            "FakeTests.Basic.DISABLED_Skip",
            "FakeTests.Basic.Env",
            "FakeTests.Basic.Fail",
            "FakeTests.Basic.Pass",
            "FakeTests.Basic.Slow",
            "FakeTests.Other.Pass",
        ]
    );
    assert_eq!(catalog.binary_count(), 1);
    assert_eq!(
        catalog.binary_path(FAKE_BINARY_ID),
        Some(fixtures.fake_binary().path.as_path())
    );
}

#[test]
fn test_catalog_fails_on_broken_binary() {
    let fixtures = FixtureDir::new();
    let err = Catalog::new(
        [fixtures.fake_binary(), fixtures.broken_binary()],
        &sh_target(),
    )
    .expect_err("broken binary fails to list");
    assert_eq!(err.binary_id(), "BrokenTests");
}

#[test]
fn test_run_statuses() {
    let fixtures = FixtureDir::new();
    let catalog = fake_catalog(&fixtures);
    let selected = catalog.tests().to_vec();

    let (started, results) = run_tests(&fixtures, &catalog, selected.clone(), |_| {});

    assert_eq!(
        statuses(&results),
        BTreeMap::from([
            ("Basic.Crash", TestStatus::Crashed),
            ("Basic.DISABLED_Skip", TestStatus::Disabled),
            ("Basic.Env", TestStatus::Passed),
            ("Basic.Fail", TestStatus::Failed),
            ("Basic.Pass", TestStatus::Passed),
            ("Basic.Slow", TestStatus::Timeout),
            ("Other.Pass", TestStatus::Passed),
        ])
    );
    assert!(
        !started.contains(&fake_test("Basic.DISABLED_Skip")),
        "disabled test is never started"
    );
    assert_eq!(started.len(), 6);
    assert_eq!(results.cancel_reason(), None);

    let fail = &results.results()[&fake_test("Basic.Fail")];
    assert_eq!(fail.output, "expected 1, got 2\non stderr\n");

    let env = &results.results()[&fake_test("Basic.Env")];
    assert_eq!(env.output, "greeting: hello\n", "env is prefixed for the child");

    let slow = &results.results()[&fake_test("Basic.Slow")];
    assert!(
        slow.duration >= FIXTURE_TIMEOUT,
        "timed out test ran for at least the timeout ({:?})",
        slow.duration
    );

    let summary = RunSummary::new(&selected, results.results());
    assert_eq!(summary.passed, 3);
    assert_eq!(summary.disabled, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.crashed, 1);
    assert_eq!(summary.timed_out, 1);
    assert_eq!(summary.ran_count(), 6);
    assert!(summary.skipped.is_empty());
    assert!(!summary.is_success());
}

#[test]
fn test_run_disabled() {
    let fixtures = FixtureDir::new();
    let catalog = fake_catalog(&fixtures);
    let selected = TestSelector::new(["DISABLED_Skip"]).select(&catalog);
    assert_eq!(selected, vec![fake_test("Basic.DISABLED_Skip")]);

    let (started, results) = run_tests(&fixtures, &catalog, selected, |builder| {
        builder.set_run_disabled(true);
    });

    assert_eq!(started, vec![fake_test("Basic.DISABLED_Skip")]);
    assert_eq!(
        statuses(&results),
        BTreeMap::from([("Basic.DISABLED_Skip", TestStatus::Passed)])
    );
}

#[test]
fn test_cancel_before_run() {
    let fixtures = FixtureDir::new();
    let catalog = fake_catalog(&fixtures);
    let selected = TestSelector::new(["Pass"]).select(&catalog);
    assert_eq!(selected.len(), 2);

    let config = fixtures.config();
    let profile = config.profile("default").expect("default profile exists");
    let mut runner = TestRunnerBuilder::default()
        .build(
            &catalog,
            selected.clone(),
            &profile,
            sh_target(),
            SignalHandlerKind::Noop,
        )
        .expect("runner built");
    runner.cancel_handle().cancel();

    let mut cancel_events = 0;
    let results = runner.execute(|event| {
        if let TestEvent::RunBeginCancel { reason, .. } = event {
            assert_eq!(reason, CancelReason::Requested);
            cancel_events += 1;
        }
    });

    assert_eq!(cancel_events, 1);
    assert_eq!(results.cancel_reason(), Some(CancelReason::Requested));
    assert!(results.results().is_empty(), "no test is started");

    let summary = RunSummary::new(&selected, results.results());
    assert_eq!(summary.skipped, selected);
    assert!(!summary.is_success());
}

#[test]
fn test_cancel_while_running() {
    let fixtures = FixtureDir::new();
    let catalog = fake_catalog(&fixtures);
    let selected =
        TestSelector::new(["Basic.Slow", "Basic.Pass", "Other.Pass", "Basic.Fail"]).select(&catalog);
    assert_eq!(selected.len(), 4);

    let (started, results) = run_tests(&fixtures, &catalog, selected.clone(), |builder| {
        builder.set_test_threads(TestThreads::Count(1));
    });
    assert_eq!(started.len(), 4, "without cancellation every test starts");
    assert_eq!(results.results().len(), 4);

    let config = fixtures.config();
    let profile = config.profile("default").expect("default profile exists");
    let mut builder = TestRunnerBuilder::default();
    builder.set_test_threads(TestThreads::Count(1));
    let mut runner = builder
        .build(
            &catalog,
            selected.clone(),
            &profile,
            sh_target(),
            SignalHandlerKind::Noop,
        )
        .expect("runner built");
    let handle = runner.cancel_handle();

    // Basic.Slow runs until the timeout, so the cancellation is seen while it's in flight.
    let mut events = Vec::new();
    let results = runner.execute(|event| match event {
        TestEvent::TestStarted { test, .. } => {
            if events.is_empty() {
                handle.cancel();
            }
            events.push(format!("started {}", test.suite_and_test()));
        }
        TestEvent::RunBeginCancel { reason, running } => {
            events.push(format!("cancel {} ({running} running)", reason.to_static_str()));
        }
        TestEvent::TestFinished { result, .. } => {
            events.push(format!("finished {}", result.test.suite_and_test()));
        }
        _ => {}
    });

    assert_eq!(
        events,
        vec![
            "started Basic.Slow",
            "cancel cancellation requested (1 running)",
            "finished Basic.Slow",
        ]
    );
    assert_eq!(results.cancel_reason(), Some(CancelReason::Requested));
    assert_eq!(
        statuses(&results),
        BTreeMap::from([("Basic.Slow", TestStatus::Timeout)]),
        "the in-flight test keeps its result"
    );

    let summary = RunSummary::new(&selected, results.results());
    assert_eq!(
        summary.skipped,
        vec![
            fake_test("Basic.Pass"),
            fake_test("Other.Pass"),
            fake_test("Basic.Fail"),
        ]
    );
    assert_eq!(summary.ran_count(), 1);
    assert!(!summary.is_success());
}

#[test]
fn test_leak_timeout_is_a_total_budget() {
    let fixtures = FixtureDir::new();
    let catalog =
        Catalog::new([fixtures.leaky_binary()], &sh_target()).expect("listed leaky binary");
    let leak_timeout = Duration::from_millis(400);

    let (_, results) = run_tests(&fixtures, &catalog, catalog.tests().to_vec(), |builder| {
        builder.set_leak_timeout(leak_timeout);
    });

    let result = &results.results()[&TestIdentifier::from("LeakyTests.Leak.Grandchild")];
    assert_eq!(result.status, TestStatus::Passed);
    // stderr closes after 300ms while stdout stays open, which must not restart the wait.
    assert!(
        result.duration >= leak_timeout && result.duration < Duration::from_millis(650),
        "waited for the leak timeout once ({:?})",
        result.duration
    );
}
