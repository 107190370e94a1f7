// Copyright (c) The apitest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use apitest_runner::{
    provision::{HostProvisioner, WORKER_COUNT_ENV},
    session::{RunOptions, RunOutcome, RunSession},
    signal::SignalHandlerKind,
    test_list::{OutputFormat, TestBinary},
};
use indoc::indoc;
use pretty_assertions::assert_eq;

fn run_session(
    fixtures: &FixtureDir,
    provisioner: &HostProvisioner,
    binaries: Vec<TestBinary>,
    patterns: &[&str],
    options: RunOptions,
) -> (RunOutcome, String) {
    let config = fixtures.config();
    let profile = config.profile("default").expect("default profile exists");
    let patterns: Vec<String> = patterns.iter().map(|&p| p.to_owned()).collect();

    let mut output = Vec::new();
    let outcome = RunSession::new(provisioner, profile, options)
        .run(binaries, &patterns, &mut output)
        .expect("session ran");
    (
        outcome,
        String::from_utf8(output).expect("output is valid UTF-8"),
    )
}

fn noop_options() -> RunOptions {
    RunOptions {
        signal_handler: SignalHandlerKind::Noop,
        ..RunOptions::default()
    }
}

#[test]
fn test_session_success() {
    let fixtures = FixtureDir::new();
    let config = fixtures.config();
    let provisioner = HostProvisioner::from_config(&config);
    let binaries = config
        .resolve_binaries(fixtures.dir())
        .into_iter()
        .map(TestBinary::new)
        .collect();

    let (outcome, output) = run_session(
        &fixtures,
        &provisioner,
        binaries,
        &["Basic.Pass", "Basic.Env"],
        noop_options(),
    );

    assert_eq!(outcome, RunOutcome::Success);
    assert!(
        output.ends_with("------------------------------\nAll tests successfully passed!\n"),
        "unexpected output:\n{output}"
    );
}

#[test]
fn test_session_failures() {
    let fixtures = FixtureDir::new();
    let provisioner = HostProvisioner::from_config(&fixtures.config());

    let (outcome, output) = run_session(
        &fixtures,
        &provisioner,
        vec![fixtures.fake_binary()],
        &["Basic.Fail", "Basic.Crash", "Basic.Pass"],
        noop_options(),
    );

    assert_eq!(outcome, RunOutcome::TestsFailed);
    assert!(
        output.ends_with(indoc! {"
            ------------------------------
            Test suite failed

            Failed

                FakeTests.Basic.Fail
                    expected 1, got 2
                    on stderr

            Crashed

                FakeTests.Basic.Crash

        "}),
        "unexpected output:\n{output}"
    );
}

#[test]
fn test_session_dump() {
    let fixtures = FixtureDir::new();
    let provisioner = HostProvisioner::from_config(&fixtures.config());

    let options = RunOptions {
        dump: true,
        output_format: OutputFormat::Plain,
        ..noop_options()
    };
    let (outcome, output) = run_session(
        &fixtures,
        &provisioner,
        vec![fixtures.fake_binary()],
        &["Other", "Basic.Pass"],
        options,
    );

    assert_eq!(outcome, RunOutcome::Success);
    assert_eq!(output, "FakeTests.Other.Pass\nFakeTests.Basic.Pass\n");
}

#[test]
fn test_session_no_tests_found() {
    let fixtures = FixtureDir::new();
    let provisioner = HostProvisioner::from_config(&fixtures.config());

    let (outcome, output) = run_session(
        &fixtures,
        &provisioner,
        vec![fixtures.fake_binary()],
        &["NoSuchSuite.NoSuchTest"],
        noop_options(),
    );

    assert_eq!(outcome, RunOutcome::CatalogCollectionFailed);
    assert_eq!(output, "No tests found\n");
}

#[test]
fn test_session_catalog_failure() {
    let fixtures = FixtureDir::new();
    let provisioner = HostProvisioner::from_config(&fixtures.config());

    let (outcome, output) = run_session(
        &fixtures,
        &provisioner,
        vec![fixtures.fake_binary(), fixtures.broken_binary()],
        &[],
        noop_options(),
    );

    assert_eq!(outcome, RunOutcome::CatalogCollectionFailed);
    assert_eq!(output, "", "nothing is reported if the catalog can't be built");
}

#[test]
fn test_session_missing_binary() {
    let fixtures = FixtureDir::new();
    let provisioner = HostProvisioner::from_config(&fixtures.config());

    let (outcome, _) = run_session(
        &fixtures,
        &provisioner,
        vec![TestBinary::new(fixtures.path("TestWebKitAPI"))],
        &[],
        noop_options(),
    );

    assert_eq!(outcome, RunOutcome::BuildOrEnvironmentCheckFailed);
}

#[test]
fn test_session_setup_and_teardown() {
    let fixtures = FixtureDir::new();
    let setup_marker = fixtures.path("setup-marker");
    let teardown_marker = fixtures.path("teardown-marker");

    let mut provisioner = HostProvisioner::from_config(&fixtures.config());
    provisioner
        .set_setup([
            "/bin/sh".to_owned(),
            "-c".to_owned(),
            format!("echo ${WORKER_COUNT_ENV} > '{setup_marker}'"),
        ])
        .set_teardown([
            "/bin/sh".to_owned(),
            "-c".to_owned(),
            format!("touch '{teardown_marker}'"),
        ]);

    let (outcome, _) = run_session(
        &fixtures,
        &provisioner,
        vec![fixtures.fake_binary()],
        &["Basic.Pass"],
        noop_options(),
    );

    assert_eq!(outcome, RunOutcome::Success);
    assert_eq!(
        std::fs::read_to_string(&setup_marker).expect("setup ran"),
        "2\n",
        "setup sees the profile's worker count"
    );
    assert!(teardown_marker.exists(), "teardown ran after the session");
}

#[test]
fn test_session_setup_failure() {
    let fixtures = FixtureDir::new();
    let teardown_marker = fixtures.path("teardown-marker");

    let mut provisioner = HostProvisioner::from_config(&fixtures.config());
    provisioner
        .set_setup(["/bin/sh", "-c", "exit 3"])
        .set_teardown([
            "/bin/sh".to_owned(),
            "-c".to_owned(),
            format!("touch '{teardown_marker}'"),
        ]);

    let (outcome, _) = run_session(
        &fixtures,
        &provisioner,
        vec![fixtures.fake_binary()],
        &["Basic.Pass"],
        noop_options(),
    );

    assert_eq!(outcome, RunOutcome::BuildOrEnvironmentCheckFailed);
    assert!(
        !teardown_marker.exists(),
        "a target that was never acquired isn't torn down"
    );
}
