// Copyright (c) The apitest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use apitest_runner::{
    config::ApiTestConfig,
    provision::ExecutionTarget,
    test_list::{Catalog, TestBinary, TestIdentifier},
};
use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use indoc::{formatdoc, indoc};
use std::time::Duration;

/// The ID of the fake binary written by [`FixtureDir::new`].
pub(crate) const FAKE_BINARY_ID: &str = "FakeTests";

/// Timeout used for runs against the fake binary. `Basic.Slow` sleeps for much longer than this.
pub(crate) const FIXTURE_TIMEOUT: Duration = Duration::from_millis(500);

const FAKE_BINARY_SCRIPT: &str = indoc! {r#"
    case "$1" in
        --gtest_list_tests)
            echo "Basic."
            echo "  Pass"
            echo "  Fail"
            echo "  Crash"
            echo "  Slow"
            echo "  Env"
            echo "  DISABLED_Skip"
            echo "Other."
            echo "  Pass"
            ;;
        --gtest_filter=Basic.Pass|--gtest_filter=Other.Pass)
            echo "[ RUN      ] ${1#--gtest_filter=}"
            exit 0
            ;;
        --gtest_filter=Basic.Fail)
            echo "expected 1, got 2"
            echo "on stderr" >&2
            exit 1
            ;;
        --gtest_filter=Basic.Crash)
            kill -SEGV $$
            ;;
        --gtest_filter=Basic.Slow)
            exec sleep 30
            ;;
        --gtest_filter=Basic.Env)
            echo "greeting: $APITEST_CHILD_GREETING"
            exit 0
            ;;
        --gtest_filter=Basic.DISABLED_Skip)
            if [ "$2" = "--gtest_also_run_disabled_tests" ]; then
                exit 0
            fi
            exit 1
            ;;
        *)
            echo "unexpected arguments: $*" >&2
            exit 2
            ;;
    esac
"#};

const BROKEN_BINARY_SCRIPT: &str = indoc! {r#"
    echo "cannot list tests" >&2
    exit 1
"#};

/// The one test in this binary exits right away, but leaves a background process that closes
/// stderr after 300ms and holds stdout open for several seconds.
const LEAKY_BINARY_SCRIPT: &str = indoc! {r#"
    case "$1" in
        --gtest_list_tests)
            echo "Leak."
            echo "  Grandchild"
            ;;
        *)
            (sleep 0.3; exec 2>&-; sleep 5) &
            exit 0
            ;;
    esac
"#};

/// A temporary directory holding fake test binaries.
pub(crate) struct FixtureDir {
    dir: Utf8TempDir,
}

impl FixtureDir {
    pub(crate) fn new() -> Self {
        let dir = camino_tempfile::Builder::new()
            .prefix("apitest-fixture-")
            .tempdir()
            .expect("created temp dir");
        std::fs::write(dir.path().join(FAKE_BINARY_ID), FAKE_BINARY_SCRIPT)
            .expect("wrote fake binary");
        std::fs::write(dir.path().join("BrokenTests"), BROKEN_BINARY_SCRIPT)
            .expect("wrote broken binary");
        std::fs::write(dir.path().join("LeakyTests"), LEAKY_BINARY_SCRIPT)
            .expect("wrote leaky binary");
        Self { dir }
    }

    pub(crate) fn fake_binary(&self) -> TestBinary {
        TestBinary::new(self.dir.path().join(FAKE_BINARY_ID))
    }

    pub(crate) fn broken_binary(&self) -> TestBinary {
        TestBinary::new(self.dir.path().join("BrokenTests"))
    }

    pub(crate) fn leaky_binary(&self) -> TestBinary {
        TestBinary::new(self.dir.path().join("LeakyTests"))
    }

    pub(crate) fn dir(&self) -> &Utf8Path {
        self.dir.path()
    }

    pub(crate) fn path(&self, name: &str) -> Utf8PathBuf {
        self.dir.path().join(name)
    }

    /// Returns a config that runs the fake binary through `/bin/sh`.
    pub(crate) fn config(&self) -> ApiTestConfig {
        let contents = formatdoc! {r#"
            binaries = ["{binary}"]

            [target]
            runner = ["/bin/sh"]
            env-prefix = "APITEST_CHILD_"

            [env]
            GREETING = "hello"

            [profile.default]
            timeout = "{timeout}ms"
            test-threads = 2
            "#,
            binary = FAKE_BINARY_ID,
            timeout = FIXTURE_TIMEOUT.as_millis(),
        };
        ApiTestConfig::from_str_for_test(&contents).expect("fixture config is valid")
    }
}

/// A target that runs the fake binaries through `/bin/sh`.
pub(crate) fn sh_target() -> ExecutionTarget {
    ExecutionTarget::new(
        ["/bin/sh"],
        [("GREETING", "hello")],
        Some("APITEST_CHILD_"),
    )
}

pub(crate) fn fake_catalog(fixtures: &FixtureDir) -> Catalog {
    Catalog::new([fixtures.fake_binary()], &sh_target()).expect("fake binary lists its tests")
}

pub(crate) fn fake_test(suite_and_test: &str) -> TestIdentifier {
    TestIdentifier::from(format!("{FAKE_BINARY_ID}.{suite_and_test}"))
}
