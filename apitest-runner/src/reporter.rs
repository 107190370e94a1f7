// Copyright (c) The apitest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Summarizing and reporting the results of a run.
//!
//! [`RunSummary`] is the accounting derived from the selection and the result map. The
//! [`TestReporter`] prints progress as events come in, and the final report once the run is done.

use crate::{
    errors::WriteReportError,
    helpers::{DisplayDuration, write_test_name},
    runner::{ResultMap, TestEvent, TestResult, TestStatus},
    test_list::TestIdentifier,
};
use owo_colors::{OwoColorize, Style};
use std::{io, io::Write};

/// The statuses reported as failures, in the order their groups are printed.
pub const FAILING_STATUSES: [TestStatus; 3] =
    [TestStatus::Failed, TestStatus::Crashed, TestStatus::Timeout];

/// Rule printed above the final report.
pub const REPORT_RULE: &str = "------------------------------";

/// Counts derived from the selected tests and the result map of a run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunSummary {
    /// The number of tests that were selected.
    pub selected_count: usize,

    /// The number of tests that passed.
    pub passed: usize,

    /// The number of tests that were disabled.
    pub disabled: usize,

    /// The number of tests that failed.
    pub failed: usize,

    /// The number of tests that crashed.
    pub crashed: usize,

    /// The number of tests that timed out.
    pub timed_out: usize,

    /// Tests that were selected but never produced a result, in selection order.
    pub skipped: Vec<TestIdentifier>,
}

impl RunSummary {
    /// Computes the summary of a run.
    pub fn new(selected: &[TestIdentifier], results: &ResultMap) -> Self {
        let mut summary = Self {
            selected_count: selected.len(),
            ..Self::default()
        };

        for result in results.values() {
            match result.status {
                TestStatus::Passed => summary.passed += 1,
                TestStatus::Disabled => summary.disabled += 1,
                TestStatus::Failed => summary.failed += 1,
                TestStatus::Crashed => summary.crashed += 1,
                TestStatus::Timeout => summary.timed_out += 1,
            }
        }

        summary.skipped = selected
            .iter()
            .filter(|test| !results.contains_key(*test))
            .cloned()
            .collect();

        summary
    }

    /// Returns true if every selected test either passed or was disabled.
    pub fn is_success(&self) -> bool {
        self.passed + self.disabled == self.selected_count
    }

    /// Returns the number of tests that were actually run, i.e. excluding disabled tests.
    pub fn ran_count(&self) -> usize {
        self.passed + self.failed + self.crashed + self.timed_out
    }
}

/// Writes the failing tests in `results`, grouped by status, without colors.
///
/// Groups are written in the order of [`FAILING_STATUSES`]. Empty groups are omitted entirely.
pub fn render(results: &ResultMap, writer: impl Write) -> io::Result<()> {
    TestReporter::new(false).write_failures(results, writer)
}

/// Functionality to report test progress and results.
#[derive(Debug, Default)]
pub struct TestReporter {
    verbose: bool,
    styles: Box<Styles>,
}

impl TestReporter {
    /// Creates a new reporter.
    ///
    /// If `verbose` is true, every finished test is reported, and skipped tests are listed in the
    /// final report. Otherwise only failing tests are reported as they finish.
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            styles: Box::default(),
        }
    }

    /// Colorizes output.
    pub fn colorize(&mut self) {
        self.styles.colorize();
    }

    /// Reports a test event.
    pub fn report_event(
        &mut self,
        event: &TestEvent<'_>,
        writer: impl Write,
    ) -> Result<(), WriteReportError> {
        self.write_event(event, writer)?;
        Ok(())
    }

    /// Writes the final report for a run.
    pub fn report_final(
        &self,
        selected: &[TestIdentifier],
        results: &ResultMap,
        mut writer: impl Write,
    ) -> Result<(), WriteReportError> {
        let summary = RunSummary::new(selected, results);

        writeln!(writer, "{REPORT_RULE}")?;
        if summary.is_success() {
            writeln!(
                writer,
                "{}",
                "All tests successfully passed!".style(self.styles.pass)
            )?;
            return Ok(());
        }

        writeln!(writer, "{}", "Test suite failed".style(self.styles.fail))?;
        writeln!(writer)?;

        if !summary.skipped.is_empty() {
            writeln!(
                writer,
                "Skipped {} tests",
                summary.skipped.len().style(self.styles.count)
            )?;
            writeln!(writer)?;
            if self.verbose {
                for test in &summary.skipped {
                    write!(writer, "    ")?;
                    self.write_test(test, &mut writer)?;
                    writeln!(writer)?;
                }
                writeln!(writer)?;
            }
        }

        self.write_failures(results, &mut writer)?;
        Ok(())
    }

    /// Writes the failing tests in `results`, grouped by status.
    pub fn write_failures(&self, results: &ResultMap, mut writer: impl Write) -> io::Result<()> {
        for status in FAILING_STATUSES {
            let group: Vec<&TestResult> = results
                .values()
                .filter(|result| result.status == status)
                .collect();
            if group.is_empty() {
                continue;
            }

            writeln!(writer, "{}", status.name().style(self.styles.heading))?;
            writeln!(writer)?;

            let mut needs_newline = false;
            for result in group {
                write!(writer, "    ")?;
                self.write_test(&result.test, &mut writer)?;
                writeln!(writer)?;

                let mut has_output = false;
                for line in result.output.lines() {
                    writeln!(writer, "        {line}")?;
                    has_output = true;
                }
                if has_output {
                    writeln!(writer)?;
                }
                needs_newline = !has_output;
            }
            if needs_newline {
                writeln!(writer)?;
            }
        }

        Ok(())
    }

    // ---
    // Helper methods
    // ---

    fn write_event(&mut self, event: &TestEvent<'_>, mut writer: impl Write) -> io::Result<()> {
        match event {
            TestEvent::RunStarted {
                selected,
                worker_count,
            } => {
                write!(writer, "{:>12} ", "Starting".style(self.styles.pass))?;
                write!(writer, "{}", selected.len().style(self.styles.count))?;
                write!(writer, " tests across ")?;
                write!(writer, "{}", worker_count.style(self.styles.count))?;
                writeln!(
                    writer,
                    " {}",
                    if *worker_count == 1 {
                        "worker"
                    } else {
                        "workers"
                    }
                )?;
            }
            TestEvent::TestStarted { .. } => {}
            TestEvent::TestFinished { result, .. } => {
                if !self.verbose && result.status.is_success() {
                    return Ok(());
                }

                let (label, style) = match result.status {
                    TestStatus::Passed => ("PASS", self.styles.pass),
                    TestStatus::Failed => ("FAIL", self.styles.fail),
                    TestStatus::Crashed => ("CRASH", self.styles.fail),
                    TestStatus::Timeout => ("TIMEOUT", self.styles.fail),
                    TestStatus::Disabled => ("DISABLED", self.styles.skip),
                };
                write!(writer, "{:>12} ", label.style(style))?;

                if result.status == TestStatus::Disabled {
                    // Same spacing as [   0.034s].
                    write!(writer, "[         ] ")?;
                } else {
                    write!(writer, "{} ", DisplayDuration(result.duration))?;
                }

                self.write_test(&result.test, &mut writer)?;
                writeln!(writer)?;
            }
            TestEvent::RunBeginCancel { reason, running } => {
                write!(writer, "{:>12} ", "Canceling".style(self.styles.fail))?;
                write!(writer, "due to ")?;
                write!(writer, "{}", reason.to_static_str().style(self.styles.count))?;
                write!(writer, ", ")?;
                write!(writer, "{}", running.style(self.styles.count))?;
                writeln!(writer, " tests still running")?;
            }
            TestEvent::RunFinished {
                results, elapsed, ..
            } => {
                let results = results.results();
                write!(writer, "{:>12} ", "Finished".style(self.styles.pass))?;
                write!(writer, "{} ", DisplayDuration(*elapsed))?;
                write!(writer, "{}", results.len().style(self.styles.count))?;
                writeln!(writer, " tests finished")?;
            }
        }

        Ok(())
    }

    fn write_test(&self, test: &TestIdentifier, mut writer: impl Write) -> io::Result<()> {
        let mut buf = String::new();
        write_test_name(
            test.as_str(),
            self.styles.binary,
            self.styles.test_name,
            &mut buf,
        )
        .map_err(io::Error::other)?;
        write!(writer, "{buf}")
    }
}

#[derive(Clone, Debug, Default)]
struct Styles {
    count: Style,
    pass: Style,
    fail: Style,
    skip: Style,
    heading: Style,
    binary: Style,
    test_name: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.skip = Style::new().yellow().bold();
        self.heading = Style::new().bold();
        self.binary = Style::new().magenta().bold();
        self.test_name = Style::new().blue().bold();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use maplit::btreemap;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn id(name: &str) -> TestIdentifier {
        TestIdentifier::from(name)
    }

    fn result(name: &str, status: TestStatus, output: &str) -> TestResult {
        TestResult::new(id(name), status, output)
    }

    #[test]
    fn test_summary_disabled_counts_as_success() {
        let selected = vec![id("A.Suite1.T1"), id("A.Suite1.T2")];
        let results = btreemap! {
            id("A.Suite1.T1") => result("A.Suite1.T1", TestStatus::Passed, ""),
            id("A.Suite1.T2") => result("A.Suite1.T2", TestStatus::Disabled, ""),
        };

        let summary = RunSummary::new(&selected, &results);
        assert!(summary.is_success());
        assert_eq!(summary.disabled, 1);
        assert_eq!(summary.ran_count(), 1);
        assert!(summary.skipped.is_empty());
    }

    #[test]
    fn test_summary_missing_result_is_skipped() {
        let selected = vec![id("A.Suite1.T1"), id("A.Suite1.T2")];
        let results = btreemap! {
            id("A.Suite1.T1") => result("A.Suite1.T1", TestStatus::Passed, ""),
        };

        let summary = RunSummary::new(&selected, &results);
        assert!(!summary.is_success());
        assert_eq!(summary.skipped, vec![id("A.Suite1.T2")]);
    }

    #[test]
    fn test_summary_failures() {
        let selected = vec![id("A.S.Fail"), id("A.S.Crash"), id("A.S.Hang")];
        let results = btreemap! {
            id("A.S.Fail") => result("A.S.Fail", TestStatus::Failed, ""),
            id("A.S.Crash") => result("A.S.Crash", TestStatus::Crashed, ""),
            id("A.S.Hang") => result("A.S.Hang", TestStatus::Timeout, ""),
        };

        let summary = RunSummary::new(&selected, &results);
        assert!(!summary.is_success());
        assert_eq!(
            (summary.failed, summary.crashed, summary.timed_out),
            (1, 1, 1)
        );
        assert_eq!(summary.ran_count(), 3);
    }

    #[test]
    fn test_render_groups() {
        let results = btreemap! {
            id("A.S.Crash") => result("A.S.Crash", TestStatus::Crashed, ""),
            id("A.S.Fail1") => result("A.S.Fail1", TestStatus::Failed, "line 1\nline 2\n"),
            id("A.S.Fail2") => result("A.S.Fail2", TestStatus::Failed, "oops"),
            id("A.S.Pass") => result("A.S.Pass", TestStatus::Passed, "ignored"),
        };

        let mut buf = Vec::new();
        render(&results, &mut buf).expect("writing to a Vec succeeds");

        static EXPECTED: &str = indoc! {"
            Failed

                A.S.Fail1
                    line 1
                    line 2

                A.S.Fail2
                    oops

            Crashed

                A.S.Crash

        "};
        assert_eq!(String::from_utf8(buf).expect("output is UTF-8"), EXPECTED);
    }

    #[test]
    fn test_report_final_success() {
        let selected = vec![id("A.S.T1")];
        let results = btreemap! {
            id("A.S.T1") => result("A.S.T1", TestStatus::Passed, ""),
        };

        let mut buf = Vec::new();
        TestReporter::new(false)
            .report_final(&selected, &results, &mut buf)
            .expect("writing to a Vec succeeds");
        assert_eq!(
            String::from_utf8(buf).expect("output is UTF-8"),
            "------------------------------\nAll tests successfully passed!\n"
        );
    }

    #[test]
    fn test_report_final_failure() {
        let selected = vec![id("A.S.T1"), id("A.S.T2"), id("A.S.T3")];
        let results = btreemap! {
            id("A.S.T1") => result("A.S.T1", TestStatus::Timeout, "still waiting\n"),
        };

        static EXPECTED_QUIET: &str = indoc! {"
            ------------------------------
            Test suite failed

            Skipped 2 tests

            Timeout

                A.S.T1
                    still waiting

        "};
        static EXPECTED_VERBOSE: &str = indoc! {"
            ------------------------------
            Test suite failed

            Skipped 2 tests

                A.S.T2
                A.S.T3

            Timeout

                A.S.T1
                    still waiting

        "};

        for (verbose, expected) in [(false, EXPECTED_QUIET), (true, EXPECTED_VERBOSE)] {
            let mut buf = Vec::new();
            TestReporter::new(verbose)
                .report_final(&selected, &results, &mut buf)
                .expect("writing to a Vec succeeds");
            assert_eq!(String::from_utf8(buf).expect("output is UTF-8"), expected);
        }
    }

    #[test]
    fn test_report_events() {
        let passed = TestResult {
            duration: Duration::from_millis(34),
            ..result("A.S.Pass", TestStatus::Passed, "")
        };
        let disabled = result("A.S.DISABLED_T", TestStatus::Disabled, "");

        let mut quiet = Vec::new();
        let mut verbose = Vec::new();
        for result in [&passed, &disabled] {
            let event = TestEvent::TestFinished {
                result,
                worker: 0,
                running: 0,
            };
            TestReporter::new(false)
                .report_event(&event, &mut quiet)
                .expect("writing to a Vec succeeds");
            TestReporter::new(true)
                .report_event(&event, &mut verbose)
                .expect("writing to a Vec succeeds");
        }

        assert!(quiet.is_empty(), "successful tests aren't reported by default");
        assert_eq!(
            String::from_utf8(verbose).expect("output is UTF-8"),
            "        PASS [   0.034s] A.S.Pass\n    DISABLED [         ] A.S.DISABLED_T\n"
        );
    }
}
