// Copyright (c) The apitest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Building the catalog of tests available in a set of test binaries.
//!
//! Each binary is queried with `--gtest_list_tests`, which prints suites and their tests in a
//! grouped, human-readable format:
//!
//! ```text
//! WTF_Vector.
//!   Basic
//!   Iterator
//! WTF_HashMap.
//!   Basic
//! ```
//!
//! Every test is namespaced by the binary it came from, so the above output from `TestWTF`
//! produces `TestWTF.WTF_Vector.Basic`, `TestWTF.WTF_Vector.Iterator` and
//! `TestWTF.WTF_HashMap.Basic`.

mod output_format;
pub use output_format::*;

use crate::{
    errors::{CreateCatalogError, WriteTestListError},
    helpers::write_test_name,
    provision::ExecutionTarget,
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;
use owo_colors::Style;
use serde::{Deserialize, Serialize};
use std::{
    borrow::Borrow,
    collections::{BTreeMap, BTreeSet},
    fmt, io,
    io::Write,
};
use tracing::debug;

/// The argument that makes a test binary list its tests instead of running them.
pub const LIST_TESTS_ARG: &str = "--gtest_list_tests";

/// Prefix used by the harness to mark a suite or test as intentionally disabled.
pub const DISABLED_PREFIX: &str = "DISABLED_";

/// A fully-qualified test name of the form `<binary>.<suite>.<test>`.
///
/// Ordering and equality are lexicographic on the full string.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestIdentifier(String);

impl TestIdentifier {
    /// Creates a new identifier out of its three segments.
    pub fn new(binary_id: &str, suite: &str, test: &str) -> Self {
        Self(format!("{binary_id}.{suite}.{test}"))
    }

    /// Returns the identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the binary segment.
    pub fn binary(&self) -> &str {
        self.segments().0
    }

    /// Returns the suite segment.
    pub fn suite(&self) -> &str {
        self.segments().1
    }

    /// Returns the test segment.
    pub fn test(&self) -> &str {
        self.segments().2
    }

    /// Returns `<suite>.<test>`, the form the test binary itself understands.
    pub fn suite_and_test(&self) -> &str {
        match self.0.split_once('.') {
            Some((_, rest)) => rest,
            None => "",
        }
    }

    /// Returns true if the harness considers this test disabled, i.e. its suite or test name
    /// starts with `DISABLED_`.
    pub fn is_disabled(&self) -> bool {
        let (_, suite, test) = self.segments();
        suite.starts_with(DISABLED_PREFIX) || test.starts_with(DISABLED_PREFIX)
    }

    /// Returns the binary, suite and test segments.
    ///
    /// Missing segments are returned as empty strings.
    pub fn segments(&self) -> (&str, &str, &str) {
        let mut splits = self.0.splitn(3, '.');
        let binary = splits.next().unwrap_or_default();
        let suite = splits.next().unwrap_or_default();
        let test = splits.next().unwrap_or_default();
        (binary, suite, test)
    }
}

impl From<&str> for TestIdentifier {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for TestIdentifier {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for TestIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for TestIdentifier {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Represents a test binary.
///
/// Accepted as input to [`Catalog::new`].
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestBinary {
    /// The test binary.
    pub path: Utf8PathBuf,

    /// A unique identifier for this binary: the file name without its extension.
    pub binary_id: String,
}

impl TestBinary {
    /// Creates a new `TestBinary`, deriving its ID from the file stem.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        let path = path.into();
        let binary_id = path.file_stem().unwrap_or(path.as_str()).to_owned();
        Self { path, binary_id }
    }

    /// Runs this binary in list mode and returns its raw output.
    pub fn exec_list(&self, target: &ExecutionTarget) -> Result<String, CreateCatalogError> {
        let argv = target.argv(&self.path, &[LIST_TESTS_ARG]);
        debug!(
            "listing tests for `{}`: {}",
            self.binary_id,
            shell_words::join(&argv)
        );

        let output = target
            .to_expression(&self.path, &[LIST_TESTS_ARG])
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .run()
            .map_err(|error| CreateCatalogError::command_exec(&self.binary_id, &argv, error))?;

        if !output.status.success() {
            return Err(CreateCatalogError::command_fail(
                &self.binary_id,
                &argv,
                output.status,
                &output.stderr,
            ));
        }

        String::from_utf8(output.stdout).map_err(|error| CreateCatalogError::OutputNotUtf8 {
            binary_id: self.binary_id.clone(),
            error,
        })
    }
}

/// The de-duplicated, sorted set of tests available across all test binaries.
///
/// Built once per run and read-only afterwards.
#[derive(Clone, Debug)]
pub struct Catalog {
    binaries: BTreeMap<String, Utf8PathBuf>,
    tests: Vec<TestIdentifier>,
    styles: Box<Styles>,
}

impl Catalog {
    /// Creates a new catalog by running each binary in list mode.
    ///
    /// Fails if any binary cannot be queried: an incomplete catalog is never returned.
    pub fn new(
        test_binaries: impl IntoIterator<Item = TestBinary>,
        target: &ExecutionTarget,
    ) -> Result<Self, CreateCatalogError> {
        let outputs = test_binaries
            .into_iter()
            .map(|test_binary| {
                let output = test_binary.exec_list(target)?;
                Ok((test_binary, output))
            })
            .collect::<Result<Vec<_>, CreateCatalogError>>()?;

        Ok(Self::new_with_outputs(outputs))
    }

    /// Creates a new catalog with the given binaries and their list outputs.
    ///
    /// The result does not depend on the order in which binaries are passed in.
    pub fn new_with_outputs(
        test_bin_outputs: impl IntoIterator<Item = (TestBinary, impl AsRef<str>)>,
    ) -> Self {
        let mut binaries: BTreeMap<String, Utf8PathBuf> = BTreeMap::new();
        let mut tests = BTreeSet::new();

        for (test_binary, output) in test_bin_outputs {
            tests.extend(Self::parse(output.as_ref(), &test_binary.binary_id));

            let TestBinary { path, binary_id } = test_binary;
            // Two binaries may share a stem; pick the smallest path so the catalog doesn't depend
            // on input order.
            binaries
                .entry(binary_id)
                .and_modify(|existing| {
                    if path < *existing {
                        *existing = path.clone();
                    }
                })
                .or_insert(path);
        }

        Self {
            binaries,
            tests: tests.into_iter().collect(),
            styles: Box::default(),
        }
    }

    /// Parses the output of `--gtest_list_tests`, namespacing every test with `binary_id`.
    ///
    /// Tests are returned in the order they were listed, with duplicates removed. Lines that
    /// aren't suite headers or bare test names are dropped.
    pub fn parse(list_output: &str, binary_id: &str) -> Vec<TestIdentifier> {
        let mut result = IndexSet::new();
        let mut current_suite: Option<&str> = None;

        for line in list_output.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Some(suite) = trimmed.strip_suffix('.') {
                current_suite = Some(suite);
                continue;
            }

            let is_indented = line.starts_with(char::is_whitespace);
            if trimmed.contains(char::is_whitespace) {
                // Typed suites are printed as `Suite/0.  # TypeParam = int`. Unindented lines that
                // lead with a suite token still start a new suite.
                if !is_indented {
                    let first = trimmed.split_whitespace().next().unwrap_or_default();
                    if let Some(suite) = first.strip_suffix('.') {
                        current_suite = Some(suite);
                    }
                }
                continue;
            }

            match current_suite {
                Some(suite) => {
                    result.insert(TestIdentifier::new(binary_id, suite, trimmed));
                }
                None => {
                    debug!("for `{binary_id}`, ignoring test `{trimmed}` listed outside a suite");
                }
            }
        }

        result.into_iter().collect()
    }

    /// Colorizes output.
    pub fn colorize(&mut self) {
        self.styles.colorize();
    }

    /// Returns the total number of tests across all binaries.
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Returns true if no tests were found.
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Returns the tests, sorted lexicographically.
    pub fn tests(&self) -> &[TestIdentifier] {
        &self.tests
    }

    /// Iterates over the tests, in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &TestIdentifier> + '_ {
        self.tests.iter()
    }

    /// Returns true if the catalog contains the given test.
    pub fn contains(&self, test: &str) -> bool {
        self.tests.binary_search_by(|t| t.as_str().cmp(test)).is_ok()
    }

    /// Returns the number of binaries that were queried.
    pub fn binary_count(&self) -> usize {
        self.binaries.len()
    }

    /// Returns the path to the binary with the given ID.
    pub fn binary_path(&self, binary_id: &str) -> Option<&Utf8Path> {
        self.binaries.get(binary_id).map(|path| path.as_path())
    }

    /// Writes the given tests (typically a selection out of this catalog) to the writer.
    pub fn write_tests(
        &self,
        tests: &[TestIdentifier],
        output_format: OutputFormat,
        mut writer: impl Write,
    ) -> Result<(), WriteTestListError> {
        match output_format {
            OutputFormat::Plain => self
                .write_plain(tests, &mut writer)
                .map_err(WriteTestListError::Io),
            OutputFormat::Serializable(format) => {
                format
                    .to_writer(&self.summary(tests), &mut writer)
                    .map_err(WriteTestListError::Json)?;
                // Terminate the JSON document so that shells don't leave the prompt on its line.
                writeln!(writer).map_err(WriteTestListError::Io)
            }
        }
    }

    /// Writes the given tests to a string with the given format.
    pub fn tests_to_string(
        &self,
        tests: &[TestIdentifier],
        output_format: OutputFormat,
    ) -> Result<String, WriteTestListError> {
        let mut buf = Vec::with_capacity(1024);
        self.write_tests(tests, output_format, &mut buf)?;
        Ok(String::from_utf8(buf).expect("buffer is valid UTF-8"))
    }

    // ---
    // Helper methods
    // ---

    fn summary<'a>(&'a self, tests: &'a [TestIdentifier]) -> TestListSummary<'a> {
        let binaries = tests
            .iter()
            .filter_map(|test| {
                let binary_id = test.binary();
                self.binaries
                    .get_key_value(binary_id)
                    .map(|(id, path)| (id.as_str(), path.as_path()))
            })
            .collect();
        TestListSummary {
            test_count: tests.len(),
            binaries,
            tests,
        }
    }

    fn write_plain(&self, tests: &[TestIdentifier], mut writer: impl Write) -> io::Result<()> {
        let mut line = String::new();
        for test in tests {
            line.clear();
            write_test_name(
                test.as_str(),
                self.styles.binary,
                self.styles.test_name,
                &mut line,
            )
            .map_err(io::Error::other)?;
            writeln!(writer, "{line}")?;
        }
        Ok(())
    }
}

/// Serializable summary of a list of tests.
#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct TestListSummary<'a> {
    test_count: usize,
    binaries: BTreeMap<&'a str, &'a Utf8Path>,
    tests: &'a [TestIdentifier],
}

#[derive(Clone, Debug, Default)]
struct Styles {
    binary: Style,
    test_name: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.binary = Style::new().magenta().bold();
        self.test_name = Style::new().blue().bold();
    }
}
