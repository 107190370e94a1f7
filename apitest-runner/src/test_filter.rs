// Copyright (c) The apitest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Selecting tests out of a catalog based on user-specified name patterns.
//!
//! The main structure in this module is [`TestSelector`].

use crate::test_list::{Catalog, TestIdentifier};
use indexmap::IndexSet;

/// A single user-supplied selection pattern, classified by how many `.`-separated components it
/// has.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SelectionPattern {
    /// One component: matches a suite or test name, in any binary.
    Name(String),

    /// Two components: matches a `<suite>.<test>` or a `<binary>.<suite>` pair.
    Pair(String, String),

    /// Anything else: matches a full identifier exactly.
    Exact(String),
}

impl SelectionPattern {
    /// Classifies a raw pattern.
    pub fn new(pattern: &str) -> Self {
        let components: Vec<_> = pattern.split('.').collect();
        match components.as_slice() {
            [name] => Self::Name((*name).to_owned()),
            [first, second] => Self::Pair((*first).to_owned(), (*second).to_owned()),
            _ => Self::Exact(pattern.to_owned()),
        }
    }

    /// Returns true if this pattern selects the given test.
    pub fn matches(&self, test: &TestIdentifier) -> bool {
        let (binary, suite, name) = test.segments();
        match self {
            Self::Name(pattern) => pattern == suite || pattern == name,
            Self::Pair(first, second) => {
                (first == suite && second == name) || (first == binary && second == suite)
            }
            Self::Exact(pattern) => pattern == test.as_str(),
        }
    }
}

/// Selects a subset of a [`Catalog`] from a list of patterns.
#[derive(Clone, Debug)]
pub struct TestSelector {
    patterns: Vec<SelectionPattern>,
}

impl TestSelector {
    /// Creates a new `TestSelector` from the given patterns.
    ///
    /// If `patterns` is empty, every test in the catalog is selected.
    pub fn new(patterns: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        let patterns = patterns
            .into_iter()
            .map(|pattern| SelectionPattern::new(pattern.as_ref()))
            .collect();
        Self { patterns }
    }

    /// Returns true if no patterns were specified.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Returns the tests selected out of the catalog.
    ///
    /// Patterns are scanned in the order they were given, and within a pattern tests appear in
    /// catalog order. A test matched by more than one pattern is only returned once, at the
    /// position of its first match. The result is not re-sorted.
    pub fn select(&self, catalog: &Catalog) -> Vec<TestIdentifier> {
        if self.patterns.is_empty() {
            return catalog.tests().to_vec();
        }

        let mut selected = IndexSet::new();
        for pattern in &self.patterns {
            for test in catalog.iter() {
                if pattern.matches(test) {
                    selected.insert(test);
                }
            }
        }

        selected.into_iter().cloned().collect()
    }
}
