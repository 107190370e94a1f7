// Copyright (c) The apitest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Splitting a selection of tests across workers.
//!
//! Tests that belong to the same suite in the same binary stay together, since suites often share
//! expensive fixtures. Suites are dealt out in order of first appearance, each to the worker that
//! currently has the fewest tests.

use crate::test_list::TestIdentifier;
use indexmap::IndexMap;

/// Partitions `tests` into at most `worker_count` disjoint slices.
///
/// Every test ends up in exactly one slice, and each slice preserves the relative order of its
/// tests within `tests`. Empty slices are never returned, so the result has at most
/// `min(worker_count, tests.len())` entries. A `worker_count` of 0 is treated as 1.
pub fn partition(tests: &[TestIdentifier], worker_count: usize) -> Vec<Vec<TestIdentifier>> {
    let worker_count = worker_count.clamp(1, tests.len().max(1));

    let mut groups: IndexMap<(&str, &str), Vec<usize>> = IndexMap::new();
    for (index, test) in tests.iter().enumerate() {
        groups
            .entry((test.binary(), test.suite()))
            .or_default()
            .push(index);
    }

    let mut assigned: Vec<Vec<usize>> = vec![Vec::new(); worker_count];
    for indexes in groups.into_values() {
        let (_, worker) = assigned
            .iter_mut()
            .enumerate()
            .min_by_key(|(worker_index, slice)| (slice.len(), *worker_index))
            .expect("worker_count is at least 1");
        worker.extend(indexes);
    }

    assigned
        .into_iter()
        .filter(|indexes| !indexes.is_empty())
        .map(|mut indexes| {
            indexes.sort_unstable();
            indexes.into_iter().map(|index| tests[index].clone()).collect()
        })
        .collect()
}
