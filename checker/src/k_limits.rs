// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

// Somewhat arbitrary constants used to limit things in the abstract interpreter that may
// take too long or use too much memory.

/// How many pointer, array or object reference levels of a formal parameter get unfolded
/// into symbolic values. Deeper levels keep whatever default value their location has.
pub const MAX_DECLARATION_DEPTH: usize = 2;

/// Double the observed maximum used in practice.
pub const MAX_FIXPOINT_ITERATIONS: usize = 10;

/// Loop heads are joined this many times before the scheduler switches to widening.
pub const WIDEN_AFTER_ITERATIONS: usize = 2;

/// Only the shortest traces are kept once a value accumulates more than this many.
pub const MAX_TRACES_PER_VALUE: usize = 4;

/// Keeps relation snapshots, and hence summaries, small.
pub const MAX_RELATION_CONSTRAINTS: usize = 64;

/// Another process may be holding the summary store, so opening it is retried this often.
pub const MAX_SUMMARY_STORE_OPEN_ATTEMPTS: usize = 50;
