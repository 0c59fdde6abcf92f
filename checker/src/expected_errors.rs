// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::reporting::Report;

use log_derive::logfn_inputs;

/// A collection of error strings that are expected for a test case.
#[derive(Debug)]
pub struct ExpectedErrors {
    expected_messages: Vec<String>,
}

impl ExpectedErrors {
    /// Each message is expected to be a part of exactly one report.
    #[logfn_inputs(TRACE)]
    pub fn new(messages: &[&str]) -> ExpectedErrors {
        ExpectedErrors {
            expected_messages: messages.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// Checks if the given set of reports matches the expected messages.
    #[logfn_inputs(TRACE)]
    pub fn check_messages(&mut self, reports: &[Report]) -> bool {
        for report in reports.iter() {
            if !self.remove_message(report) {
                return false;
            }
        }
        if !self.expected_messages.is_empty() {
            println!("Expected errors not reported: {:?}", self.expected_messages);
            return false;
        }
        true
    }

    /// Removes the longest expected message that is part of the report, if any.
    #[logfn_inputs(TRACE)]
    fn remove_message(&mut self, report: &Report) -> bool {
        let text = format!("{}: {}", report.kind, report.message);
        let mut longest_match: Option<(usize, usize)> = None;
        for (i, expected) in self.expected_messages.iter().enumerate() {
            if text.contains(expected.as_str())
                && longest_match.map_or(true, |(_, len)| len < expected.len())
            {
                longest_match = Some((i, expected.len()));
            }
        }
        match longest_match {
            Some((pos, _)) => {
                self.expected_messages.remove(pos);
                true
            }
            None => {
                println!(
                    "Unexpected error: \"{}\". Expected: {:?} (at {})",
                    text, self.expected_messages, report.location,
                );
                false
            }
        }
    }
}
