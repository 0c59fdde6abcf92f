// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::options::DiagLevel;
use crate::program::SourceLocation;
use crate::trace::TraceStep;

use log_derive::logfn_inputs;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result};
use std::rc::Rc;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum ReportKind {
    BufferOverrun,
    PossibleBufferOverrun,
    BufferUnderrun,
    PossibleBufferUnderrun,
    UnreachableCode,
    ConditionAlwaysTrue,
    ConditionAlwaysFalse,
    /// Fixpoint iteration was cut off before the state stabilized.
    IterationLimit,
}

impl ReportKind {
    pub fn severity(self) -> Severity {
        match self {
            ReportKind::BufferOverrun
            | ReportKind::BufferUnderrun
            | ReportKind::UnreachableCode
            | ReportKind::ConditionAlwaysTrue
            | ReportKind::ConditionAlwaysFalse => Severity::Error,
            ReportKind::PossibleBufferOverrun
            | ReportKind::PossibleBufferUnderrun
            | ReportKind::IterationLimit => Severity::Warning,
        }
    }
}

impl Display for ReportKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(match self {
            ReportKind::BufferOverrun => "BUFFER_OVERRUN",
            ReportKind::PossibleBufferOverrun => "BUFFER_OVERRUN_MAYBE",
            ReportKind::BufferUnderrun => "BUFFER_UNDERRUN",
            ReportKind::PossibleBufferUnderrun => "BUFFER_UNDERRUN_MAYBE",
            ReportKind::UnreachableCode => "UNREACHABLE_CODE",
            ReportKind::ConditionAlwaysTrue => "CONDITION_ALWAYS_TRUE",
            ReportKind::ConditionAlwaysFalse => "CONDITION_ALWAYS_FALSE",
            ReportKind::IterationLimit => "ITERATION_LIMIT",
        })
    }
}

/// A finding, ready to be shown to a user.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct Report {
    pub kind: ReportKind,
    pub severity: Severity,
    pub procedure: Rc<str>,
    pub location: SourceLocation,
    pub message: String,
    pub trace: Vec<TraceStep>,
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        writeln!(
            f,
            "{}: {} [{}] in {}: {}",
            self.location, severity, self.kind, self.procedure, self.message
        )?;
        for step in self.trace.iter() {
            writeln!(
                f,
                "{:indent$}{}: {}",
                "",
                step.loc,
                step.description,
                indent = 2 + 2 * step.depth
            )?;
        }
        Ok(())
    }
}

/// Collects the reports of one procedure analysis. Owned by that analysis and drained into a
/// sink when the procedure is done, so reports come out sorted and in one batch.
#[derive(Debug)]
pub struct ReportingContext {
    pub procedure: Rc<str>,
    pub diag_level: DiagLevel,
    reports: Vec<Report>,
}

impl ReportingContext {
    pub fn new(procedure: Rc<str>, diag_level: DiagLevel) -> ReportingContext {
        ReportingContext {
            procedure,
            diag_level,
            reports: Vec::new(),
        }
    }

    #[logfn_inputs(DEBUG)]
    pub fn report(
        &mut self,
        kind: ReportKind,
        location: &SourceLocation,
        message: String,
        trace: Vec<TraceStep>,
    ) {
        let report = Report {
            kind,
            severity: kind.severity(),
            procedure: self.procedure.clone(),
            location: location.clone(),
            message,
            trace,
        };
        if !self.reports.contains(&report) {
            self.reports.push(report);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// The collected reports, sorted by location so that runs can be compared.
    pub fn finish(mut self) -> Vec<Report> {
        self.reports.sort_by(|r1, r2| {
            r1.location
                .cmp(&r2.location)
                .then_with(|| r1.kind.cmp(&r2.kind))
                .then_with(|| r1.message.cmp(&r2.message))
        });
        self.reports
    }
}

/// Consumes the finished reports of each procedure.
pub trait ReportSink {
    fn consume(&mut self, procedure: &str, reports: Vec<Report>);
}

/// A sink that keeps everything, in the order procedures were finished.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub reports: Vec<Report>,
}

impl ReportSink for CollectingSink {
    fn consume(&mut self, _procedure: &str, reports: Vec<Report>) {
        self.reports.extend(reports);
    }
}

/// A sink that prints reports to standard output as they arrive.
#[derive(Debug, Default)]
pub struct PrintingSink {
    pub count: usize,
}

impl ReportSink for PrintingSink {
    fn consume(&mut self, _procedure: &str, reports: Vec<Report>) {
        for report in reports {
            print!("{}", report);
            self.count += 1;
        }
    }
}
