// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::k_limits;
use crate::location::Location;
use crate::program::SourceLocation;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter, Result};
use std::rc::Rc;

/// One step in the history of how a value came to be.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum TraceElem {
    ArrayDeclaration {
        loc: SourceLocation,
    },
    Assign {
        loc: SourceLocation,
    },
    /// The value is a symbol standing for what the caller passed at this location.
    Parameter {
        location: Rc<Location>,
        loc: SourceLocation,
    },
    /// Steps after this one happened inside the callee.
    Call {
        loc: SourceLocation,
        callee: Rc<str>,
    },
    /// Steps after this one happened back in the caller.
    Return {
        loc: SourceLocation,
        callee: Rc<str>,
    },
    /// The value was produced by code the analysis could not see.
    UnknownFrom {
        callee: Option<Rc<str>>,
        loc: SourceLocation,
    },
}

/// An ordered history of a value. Traces only ever grow.
#[derive(Serialize, Deserialize, Clone, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Trace(pub Vec<TraceElem>);

impl Debug for Trace {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl Trace {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn append(&self, elem: TraceElem) -> Trace {
        let mut elems = self.0.clone();
        elems.push(elem);
        Trace(elems)
    }

    #[must_use]
    pub fn concat(&self, other: &Trace) -> Trace {
        let mut elems = self.0.clone();
        elems.extend(other.0.iter().cloned());
        Trace(elems)
    }
}

/// The alternative histories of a value that was joined from several paths.
#[derive(Serialize, Deserialize, Clone, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TraceSet(BTreeSet<Trace>);

impl Debug for TraceSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.debug_set().entries(self.0.iter()).finish()
    }
}

impl TraceSet {
    pub fn singleton(elem: TraceElem) -> TraceSet {
        let mut traces = BTreeSet::new();
        traces.insert(Trace(vec![elem]));
        TraceSet(traces)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trace> {
        self.0.iter()
    }

    /// Appends the element to every trace.
    #[must_use]
    pub fn add_elem(&self, elem: TraceElem) -> TraceSet {
        if self.0.is_empty() {
            return TraceSet::singleton(elem);
        }
        TraceSet(self.0.iter().map(|t| t.append(elem.clone())).collect())
    }

    #[must_use]
    pub fn join(&self, other: &TraceSet) -> TraceSet {
        if other.0.is_empty() || self == other {
            return self.clone();
        }
        if self.0.is_empty() {
            return other.clone();
        }
        TraceSet::limit(self.0.union(&other.0).cloned().collect())
    }

    /// Rewrites callee traces for a call site: each becomes a caller side history, followed by
    /// the call, followed by the callee side history.
    #[must_use]
    pub fn call(&self, loc: &SourceLocation, callee: &Rc<str>, caller: &TraceSet) -> TraceSet {
        let call = TraceElem::Call {
            loc: loc.clone(),
            callee: callee.clone(),
        };
        let empty = Trace::default();
        let callee_traces: Vec<&Trace> = if self.0.is_empty() {
            vec![&empty]
        } else {
            self.0.iter().collect()
        };
        let caller_traces: Vec<&Trace> = if caller.0.is_empty() {
            vec![&empty]
        } else {
            caller.0.iter().collect()
        };
        let mut result = BTreeSet::new();
        for c in caller_traces.iter() {
            for t in callee_traces.iter() {
                result.insert(c.append(call.clone()).concat(t));
            }
        }
        TraceSet::limit(result)
    }

    /// The structurally shortest trace, ties broken by the trace order.
    pub fn shortest(&self) -> Option<&Trace> {
        self.0.iter().min_by_key(|t| t.len())
    }

    fn limit(traces: BTreeSet<Trace>) -> TraceSet {
        if traces.len() <= k_limits::MAX_TRACES_PER_VALUE {
            return TraceSet(traces);
        }
        TraceSet(
            traces
                .into_iter()
                .sorted_by_key(|t| t.len())
                .take(k_limits::MAX_TRACES_PER_VALUE)
                .collect(),
        )
    }
}

/// A rendered step of an error trace. Steps inside callees have a larger depth.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct TraceStep {
    pub depth: usize,
    pub loc: SourceLocation,
    pub description: String,
}

impl TraceStep {
    pub fn new(depth: usize, loc: &SourceLocation, description: String) -> TraceStep {
        TraceStep {
            depth,
            loc: loc.clone(),
            description,
        }
    }
}

/// Turns a trace into report steps, starting at the given call depth. Returns the depth
/// reached at the end of the trace. Symbol origins that name memory blocks are dropped
/// because they do not correspond to anything the user wrote.
pub fn render_trace(trace: &Trace, depth: usize, steps: &mut Vec<TraceStep>) -> usize {
    let mut depth = depth;
    for elem in trace.0.iter() {
        match elem {
            TraceElem::ArrayDeclaration { loc } => {
                steps.push(TraceStep::new(depth, loc, "Array declaration".to_string()));
            }
            TraceElem::Assign { loc } => {
                steps.push(TraceStep::new(depth, loc, "Assignment".to_string()));
            }
            TraceElem::Parameter { location, loc } => {
                if !location.root().is_allocsite() {
                    steps.push(TraceStep::new(
                        depth,
                        loc,
                        format!("Parameter `{}`", location),
                    ));
                }
            }
            TraceElem::Call { loc, callee } => {
                steps.push(TraceStep::new(depth, loc, format!("Call `{}`", callee)));
                depth += 1;
            }
            TraceElem::Return { loc, callee } => {
                depth = depth.saturating_sub(1);
                steps.push(TraceStep::new(
                    depth,
                    loc,
                    format!("Returned from `{}`", callee),
                ));
            }
            TraceElem::UnknownFrom { callee, loc } => {
                let description = match callee {
                    Some(callee) => format!("Unknown value from: `{}`", callee),
                    None => "Unknown value".to_string(),
                };
                steps.push(TraceStep::new(depth, loc, description));
            }
        }
    }
    depth
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Allocsite;
    use crate::symbol::SymbolPath;

    fn line(l: u32) -> SourceLocation {
        SourceLocation::line(l)
    }

    #[test]
    fn call_elements_increase_depth() {
        let callee: Rc<str> = Rc::from("g");
        let trace = Trace(vec![
            TraceElem::Assign { loc: line(1) },
            TraceElem::Call {
                loc: line(2),
                callee: callee.clone(),
            },
            TraceElem::ArrayDeclaration { loc: line(10) },
            TraceElem::Return {
                loc: line(2),
                callee,
            },
        ]);
        let mut steps = vec![];
        let end = render_trace(&trace, 0, &mut steps);
        assert_eq!(end, 0);
        let depths: Vec<usize> = steps.iter().map(|s| s.depth).collect();
        assert_eq!(depths, vec![0, 0, 1, 0]);
    }

    #[test]
    fn block_origins_are_suppressed() {
        let path = SymbolPath::param(0, Rc::from("p"));
        let block = Location::allocsite(Allocsite::Symbol(path));
        let trace = Trace(vec![
            TraceElem::Parameter {
                location: Location::index(&block),
                loc: line(1),
            },
            TraceElem::Parameter {
                location: Location::local("p"),
                loc: line(1),
            },
        ]);
        let mut steps = vec![];
        render_trace(&trace, 0, &mut steps);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].description, "Parameter `p`");
    }

    #[test]
    fn the_shortest_trace_is_chosen() {
        let long = TraceSet::singleton(TraceElem::Assign { loc: line(1) })
            .add_elem(TraceElem::Assign { loc: line(2) });
        let short = TraceSet::singleton(TraceElem::ArrayDeclaration { loc: line(3) });
        let joined = long.join(&short);
        assert_eq!(joined.shortest().map(|t| t.len()), Some(1));
    }
}
