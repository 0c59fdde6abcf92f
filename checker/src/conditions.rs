// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::abstract_value::{AbstractValue, RelExprSet, ValueSubstitution};
use crate::bool_domain::BoolDomain;
use crate::interval_domain::{Bound, Interval};
use crate::options::DiagLevel;
use crate::program::SourceLocation;
use crate::relation_domain::{RelVar, Relation};
use crate::reporting::{ReportKind, ReportingContext};
use crate::symbol::Symbol;
use crate::trace::{render_trace, TraceSet, TraceStep};

use log_derive::{logfn, logfn_inputs};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter, Result};
use std::rc::Rc;

/// A pending proof obligation: the access at `offset + index` (or `offset - index`) must lie
/// within a block of `size` elements.
#[derive(Serialize, Deserialize, Clone, Eq, PartialEq)]
pub struct Condition {
    pub offset: Interval,
    pub size: Interval,
    pub index: Interval,
    /// Relation variables the index is known to equal, up to a constant.
    pub index_sym: RelExprSet,
    /// The relation variable of the size, if the block is known.
    pub size_var: Option<RelVar>,
    /// What was known at the access.
    pub relation: Relation,
    pub is_plus: bool,
    /// Pointer arithmetic may produce the address one past the end of the block.
    pub last_included: bool,
    pub loc: SourceLocation,
    pub proc: Rc<str>,
    pub array_traces: TraceSet,
    pub index_traces: TraceSet,
    /// The call sites through which the condition reached the current procedure, outermost
    /// first.
    pub call_sites: Vec<(SourceLocation, Rc<str>)>,
}

impl Debug for Condition {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(
            f,
            "{} {} {} < {} at {:?}",
            self.offset,
            if self.is_plus { "+" } else { "-" },
            self.index,
            self.size,
            self.loc
        )
    }
}

/// The outcome of discharging a condition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Classification {
    AlwaysSafe,
    AlwaysUnsafe,
    MaybeUnsafe,
    Unreachable,
}

impl Condition {
    /// A condition for indexing (or offsetting) the array value with the index value. Returns
    /// None when the array value does not describe any block.
    #[logfn_inputs(TRACE)]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        array: &AbstractValue,
        index: &AbstractValue,
        index_sym: RelExprSet,
        relation: &Relation,
        is_plus: bool,
        last_included: bool,
        loc: &SourceLocation,
        proc: &Rc<str>,
    ) -> Option<Condition> {
        if array.is_unknown || index.is_unknown {
            debug!("no condition for unknown operands at {:?}", loc);
            return None;
        }
        let info = array.array_info()?;
        let size_var = if array.arrayblk.len() == 1 {
            array
                .arrayblk
                .keys()
                .next()
                .map(|block| RelVar::Size(block.clone()))
        } else {
            None
        };
        Some(Condition {
            offset: info.offset,
            size: info.size,
            index: index.itv.clone(),
            index_sym,
            size_var,
            relation: relation.clone(),
            is_plus,
            last_included,
            loc: loc.clone(),
            proc: proc.clone(),
            array_traces: array.traces.clone(),
            index_traces: index.traces.clone(),
            call_sites: vec![],
        })
    }

    /// The element position that is accessed.
    pub fn real_index(&self) -> Interval {
        if self.is_plus {
            self.offset.add(&self.index)
        } else {
            self.offset.sub(&self.index)
        }
    }

    /// True if the bounds of the condition depend on inputs of the procedure.
    pub fn is_symbolic(&self) -> bool {
        self.offset.is_symbolic() || self.size.is_symbolic() || self.index.is_symbolic()
    }

    fn symbols_of(itvs: &[&Interval]) -> BTreeSet<Symbol> {
        itvs.iter().flat_map(|itv| itv.symbols()).collect()
    }

    /// Can the relation show that the access is below the size?
    fn relation_proves_upper(&self) -> bool {
        let (size_var, offset) = match (&self.size_var, self.offset.as_const()) {
            (Some(size_var), Some(offset)) if self.is_plus => (size_var, offset),
            _ => return false,
        };
        let limit: i128 = if self.last_included { 0 } else { -1 };
        self.index_sym.iter().any(|e| {
            // e.var + e.offset + offset <= size + limit
            let bound = limit.saturating_sub(e.offset).saturating_sub(offset);
            self.relation.implies_le(&e.var, size_var, bound)
        })
    }

    /// Is the accessed position below the size of the block?
    fn check_upper(&self, idx: &Interval) -> BoolDomain {
        let (idx_lower, idx_upper) = match (idx.lower(), idx.upper()) {
            (Some(l), Some(u)) => (l, u),
            _ => return BoolDomain::Bottom,
        };
        let (size_lower, size_upper) = match (self.size.lower(), self.size.upper()) {
            (Some(l), Some(u)) => (l, u),
            _ => return BoolDomain::Bottom,
        };
        let safe = if self.last_included {
            idx_upper.le(size_lower)
        } else {
            idx_upper.lt(size_lower)
        };
        if safe || self.relation_proves_upper() {
            return BoolDomain::True;
        }
        let unsafe_ = if self.last_included {
            size_upper.lt(idx_lower)
        } else {
            size_upper.le(idx_lower)
        };
        if unsafe_ {
            BoolDomain::False
        } else {
            BoolDomain::Top
        }
    }

    /// Is the accessed position non negative?
    fn check_lower(&self, idx: &Interval) -> BoolDomain {
        let zero = Bound::from(0);
        match (idx.lower(), idx.upper()) {
            (Some(l), _) if zero.le(l) => BoolDomain::True,
            (_, Some(u)) if u.lt(&zero) => BoolDomain::False,
            (Some(_), Some(_)) => BoolDomain::Top,
            _ => BoolDomain::Bottom,
        }
    }

    /// Discharges the condition, returning the kind of report it deserves, if any.
    #[logfn(TRACE)]
    pub fn check(&self) -> (Classification, Option<ReportKind>) {
        let idx = self.real_index();
        if idx.is_bottom() || self.size.is_bottom() {
            return (Classification::Unreachable, None);
        }
        let upper = self.check_upper(&idx);
        let lower = self.check_lower(&idx);
        if upper.is_false() {
            return (Classification::AlwaysUnsafe, Some(ReportKind::BufferOverrun));
        }
        if lower.is_false() {
            return (Classification::AlwaysUnsafe, Some(ReportKind::BufferUnderrun));
        }
        if upper.is_true() && lower.is_true() {
            return (Classification::AlwaysSafe, None);
        }
        if upper == BoolDomain::Bottom || lower == BoolDomain::Bottom {
            return (Classification::Unreachable, None);
        }
        if !upper.is_true() {
            (
                Classification::MaybeUnsafe,
                Some(ReportKind::PossibleBufferOverrun),
            )
        } else {
            (
                Classification::MaybeUnsafe,
                Some(ReportKind::PossibleBufferUnderrun),
            )
        }
    }

    /// Rewrites the condition of a callee into the namespace of a caller at a call site.
    /// Returns None if the access cannot happen in the caller's context.
    #[logfn_inputs(TRACE)]
    pub fn substitute(
        &self,
        map: &dyn ValueSubstitution,
        caller_relation: &Relation,
        call_loc: &SourceLocation,
        callee: &Rc<str>,
    ) -> Option<Condition> {
        let symbol_map = |s: &Symbol| map.symbol(s);
        let offset = self.offset.substitute(&symbol_map);
        let size = self.size.substitute(&symbol_map);
        let index = self.index.substitute(&symbol_map);
        if offset.is_bottom() || size.is_bottom() || index.is_bottom() {
            return None;
        }
        let caller_traces = |symbols: BTreeSet<Symbol>| {
            symbols
                .iter()
                .fold(TraceSet::default(), |acc, s| acc.join(&map.traces(s)))
        };
        let array_callers = caller_traces(Self::symbols_of(&[&self.offset, &self.size]));
        let index_callers = caller_traces(Self::symbols_of(&[&self.index]));
        let index_sym = self
            .index_sym
            .iter()
            .filter_map(|e| {
                map.rel_var(&e.var).map(|var| crate::abstract_value::RelExpr {
                    var,
                    offset: e.offset,
                })
            })
            .collect();
        let mut call_sites = vec![(call_loc.clone(), callee.clone())];
        call_sites.extend(self.call_sites.iter().cloned());
        Some(Condition {
            offset,
            size,
            index,
            index_sym,
            size_var: self.size_var.as_ref().and_then(|v| map.rel_var(v)),
            relation: self
                .relation
                .substitute(&|v: &RelVar| map.rel_var(v))
                .meet(caller_relation),
            is_plus: self.is_plus,
            last_included: self.last_included,
            loc: self.loc.clone(),
            proc: self.proc.clone(),
            array_traces: self.array_traces.call(call_loc, callee, &array_callers),
            index_traces: self.index_traces.call(call_loc, callee, &index_callers),
            call_sites,
        })
    }

    /// Where the condition is reported in the current procedure.
    pub fn report_location(&self) -> &SourceLocation {
        match self.call_sites.first() {
            Some((loc, _)) => loc,
            None => &self.loc,
        }
    }

    pub fn message(&self) -> String {
        let mut message = format!("Offset: {} Size: {}", self.real_index(), self.size);
        if let Some((_, callee)) = self.call_sites.first() {
            message.push_str(&format!(" by call to `{}`", callee));
        }
        message
    }

    /// Renders the history of the array and of the index, followed by the calls that lead to
    /// the access and the access itself.
    pub fn trace_steps(&self) -> Vec<TraceStep> {
        let mut steps = vec![];
        if let Some(trace) = self.array_traces.shortest() {
            render_trace(trace, 0, &mut steps);
        }
        if let Some(trace) = self.index_traces.shortest() {
            render_trace(trace, 0, &mut steps);
        }
        for (depth, (loc, callee)) in self.call_sites.iter().enumerate() {
            steps.push(TraceStep::new(depth, loc, format!("Call `{}`", callee)));
        }
        steps.push(TraceStep::new(
            self.call_sites.len(),
            &self.loc,
            format!(
                "Array access: Offset: {} Size: {}",
                self.real_index(),
                self.size
            ),
        ));
        steps
    }
}

/// The conditions of a procedure. Accumulates by union.
#[derive(Serialize, Deserialize, Clone, Debug, Default, Eq, PartialEq)]
pub struct ConditionSet {
    conditions: Vec<Condition>,
}

impl ConditionSet {
    pub fn add(&mut self, condition: Condition) {
        if !self.conditions.contains(&condition) {
            self.conditions.push(condition);
        }
    }

    pub fn extend(&mut self, other: ConditionSet) {
        for condition in other.conditions {
            self.add(condition);
        }
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.conditions.iter()
    }

    /// Rewrites every condition into the namespace of a caller.
    #[must_use]
    pub fn substitute(
        &self,
        map: &dyn ValueSubstitution,
        caller_relation: &Relation,
        call_loc: &SourceLocation,
        callee: &Rc<str>,
    ) -> ConditionSet {
        let mut result = ConditionSet::default();
        for condition in self.conditions.iter() {
            if let Some(c) = condition.substitute(map, caller_relation, call_loc, callee) {
                result.add(c);
            }
        }
        result
    }

    /// Discharges every condition, reporting the violations the diagnostic level asks for.
    /// Returns the conditions that depend on inputs of the procedure and may still be
    /// violated: callers get to check them with their own arguments.
    #[logfn_inputs(TRACE)]
    pub fn check_all(&self, reporting: &mut ReportingContext) -> ConditionSet {
        let mut pending = ConditionSet::default();
        for condition in self.conditions.iter() {
            let (classification, kind) = condition.check();
            trace!("{:?} is {:?}", condition, classification);
            let kind = match (classification, kind) {
                (Classification::AlwaysUnsafe, Some(kind)) => kind,
                (Classification::MaybeUnsafe, Some(kind)) => {
                    if condition.is_symbolic() {
                        pending.add(condition.clone());
                        if reporting.diag_level == DiagLevel::Default {
                            continue;
                        }
                    }
                    kind
                }
                _ => continue,
            };
            reporting.report(
                kind,
                condition.report_location(),
                condition.message(),
                condition.trace_steps(),
            );
        }
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Location;
    use crate::symbol::{SymbolCounter, SymbolKind, SymbolPath};

    fn array(size: Interval) -> AbstractValue {
        AbstractValue::of_array(Location::local("a"), Interval::from(0), size)
    }

    fn condition(size: Interval, index: Interval, last_included: bool) -> Condition {
        Condition::new(
            &array(size),
            &AbstractValue::from(index),
            RelExprSet::new(),
            &Relation::default(),
            true,
            last_included,
            &SourceLocation::line(3),
            &Rc::from("f"),
        )
        .unwrap()
    }

    #[test]
    fn constant_accesses_are_decided() {
        let c = condition(Interval::from(10), Interval::from(10), false);
        assert_eq!(c.check().1, Some(ReportKind::BufferOverrun));
        let c = condition(Interval::from(10), Interval::from(9), false);
        assert_eq!(c.check().0, Classification::AlwaysSafe);
        let c = condition(Interval::from(10), Interval::from(-1), false);
        assert_eq!(c.check().1, Some(ReportKind::BufferUnderrun));
    }

    #[test]
    fn pointer_arithmetic_may_reach_one_past_the_end() {
        let c = condition(Interval::from(10), Interval::from(10), true);
        assert_eq!(c.check().0, Classification::AlwaysSafe);
        let c = condition(Interval::from(10), Interval::from(11), true);
        assert_eq!(c.check().0, Classification::AlwaysUnsafe);
    }

    #[test]
    fn ranges_that_straddle_the_end_may_overrun() {
        let c = condition(Interval::from(10), Interval::range(5, 10), false);
        assert_eq!(
            c.check(),
            (
                Classification::MaybeUnsafe,
                Some(ReportKind::PossibleBufferOverrun)
            )
        );
    }

    #[test]
    fn symbolic_sizes_are_pending_under_default_diagnostics() {
        let mut counter = SymbolCounter::new(Rc::from("f"));
        let path = SymbolPath::param(0, Rc::from("p"));
        let length = counter.fresh(SymbolKind::Length, &path, true);
        let c = condition(Interval::of_symbol(&length), Interval::from(0), false);
        assert_eq!(c.check().0, Classification::MaybeUnsafe);
        let mut set = ConditionSet::default();
        set.add(c);
        let mut reporting = ReportingContext::new(Rc::from("f"), DiagLevel::Default);
        let pending = set.check_all(&mut reporting);
        assert_eq!(pending.len(), 1);
        assert!(reporting.is_empty());
        let mut reporting = ReportingContext::new(Rc::from("f"), DiagLevel::Library);
        set.check_all(&mut reporting);
        assert_eq!(reporting.finish().len(), 1);
    }

    #[test]
    fn bottom_sizes_are_unreachable() {
        let c = condition(Interval::Bottom, Interval::from(0), false);
        assert_eq!(c.check().0, Classification::Unreachable);
    }
}
