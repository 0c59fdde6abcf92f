// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::bool_domain::BoolDomain;
use crate::interval_domain::Interval;
use crate::location::{LocSet, Location};
use crate::relation_domain::RelVar;
use crate::symbol::Symbol;
use crate::trace::{TraceElem, TraceSet};

use log_derive::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Formatter, Result};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// The value is known to be equal to `var + offset`.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RelExpr {
    pub var: RelVar,
    pub offset: i128,
}

pub type RelExprSet = BTreeSet<RelExpr>;

/// What is known about a pointer into a memory block.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ArrayInfo {
    /// Element offset of the pointer from the start of the block.
    pub offset: Interval,
    /// Number of elements of the block.
    pub size: Interval,
}

impl ArrayInfo {
    #[must_use]
    pub fn join(&self, other: &ArrayInfo) -> ArrayInfo {
        ArrayInfo {
            offset: self.offset.join(&other.offset),
            size: self.size.join(&other.size),
        }
    }

    #[must_use]
    pub fn widen(&self, other: &ArrayInfo) -> ArrayInfo {
        ArrayInfo {
            offset: self.offset.widen(&other.offset),
            size: self.size.widen(&other.size),
        }
    }

    pub fn leq(&self, other: &ArrayInfo) -> bool {
        self.offset.leq(&other.offset) && self.size.leq(&other.size)
    }
}

/// Maps the memory blocks a pointer may point into to what is known about the pointer.
/// The keys are the locations that contribute to the pointer.
pub type ArrayBlock = BTreeMap<Rc<Location>, ArrayInfo>;

/// Supplies the mappings needed to rewrite a value from a callee's namespace into a caller's.
pub trait ValueSubstitution: Debug {
    /// The caller side interval of a callee symbol, or None if the symbol is not known.
    fn symbol(&self, sym: &Symbol) -> Option<Interval>;

    /// The caller side locations that a callee location denotes. Memory blocks map to memory
    /// blocks, or to plain locations when the caller passed the address of a variable.
    fn locations(&self, loc: &Rc<Location>) -> LocSet;

    /// The caller side relation variable for a callee relation variable.
    fn rel_var(&self, var: &RelVar) -> Option<RelVar>;

    /// How the caller side value of a callee symbol came to be.
    fn traces(&self, _sym: &Symbol) -> TraceSet {
        TraceSet::default()
    }
}

/// The abstract value of an expression or memory location: an integer range, the symbolic
/// expressions it equals, the locations and memory blocks it may point to, and the traces that
/// explain how it came to be. Equality and hashing ignore the traces.
#[derive(Serialize, Deserialize, Clone)]
pub struct AbstractValue {
    pub itv: Interval,
    pub sym: RelExprSet,
    pub powloc: LocSet,
    pub arrayblk: ArrayBlock,
    pub traces: TraceSet,
    /// Set for values that come from code the analysis cannot see. Such values absorb joins.
    pub is_unknown: bool,
}

impl Debug for AbstractValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        if self.is_unknown {
            return "unknown".fmt(f);
        }
        let mut s = f.debug_struct("Value");
        s.field("itv", &self.itv);
        if !self.sym.is_empty() {
            s.field("sym", &self.sym);
        }
        if !self.powloc.is_empty() {
            s.field("powloc", &self.powloc);
        }
        if !self.arrayblk.is_empty() {
            s.field("arrayblk", &self.arrayblk);
        }
        s.finish()
    }
}

impl PartialEq for AbstractValue {
    fn eq(&self, other: &AbstractValue) -> bool {
        self.is_unknown == other.is_unknown
            && (self.is_unknown
                || (self.itv == other.itv
                    && self.sym == other.sym
                    && self.powloc == other.powloc
                    && self.arrayblk == other.arrayblk))
    }
}

impl Eq for AbstractValue {}

impl Hash for AbstractValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.is_unknown.hash(state);
        if !self.is_unknown {
            self.itv.hash(state);
            self.sym.hash(state);
            self.powloc.hash(state);
            self.arrayblk.hash(state);
        }
    }
}

impl From<Interval> for AbstractValue {
    fn from(itv: Interval) -> AbstractValue {
        AbstractValue {
            itv,
            sym: RelExprSet::new(),
            powloc: LocSet::new(),
            arrayblk: ArrayBlock::new(),
            traces: TraceSet::default(),
            is_unknown: false,
        }
    }
}

impl From<i128> for AbstractValue {
    fn from(i: i128) -> AbstractValue {
        Interval::from(i).into()
    }
}

impl AbstractValue {
    /// The value of nothing: the identity of join.
    pub fn bottom() -> AbstractValue {
        Interval::Bottom.into()
    }

    /// Any integer, pointing nowhere in particular.
    pub fn top() -> AbstractValue {
        Interval::top().into()
    }

    /// A value produced by unseen code.
    pub fn unknown(traces: TraceSet) -> AbstractValue {
        let mut powloc = LocSet::new();
        powloc.insert(Location::unknown());
        AbstractValue {
            itv: Interval::top(),
            sym: RelExprSet::new(),
            powloc,
            arrayblk: ArrayBlock::new(),
            traces,
            is_unknown: true,
        }
    }

    /// The address of a location.
    pub fn of_loc(loc: Rc<Location>) -> AbstractValue {
        let mut value = AbstractValue::bottom();
        value.powloc.insert(loc);
        value
    }

    /// A pointer to the start (or some offset) of a memory block.
    pub fn of_array(block: Rc<Location>, offset: Interval, size: Interval) -> AbstractValue {
        let mut value = AbstractValue::bottom();
        value.arrayblk.insert(block, ArrayInfo { offset, size });
        value
    }

    pub fn is_bottom(&self) -> bool {
        !self.is_unknown
            && self.itv.is_bottom()
            && self.powloc.is_empty()
            && self.arrayblk.is_empty()
    }

    #[must_use]
    pub fn with_traces(mut self, traces: TraceSet) -> AbstractValue {
        self.traces = traces;
        self
    }

    #[must_use]
    pub fn with_sym(mut self, sym: RelExprSet) -> AbstractValue {
        self.sym = sym;
        self
    }

    #[must_use]
    pub fn add_trace_elem(&self, elem: TraceElem) -> AbstractValue {
        let mut result = self.clone();
        result.traces = self.traces.add_elem(elem);
        result
    }

    #[logfn_inputs(TRACE)]
    #[must_use]
    pub fn join(&self, other: &AbstractValue) -> AbstractValue {
        if self.is_unknown || other.is_unknown {
            return AbstractValue::unknown(self.traces.join(&other.traces));
        }
        if self.is_bottom() {
            return other.clone().with_traces(self.traces.join(&other.traces));
        }
        if other.is_bottom() {
            return self.clone().with_traces(self.traces.join(&other.traces));
        }
        let mut arrayblk = self.arrayblk.clone();
        for (loc, info) in other.arrayblk.iter() {
            let joined = match arrayblk.get(loc) {
                Some(existing) => existing.join(info),
                None => info.clone(),
            };
            arrayblk.insert(loc.clone(), joined);
        }
        AbstractValue {
            itv: self.itv.join(&other.itv),
            sym: self.sym.intersection(&other.sym).cloned().collect(),
            powloc: self.powloc.union(&other.powloc).cloned().collect(),
            arrayblk,
            traces: self.traces.join(&other.traces),
            is_unknown: false,
        }
    }

    /// Widens self (the previous value) with other (the next value).
    #[logfn_inputs(TRACE)]
    #[must_use]
    pub fn widen(&self, other: &AbstractValue) -> AbstractValue {
        if self.is_unknown || other.is_unknown {
            return AbstractValue::unknown(self.traces.join(&other.traces));
        }
        if self.is_bottom() {
            return other.clone().with_traces(self.traces.join(&other.traces));
        }
        if other.is_bottom() {
            return self.clone().with_traces(self.traces.join(&other.traces));
        }
        let mut arrayblk = self.arrayblk.clone();
        for (loc, info) in other.arrayblk.iter() {
            let widened = match arrayblk.get(loc) {
                Some(existing) => existing.widen(info),
                None => info.clone(),
            };
            arrayblk.insert(loc.clone(), widened);
        }
        AbstractValue {
            itv: self.itv.widen(&other.itv),
            sym: self.sym.intersection(&other.sym).cloned().collect(),
            powloc: self.powloc.union(&other.powloc).cloned().collect(),
            arrayblk,
            traces: self.traces.join(&other.traces),
            is_unknown: false,
        }
    }

    /// The partial order used for fixpoint detection. Traces do not participate.
    pub fn leq(&self, other: &AbstractValue) -> bool {
        if other.is_unknown {
            return true;
        }
        if self.is_unknown {
            return false;
        }
        self.itv.leq(&other.itv)
            && other.sym.is_subset(&self.sym)
            && self.powloc.is_subset(&other.powloc)
            && self
                .arrayblk
                .iter()
                .all(|(loc, info)| matches!(other.arrayblk.get(loc), Some(o) if info.leq(o)))
    }

    /// Every location the value may point to or into.
    pub fn pointed_locs(&self) -> LocSet {
        let mut result = self.powloc.clone();
        result.extend(self.arrayblk.keys().cloned());
        result
    }

    /// The locations that dereferencing the value denotes.
    pub fn deref_locs(&self) -> LocSet {
        let mut result = self.powloc.clone();
        result.extend(self.arrayblk.keys().map(Location::index));
        result
    }

    /// The array information of all blocks the value may point into, joined.
    pub fn array_info(&self) -> Option<ArrayInfo> {
        let mut infos = self.arrayblk.values();
        let first = infos.next()?.clone();
        Some(infos.fold(first, |acc, info| acc.join(info)))
    }

    /// The symbols the value depends on.
    pub fn symbols(&self) -> BTreeSet<Symbol> {
        let mut result = self.itv.symbols();
        for info in self.arrayblk.values() {
            result.extend(info.offset.symbols());
            result.extend(info.size.symbols());
        }
        result
    }

    /// Applies an integer operation, propagating unknown values and joining traces.
    fn lift(&self, other: &AbstractValue, itv: Interval) -> AbstractValue {
        if self.is_unknown || other.is_unknown {
            return AbstractValue::unknown(self.traces.join(&other.traces));
        }
        AbstractValue::from(itv).with_traces(self.traces.join(&other.traces))
    }

    #[must_use]
    pub fn plus_a(&self, other: &AbstractValue) -> AbstractValue {
        let mut result = self.lift(other, self.itv.add(&other.itv));
        result.sym = shift_sym(self, other, 1);
        result
    }

    #[must_use]
    pub fn minus_a(&self, other: &AbstractValue) -> AbstractValue {
        let mut result = self.lift(other, self.itv.sub(&other.itv));
        result.sym = shift_sym(self, other, -1);
        result
    }

    #[must_use]
    pub fn mult(&self, other: &AbstractValue) -> AbstractValue {
        self.lift(other, self.itv.mul(&other.itv))
    }

    #[must_use]
    pub fn div(&self, other: &AbstractValue) -> AbstractValue {
        self.lift(other, self.itv.div(&other.itv))
    }

    #[must_use]
    pub fn rem(&self, other: &AbstractValue) -> AbstractValue {
        self.lift(other, self.itv.rem(&other.itv))
    }

    #[must_use]
    pub fn neg(&self) -> AbstractValue {
        if self.is_unknown {
            return self.clone();
        }
        AbstractValue::from(self.itv.neg()).with_traces(self.traces.clone())
    }

    /// Logical negation: 0 becomes 1, anything that cannot be 0 becomes 0.
    #[must_use]
    pub fn lnot(&self) -> AbstractValue {
        let zero = AbstractValue::from(0);
        self.equals(&zero)
    }

    #[must_use]
    pub fn less_than(&self, other: &AbstractValue) -> AbstractValue {
        self.lift(other, self.itv.lt_sem(&other.itv).into())
    }

    #[must_use]
    pub fn less_or_equal(&self, other: &AbstractValue) -> AbstractValue {
        self.lift(other, self.itv.le_sem(&other.itv).into())
    }

    #[must_use]
    pub fn greater_than(&self, other: &AbstractValue) -> AbstractValue {
        self.lift(other, self.itv.gt_sem(&other.itv).into())
    }

    #[must_use]
    pub fn greater_or_equal(&self, other: &AbstractValue) -> AbstractValue {
        self.lift(other, self.itv.ge_sem(&other.itv).into())
    }

    #[must_use]
    pub fn equals(&self, other: &AbstractValue) -> AbstractValue {
        self.lift(other, self.itv.eq_sem(&other.itv).into())
    }

    #[must_use]
    pub fn not_equals(&self, other: &AbstractValue) -> AbstractValue {
        self.lift(other, self.itv.ne_sem(&other.itv).into())
    }

    /// The truth value of the value used as a condition.
    pub fn truth(&self) -> BoolDomain {
        if self.is_unknown {
            return BoolDomain::Top;
        }
        if !self.powloc.is_empty() || !self.arrayblk.is_empty() {
            // pointers are not integers
            return BoolDomain::Top;
        }
        Interval::from(0).eq_sem(&self.itv).not()
    }

    #[must_use]
    pub fn land(&self, other: &AbstractValue) -> AbstractValue {
        self.lift(other, self.truth().and(&other.truth()).into())
    }

    #[must_use]
    pub fn lor(&self, other: &AbstractValue) -> AbstractValue {
        self.lift(other, self.truth().or(&other.truth()).into())
    }

    /// Bit operations and shifts are not tracked.
    #[must_use]
    pub fn bit_op(&self, other: &AbstractValue) -> AbstractValue {
        let itv = if self.itv.is_bottom() || other.itv.is_bottom() {
            Interval::Bottom
        } else {
            Interval::top()
        };
        self.lift(other, itv)
    }

    /// Pointer plus integer: moves the offset into every block.
    #[must_use]
    pub fn plus_pi(&self, index: &AbstractValue) -> AbstractValue {
        if self.is_unknown {
            return self.clone();
        }
        let arrayblk = self
            .arrayblk
            .iter()
            .map(|(loc, info)| {
                (
                    loc.clone(),
                    ArrayInfo {
                        offset: info.offset.add(&index.itv),
                        size: info.size.clone(),
                    },
                )
            })
            .collect();
        AbstractValue {
            itv: Interval::Bottom,
            sym: RelExprSet::new(),
            powloc: self.powloc.clone(),
            arrayblk,
            traces: self.traces.join(&index.traces),
            is_unknown: false,
        }
    }

    /// Pointer minus integer.
    #[must_use]
    pub fn minus_pi(&self, index: &AbstractValue) -> AbstractValue {
        self.plus_pi(&index.neg().with_traces(index.traces.clone()))
    }

    /// Pointer minus pointer: the difference of offsets if both point into the same block.
    #[must_use]
    pub fn minus_pp(&self, other: &AbstractValue) -> AbstractValue {
        let first = self.arrayblk.iter().next();
        let itv = match (first, self.arrayblk.len(), other.arrayblk.len()) {
            (Some((block, i1)), 1, 1) => match other.arrayblk.get(block) {
                Some(i2) => i1.offset.sub(&i2.offset),
                None => Interval::top(),
            },
            _ => Interval::top(),
        };
        self.lift(other, itv)
    }

    /// Rewrites the value into the namespace of a caller. Unknown values are left alone.
    #[logfn_inputs(TRACE)]
    #[must_use]
    pub fn substitute(&self, map: &dyn ValueSubstitution) -> AbstractValue {
        if self.is_unknown {
            return self.clone();
        }
        let symbol_map = |s: &Symbol| map.symbol(s);
        let mut powloc = LocSet::new();
        for loc in self.powloc.iter() {
            powloc.extend(map.locations(loc));
        }
        let mut arrayblk = ArrayBlock::new();
        for (block, info) in self.arrayblk.iter() {
            let offset = info.offset.substitute(&symbol_map);
            let size = info.size.substitute(&symbol_map);
            for target in map.locations(block) {
                if target.is_allocsite() {
                    let entry = ArrayInfo {
                        offset: offset.clone(),
                        size: size.clone(),
                    };
                    let joined = match arrayblk.get(&target) {
                        Some(existing) => entry.join(existing),
                        None => entry,
                    };
                    arrayblk.insert(target, joined);
                } else {
                    powloc.insert(target);
                }
            }
        }
        let sym = self
            .sym
            .iter()
            .filter_map(|e| {
                map.rel_var(&e.var).map(|var| RelExpr {
                    var,
                    offset: e.offset,
                })
            })
            .collect();
        AbstractValue {
            itv: self.itv.substitute(&symbol_map),
            sym,
            powloc,
            arrayblk,
            traces: self.traces.clone(),
            is_unknown: false,
        }
    }
}

/// The symbolic expressions of `left op right` when op is + (sign 1) or - (sign -1) and right
/// is a constant.
fn shift_sym(left: &AbstractValue, right: &AbstractValue, sign: i128) -> RelExprSet {
    match right.itv.as_const() {
        Some(c) if right.sym.is_empty() => left
            .sym
            .iter()
            .map(|e| RelExpr {
                var: e.var.clone(),
                offset: e.offset.saturating_add(sign.saturating_mul(c)),
            })
            .collect(),
        _ => RelExprSet::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::SourceLocation;

    #[test]
    fn unknown_absorbs_joins() {
        let unknown = AbstractValue::unknown(TraceSet::default());
        let x = AbstractValue::from(Interval::range(1, 5));
        assert_eq!(unknown.join(&x), unknown);
        assert_eq!(x.join(&unknown), unknown);
        assert!(x.leq(&unknown));
    }

    #[test]
    fn unknown_propagates_through_arithmetic() {
        let unknown = AbstractValue::unknown(TraceSet::default());
        let x = AbstractValue::from(3);
        assert!(x.plus_a(&unknown).is_unknown);
        assert!(unknown.mult(&x).is_unknown);
    }

    #[test]
    fn join_is_an_upper_bound_ignoring_traces() {
        let a = AbstractValue::from(1).add_trace_elem(TraceElem::Assign {
            loc: SourceLocation::line(1),
        });
        let b = AbstractValue::from(4);
        let j = a.join(&b);
        assert!(a.leq(&j));
        assert!(b.leq(&j));
        assert_eq!(j, AbstractValue::from(Interval::range(1, 4)));
        assert!(!j.traces.is_empty());
    }

    #[test]
    fn pointer_arithmetic_moves_offsets() {
        let block = Location::local("a");
        let p = AbstractValue::of_array(block.clone(), Interval::from(0), Interval::from(10));
        let q = p.plus_pi(&AbstractValue::from(Interval::range(2, 3)));
        let info = q.arrayblk.get(&block).cloned();
        assert_eq!(
            info,
            Some(ArrayInfo {
                offset: Interval::range(2, 3),
                size: Interval::from(10)
            })
        );
    }
}
