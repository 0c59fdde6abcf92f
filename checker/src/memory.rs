// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::abstract_value::AbstractValue;
use crate::location::{LocSet, Location};
use crate::program::Ident;
use crate::relation_domain::{RelVar, Relation};

use log_derive::{logfn, logfn_inputs};
use rpds::HashTrieMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Formatter, Result};
use std::rc::Rc;

/// What the value of a temporary is known to be equal to.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AliasTarget {
    /// The temporary holds the value stored at the location.
    Simple(Rc<Location>),
    /// The temporary is non zero iff the block the location points to is empty.
    Empty(Rc<Location>),
    /// The temporary holds the number of elements of the block the location points to.
    Size(Rc<Location>),
}

impl AliasTarget {
    pub fn location(&self) -> &Rc<Location> {
        match self {
            AliasTarget::Simple(loc) | AliasTarget::Empty(loc) | AliasTarget::Size(loc) => loc,
        }
    }

    /// The same kind of alias, to another location.
    #[must_use]
    pub fn with_location(&self, loc: Rc<Location>) -> AliasTarget {
        match self {
            AliasTarget::Simple(..) => AliasTarget::Simple(loc),
            AliasTarget::Empty(..) => AliasTarget::Empty(loc),
            AliasTarget::Size(..) => AliasTarget::Size(loc),
        }
    }
}

/// Equalities between temporaries (and the return slot) and memory, discovered from the
/// syntax of loads, stores and calls. Pruning a temporary also prunes what it aliases.
#[derive(Serialize, Deserialize, Clone, Default, Eq, PartialEq)]
pub struct AliasMap {
    temps: HashTrieMap<Ident, AliasTarget>,
    ret: Option<AliasTarget>,
}

impl Debug for AliasMap {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.debug_map().entries(self.temps.iter()).finish()?;
        if let Some(ret) = &self.ret {
            write!(f, " return: {:?}", ret)?;
        }
        Ok(())
    }
}

impl AliasMap {
    fn join(&self, other: &AliasMap) -> AliasMap {
        let mut temps = HashTrieMap::default();
        for (id, target) in self.temps.iter() {
            if other.temps.get(id) == Some(target) {
                temps.insert_mut(*id, target.clone());
            }
        }
        AliasMap {
            temps,
            ret: if self.ret == other.ret {
                self.ret.clone()
            } else {
                None
            },
        }
    }

    fn leq(&self, other: &AliasMap) -> bool {
        other
            .temps
            .iter()
            .all(|(id, target)| self.temps.get(id) == Some(target))
            && (other.ret.is_none() || self.ret == other.ret)
    }
}

/// The abstract memory state at a program point.
#[derive(Serialize, Deserialize, Clone, Eq, PartialEq)]
pub struct Memory {
    /// False if the program point cannot be reached. All operations on such a state are no-ops.
    pub is_reachable: bool,
    /// Temporaries and stack allocated arrays. A stack allocated array variable evaluates
    /// to its array value rather than to its address.
    pub stack: HashTrieMap<Rc<Location>, Rc<AbstractValue>>,
    /// Everything else.
    pub heap: HashTrieMap<Rc<Location>, Rc<AbstractValue>>,
    pub alias: AliasMap,
    pub relation: Relation,
}

impl Debug for Memory {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        if !self.is_reachable {
            return "bottom".fmt(f);
        }
        f.debug_map()
            .entries(self.stack.iter().map(|(k, v)| (k, v)))
            .entries(self.heap.iter().map(|(k, v)| (k, v)))
            .finish()?;
        if !self.relation.is_top() {
            write!(f, " relation: {:?}", self.relation)?;
        }
        Ok(())
    }
}

impl Default for Memory {
    fn default() -> Memory {
        Memory::new()
    }
}

impl Memory {
    /// A reachable state that knows nothing yet.
    pub fn new() -> Memory {
        Memory {
            is_reachable: true,
            stack: HashTrieMap::default(),
            heap: HashTrieMap::default(),
            alias: AliasMap::default(),
            relation: Relation::default(),
        }
    }

    /// The state of an unreachable program point.
    pub fn bottom() -> Memory {
        Memory {
            is_reachable: false,
            ..Memory::new()
        }
    }

    pub fn is_bottom(&self) -> bool {
        !self.is_reachable
    }

    pub fn add_stack(&mut self, loc: Rc<Location>, value: Rc<AbstractValue>) {
        if self.is_reachable {
            self.stack.insert_mut(loc, value);
        }
    }

    /// A weak update: the new value is joined with what the location may already hold.
    #[logfn_inputs(TRACE)]
    pub fn add_heap(&mut self, loc: Rc<Location>, value: Rc<AbstractValue>) {
        if !self.is_reachable {
            return;
        }
        let value = match self.heap.get(&loc) {
            Some(old) => Rc::new(old.join(&value)),
            None => value,
        };
        self.heap.insert_mut(loc, value);
    }

    /// Replaces whatever the location holds.
    #[logfn_inputs(TRACE)]
    pub fn strong_update_heap(&mut self, loc: Rc<Location>, value: Rc<AbstractValue>) {
        if self.is_reachable {
            self.heap.insert_mut(loc, value);
        }
    }

    /// Writes to a set of locations: a strong update if the set names exactly one memory
    /// cell, otherwise a weak update of every member.
    #[logfn_inputs(TRACE)]
    pub fn update_mem(&mut self, locs: &LocSet, value: Rc<AbstractValue>) {
        if !self.is_reachable {
            return;
        }
        let is_strong = locs.len() == 1
            && locs
                .iter()
                .all(|loc| !loc.represents_multiple_values());
        for loc in locs.iter() {
            if let Some(old) = self.stack.get(loc) {
                let value = if is_strong {
                    value.clone()
                } else {
                    Rc::new(old.join(&value))
                };
                self.add_stack(loc.clone(), value);
            } else if is_strong {
                self.strong_update_heap(loc.clone(), value.clone());
            } else {
                self.add_heap(loc.clone(), value.clone());
            }
        }
    }

    /// True if the location is a temporary or a stack allocated array.
    pub fn is_stack_loc(&self, loc: &Rc<Location>) -> bool {
        self.stack.contains_key(loc)
    }

    pub fn find_stack(&self, loc: &Rc<Location>) -> Rc<AbstractValue> {
        if !self.is_reachable {
            return Rc::new(AbstractValue::bottom());
        }
        self.stack
            .get(loc)
            .cloned()
            .unwrap_or_else(|| Rc::new(AbstractValue::bottom()))
    }

    /// The value at a location. Heap locations that were never written hold an arbitrary
    /// value. Unreachable states hold bottom everywhere.
    #[logfn_inputs(TRACE)]
    #[logfn(TRACE)]
    pub fn find(&self, loc: &Rc<Location>) -> Rc<AbstractValue> {
        if !self.is_reachable {
            return Rc::new(AbstractValue::bottom());
        }
        if loc.is_temp() || self.stack.contains_key(loc) {
            return self.find_stack(loc);
        }
        self.find_heap(loc)
    }

    pub fn find_heap(&self, loc: &Rc<Location>) -> Rc<AbstractValue> {
        if !self.is_reachable {
            return Rc::new(AbstractValue::bottom());
        }
        match self.heap.get(loc) {
            Some(value) => value.clone(),
            None if loc.is_unknown() => Rc::new(AbstractValue::unknown(Default::default())),
            None => Rc::new(AbstractValue::top()),
        }
    }

    /// The join of the values at all of the locations.
    pub fn find_heap_set(&self, locs: &LocSet) -> Rc<AbstractValue> {
        let mut iter = locs.iter();
        match iter.next() {
            None => Rc::new(AbstractValue::bottom()),
            Some(first) => {
                let mut result = self.find(first);
                for loc in iter {
                    result = Rc::new(result.join(&self.find(loc)));
                }
                result
            }
        }
    }

    /// Records that the temporary was loaded from the location.
    pub fn load_alias(&mut self, id: Ident, loc: &Rc<Location>) {
        if self.is_reachable {
            self.alias
                .temps
                .insert_mut(id, AliasTarget::Simple(loc.clone()));
        }
    }

    pub fn add_alias(&mut self, id: Ident, target: AliasTarget) {
        if self.is_reachable {
            self.alias.temps.insert_mut(id, target);
        }
    }

    pub fn find_alias(&self, id: Ident) -> Option<&AliasTarget> {
        self.alias.temps.get(&id)
    }

    /// Records that the return slot holds what the target holds.
    pub fn store_ret_alias(&mut self, target: Option<AliasTarget>) {
        if self.is_reachable {
            self.alias.ret = target;
        }
    }

    pub fn find_ret_alias(&self) -> Option<&AliasTarget> {
        self.alias.ret.as_ref()
    }

    /// Removes aliases whose target may have changed because the location was written.
    pub fn invalidate_aliases_of(&mut self, loc: &Rc<Location>) {
        let stale: Vec<Ident> = self
            .alias
            .temps
            .iter()
            .filter(|(_, target)| matches!(target, AliasTarget::Simple(l) if l == loc))
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            self.alias.temps.remove_mut(&id);
        }
    }

    /// Drops the symbolic expressions that temporaries hold over a relation variable whose
    /// value just changed.
    pub fn forget_sym_of(&mut self, var: &RelVar) {
        let stale: Vec<(Rc<Location>, Rc<AbstractValue>)> = self
            .stack
            .iter()
            .filter(|(loc, value)| loc.is_temp() && value.sym.iter().any(|e| e.var == *var))
            .map(|(loc, value)| (loc.clone(), value.clone()))
            .collect();
        for (loc, value) in stale {
            let mut value = value.as_ref().clone();
            value.sym.retain(|e| e.var != *var);
            self.stack.insert_mut(loc, Rc::new(value));
        }
    }

    /// Ends the lifetime of temporaries.
    pub fn remove_temps(&mut self, ids: &[Ident]) {
        for id in ids.iter() {
            self.stack.remove_mut(&Location::temp(*id));
            self.alias.temps.remove_mut(id);
        }
    }

    /// Drops the locations (and everything the relation and alias table know about them).
    #[logfn_inputs(TRACE)]
    pub fn forget_locs(&mut self, locs: &LocSet) {
        if !self.is_reachable {
            return;
        }
        for loc in locs.iter() {
            self.stack.remove_mut(loc);
            self.heap.remove_mut(loc);
        }
        let stale: Vec<Ident> = self
            .alias
            .temps
            .iter()
            .filter(|(id, target)| {
                locs.contains(target.location()) || locs.contains(&Location::temp(**id))
            })
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            self.alias.temps.remove_mut(&id);
        }
        if matches!(&self.alias.ret, Some(target) if locs.contains(target.location())) {
            self.alias.ret = None;
        }
        self.relation.forget_locs(locs);
    }

    /// All locations reachable from the roots by following pointers, fields and element
    /// regions through the heap.
    #[logfn_inputs(TRACE)]
    pub fn get_reachable_locs_from(&self, roots: &LocSet) -> LocSet {
        let mut children: BTreeMap<Rc<Location>, Vec<Rc<Location>>> = BTreeMap::new();
        for (loc, _) in self.heap.iter() {
            if let Some(base) = loc.base() {
                children.entry(base.clone()).or_default().push(loc.clone());
            }
        }
        let mut visited = LocSet::new();
        let mut worklist: Vec<Rc<Location>> = roots.iter().cloned().collect();
        while let Some(loc) = worklist.pop() {
            if !visited.insert(loc.clone()) {
                continue;
            }
            if let Some(value) = self.heap.get(&loc).or_else(|| self.stack.get(&loc)) {
                worklist.extend(value.pointed_locs());
                worklist.extend(value.deref_locs());
            }
            if let Some(locs) = children.get(&loc) {
                worklist.extend(locs.iter().cloned());
            }
        }
        visited
    }

    /// The heap locations of self that are not present in the other state.
    pub fn get_new_heap_locs(&self, other: &Memory) -> LocSet {
        self.heap
            .keys()
            .filter(|loc| !other.heap.contains_key(*loc))
            .cloned()
            .collect()
    }

    /// All temporaries bound in the stack.
    pub fn temps(&self) -> LocSet {
        self.stack.keys().filter(|l| l.is_temp()).cloned().collect()
    }

    /// The locations of local variables and everything rooted in them.
    pub fn local_variable_locs(&self) -> LocSet {
        self.stack
            .keys()
            .chain(self.heap.keys())
            .filter(|l| l.root().is_local_variable())
            .cloned()
            .collect()
    }

    #[logfn_inputs(TRACE)]
    #[must_use]
    pub fn join(&self, other: &Memory) -> Memory {
        self.join_or_widen(other, false)
    }

    /// Widens self (the previous state) with other (the next state).
    #[logfn_inputs(TRACE)]
    #[must_use]
    pub fn widen(&self, other: &Memory) -> Memory {
        self.join_or_widen(other, true)
    }

    fn join_or_widen(&self, other: &Memory, widen: bool) -> Memory {
        if !self.is_reachable {
            return other.clone();
        }
        if !other.is_reachable {
            return self.clone();
        }
        let combine = |x: &Rc<AbstractValue>, y: &Rc<AbstractValue>| -> Rc<AbstractValue> {
            if Rc::ptr_eq(x, y) {
                x.clone()
            } else if widen {
                Rc::new(x.widen(y))
            } else {
                Rc::new(x.join(y))
            }
        };
        Memory {
            is_reachable: true,
            stack: join_maps(&self.stack, &other.stack, &combine),
            heap: join_maps(&self.heap, &other.heap, &combine),
            alias: self.alias.join(&other.alias),
            relation: if widen {
                self.relation.widen(&other.relation)
            } else {
                self.relation.join(&other.relation)
            },
        }
    }

    /// The order used to detect fixpoints. Bottom is below everything.
    #[logfn_inputs(TRACE)]
    pub fn leq(&self, other: &Memory) -> bool {
        if !self.is_reachable {
            return true;
        }
        if !other.is_reachable {
            return false;
        }
        let map_leq = |m1: &HashTrieMap<Rc<Location>, Rc<AbstractValue>>,
                       m2: &HashTrieMap<Rc<Location>, Rc<AbstractValue>>| {
            m1.iter().all(|(loc, v1)| match m2.get(loc) {
                Some(v2) => Rc::ptr_eq(v1, v2) || v1.leq(v2),
                None => v1.is_bottom(),
            })
        };
        map_leq(&self.stack, &other.stack)
            && map_leq(&self.heap, &other.heap)
            && self.alias.leq(&other.alias)
            && self.relation.leq(&other.relation)
    }

    /// Every location the state has a value for.
    pub fn locations(&self) -> BTreeSet<Rc<Location>> {
        self.stack.keys().chain(self.heap.keys()).cloned().collect()
    }
}

/// Entries present in only one of the maps are kept: a missing entry corresponds to a
/// path on which the location was never written.
fn join_maps(
    m1: &HashTrieMap<Rc<Location>, Rc<AbstractValue>>,
    m2: &HashTrieMap<Rc<Location>, Rc<AbstractValue>>,
    combine: &dyn Fn(&Rc<AbstractValue>, &Rc<AbstractValue>) -> Rc<AbstractValue>,
) -> HashTrieMap<Rc<Location>, Rc<AbstractValue>> {
    let mut result = m1.clone();
    for (loc, v2) in m2.iter() {
        let value = match m1.get(loc) {
            Some(v1) => combine(v1, v2),
            None => v2.clone(),
        };
        result.insert_mut(loc.clone(), value);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval_domain::Interval;

    fn value(lower: i128, upper: i128) -> Rc<AbstractValue> {
        Rc::new(AbstractValue::from(Interval::range(lower, upper)))
    }

    fn singleton(loc: &Rc<Location>) -> LocSet {
        let mut locs = LocSet::new();
        locs.insert(loc.clone());
        locs
    }

    #[test]
    fn operations_on_bottom_are_no_ops() {
        let mut mem = Memory::bottom();
        let x = Location::local("x");
        mem.add_heap(x.clone(), value(1, 1));
        mem.strong_update_heap(x.clone(), value(1, 1));
        mem.update_mem(&singleton(&x), value(2, 2));
        mem.add_stack(Location::temp(Ident(1)), value(3, 3));
        assert!(mem.is_bottom());
        assert!(mem.heap.is_empty());
        assert!(mem.stack.is_empty());
        assert!(mem.find(&x).is_bottom());
    }

    #[test]
    fn strong_update_of_a_singleton_is_exact() {
        let mut mem = Memory::new();
        let x = Location::local("x");
        mem.update_mem(&singleton(&x), value(0, 10));
        mem.update_mem(&singleton(&x), value(5, 5));
        assert_eq!(mem.find(&x).itv, Interval::from(5));
    }

    #[test]
    fn weak_update_keeps_old_values() {
        let mut mem = Memory::new();
        let x = Location::local("x");
        let y = Location::local("y");
        mem.update_mem(&singleton(&x), value(1, 1));
        mem.update_mem(&singleton(&y), value(2, 2));
        let mut both = singleton(&x);
        both.insert(y.clone());
        mem.update_mem(&both, value(7, 7));
        assert_eq!(mem.find(&x).itv, Interval::range(1, 7));
        assert_eq!(mem.find(&y).itv, Interval::range(2, 7));
    }

    #[test]
    fn stack_cells_written_together_are_weakly_updated() {
        let mut mem = Memory::new();
        let t1 = Location::temp(Ident(1));
        let t2 = Location::temp(Ident(2));
        mem.add_stack(t1.clone(), value(1, 1));
        mem.add_stack(t2.clone(), value(2, 2));
        let mut both = singleton(&t1);
        both.insert(t2.clone());
        mem.update_mem(&both, value(7, 7));
        assert_eq!(mem.find(&t1).itv, Interval::range(1, 7));
        assert_eq!(mem.find(&t2).itv, Interval::range(2, 7));
        mem.update_mem(&singleton(&t1), value(4, 4));
        assert_eq!(mem.find(&t1).itv, Interval::from(4));
    }

    #[test]
    fn locations_written_on_one_side_keep_their_value_in_joins() {
        let x = Location::local("x");
        let y = Location::local("y");
        let mut m1 = Memory::new();
        m1.update_mem(&singleton(&x), value(0, 1));
        let mut m2 = Memory::new();
        m2.update_mem(&singleton(&y), value(3, 4));
        let j = m1.join(&m2);
        assert_eq!(j.find(&x).itv, Interval::range(0, 1));
        assert_eq!(j.find(&y).itv, Interval::range(3, 4));
        assert_eq!(j.widen(&j), j);
    }

    #[test]
    fn element_regions_are_never_strongly_updated() {
        let mut mem = Memory::new();
        let block = Location::allocsite(crate::location::Allocsite::Known {
            proc: Rc::from("f"),
            node: 0,
            instr: 0,
            dimension: 0,
        });
        let elements = Location::index(&block);
        mem.update_mem(&singleton(&elements), value(0, 0));
        mem.update_mem(&singleton(&elements), value(9, 9));
        assert_eq!(mem.find(&elements).itv, Interval::range(0, 9));
    }

    #[test]
    fn join_is_monotone_and_bottom_is_its_identity() {
        let x = Location::local("x");
        let mut m1 = Memory::new();
        m1.update_mem(&singleton(&x), value(0, 1));
        let mut m2 = Memory::new();
        m2.update_mem(&singleton(&x), value(3, 4));
        let j = m1.join(&m2);
        assert!(m1.leq(&j));
        assert!(m2.leq(&j));
        assert_eq!(Memory::bottom().join(&m1), m1);
        assert_eq!(m1.join(&Memory::bottom()), m1);
    }

    #[test]
    fn reachability_follows_pointers_and_fields() {
        let mut mem = Memory::new();
        let p = Location::local("p");
        let s = Location::local("s");
        let f: Rc<str> = Rc::from("f");
        let field = Location::field(&s, &f);
        mem.update_mem(&singleton(&p), Rc::new(AbstractValue::of_loc(s.clone())));
        mem.update_mem(&singleton(&field), value(1, 1));
        let reachable = mem.get_reachable_locs_from(&singleton(&p));
        assert!(reachable.contains(&s));
        assert!(reachable.contains(&field));
    }
}
