// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::k_limits;
use crate::location::{LocSet, Location};

use log_derive::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Display, Formatter, Result};
use std::rc::Rc;

/// A quantity the relation can talk about.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum RelVar {
    /// The integer stored at the location.
    Value(Rc<Location>),
    /// The number of elements of the memory block at the location.
    Size(Rc<Location>),
}

impl RelVar {
    pub fn location(&self) -> &Rc<Location> {
        match self {
            RelVar::Value(loc) | RelVar::Size(loc) => loc,
        }
    }
}

impl Display for RelVar {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            RelVar::Value(loc) => write!(f, "{}", loc),
            RelVar::Size(loc) => write!(f, "size({})", loc),
        }
    }
}

/// A difference bound matrix, stored sparsely: each entry `(x, y) -> c` records the
/// constraint `x - y <= c`. Missing entries mean no constraint, so the empty relation is top.
/// This is the octagon-like fragment that is enough to relate loop indices to array lengths.
#[derive(Serialize, Deserialize, Clone, Default, Eq, PartialEq, Hash)]
pub struct Relation {
    constraints: BTreeMap<(RelVar, RelVar), i128>,
}

impl Debug for Relation {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.debug_list()
            .entries(
                self.constraints
                    .iter()
                    .map(|((x, y), c)| format!("{} - {} <= {}", x, y, c)),
            )
            .finish()
    }
}

impl Relation {
    pub fn is_top(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Records x - y <= c, keeping the tighter of the old and new bound.
    #[logfn_inputs(TRACE)]
    pub fn add_le(&mut self, x: &RelVar, y: &RelVar, c: i128) {
        if x == y {
            return;
        }
        let key = (x.clone(), y.clone());
        match self.constraints.get_mut(&key) {
            Some(old) => *old = (*old).min(c),
            None => {
                if self.constraints.len() < k_limits::MAX_RELATION_CONSTRAINTS {
                    self.constraints.insert(key, c);
                }
            }
        }
    }

    /// Records x - y == c.
    pub fn add_eq(&mut self, x: &RelVar, y: &RelVar, c: i128) {
        self.add_le(x, y, c);
        self.add_le(y, x, c.saturating_neg());
    }

    /// Drops every constraint that mentions the variable.
    pub fn forget(&mut self, var: &RelVar) {
        self.constraints.retain(|(x, y), _| x != var && y != var);
    }

    /// Drops every constraint that mentions a variable of one of the locations.
    pub fn forget_locs(&mut self, locs: &LocSet) {
        self.constraints
            .retain(|(x, y), _| !locs.contains(x.location()) && !locs.contains(y.location()));
    }

    /// Rewrites the constraints for an assignment `var := var + c`.
    pub fn shift(&mut self, var: &RelVar, c: i128) {
        if c == 0 {
            return;
        }
        for ((x, y), bound) in self.constraints.iter_mut() {
            if x == var {
                *bound = bound.saturating_add(c);
            } else if y == var {
                *bound = bound.saturating_sub(c);
            }
        }
    }

    pub fn vars(&self) -> BTreeSet<RelVar> {
        let mut result = BTreeSet::new();
        for (x, y) in self.constraints.keys() {
            result.insert(x.clone());
            result.insert(y.clone());
        }
        result
    }

    /// Keeps the constraints both relations have, with the weaker bound.
    #[logfn_inputs(TRACE)]
    #[must_use]
    pub fn join(&self, other: &Relation) -> Relation {
        if self == other {
            return self.clone();
        }
        let constraints = self
            .constraints
            .iter()
            .filter_map(|(k, c1)| other.constraints.get(k).map(|c2| (k.clone(), *c1.max(c2))))
            .collect();
        Relation { constraints }
    }

    /// Keeps only the constraints that did not get weaker.
    #[must_use]
    pub fn widen(&self, other: &Relation) -> Relation {
        let constraints = self
            .constraints
            .iter()
            .filter_map(|(k, c1)| match other.constraints.get(k) {
                Some(c2) if c2 <= c1 => Some((k.clone(), *c1)),
                _ => None,
            })
            .collect();
        Relation { constraints }
    }

    /// Conjunction of both sets of constraints.
    #[must_use]
    pub fn meet(&self, other: &Relation) -> Relation {
        let mut result = self.clone();
        for ((x, y), c) in other.constraints.iter() {
            result.add_le(x, y, *c);
        }
        result
    }

    /// True if every constraint of other is implied by a constraint of self.
    pub fn leq(&self, other: &Relation) -> bool {
        other
            .constraints
            .iter()
            .all(|(k, c2)| matches!(self.constraints.get(k), Some(c1) if c1 <= c2))
    }

    /// Is x - y <= c derivable by chaining constraints? This is a shortest path question
    /// on the constraint graph. An infeasible (negative cycle) relation implies anything.
    #[logfn(TRACE)]
    pub fn implies_le(&self, x: &RelVar, y: &RelVar, c: i128) -> bool {
        if x == y {
            return c >= 0;
        }
        if let Some(bound) = self.constraints.get(&(x.clone(), y.clone())) {
            if *bound <= c {
                return true;
            }
        }
        let vars: Vec<RelVar> = self.vars().into_iter().collect();
        if !vars.contains(x) || !vars.contains(y) {
            return false;
        }
        let mut dist: BTreeMap<&RelVar, i128> = BTreeMap::new();
        dist.insert(x, 0);
        for _ in 0..vars.len() {
            let mut changed = false;
            for ((from, to), w) in self.constraints.iter() {
                if let Some(d) = dist.get(from).copied() {
                    let candidate = d.saturating_add(*w);
                    let entry = dist.entry(to).or_insert(i128::MAX);
                    if candidate < *entry {
                        *entry = candidate;
                        changed = true;
                    }
                }
            }
            if !changed {
                return matches!(dist.get(y), Some(d) if *d <= c);
            }
        }
        // Still relaxing after |V| rounds: there is a negative cycle.
        true
    }

    /// Renames variables with the given map. Constraints with a variable the map does not know
    /// about are dropped.
    #[must_use]
    pub fn substitute(&self, map: &dyn Fn(&RelVar) -> Option<RelVar>) -> Relation {
        let mut result = Relation::default();
        for ((x, y), c) in self.constraints.iter() {
            if let (Some(x), Some(y)) = (map(x), map(y)) {
                result.add_le(&x, &y, *c);
            }
        }
        result
    }

    /// The constraints that only mention the given variables.
    #[must_use]
    pub fn restrict(&self, vars: &BTreeSet<RelVar>) -> Relation {
        let constraints = self
            .constraints
            .iter()
            .filter(|((x, y), _)| vars.contains(x) && vars.contains(y))
            .map(|(k, c)| (k.clone(), *c))
            .collect();
        Relation { constraints }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(name: &str) -> RelVar {
        RelVar::Value(Location::local(name))
    }

    #[test]
    fn chained_constraints_are_implied() {
        let mut r = Relation::default();
        let i = value("i");
        let n = value("n");
        let size = RelVar::Size(Location::local("a"));
        r.add_le(&i, &n, -1);
        r.add_eq(&size, &n, 0);
        assert!(r.implies_le(&i, &size, -1));
        assert!(!r.implies_le(&size, &i, 0));
    }

    #[test]
    fn join_keeps_common_weaker_constraints() {
        let i = value("i");
        let n = value("n");
        let m = value("m");
        let mut r1 = Relation::default();
        r1.add_le(&i, &n, -1);
        r1.add_le(&i, &m, 0);
        let mut r2 = Relation::default();
        r2.add_le(&i, &n, 0);
        let j = r1.join(&r2);
        assert!(j.implies_le(&i, &n, 0));
        assert!(!j.implies_le(&i, &n, -1));
        assert!(!j.implies_le(&i, &m, 0));
        assert!(r1.leq(&j));
        assert!(r2.leq(&j));
    }

    #[test]
    fn increments_shift_bounds() {
        let i = value("i");
        let n = value("n");
        let mut r = Relation::default();
        r.add_le(&i, &n, -1);
        r.add_le(&n, &i, 5);
        r.shift(&i, 1);
        assert!(r.implies_le(&i, &n, 0));
        assert!(!r.implies_le(&i, &n, -1));
        assert!(r.implies_le(&n, &i, 4));
    }

    #[test]
    fn substitution_drops_unmapped_variables() {
        let i = value("i");
        let n = value("n");
        let k = value("k");
        let mut r = Relation::default();
        r.add_le(&i, &n, 3);
        r.add_le(&k, &n, 0);
        let renamed = r.substitute(&|v: &RelVar| {
            if *v == i {
                Some(value("j"))
            } else if *v == n {
                Some(value("m"))
            } else {
                None
            }
        });
        assert_eq!(renamed.len(), 1);
        assert!(renamed.implies_le(&value("j"), &value("m"), 3));
    }
}
