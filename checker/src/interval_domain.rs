// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.
//

use crate::bool_domain::BoolDomain;
use crate::symbol::Symbol;

use log_derive::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Display, Formatter, Result};

/// Maps each symbol of a linear bound to its (non zero) coefficient.
pub type SymLinear = BTreeMap<Symbol, i128>;

/// Identifies which end of an interval a bound is used for. Operations that cannot decide
/// between two infinities pick the one that is sound for that end.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BoundEnd {
    Lower,
    Upper,
}

/// A bound of an interval: an infinity, or a linear expression `c + a1*s1 + ... + an*sn` over
/// symbols. Bounds that only have a constant part are ordinary integers.
#[derive(Serialize, Deserialize, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Bound {
    MinusInfinity,
    Linear { constant: i128, symbols: SymLinear },
    PlusInfinity,
}

impl Debug for Bound {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        Display::fmt(self, f)
    }
}

impl Display for Bound {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Bound::MinusInfinity => f.write_str("-oo"),
            Bound::PlusInfinity => f.write_str("+oo"),
            Bound::Linear { constant, symbols } => {
                let mut first = true;
                for (sym, coeff) in symbols.iter() {
                    let magnitude = coeff.abs();
                    if first {
                        if *coeff < 0 {
                            f.write_str("-")?;
                        }
                    } else if *coeff < 0 {
                        f.write_str(" - ")?;
                    } else {
                        f.write_str(" + ")?;
                    }
                    if magnitude != 1 {
                        write!(f, "{}*", magnitude)?;
                    }
                    write!(f, "{}", sym)?;
                    first = false;
                }
                if first {
                    write!(f, "{}", constant)
                } else if *constant > 0 {
                    write!(f, " + {}", constant)
                } else if *constant < 0 {
                    write!(f, " - {}", constant.unsigned_abs())
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl From<i128> for Bound {
    fn from(constant: i128) -> Bound {
        Bound::Linear {
            constant,
            symbols: SymLinear::new(),
        }
    }
}

impl Bound {
    pub fn of_symbol(sym: &Symbol) -> Bound {
        let mut symbols = SymLinear::new();
        symbols.insert(sym.clone(), 1);
        Bound::Linear {
            constant: 0,
            symbols,
        }
    }

    /// The value of the bound if it does not depend on symbols and is finite.
    pub fn as_const(&self) -> Option<i128> {
        match self {
            Bound::Linear { constant, symbols } if symbols.is_empty() => Some(*constant),
            _ => None,
        }
    }

    pub fn is_infinite(&self) -> bool {
        !matches!(self, Bound::Linear { .. })
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self, Bound::Linear { symbols, .. } if !symbols.is_empty())
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        let symbols = match self {
            Bound::Linear { symbols, .. } => Some(symbols.keys()),
            _ => None,
        };
        symbols.into_iter().flatten()
    }

    /// Adds two bounds. When one is -oo and the other +oo the result is the infinity that is
    /// sound for the given end.
    #[must_use]
    pub fn add(&self, other: &Bound, end: BoundEnd) -> Bound {
        match (self, other) {
            (
                Bound::Linear {
                    constant: c1,
                    symbols: s1,
                },
                Bound::Linear {
                    constant: c2,
                    symbols: s2,
                },
            ) => {
                let mut symbols = s1.clone();
                for (sym, coeff) in s2.iter() {
                    let sum = symbols.get(sym).copied().unwrap_or(0).saturating_add(*coeff);
                    if sum == 0 {
                        symbols.remove(sym);
                    } else {
                        symbols.insert(sym.clone(), sum);
                    }
                }
                Bound::Linear {
                    constant: c1.saturating_add(*c2),
                    symbols,
                }
            }
            (Bound::MinusInfinity, Bound::PlusInfinity)
            | (Bound::PlusInfinity, Bound::MinusInfinity) => match end {
                BoundEnd::Lower => Bound::MinusInfinity,
                BoundEnd::Upper => Bound::PlusInfinity,
            },
            (Bound::MinusInfinity, _) | (_, Bound::MinusInfinity) => Bound::MinusInfinity,
            (Bound::PlusInfinity, _) | (_, Bound::PlusInfinity) => Bound::PlusInfinity,
        }
    }

    #[must_use]
    pub fn add_const(&self, c: i128) -> Bound {
        self.add(&Bound::from(c), BoundEnd::Lower)
    }

    #[must_use]
    pub fn neg(&self) -> Bound {
        self.mul_const(-1)
    }

    #[must_use]
    pub fn mul_const(&self, k: i128) -> Bound {
        if k == 0 {
            return Bound::from(0);
        }
        match self {
            Bound::MinusInfinity if k > 0 => Bound::MinusInfinity,
            Bound::MinusInfinity => Bound::PlusInfinity,
            Bound::PlusInfinity if k > 0 => Bound::PlusInfinity,
            Bound::PlusInfinity => Bound::MinusInfinity,
            Bound::Linear { constant, symbols } => Bound::Linear {
                constant: constant.saturating_mul(k),
                symbols: symbols
                    .iter()
                    .map(|(s, c)| (s.clone(), c.saturating_mul(k)))
                    .collect(),
            },
        }
    }

    /// True if self <= other holds for every valuation of the symbols.
    /// A false result means that this could not be established.
    pub fn le(&self, other: &Bound) -> bool {
        match (self, other) {
            (Bound::MinusInfinity, _) | (_, Bound::PlusInfinity) => true,
            (Bound::PlusInfinity, _) | (_, Bound::MinusInfinity) => false,
            (Bound::Linear { .. }, Bound::Linear { .. }) => {
                if let Bound::Linear { constant, symbols } = other.add(&self.neg(), BoundEnd::Lower)
                {
                    // other - self = constant + sum(coeff * sym) must be non negative
                    constant >= 0
                        && symbols
                            .iter()
                            .all(|(sym, coeff)| *coeff > 0 && sym.unsigned)
                } else {
                    false
                }
            }
        }
    }

    /// True if self < other holds for every valuation of the symbols.
    pub fn lt(&self, other: &Bound) -> bool {
        match self {
            Bound::Linear { .. } => self.add_const(1).le(other),
            Bound::MinusInfinity => !matches!(other, Bound::MinusInfinity),
            Bound::PlusInfinity => false,
        }
    }

    /// The smaller of two lower bounds, or -oo when they are incomparable.
    #[must_use]
    pub fn join_lower(&self, other: &Bound) -> Bound {
        if self.le(other) {
            self.clone()
        } else if other.le(self) {
            other.clone()
        } else {
            Bound::MinusInfinity
        }
    }

    /// The larger of two upper bounds, or +oo when they are incomparable.
    #[must_use]
    pub fn join_upper(&self, other: &Bound) -> Bound {
        if self.le(other) {
            other.clone()
        } else if other.le(self) {
            self.clone()
        } else {
            Bound::PlusInfinity
        }
    }

    /// The larger of two lower bounds. If they are incomparable either one is sound.
    #[must_use]
    pub fn meet_lower(&self, other: &Bound) -> Bound {
        if self.le(other) {
            other.clone()
        } else {
            self.clone()
        }
    }

    /// The smaller of two upper bounds. If they are incomparable either one is sound.
    #[must_use]
    pub fn meet_upper(&self, other: &Bound) -> Bound {
        if other.le(self) {
            other.clone()
        } else {
            self.clone()
        }
    }

    /// Replaces the symbols that the given function knows about with the corresponding end of
    /// the interval it returns. Returns None if some symbol maps to bottom.
    pub fn substitute(
        &self,
        end: BoundEnd,
        map: &dyn Fn(&Symbol) -> Option<Interval>,
    ) -> Option<Bound> {
        match self {
            Bound::Linear { constant, symbols } => {
                let mut result = Bound::from(*constant);
                for (sym, coeff) in symbols.iter() {
                    let term = match map(sym) {
                        None => {
                            let mut kept = SymLinear::new();
                            kept.insert(sym.clone(), *coeff);
                            Bound::Linear {
                                constant: 0,
                                symbols: kept,
                            }
                        }
                        Some(itv) => match itv.mul_const(*coeff) {
                            Interval::Bottom => return None,
                            Interval::Range { lower, upper } => match end {
                                BoundEnd::Lower => lower,
                                BoundEnd::Upper => upper,
                            },
                        },
                    };
                    result = result.add(&term, end);
                }
                Some(result)
            }
            _ => Some(self.clone()),
        }
    }
}

/// An element of the Interval domain is a range of integers denoted by a lower bound and an
/// upper bound, each of which may be infinite or a linear expression over symbols.
/// Intervals with only one symbolic end are fine: arithmetic treats the other end as whatever
/// bound it has, including infinity.
#[derive(Serialize, Deserialize, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Interval {
    Bottom,
    Range { lower: Bound, upper: Bound },
}

impl Debug for Interval {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        Display::fmt(self, f)
    }
}

impl Display for Interval {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Interval::Bottom => f.write_str("_|_"),
            Interval::Range { lower, upper } if lower == upper => write!(f, "{}", lower),
            Interval::Range { lower, upper } => write!(f, "[{}, {}]", lower, upper),
        }
    }
}

impl From<i128> for Interval {
    fn from(i: i128) -> Interval {
        Interval::Range {
            lower: Bound::from(i),
            upper: Bound::from(i),
        }
    }
}

impl From<BoolDomain> for Interval {
    fn from(b: BoolDomain) -> Interval {
        match b {
            BoolDomain::Bottom => Interval::Bottom,
            BoolDomain::False => Interval::from(0),
            BoolDomain::True => Interval::from(1),
            BoolDomain::Top => Interval::range(0, 1),
        }
    }
}

impl Interval {
    pub fn top() -> Interval {
        Interval::Range {
            lower: Bound::MinusInfinity,
            upper: Bound::PlusInfinity,
        }
    }

    pub fn range(lower: i128, upper: i128) -> Interval {
        Interval::of_bounds(Bound::from(lower), Bound::from(upper))
    }

    /// [0, +oo]
    pub fn nat() -> Interval {
        Interval::Range {
            lower: Bound::from(0),
            upper: Bound::PlusInfinity,
        }
    }

    /// [s, s]
    pub fn of_symbol(sym: &Symbol) -> Interval {
        Interval::Range {
            lower: Bound::of_symbol(sym),
            upper: Bound::of_symbol(sym),
        }
    }

    /// Builds a range, normalizing to bottom when the bounds provably cross.
    pub fn of_bounds(lower: Bound, upper: Bound) -> Interval {
        if upper.lt(&lower) {
            Interval::Bottom
        } else {
            Interval::Range { lower, upper }
        }
    }

    pub fn is_bottom(&self) -> bool {
        matches!(self, Interval::Bottom)
    }

    pub fn is_top(&self) -> bool {
        matches!(
            self,
            Interval::Range {
                lower: Bound::MinusInfinity,
                upper: Bound::PlusInfinity
            }
        )
    }

    pub fn lower(&self) -> Option<&Bound> {
        match self {
            Interval::Range { lower, .. } => Some(lower),
            Interval::Bottom => None,
        }
    }

    pub fn upper(&self) -> Option<&Bound> {
        match self {
            Interval::Range { upper, .. } => Some(upper),
            Interval::Bottom => None,
        }
    }

    /// The single integer this interval contains, if it is known.
    pub fn as_const(&self) -> Option<i128> {
        match self {
            Interval::Range { lower, upper } => {
                let l = lower.as_const()?;
                if upper.as_const() == Some(l) {
                    Some(l)
                } else {
                    None
                }
            }
            Interval::Bottom => None,
        }
    }

    /// True if one of the bounds mentions a symbol.
    pub fn is_symbolic(&self) -> bool {
        match self {
            Interval::Range { lower, upper } => lower.is_symbolic() || upper.is_symbolic(),
            Interval::Bottom => false,
        }
    }

    pub fn symbols(&self) -> BTreeSet<Symbol> {
        match self {
            Interval::Range { lower, upper } => {
                lower.symbols().chain(upper.symbols()).cloned().collect()
            }
            Interval::Bottom => BTreeSet::new(),
        }
    }

    /// True if every integer in self is in other.
    pub fn leq(&self, other: &Interval) -> bool {
        match (self, other) {
            (Interval::Bottom, _) => true,
            (_, Interval::Bottom) => false,
            (
                Interval::Range {
                    lower: l1,
                    upper: u1,
                },
                Interval::Range {
                    lower: l2,
                    upper: u2,
                },
            ) => l2.le(l1) && u1.le(u2),
        }
    }

    #[logfn_inputs(TRACE)]
    #[must_use]
    pub fn join(&self, other: &Interval) -> Interval {
        match (self, other) {
            (Interval::Bottom, _) => other.clone(),
            (_, Interval::Bottom) => self.clone(),
            (
                Interval::Range {
                    lower: l1,
                    upper: u1,
                },
                Interval::Range {
                    lower: l2,
                    upper: u2,
                },
            ) => Interval::Range {
                lower: l1.join_lower(l2),
                upper: u1.join_upper(u2),
            },
        }
    }

    /// Widens self (the previous value) with other (the next value): every bound that is not
    /// stable is pushed to infinity.
    #[logfn_inputs(TRACE)]
    #[must_use]
    pub fn widen(&self, other: &Interval) -> Interval {
        match (self, other) {
            (Interval::Bottom, _) => other.clone(),
            (_, Interval::Bottom) => self.clone(),
            (
                Interval::Range {
                    lower: l1,
                    upper: u1,
                },
                Interval::Range {
                    lower: l2,
                    upper: u2,
                },
            ) => Interval::Range {
                lower: if l1.le(l2) {
                    l1.clone()
                } else {
                    Bound::MinusInfinity
                },
                upper: if u2.le(u1) {
                    u1.clone()
                } else {
                    Bound::PlusInfinity
                },
            },
        }
    }

    #[must_use]
    pub fn meet(&self, other: &Interval) -> Interval {
        match (self, other) {
            (Interval::Bottom, _) | (_, Interval::Bottom) => Interval::Bottom,
            (
                Interval::Range {
                    lower: l1,
                    upper: u1,
                },
                Interval::Range {
                    lower: l2,
                    upper: u2,
                },
            ) => Interval::of_bounds(l1.meet_lower(l2), u1.meet_upper(u2)),
        }
    }

    //[x...y] + [a...b] = [x+a...y+b]
    #[must_use]
    pub fn add(&self, other: &Interval) -> Interval {
        match (self, other) {
            (Interval::Bottom, _) | (_, Interval::Bottom) => Interval::Bottom,
            (
                Interval::Range {
                    lower: l1,
                    upper: u1,
                },
                Interval::Range {
                    lower: l2,
                    upper: u2,
                },
            ) => Interval::Range {
                lower: l1.add(l2, BoundEnd::Lower),
                upper: u1.add(u2, BoundEnd::Upper),
            },
        }
    }

    //[x...y] - [a...b] = [x-b...y-a]
    #[must_use]
    pub fn sub(&self, other: &Interval) -> Interval {
        self.add(&other.neg())
    }

    #[must_use]
    pub fn neg(&self) -> Interval {
        self.mul_const(-1)
    }

    #[must_use]
    pub fn mul_const(&self, k: i128) -> Interval {
        match self {
            Interval::Bottom => Interval::Bottom,
            Interval::Range { lower, upper } => {
                if k >= 0 {
                    Interval::Range {
                        lower: lower.mul_const(k),
                        upper: upper.mul_const(k),
                    }
                } else {
                    Interval::Range {
                        lower: upper.mul_const(k),
                        upper: lower.mul_const(k),
                    }
                }
            }
        }
    }

    #[must_use]
    pub fn mul(&self, other: &Interval) -> Interval {
        if self.is_bottom() || other.is_bottom() {
            return Interval::Bottom;
        }
        if let Some(k) = other.as_const() {
            return self.mul_const(k);
        }
        if let Some(k) = self.as_const() {
            return other.mul_const(k);
        }
        match (self.numeric_bounds(), other.numeric_bounds()) {
            (Some((l1, u1)), Some((l2, u2))) => {
                let products = [
                    l1.saturating_mul(l2),
                    l1.saturating_mul(u2),
                    u1.saturating_mul(l2),
                    u1.saturating_mul(u2),
                ];
                let lower = products.iter().copied().min().unwrap_or(i128::MIN);
                let upper = products.iter().copied().max().unwrap_or(i128::MAX);
                Interval::range(lower, upper)
            }
            _ => Interval::top(),
        }
    }

    /// Truncating division, which is monotone in the dividend for a fixed divisor.
    #[must_use]
    pub fn div(&self, other: &Interval) -> Interval {
        if self.is_bottom() || other.is_bottom() {
            return Interval::Bottom;
        }
        let k = match other.as_const() {
            Some(k) if k != 0 => k,
            _ => return Interval::top(),
        };
        match self {
            Interval::Range { lower, upper } if !self.is_symbolic() => {
                // i128::MIN / -1 does not fit
                let div_bound = |b: &Bound| match b {
                    Bound::Linear { constant, .. } => constant.checked_div(k).map(Bound::from),
                    infinity => Some(infinity.mul_const(k.signum())),
                };
                match (div_bound(lower), div_bound(upper)) {
                    (Some(l), Some(u)) if k > 0 => Interval::of_bounds(l, u),
                    (Some(l), Some(u)) => Interval::of_bounds(u, l),
                    _ => Interval::top(),
                }
            }
            _ => Interval::top(),
        }
    }

    /// The remainder of a truncating division by a constant.
    #[must_use]
    pub fn rem(&self, other: &Interval) -> Interval {
        if self.is_bottom() || other.is_bottom() {
            return Interval::Bottom;
        }
        match other.as_const() {
            Some(k) if k != 0 => {
                let m = k.saturating_abs() - 1;
                if Bound::from(0).le(self.lower().unwrap_or(&Bound::MinusInfinity)) {
                    Interval::range(0, m)
                } else {
                    Interval::range(-m, m)
                }
            }
            _ => Interval::top(),
        }
    }

    /// The finite constant bounds of a non symbolic interval.
    fn numeric_bounds(&self) -> Option<(i128, i128)> {
        match self {
            Interval::Range { lower, upper } => Some((lower.as_const()?, upper.as_const()?)),
            Interval::Bottom => None,
        }
    }

    /// Evaluates self < other.
    pub fn lt_sem(&self, other: &Interval) -> BoolDomain {
        match (self, other) {
            (Interval::Bottom, _) | (_, Interval::Bottom) => BoolDomain::Bottom,
            (
                Interval::Range {
                    lower: l1,
                    upper: u1,
                },
                Interval::Range {
                    lower: l2,
                    upper: u2,
                },
            ) => {
                if u1.lt(l2) {
                    BoolDomain::True
                } else if u2.le(l1) {
                    BoolDomain::False
                } else {
                    BoolDomain::Top
                }
            }
        }
    }

    /// Evaluates self <= other.
    pub fn le_sem(&self, other: &Interval) -> BoolDomain {
        match (self, other) {
            (Interval::Bottom, _) | (_, Interval::Bottom) => BoolDomain::Bottom,
            (
                Interval::Range {
                    lower: l1,
                    upper: u1,
                },
                Interval::Range {
                    lower: l2,
                    upper: u2,
                },
            ) => {
                if u1.le(l2) {
                    BoolDomain::True
                } else if u2.lt(l1) {
                    BoolDomain::False
                } else {
                    BoolDomain::Top
                }
            }
        }
    }

    pub fn gt_sem(&self, other: &Interval) -> BoolDomain {
        other.lt_sem(self)
    }

    pub fn ge_sem(&self, other: &Interval) -> BoolDomain {
        other.le_sem(self)
    }

    /// Evaluates self == other.
    pub fn eq_sem(&self, other: &Interval) -> BoolDomain {
        if self.is_bottom() || other.is_bottom() {
            return BoolDomain::Bottom;
        }
        match (self.as_const(), other.as_const()) {
            (Some(a), Some(b)) => BoolDomain::from(a == b),
            _ => {
                if self.lt_sem(other).is_true() || other.lt_sem(self).is_true() {
                    BoolDomain::False
                } else {
                    BoolDomain::Top
                }
            }
        }
    }

    pub fn ne_sem(&self, other: &Interval) -> BoolDomain {
        self.eq_sem(other).not()
    }

    /// Restricts self to the values that are < other.
    #[must_use]
    pub fn prune_lt(&self, other: &Interval) -> Interval {
        match other.upper() {
            Some(u) => self.meet(&Interval::Range {
                lower: Bound::MinusInfinity,
                upper: u.add_const(-1),
            }),
            None => Interval::Bottom,
        }
    }

    /// Restricts self to the values that are <= other.
    #[must_use]
    pub fn prune_le(&self, other: &Interval) -> Interval {
        match other.upper() {
            Some(u) => self.meet(&Interval::Range {
                lower: Bound::MinusInfinity,
                upper: u.clone(),
            }),
            None => Interval::Bottom,
        }
    }

    /// Restricts self to the values that are > other.
    #[must_use]
    pub fn prune_gt(&self, other: &Interval) -> Interval {
        match other.lower() {
            Some(l) => self.meet(&Interval::Range {
                lower: l.add_const(1),
                upper: Bound::PlusInfinity,
            }),
            None => Interval::Bottom,
        }
    }

    /// Restricts self to the values that are >= other.
    #[must_use]
    pub fn prune_ge(&self, other: &Interval) -> Interval {
        match other.lower() {
            Some(l) => self.meet(&Interval::Range {
                lower: l.clone(),
                upper: Bound::PlusInfinity,
            }),
            None => Interval::Bottom,
        }
    }

    #[must_use]
    pub fn prune_eq(&self, other: &Interval) -> Interval {
        self.meet(other)
    }

    /// Removes a constant from the ends of self.
    #[must_use]
    pub fn prune_ne(&self, other: &Interval) -> Interval {
        let c = match (self, other.as_const()) {
            (Interval::Range { .. }, Some(c)) => c,
            _ => return self.clone(),
        };
        if let Interval::Range { lower, upper } = self {
            let mut lower = lower.clone();
            let mut upper = upper.clone();
            if lower.as_const() == Some(c) {
                if let Some(next) = c.checked_add(1) {
                    lower = Bound::from(next);
                }
            }
            if upper.as_const() == Some(c) {
                if let Some(previous) = c.checked_sub(1) {
                    upper = Bound::from(previous);
                }
            }
            Interval::of_bounds(lower, upper)
        } else {
            Interval::Bottom
        }
    }

    /// Replaces symbols by the intervals the map gives for them.
    #[must_use]
    pub fn substitute(&self, map: &dyn Fn(&Symbol) -> Option<Interval>) -> Interval {
        match self {
            Interval::Bottom => Interval::Bottom,
            Interval::Range { lower, upper } => {
                let lower = lower.substitute(BoundEnd::Lower, map);
                let upper = upper.substitute(BoundEnd::Upper, map);
                match (lower, upper) {
                    (Some(lower), Some(upper)) => Interval::of_bounds(lower, upper),
                    _ => Interval::Bottom,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{SymbolCounter, SymbolKind, SymbolPath};
    use std::rc::Rc;

    fn symbol(counter: &mut SymbolCounter, name: &str, unsigned: bool) -> Symbol {
        let path = SymbolPath::param(0, Rc::from(name));
        counter.fresh(SymbolKind::Value, &path, unsigned)
    }

    #[test]
    fn join_is_an_upper_bound() {
        let a = Interval::range(0, 3);
        let b = Interval::range(5, 9);
        let j = a.join(&b);
        assert!(a.leq(&j));
        assert!(b.leq(&j));
        assert_eq!(j, Interval::range(0, 9));
    }

    #[test]
    fn bottom_is_the_identity_of_join() {
        let a = Interval::range(-2, 7);
        assert_eq!(Interval::Bottom.join(&a), a);
        assert_eq!(a.join(&Interval::Bottom), a);
        assert!(Interval::Bottom.add(&a).is_bottom());
    }

    #[test]
    fn widening_goes_to_infinity_on_unstable_bounds() {
        let a = Interval::range(0, 1);
        let b = Interval::range(0, 2);
        let w = a.widen(&b);
        assert_eq!(
            w,
            Interval::Range {
                lower: Bound::from(0),
                upper: Bound::PlusInfinity
            }
        );
        assert_eq!(w.widen(&w.join(&Interval::range(0, 100))), w);
    }

    #[test]
    fn symbolic_comparisons() {
        let mut counter = SymbolCounter::new(Rc::from("f"));
        let n = symbol(&mut counter, "n", true);
        let n_itv = Interval::of_symbol(&n);
        let n_minus_one = n_itv.add(&Interval::from(-1));
        assert!(n_minus_one.lt_sem(&n_itv).is_true());
        assert!(n_itv.lt_sem(&n_itv).is_false());
        // 0 <= n because n is unsigned
        assert!(Interval::from(0).le_sem(&n_itv).is_true());
        assert_eq!(Interval::from(1).lt_sem(&n_itv), BoolDomain::Top);
    }

    #[test]
    fn half_symbolic_intervals_support_arithmetic() {
        let mut counter = SymbolCounter::new(Rc::from("f"));
        let n = symbol(&mut counter, "n", false);
        let itv = Interval::Range {
            lower: Bound::MinusInfinity,
            upper: Bound::of_symbol(&n),
        };
        let sum = itv.add(&Interval::range(1, 2));
        assert_eq!(sum.lower(), Some(&Bound::MinusInfinity));
        assert_eq!(sum.upper(), Some(&Bound::of_symbol(&n).add_const(2)));
    }

    #[test]
    fn substitution_replaces_symbols_with_intervals() {
        let mut counter = SymbolCounter::new(Rc::from("f"));
        let n = symbol(&mut counter, "n", false);
        let itv = Interval::of_symbol(&n).add(&Interval::from(1));
        let result = itv.substitute(&|s: &Symbol| {
            if *s == n {
                Some(Interval::range(3, 5))
            } else {
                None
            }
        });
        assert_eq!(result, Interval::range(4, 6));
        let unchanged = itv.substitute(&|_: &Symbol| None);
        assert_eq!(unchanged, itv);
    }

    #[test]
    fn pruning_narrows() {
        let i = Interval::range(0, 20);
        assert_eq!(i.prune_lt(&Interval::from(10)), Interval::range(0, 9));
        assert_eq!(i.prune_ge(&Interval::from(5)), Interval::range(5, 20));
        assert_eq!(i.prune_ne(&Interval::from(0)), Interval::range(1, 20));
        assert!(Interval::from(0).prune_ne(&Interval::from(0)).is_bottom());
        assert!(i.prune_gt(&Interval::from(20)).is_bottom());
    }

    #[test]
    fn extreme_constants_do_not_overflow() {
        assert_eq!(
            Interval::from(i128::MIN).div(&Interval::from(-1)),
            Interval::top()
        );
        assert_eq!(
            Interval::range(-9, 9).div(&Interval::from(-2)),
            Interval::range(-4, 4)
        );
        let max = Interval::from(i128::MAX);
        assert!(max.prune_ne(&max).is_bottom());
        let min = Interval::from(i128::MIN);
        assert!(min.prune_ne(&min).is_bottom());
        assert_eq!(
            Interval::range(0, i128::MAX).prune_ne(&max),
            Interval::range(0, i128::MAX - 1)
        );
    }
}
