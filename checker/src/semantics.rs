// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Evaluation of expressions in an abstract memory, and the narrowing of a memory by a
//! branch condition.

use crate::abstract_value::{AbstractValue, RelExpr, RelExprSet};
use crate::bool_domain::BoolDomain;
use crate::interval_domain::{Bound, Interval};
use crate::location::{LocSet, Location};
use crate::memory::{AliasTarget, Memory};
use crate::program::{BinOp, Constant, Exp, UnOp};
use crate::relation_domain::RelVar;

use log_derive::{logfn, logfn_inputs};
use std::rc::Rc;

/// The value of an expression. Address expressions evaluate to pointers to the locations they
/// denote, except for stack allocated arrays, which evaluate to their array value.
#[logfn_inputs(TRACE)]
#[logfn(TRACE)]
pub fn eval(exp: &Exp, mem: &Memory) -> AbstractValue {
    if mem.is_bottom() {
        return AbstractValue::bottom();
    }
    match exp {
        Exp::Var(id) => mem.find(&Location::temp(*id)).as_ref().clone(),
        Exp::Lvar(var) => {
            let loc = Location::var(var.clone());
            if mem.is_stack_loc(&loc) {
                mem.find_stack(&loc).as_ref().clone()
            } else {
                AbstractValue::of_loc(loc)
            }
        }
        Exp::Const(Constant::Int(i)) => AbstractValue::from(*i),
        Exp::Const(Constant::Fn(..)) => AbstractValue::top(),
        Exp::Field(..) => {
            let mut value = AbstractValue::bottom();
            value.powloc = eval_locs(exp, mem);
            value
        }
        Exp::Index(array, index) => eval_array(array, mem).plus_pi(&eval(index, mem)),
        Exp::BinOp(op, left, right) => {
            let v1 = eval(left, mem);
            let v2 = eval(right, mem);
            eval_binop(*op, &v1, &v2)
        }
        Exp::UnOp(op, operand) => {
            let v = eval(operand, mem);
            match op {
                UnOp::Neg => v.neg(),
                UnOp::LNot => v.lnot(),
                UnOp::BNot => v.bit_op(&v),
            }
        }
        Exp::Cast(_, operand) => eval(operand, mem),
    }
}

pub fn eval_binop(op: BinOp, v1: &AbstractValue, v2: &AbstractValue) -> AbstractValue {
    match op {
        BinOp::PlusA => v1.plus_a(v2),
        BinOp::MinusA => v1.minus_a(v2),
        BinOp::Mult => v1.mult(v2),
        BinOp::Div => v1.div(v2),
        BinOp::Mod => v1.rem(v2),
        BinOp::PlusPI => v1.plus_pi(v2),
        BinOp::MinusPI => v1.minus_pi(v2),
        BinOp::MinusPP => v1.minus_pp(v2),
        BinOp::Lt => v1.less_than(v2),
        BinOp::Gt => v1.greater_than(v2),
        BinOp::Le => v1.less_or_equal(v2),
        BinOp::Ge => v1.greater_or_equal(v2),
        BinOp::Eq => v1.equals(v2),
        BinOp::Ne => v1.not_equals(v2),
        BinOp::LAnd => v1.land(v2),
        BinOp::LOr => v1.lor(v2),
        BinOp::BAnd | BinOp::BOr | BinOp::BXor | BinOp::Shiftlt | BinOp::Shiftrt => {
            v1.bit_op(v2)
        }
    }
}

/// The locations an address expression denotes.
#[logfn_inputs(TRACE)]
pub fn eval_locs(exp: &Exp, mem: &Memory) -> LocSet {
    match exp {
        Exp::Lvar(var) => {
            let mut locs = LocSet::new();
            locs.insert(Location::var(var.clone()));
            locs
        }
        Exp::Var(..) | Exp::BinOp(..) => eval(exp, mem).deref_locs(),
        Exp::Field(base, field) => eval_locs(base, mem)
            .iter()
            .map(|loc| Location::field(loc, field))
            .collect(),
        Exp::Index(array, _) => eval_array(array, mem).deref_locs(),
        Exp::Cast(_, operand) => eval_locs(operand, mem),
        Exp::Const(..) | Exp::UnOp(..) => LocSet::new(),
    }
}

/// The value of the array operand of an index expression. Arrays stored inline in a variable,
/// field or element region are read from memory; anything else must evaluate to a pointer.
pub fn eval_array(array: &Exp, mem: &Memory) -> AbstractValue {
    match array {
        Exp::Lvar(..) | Exp::Field(..) | Exp::Index(..) => {
            mem.find_heap_set(&eval_locs(array, mem)).as_ref().clone()
        }
        Exp::Cast(_, operand) => eval_array(operand, mem),
        _ => eval(array, mem),
    }
}

/// The single memory cell an expression reads, if it reads exactly one.
pub fn single_cell(locs: &LocSet) -> Option<&Rc<Location>> {
    if locs.len() != 1 {
        return None;
    }
    locs.iter()
        .next()
        .filter(|loc| !loc.represents_multiple_values())
}

/// Narrows the memory to the states in which the condition holds.
#[logfn_inputs(TRACE)]
pub fn prune(cond: &Exp, mem: Memory) -> Memory {
    if mem.is_bottom() {
        return mem;
    }
    prune_exp(cond, mem)
}

fn prune_exp(cond: &Exp, mem: Memory) -> Memory {
    if mem.is_bottom() {
        return mem;
    }
    match cond {
        Exp::UnOp(UnOp::LNot, operand) => prune_negated(operand, mem),
        Exp::BinOp(BinOp::LAnd, left, right) => {
            let mem = prune_exp(left, mem);
            prune_exp(right, mem)
        }
        Exp::BinOp(BinOp::LOr, left, right) => {
            let m1 = prune_exp(left, mem.clone());
            let m2 = prune_exp(right, mem);
            m1.join(&m2)
        }
        Exp::BinOp(op, left, right) if is_comparison(*op) => prune_comparison(*op, left, right, mem),
        Exp::Cast(_, operand) => prune_exp(operand, mem),
        _ => prune_comparison(BinOp::Ne, cond, &Exp::int(0), mem),
    }
}

fn prune_negated(cond: &Exp, mem: Memory) -> Memory {
    if mem.is_bottom() {
        return mem;
    }
    match cond {
        Exp::UnOp(UnOp::LNot, operand) => prune_exp(operand, mem),
        Exp::BinOp(BinOp::LAnd, left, right) => {
            let m1 = prune_negated(left, mem.clone());
            let m2 = prune_negated(right, mem);
            m1.join(&m2)
        }
        Exp::BinOp(BinOp::LOr, left, right) => {
            let mem = prune_negated(left, mem);
            prune_negated(right, mem)
        }
        Exp::BinOp(op, left, right) if is_comparison(*op) => {
            prune_comparison(negate(*op), left, right, mem)
        }
        Exp::Cast(_, operand) => prune_negated(operand, mem),
        _ => prune_comparison(BinOp::Eq, cond, &Exp::int(0), mem),
    }
}

fn is_comparison(op: BinOp) -> bool {
    matches!(
        op,
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne
    )
}

fn negate(op: BinOp) -> BinOp {
    match op {
        BinOp::Lt => BinOp::Ge,
        BinOp::Ge => BinOp::Lt,
        BinOp::Gt => BinOp::Le,
        BinOp::Le => BinOp::Gt,
        BinOp::Eq => BinOp::Ne,
        BinOp::Ne => BinOp::Eq,
        _ => op,
    }
}

/// The comparison with the operands swapped.
fn flip(op: BinOp) -> BinOp {
    match op {
        BinOp::Lt => BinOp::Gt,
        BinOp::Gt => BinOp::Lt,
        BinOp::Le => BinOp::Ge,
        BinOp::Ge => BinOp::Le,
        _ => op,
    }
}

/// The truth of `v1 op v2`. Pointers and unknown values are never decided.
pub fn compare(op: BinOp, v1: &AbstractValue, v2: &AbstractValue) -> BoolDomain {
    let is_integer = |v: &AbstractValue| {
        !v.is_unknown && v.powloc.is_empty() && v.arrayblk.is_empty()
    };
    if !is_integer(v1) || !is_integer(v2) {
        return BoolDomain::Top;
    }
    match op {
        BinOp::Lt => v1.itv.lt_sem(&v2.itv),
        BinOp::Gt => v1.itv.gt_sem(&v2.itv),
        BinOp::Le => v1.itv.le_sem(&v2.itv),
        BinOp::Ge => v1.itv.ge_sem(&v2.itv),
        BinOp::Eq => v1.itv.eq_sem(&v2.itv),
        BinOp::Ne => v1.itv.ne_sem(&v2.itv),
        _ => BoolDomain::Top,
    }
}

fn prune_interval(itv: &Interval, op: BinOp, other: &Interval) -> Interval {
    match op {
        BinOp::Lt => itv.prune_lt(other),
        BinOp::Gt => itv.prune_gt(other),
        BinOp::Le => itv.prune_le(other),
        BinOp::Ge => itv.prune_ge(other),
        BinOp::Eq => itv.prune_eq(other),
        BinOp::Ne => itv.prune_ne(other),
        _ => itv.clone(),
    }
}

fn prune_comparison(op: BinOp, left: &Exp, right: &Exp, mem: Memory) -> Memory {
    let v1 = eval(left, &mem);
    let v2 = eval(right, &mem);
    if compare(op, &v1, &v2).is_false() {
        return Memory::bottom();
    }
    let r1 = rel_exprs(left, &v1, &mem);
    let r2 = rel_exprs(right, &v2, &mem);
    let mut mem = prune_operand(left, &v1, op, &v2, mem);
    mem = prune_operand(right, &v2, flip(op), &v1, mem);
    if mem.is_bottom() {
        return mem;
    }
    for e1 in r1.iter() {
        for e2 in r2.iter() {
            add_comparison(&mut mem, op, e1, e2);
        }
    }
    mem
}

/// Records `e1 op e2` in the relation.
fn add_comparison(mem: &mut Memory, op: BinOp, e1: &RelExpr, e2: &RelExpr) {
    // (x + o1) - (y + o2) <= c  iff  x - y <= c - o1 + o2
    let le = |mem: &mut Memory, x: &RelExpr, y: &RelExpr, c: i128| {
        let bound = c.saturating_sub(x.offset).saturating_add(y.offset);
        mem.relation.add_le(&x.var, &y.var, bound);
    };
    match op {
        BinOp::Lt => le(mem, e1, e2, -1),
        BinOp::Le => le(mem, e1, e2, 0),
        BinOp::Gt => le(mem, e2, e1, -1),
        BinOp::Ge => le(mem, e2, e1, 0),
        BinOp::Eq => {
            le(mem, e1, e2, 0);
            le(mem, e2, e1, 0);
        }
        _ => {}
    }
}

/// The relation variables an operand is known to equal, including the size of a block when
/// the operand holds a size taken from a modeled container.
pub fn rel_exprs(exp: &Exp, value: &AbstractValue, mem: &Memory) -> RelExprSet {
    let mut result = value.sym.clone();
    if let Exp::Var(id) = exp {
        if let Some(AliasTarget::Size(loc)) = mem.find_alias(*id) {
            let container = mem.find(loc);
            if container.arrayblk.len() == 1 {
                if let Some(block) = container.arrayblk.keys().next() {
                    result.insert(RelExpr {
                        var: RelVar::Size(block.clone()),
                        offset: 0,
                    });
                }
            }
        }
    }
    result
}

/// Narrows the temporary an operand reads, and whatever the temporary aliases.
fn prune_operand(
    exp: &Exp,
    value: &AbstractValue,
    op: BinOp,
    other: &AbstractValue,
    mut mem: Memory,
) -> Memory {
    let id = match exp {
        Exp::Var(id) => *id,
        Exp::Cast(_, operand) => return prune_operand(operand, value, op, other, mem),
        _ => return mem,
    };
    if value.is_unknown || value.itv.is_bottom() || !other.powloc.is_empty() {
        return mem;
    }
    let itv = prune_interval(&value.itv, op, &other.itv);
    if itv.is_bottom() {
        return Memory::bottom();
    }
    if itv == value.itv {
        return mem;
    }
    let mut narrowed = value.clone();
    narrowed.itv = itv.clone();
    mem.add_stack(Location::temp(id), Rc::new(narrowed));
    match mem.find_alias(id).cloned() {
        Some(AliasTarget::Simple(loc)) => {
            if loc.represents_multiple_values() {
                return mem;
            }
            let stored = mem.find(&loc);
            if stored.is_unknown || stored.itv.is_bottom() {
                return mem;
            }
            let narrowed_itv = stored.itv.meet(&itv);
            if narrowed_itv.is_bottom() {
                return Memory::bottom();
            }
            let mut stored = stored.as_ref().clone();
            stored.itv = narrowed_itv;
            update_cell(&mut mem, &loc, stored);
        }
        Some(AliasTarget::Size(loc)) => {
            mem = narrow_size(mem, &loc, &itv);
        }
        Some(AliasTarget::Empty(loc)) => match itv.as_const() {
            Some(0) => {
                let non_empty = Interval::of_bounds(Bound::from(1), Bound::PlusInfinity);
                mem = narrow_size(mem, &loc, &non_empty)
            }
            Some(_) => mem = narrow_size(mem, &loc, &Interval::from(0)),
            None => {}
        },
        None => {}
    }
    mem
}

/// Meets the size of every block the pointer stored at loc points into with the interval.
fn narrow_size(mut mem: Memory, loc: &Rc<Location>, size: &Interval) -> Memory {
    if loc.represents_multiple_values() {
        return mem;
    }
    let container = mem.find(loc);
    if container.is_unknown || container.arrayblk.is_empty() {
        return mem;
    }
    let mut container = container.as_ref().clone();
    for info in container.arrayblk.values_mut() {
        let narrowed = info.size.meet(size);
        if narrowed.is_bottom() {
            return Memory::bottom();
        }
        info.size = narrowed;
    }
    update_cell(&mut mem, loc, container);
    mem
}

fn update_cell(mem: &mut Memory, loc: &Rc<Location>, value: AbstractValue) {
    if mem.is_stack_loc(loc) {
        mem.add_stack(loc.clone(), Rc::new(value));
    } else {
        mem.strong_update_heap(loc.clone(), Rc::new(value));
    }
}
