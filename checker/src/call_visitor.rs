// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::abstract_value::{AbstractValue, RelExprSet, ValueSubstitution};
use crate::block_visitor::BlockVisitor;
use crate::conditions::ConditionSet;
use crate::interval_domain::Interval;
use crate::location::{Allocsite, LocSet, Location, LocationEnum};
use crate::memory::Memory;
use crate::models::CallContext;
use crate::program::{Exp, Ident, SourceLocation, Typ, Variable};
use crate::relation_domain::RelVar;
use crate::semantics::{eval, rel_exprs, single_cell};
use crate::summaries::Summary;
use crate::symbol::{Symbol, SymbolKind, SymbolPath};
use crate::trace::{TraceElem, TraceSet};

use log_derive::*;
use std::fmt::{Debug, Display, Formatter, Result};
use std::rc::Rc;

/// The number of actual arguments at a call site does not match the number of formal
/// parameters of the callee's summary.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ArityMismatch {
    pub expected: usize,
    pub actual: usize,
}

impl Display for ArityMismatch {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(
            f,
            "expected {} arguments, found {}",
            self.expected, self.actual
        )
    }
}

impl std::error::Error for ArityMismatch {}

/// Maps the symbols and symbolic locations of a callee summary to what the caller passed at
/// a particular call site. Symbol paths are evaluated in the caller's state at the call.
pub struct Substitution<'a> {
    caller: &'a Memory,
    formals: &'a [(Rc<str>, Typ)],
    actuals: Vec<AbstractValue>,
    actual_syms: Vec<RelExprSet>,
}

impl<'a> Debug for Substitution<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str("Substitution")
    }
}

impl<'a> Substitution<'a> {
    pub fn new(
        summary: &'a Summary,
        caller: &'a Memory,
        args: &[(Exp, Typ)],
    ) -> std::result::Result<Substitution<'a>, ArityMismatch> {
        if summary.formals.len() != args.len() {
            return Err(ArityMismatch {
                expected: summary.formals.len(),
                actual: args.len(),
            });
        }
        let actuals: Vec<AbstractValue> = args.iter().map(|(exp, _)| eval(exp, caller)).collect();
        let actual_syms = args
            .iter()
            .zip(actuals.iter())
            .map(|((exp, _), value)| rel_exprs(exp, value, caller))
            .collect();
        Ok(Substitution {
            caller,
            formals: &summary.formals,
            actuals,
            actual_syms,
        })
    }

    /// The caller side value of the quantity a symbol path describes. Paths that lead nowhere
    /// in the caller could be anything.
    fn value_of_path(&self, path: &SymbolPath) -> AbstractValue {
        match path {
            SymbolPath::Param { ordinal, .. } => self
                .actuals
                .get(*ordinal)
                .cloned()
                .unwrap_or_else(AbstractValue::top),
            SymbolPath::Deref(..) | SymbolPath::Field(..) => {
                let locs = self.locs_of_path(path);
                if locs.is_empty() {
                    AbstractValue::top()
                } else {
                    self.caller.find_heap_set(&locs).as_ref().clone()
                }
            }
        }
    }

    /// The caller side locations that hold the quantity a symbol path describes. Parameters
    /// are passed by value, so they have no caller side location of their own.
    fn locs_of_path(&self, path: &SymbolPath) -> LocSet {
        match path {
            SymbolPath::Param { .. } => LocSet::new(),
            SymbolPath::Deref(inner) => self.value_of_path(inner).deref_locs(),
            SymbolPath::Field(inner, field) => self
                .locs_of_path(inner)
                .iter()
                .map(|loc| Location::field(loc, field))
                .collect(),
        }
    }

    fn formal_ordinal(&self, loc: &Location) -> Option<usize> {
        match &loc.value {
            LocationEnum::Variable(Variable::Local(name)) => {
                self.formals.iter().position(|(formal, _)| formal == name)
            }
            _ => None,
        }
    }
}

impl<'a> ValueSubstitution for Substitution<'a> {
    #[logfn_inputs(TRACE)]
    fn symbol(&self, sym: &Symbol) -> Option<Interval> {
        let value = self.value_of_path(&sym.path);
        if value.is_unknown {
            return Some(Interval::top());
        }
        let itv = match sym.kind {
            SymbolKind::Value => value.itv.clone(),
            SymbolKind::Offset => match value.array_info() {
                Some(info) => info.offset,
                // the address of a variable is the address of a one element block
                None if !value.powloc.is_empty() => Interval::from(0),
                None => Interval::top(),
            },
            SymbolKind::Length => match value.array_info() {
                Some(info) => info.size,
                None if !value.powloc.is_empty() => Interval::from(1),
                None => Interval::top(),
            },
        };
        if itv.is_bottom() {
            Some(Interval::top())
        } else {
            Some(itv)
        }
    }

    #[logfn_inputs(TRACE)]
    fn locations(&self, loc: &Rc<Location>) -> LocSet {
        let single = |loc: Rc<Location>| {
            let mut locs = LocSet::new();
            locs.insert(loc);
            locs
        };
        match &loc.value {
            LocationEnum::Allocsite(Allocsite::Symbol(path)) => {
                let value = self.value_of_path(path);
                let locs = value.pointed_locs();
                if value.is_unknown || locs.is_empty() {
                    single(Location::unknown())
                } else {
                    locs
                }
            }
            LocationEnum::Allocsite(..)
            | LocationEnum::Unknown
            | LocationEnum::Variable(Variable::Global(..)) => single(loc.clone()),
            LocationEnum::Field { base, field } => self
                .locations(base)
                .iter()
                .map(|l| Location::field(l, field))
                .collect(),
            LocationEnum::Index { base } => {
                self.locations(base).iter().map(Location::index).collect()
            }
            LocationEnum::Variable(..) | LocationEnum::Temp(..) => LocSet::new(),
        }
    }

    #[logfn_inputs(TRACE)]
    fn rel_var(&self, var: &RelVar) -> Option<RelVar> {
        match var {
            RelVar::Value(loc) => {
                if let Some(ordinal) = self.formal_ordinal(loc) {
                    return self
                        .actual_syms
                        .get(ordinal)?
                        .iter()
                        .find(|e| e.offset == 0)
                        .map(|e| e.var.clone());
                }
                let locs = self.locations(loc);
                single_cell(&locs).map(|l| RelVar::Value(l.clone()))
            }
            RelVar::Size(loc) => {
                let locs = self.locations(loc);
                if locs.len() != 1 {
                    return None;
                }
                locs.into_iter()
                    .next()
                    .filter(|l| l.is_allocsite())
                    .map(RelVar::Size)
            }
        }
    }

    fn traces(&self, sym: &Symbol) -> TraceSet {
        self.value_of_path(&sym.path).traces
    }
}

/// Computes the effect of a call with a statically known callee: a model if there is one,
/// else the instantiated summary of the callee, else an unknown result.
pub struct CallVisitor<'call, 'block, 'analysis> {
    pub block_visitor: &'call mut BlockVisitor<'block, 'analysis>,
    pub callee: Rc<str>,
    pub args: &'call [(Exp, Typ)],
    pub ret: Ident,
    pub loc: &'call SourceLocation,
    /// The position of the call, which names the blocks a model allocates.
    pub node: usize,
    pub instr: usize,
}

impl<'call, 'block, 'analysis> Debug for CallVisitor<'call, 'block, 'analysis> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str("CallVisitor")
    }
}

impl<'call, 'block, 'analysis> CallVisitor<'call, 'block, 'analysis> {
    fn context(&self) -> CallContext<'_> {
        CallContext {
            proc: &self.block_visitor.bv.procedure.name,
            callee: &self.callee,
            node: self.node,
            instr: self.instr,
            ret: self.ret,
            args: self.args,
            loc: self.loc,
        }
    }

    /// The state after the call. When checking, the conditions the call imposes on its
    /// arguments are added to the conditions of the procedure.
    #[logfn_inputs(TRACE)]
    pub fn visit_call(&mut self, mem: Memory) -> Memory {
        if mem.is_bottom() {
            return mem;
        }
        let models = self.block_visitor.bv.models;
        if let Some(model) = models.dispatch(&self.callee, self.args) {
            let model = *model;
            if self.block_visitor.bv.check_for_errors {
                if let Some(check) = model.check {
                    let mut conditions = ConditionSet::default();
                    check(&self.context(), &mem, &mut conditions);
                    self.block_visitor.bv.conditions.extend(conditions);
                }
            }
            return match model.exec {
                Some(exec) => exec(&self.context(), mem),
                None => mem,
            };
        }
        let summary = {
            let bv = &self.block_visitor.bv;
            bv.summaries.read(&bv.procedure.name, &self.callee)
        };
        match summary {
            Some(summary) => {
                if self.block_visitor.bv.check_for_errors {
                    let conditions = self.instantiate_conditions(&mem, &summary);
                    self.block_visitor.bv.conditions.extend(conditions);
                }
                self.instantiate(mem, &summary)
            }
            None => self.deal_with_missing_summary(mem),
        }
    }

    /// The callee was neither modeled nor analyzed. Its result could be anything and it may
    /// have written anything it could reach.
    fn deal_with_missing_summary(&self, mut mem: Memory) -> Memory {
        info!(
            "no model or summary for {} called from {}",
            self.callee, self.block_visitor.bv.procedure.name
        );
        let value = Rc::new(AbstractValue::unknown(TraceSet::singleton(
            TraceElem::UnknownFrom {
                callee: Some(self.callee.clone()),
                loc: self.loc.clone(),
            },
        )));
        mem.add_stack(Location::temp(self.ret), value.clone());
        mem.add_heap(Location::unknown(), value);
        mem
    }

    /// Binds the result of a call that has no effect the analysis can describe.
    fn bind_unknown_result(&self, mut mem: Memory) -> Memory {
        let value = AbstractValue::unknown(TraceSet::singleton(TraceElem::UnknownFrom {
            callee: Some(self.callee.clone()),
            loc: self.loc.clone(),
        }));
        mem.add_stack(Location::temp(self.ret), Rc::new(value));
        mem
    }

    /// Rewrites the conditions of the callee for this call site.
    #[logfn_inputs(TRACE)]
    pub fn instantiate_conditions(&self, mem: &Memory, summary: &Summary) -> ConditionSet {
        if !summary.has_body || summary.conditions.is_empty() {
            return ConditionSet::default();
        }
        match Substitution::new(summary, mem, self.args) {
            Ok(substitution) => {
                summary
                    .conditions
                    .substitute(&substitution, &mem.relation, self.loc, &self.callee)
            }
            Err(err) => {
                debug!("conditions of {} not instantiated: {}", self.callee, err);
                ConditionSet::default()
            }
        }
    }

    /// Applies the summary of the callee to the state before the call.
    #[logfn_inputs(TRACE)]
    pub fn instantiate(&self, mem: Memory, summary: &Summary) -> Memory {
        if !summary.has_body {
            debug!("{} has no body", self.callee);
            return self.bind_unknown_result(mem);
        }
        if summary.exit.is_bottom() {
            // the callee never returns
            return Memory::bottom();
        }
        let substitution = match Substitution::new(summary, &mem, self.args) {
            Ok(substitution) => substitution,
            Err(err) => {
                info!("call of {} at {} ignored: {}", self.callee, self.loc, err);
                return self.bind_unknown_result(mem);
            }
        };
        let mut result = mem.clone();

        // The result temporary is about to be rebound.
        let ret_temp = Location::temp(self.ret);
        let mut stale = LocSet::new();
        stale.insert(ret_temp.clone());
        result.forget_locs(&stale);

        // The return value.
        let callee_ret = summary.exit.find(&Location::ret());
        let ret_value = callee_ret
            .substitute(&substitution)
            .with_traces(callee_ret.traces.call(self.loc, &self.callee, &TraceSet::default()))
            .add_trace_elem(TraceElem::Return {
                loc: self.loc.clone(),
                callee: self.callee.clone(),
            });
        result.add_stack(ret_temp, Rc::new(ret_value));
        if let Some(target) = summary.exit.find_ret_alias() {
            let locs = substitution.locations(target.location());
            if let Some(loc) = single_cell(&locs) {
                result.add_alias(self.ret, target.with_location(loc.clone()));
            }
        }

        // Memory the callee allocated and handed back through the return value.
        let new_locs = summary.exit.get_new_heap_locs(&summary.entry);
        let reachable = summary
            .exit
            .get_reachable_locs_from(&callee_ret.pointed_locs());
        for loc in new_locs.intersection(&reachable) {
            if loc.is_symbolic() {
                continue;
            }
            let value = Rc::new(summary.exit.find_heap(loc).substitute(&substitution));
            result.update_mem(&substitution.locations(loc), value);
        }

        // What the callee wrote through its pointer parameters.
        let mut written = LocSet::new();
        for (name, typ) in summary.formals.iter() {
            if !matches!(typ, Typ::Ptr(..) | Typ::ObjectRef(..)) {
                continue;
            }
            for callee_loc in self.output_locations(summary, name, typ) {
                let exit_value = match summary.exit.heap.get(&callee_loc) {
                    Some(value) => value.clone(),
                    None => continue,
                };
                if summary.entry.heap.get(&callee_loc) == Some(&exit_value) {
                    continue;
                }
                let value = Rc::new(exit_value.substitute(&substitution));
                for caller_loc in substitution.locations(&callee_loc) {
                    result.relation.forget(&RelVar::Value(caller_loc.clone()));
                    result.forget_sym_of(&RelVar::Value(caller_loc.clone()));
                    result.invalidate_aliases_of(&caller_loc);
                    if result.is_stack_loc(&caller_loc) {
                        result.add_stack(caller_loc.clone(), value.clone());
                    } else {
                        result.strong_update_heap(caller_loc.clone(), value.clone());
                    }
                    written.insert(caller_loc);
                }
            }
        }
        trace!("out parameters written by {}: {:?}", self.callee, written);

        // What the callee guarantees about its inputs and outputs.
        let callee_relation = summary
            .relation()
            .substitute(&|v: &RelVar| substitution.rel_var(v));
        result.relation = result.relation.meet(&callee_relation);
        result
    }

    /// The callee side locations a pointer parameter lets the callee write: what it points to
    /// and, for pointers to structs, the fields of the struct.
    fn output_locations(&self, summary: &Summary, name: &Rc<str>, typ: &Typ) -> Vec<Rc<Location>> {
        let formal_value = summary.entry.find(&Location::var(Variable::Local(name.clone())));
        let pointee = match typ {
            Typ::Ptr(pointee) => pointee.as_ref().clone(),
            Typ::ObjectRef(name) => Typ::Struct(name.clone()),
            _ => return vec![],
        };
        let tenv = &self.block_visitor.bv.program.tenv;
        let mut result = vec![];
        for loc in formal_value.deref_locs() {
            if loc.is_unknown() {
                continue;
            }
            match &pointee {
                Typ::Struct(struct_name) => match tenv.lookup(struct_name) {
                    Some(def) => {
                        for (field, _) in def.fields.iter() {
                            result.push(Location::field(&loc, field));
                        }
                    }
                    None => result.push(loc),
                },
                _ => result.push(loc),
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Allocsite;
    use crate::program::ProcedureBuilder;

    fn summary_with_pointer_formal() -> Summary {
        let procedure = ProcedureBuilder::new("callee")
            .formal("p", Typ::ptr(Typ::int()))
            .formal("n", Typ::int())
            .build();
        Summary {
            formals: procedure.formals.clone(),
            has_body: true,
            ..Summary::default()
        }
    }

    fn caller_state() -> Memory {
        let mut mem = Memory::new();
        let block = Location::allocsite(Allocsite::Local {
            proc: Rc::from("caller"),
            var: Rc::from("a"),
            dimension: 0,
        });
        mem.add_stack(
            Location::local("a"),
            Rc::new(AbstractValue::of_array(
                block,
                Interval::from(0),
                Interval::from(5),
            )),
        );
        mem.add_stack(Location::temp(Ident(1)), Rc::new(AbstractValue::from(7)));
        mem
    }

    #[test]
    fn arity_mismatches_are_reported() {
        let summary = summary_with_pointer_formal();
        let mem = caller_state();
        let args = vec![(Exp::lvar("a"), Typ::ptr(Typ::int()))];
        let err = Substitution::new(&summary, &mem, &args).unwrap_err();
        assert_eq!(
            err,
            ArityMismatch {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn symbols_map_to_what_the_caller_passed() {
        let summary = summary_with_pointer_formal();
        let mem = caller_state();
        let args = vec![
            (Exp::lvar("a"), Typ::ptr(Typ::int())),
            (Exp::var(1), Typ::int()),
        ];
        let substitution = Substitution::new(&summary, &mem, &args).unwrap();
        let mut counter = crate::symbol::SymbolCounter::new(Rc::from("callee"));
        let p = SymbolPath::param(0, Rc::from("p"));
        let n = SymbolPath::param(1, Rc::from("n"));
        let length = counter.fresh(SymbolKind::Length, &p, true);
        let offset = counter.fresh(SymbolKind::Offset, &p, true);
        let value = counter.fresh(SymbolKind::Value, &n, false);
        assert_eq!(substitution.symbol(&length), Some(Interval::from(5)));
        assert_eq!(substitution.symbol(&offset), Some(Interval::from(0)));
        assert_eq!(substitution.symbol(&value), Some(Interval::from(7)));
        let blocks = substitution.locations(&Location::symbolic_block(&p));
        assert_eq!(blocks.len(), 1);
        assert!(blocks.iter().all(|b| b.is_allocsite()));
        assert!(substitution.locations(&Location::local("x")).is_empty());
    }
}
