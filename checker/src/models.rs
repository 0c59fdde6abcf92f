// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Hand written semantics for library procedures and types whose code the analysis does not
//! see, or whose code it should not bother with.

use crate::abstract_value::{AbstractValue, RelExprSet};
use crate::conditions::{Condition, ConditionSet};
use crate::interval_domain::Interval;
use crate::location::{Allocsite, LocSet, Location};
use crate::memory::{AliasTarget, Memory};
use crate::program::{Exp, Ident, SourceLocation, Typ};
use crate::relation_domain::RelVar;
use crate::semantics::{eval, rel_exprs, single_cell};
use crate::symbol::{SymbolKind, SymbolPath};
use crate::trace::TraceElem;
use crate::type_visitor::SymbolicDeclarer;

use log_derive::logfn_inputs;
use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Formatter, Result};
use std::rc::Rc;

/// What a call model gets to know about the call it stands in for.
#[derive(Debug)]
pub struct CallContext<'a> {
    pub proc: &'a Rc<str>,
    pub callee: &'a Rc<str>,
    /// The node and instruction position of the call, which name the blocks it allocates.
    pub node: usize,
    pub instr: usize,
    pub ret: Ident,
    pub args: &'a [(Exp, Typ)],
    pub loc: &'a SourceLocation,
}

impl<'a> CallContext<'a> {
    fn arg(&self, i: usize) -> &Exp {
        &self.args[i].0
    }

    fn allocsite(&self) -> Rc<Location> {
        Location::allocsite(Allocsite::Known {
            proc: self.proc.clone(),
            node: self.node,
            instr: self.instr,
            dimension: 0,
        })
    }
}

/// What a type model gets to know about a local variable of its type.
#[derive(Debug)]
pub struct LocalContext<'a> {
    pub proc: &'a Rc<str>,
    pub var: &'a Rc<str>,
    pub location: Rc<Location>,
    pub loc: &'a SourceLocation,
}

pub type ExecFn = fn(&CallContext<'_>, Memory) -> Memory;
pub type CheckFn = fn(&CallContext<'_>, &Memory, &mut ConditionSet);
pub type DeclareSymbolicFn =
    fn(&mut SymbolicDeclarer<'_>, &Rc<Location>, &Rc<SymbolPath>, &mut Memory);
pub type DeclareLocalFn = fn(&LocalContext<'_>, &mut Memory);

/// The semantics of a call. A missing exec hook leaves the state alone.
#[derive(Clone, Copy)]
pub struct Model {
    /// The number of arguments the model applies to. None for any number.
    pub arity: Option<usize>,
    pub exec: Option<ExecFn>,
    pub check: Option<CheckFn>,
}

impl Debug for Model {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.debug_struct("Model")
            .field("arity", &self.arity)
            .field("exec", &self.exec.is_some())
            .field("check", &self.check.is_some())
            .finish()
    }
}

/// The semantics of values of a struct type.
#[derive(Clone, Copy)]
pub struct TypeModel {
    pub declare_symbolic: Option<DeclareSymbolicFn>,
    pub declare_local: Option<DeclareLocalFn>,
}

impl Debug for TypeModel {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.debug_struct("TypeModel")
            .field("declare_symbolic", &self.declare_symbolic.is_some())
            .field("declare_local", &self.declare_local.is_some())
            .finish()
    }
}

/// The models the analysis consults before it looks for a summary. Front ends that know more
/// library procedures start from `with_builtins` and add their own.
#[derive(Default)]
pub struct ModelRegistry {
    calls: HashMap<&'static str, Model>,
    types: HashMap<&'static str, TypeModel>,
    no_return: HashSet<&'static str>,
}

impl Debug for ModelRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        "ModelRegistry".fmt(f)
    }
}

lazy_static! {
    static ref BUILTIN_MODELS: ModelRegistry = ModelRegistry::with_builtins();
}

pub const VECTOR: &str = "std::vector";

impl ModelRegistry {
    pub fn builtin() -> &'static ModelRegistry {
        &BUILTIN_MODELS
    }

    pub fn with_builtins() -> ModelRegistry {
        let mut registry = ModelRegistry::default();
        registry.add_call("malloc", Some(1), Some(exec_alloc), None);
        registry.add_call("calloc", Some(2), Some(exec_alloc), None);
        registry.add_call("__new_array", Some(1), Some(exec_alloc), None);
        registry.add_no_return("exit", Some(1));
        registry.add_no_return("abort", Some(0));
        registry.add_call("memset", Some(3), Some(exec_memset), Some(check_memset));
        registry.add_call("std::vector::size", Some(1), Some(exec_vector_size), None);
        registry.add_call("std::vector::empty", Some(1), Some(exec_vector_empty), None);
        registry.add_call("std::vector::push_back", Some(2), Some(exec_vector_push_back), None);
        registry.add_call("std::vector::at", Some(2), Some(exec_vector_at), Some(check_vector_at));
        registry.add_type(
            VECTOR,
            TypeModel {
                declare_symbolic: Some(declare_symbolic_vector),
                declare_local: Some(declare_local_vector),
            },
        );
        registry
    }

    pub fn add_type(&mut self, name: &'static str, model: TypeModel) {
        self.types.insert(name, model);
    }

    /// Registers a procedure that ends the program. Calls to it make the state unreachable.
    pub fn add_no_return(&mut self, name: &'static str, arity: Option<usize>) {
        self.add_call(name, arity, Some(exec_no_return), None);
        self.no_return.insert(name);
    }

    pub fn add_call(
        &mut self,
        name: &'static str,
        arity: Option<usize>,
        exec: Option<ExecFn>,
        check: Option<CheckFn>,
    ) {
        self.calls.insert(name, Model { arity, exec, check });
    }

    /// The model for a call with the given arguments. Models only apply to calls with the
    /// number of arguments they expect.
    pub fn dispatch(&self, callee: &str, args: &[(Exp, Typ)]) -> Option<&Model> {
        self.calls
            .get(callee)
            .filter(|model| model.arity.map_or(true, |n| n == args.len()))
    }

    pub fn type_model(&self, name: &str) -> Option<&TypeModel> {
        self.types.get(name)
    }

    pub fn is_no_return(&self, callee: &str) -> bool {
        self.no_return.contains(callee)
    }
}

fn bind_ret(ctx: &CallContext<'_>, mem: &mut Memory, value: AbstractValue) {
    mem.add_stack(Location::temp(ctx.ret), Rc::new(value));
}

/// The locations of the objects the first argument points to.
fn receiver_locs(ctx: &CallContext<'_>, mem: &Memory) -> LocSet {
    eval(ctx.arg(0), mem).deref_locs()
}

fn single_block(value: &AbstractValue) -> Option<&Rc<Location>> {
    if value.arrayblk.len() == 1 {
        value.arrayblk.keys().next()
    } else {
        None
    }
}

/// A fresh block with as many elements as the first argument says.
#[logfn_inputs(TRACE)]
fn exec_alloc(ctx: &CallContext<'_>, mut mem: Memory) -> Memory {
    let length = eval(ctx.arg(0), &mem);
    let size = if length.is_unknown {
        Interval::nat()
    } else {
        length.itv.meet(&Interval::nat())
    };
    let block = ctx.allocsite();
    let value = AbstractValue::of_array(block.clone(), Interval::from(0), size)
        .with_traces(length.traces.clone())
        .add_trace_elem(TraceElem::ArrayDeclaration {
            loc: ctx.loc.clone(),
        });
    let size_var = RelVar::Size(block);
    // the block is reallocated whenever the call is executed again
    mem.relation.forget(&size_var);
    mem.forget_sym_of(&size_var);
    for e in rel_exprs(ctx.arg(0), &length, &mem).iter() {
        mem.relation.add_eq(&size_var, &e.var, e.offset);
    }
    bind_ret(ctx, &mut mem, value);
    mem
}

fn exec_no_return(_ctx: &CallContext<'_>, _mem: Memory) -> Memory {
    Memory::bottom()
}

/// memset(p, c, n) writes c to the first n elements of p and returns p.
fn exec_memset(ctx: &CallContext<'_>, mut mem: Memory) -> Memory {
    let pointer = eval(ctx.arg(0), &mem);
    let value = Rc::new(eval(ctx.arg(1), &mem));
    for loc in pointer.deref_locs() {
        mem.add_heap(loc, value.clone());
    }
    bind_ret(ctx, &mut mem, pointer);
    mem
}

#[logfn_inputs(TRACE)]
fn check_memset(ctx: &CallContext<'_>, mem: &Memory, conditions: &mut ConditionSet) {
    let pointer = eval(ctx.arg(0), mem);
    let length = eval(ctx.arg(2), mem);
    let length_sym = rel_exprs(ctx.arg(2), &length, mem);
    if let Some(condition) = Condition::new(
        &pointer,
        &length,
        length_sym,
        &mem.relation,
        true,
        true,
        ctx.loc,
        ctx.proc,
    ) {
        conditions.add(condition);
    }
}

fn declare_local_vector(ctx: &LocalContext<'_>, mem: &mut Memory) {
    let block = Location::allocsite(Allocsite::Local {
        proc: ctx.proc.clone(),
        var: ctx.var.clone(),
        dimension: 0,
    });
    let value = AbstractValue::of_array(block, Interval::from(0), Interval::from(0))
        .add_trace_elem(TraceElem::ArrayDeclaration {
            loc: ctx.loc.clone(),
        });
    mem.strong_update_heap(ctx.location.clone(), Rc::new(value));
}

fn declare_symbolic_vector(
    declarer: &mut SymbolicDeclarer<'_>,
    loc: &Rc<Location>,
    path: &Rc<SymbolPath>,
    mem: &mut Memory,
) {
    let block = Location::symbolic_block(path);
    let length = declarer.fresh(SymbolKind::Length, path, true);
    let value =
        AbstractValue::of_array(block, Interval::from(0), Interval::of_symbol(&length));
    let value = declarer.parameter_value(loc, value);
    mem.add_heap(loc.clone(), Rc::new(value));
}

/// Aliases the result to the size of the container, so that comparing it with an index
/// relates the index to the size.
fn exec_vector_size(ctx: &CallContext<'_>, mut mem: Memory) -> Memory {
    let locs = receiver_locs(ctx, &mem);
    let container = mem.find_heap_set(&locs);
    let size = match container.array_info() {
        Some(info) => info.size,
        None => Interval::nat(),
    };
    bind_ret(
        ctx,
        &mut mem,
        AbstractValue::from(size).with_traces(container.traces.clone()),
    );
    if let Some(loc) = single_cell(&locs) {
        mem.add_alias(ctx.ret, AliasTarget::Size(loc.clone()));
    }
    mem
}

fn exec_vector_empty(ctx: &CallContext<'_>, mut mem: Memory) -> Memory {
    let locs = receiver_locs(ctx, &mem);
    let container = mem.find_heap_set(&locs);
    let result = match container.array_info().map(|info| info.size.as_const()) {
        Some(Some(0)) => Interval::from(1),
        Some(Some(_)) => Interval::from(0),
        _ => Interval::range(0, 1),
    };
    bind_ret(ctx, &mut mem, AbstractValue::from(result));
    if let Some(loc) = single_cell(&locs) {
        mem.add_alias(ctx.ret, AliasTarget::Empty(loc.clone()));
    }
    mem
}

/// Grows the container by one element. What the relation knows about the old size is kept
/// by shifting it to the new size.
#[logfn_inputs(TRACE)]
fn exec_vector_push_back(ctx: &CallContext<'_>, mut mem: Memory) -> Memory {
    let locs = receiver_locs(ctx, &mem);
    let element = Rc::new(eval(ctx.arg(1), &mem));
    let container = mem.find_heap_set(&locs);
    if container.is_unknown || container.arrayblk.is_empty() {
        return mem;
    }
    let mut grown = container.as_ref().clone();
    for info in grown.arrayblk.values_mut() {
        info.size = info.size.add(&Interval::from(1));
    }
    grown.sym = RelExprSet::new();
    if let Some(block) = single_block(&container) {
        let size_var = RelVar::Size(block.clone());
        mem.relation.shift(&size_var, 1);
        mem.forget_sym_of(&size_var);
    }
    for block in container.arrayblk.keys() {
        mem.add_heap(Location::index(block), element.clone());
    }
    mem.update_mem(&locs, Rc::new(grown));
    mem
}

fn exec_vector_at(ctx: &CallContext<'_>, mut mem: Memory) -> Memory {
    let container = mem.find_heap_set(&receiver_locs(ctx, &mem));
    let index = eval(ctx.arg(1), &mem);
    bind_ret(ctx, &mut mem, container.plus_pi(&index));
    mem
}

#[logfn_inputs(TRACE)]
fn check_vector_at(ctx: &CallContext<'_>, mem: &Memory, conditions: &mut ConditionSet) {
    let container = mem.find_heap_set(&receiver_locs(ctx, mem));
    let index = eval(ctx.arg(1), mem);
    let index_sym = rel_exprs(ctx.arg(1), &index, mem);
    if let Some(condition) = Condition::new(
        &container,
        &index,
        index_sym,
        &mem.relation,
        true,
        false,
        ctx.loc,
        ctx.proc,
    ) {
        conditions.add(condition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::Classification;
    use crate::reporting::ReportKind;

    fn context<'a>(
        proc: &'a Rc<str>,
        callee: &'a Rc<str>,
        args: &'a [(Exp, Typ)],
        loc: &'a SourceLocation,
    ) -> CallContext<'a> {
        CallContext {
            proc,
            callee,
            node: 2,
            instr: 0,
            ret: Ident(7),
            args,
            loc,
        }
    }

    #[test]
    fn models_only_apply_to_the_expected_number_of_arguments() {
        let registry = ModelRegistry::builtin();
        let one = vec![(Exp::int(4), Typ::int())];
        assert!(registry.dispatch("malloc", &one).is_some());
        assert!(registry.dispatch("malloc", &[]).is_none());
        assert!(registry.dispatch("free", &one).is_none());
        assert!(registry.type_model(VECTOR).is_some());
    }

    #[test]
    fn allocation_binds_a_block_of_the_requested_size() {
        let proc: Rc<str> = Rc::from("f");
        let callee: Rc<str> = Rc::from("malloc");
        let args = vec![(Exp::int(8), Typ::int())];
        let loc = SourceLocation::line(4);
        let ctx = context(&proc, &callee, &args, &loc);
        let mem = exec_alloc(&ctx, Memory::new());
        let value = mem.find(&Location::temp(Ident(7)));
        let info = value.array_info().unwrap();
        assert_eq!(info.offset, Interval::from(0));
        assert_eq!(info.size, Interval::from(8));
        assert!(!value.traces.is_empty());
    }

    #[test]
    fn non_returning_calls_make_the_state_unreachable() {
        let proc: Rc<str> = Rc::from("f");
        let callee: Rc<str> = Rc::from("exit");
        let args = vec![(Exp::int(1), Typ::int())];
        let loc = SourceLocation::line(4);
        let ctx = context(&proc, &callee, &args, &loc);
        assert!(exec_no_return(&ctx, Memory::new()).is_bottom());
    }

    #[test]
    fn memset_past_the_end_is_an_overrun() {
        let proc: Rc<str> = Rc::from("f");
        let loc = SourceLocation::line(4);
        let malloc: Rc<str> = Rc::from("malloc");
        let alloc_args = vec![(Exp::int(8), Typ::int())];
        let mem = exec_alloc(&context(&proc, &malloc, &alloc_args, &loc), Memory::new());
        let memset: Rc<str> = Rc::from("memset");
        let check = |n: i128| {
            let args = vec![
                (Exp::var(7), Typ::ptr(Typ::int())),
                (Exp::int(0), Typ::int()),
                (Exp::int(n), Typ::int()),
            ];
            let mut conditions = ConditionSet::default();
            check_memset(&context(&proc, &memset, &args, &loc), &mem, &mut conditions);
            assert_eq!(conditions.len(), 1);
            let result = conditions.iter().next().unwrap().check();
            result
        };
        assert_eq!(check(8).0, Classification::AlwaysSafe);
        assert_eq!(check(9).1, Some(ReportKind::BufferOverrun));
    }

    #[test]
    fn push_back_grows_a_local_vector() {
        let proc: Rc<str> = Rc::from("f");
        let var: Rc<str> = Rc::from("v");
        let loc = SourceLocation::line(2);
        let v = Location::local("v");
        let mut mem = Memory::new();
        declare_local_vector(
            &LocalContext {
                proc: &proc,
                var: &var,
                location: v.clone(),
                loc: &loc,
            },
            &mut mem,
        );
        let push_back: Rc<str> = Rc::from("std::vector::push_back");
        let args = vec![
            (Exp::lvar("v"), Typ::ptr(Typ::structure(VECTOR))),
            (Exp::int(3), Typ::int()),
        ];
        let mem = exec_vector_push_back(&context(&proc, &push_back, &args, &loc), mem);
        let info = mem.find(&v).array_info().unwrap();
        assert_eq!(info.size, Interval::from(1));

        let at: Rc<str> = Rc::from("std::vector::at");
        let args = vec![
            (Exp::lvar("v"), Typ::ptr(Typ::structure(VECTOR))),
            (Exp::int(1), Typ::int()),
        ];
        let mut conditions = ConditionSet::default();
        check_vector_at(&context(&proc, &at, &args, &loc), &mem, &mut conditions);
        let condition = conditions.iter().next().unwrap();
        assert_eq!(condition.check().1, Some(ReportKind::BufferOverrun));
    }
}
