// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::abstract_value::{AbstractValue, RelExpr, RelExprSet};
use crate::body_visitor::BodyVisitor;
use crate::call_visitor::CallVisitor;
use crate::conditions::Condition;
use crate::interval_domain::Interval;
use crate::location::{Allocsite, Location};
use crate::memory::Memory;
use crate::models::LocalContext;
use crate::program::{
    BinOp, Constant, Exp, IfKind, Ident, Instr, NodeKind, SourceLocation, Typ, UnOp, Variable,
};
use crate::relation_domain::RelVar;
use crate::reporting::ReportKind;
use crate::semantics::{eval, eval_array, eval_locs, prune, rel_exprs, single_cell};
use crate::trace::TraceElem;
use crate::type_visitor::SymbolicDeclarer;

use log_derive::*;
use mirai_annotations::*;
use petgraph::graph::NodeIndex;
use std::fmt::{Debug, Formatter, Result};
use std::rc::Rc;

/// Holds the state for the node visitor
pub struct BlockVisitor<'block, 'analysis> {
    pub bv: &'block mut BodyVisitor<'analysis>,
}

impl<'block, 'analysis> Debug for BlockVisitor<'block, 'analysis> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        "BlockVisitor".fmt(f)
    }
}

impl<'block, 'analysis> BlockVisitor<'block, 'analysis> {
    pub fn new(body_visitor: &'block mut BodyVisitor<'analysis>) -> BlockVisitor<'block, 'analysis> {
        BlockVisitor { bv: body_visitor }
    }

    /// Calls a specialized visitor for each kind of instruction. When checking for errors,
    /// the instruction is first checked in the state before it.
    #[logfn_inputs(TRACE)]
    pub fn visit_instr(&mut self, mem: Memory, node: NodeIndex, index: usize, instr: &Instr) -> Memory {
        self.bv.current_location = instr.location().clone();
        if self.bv.check_for_errors {
            self.check_instr(&mem, node, index, instr);
        }
        if mem.is_bottom() {
            return mem;
        }
        match instr {
            Instr::Load { id, exp, .. } => match id {
                Some(id) => self.visit_load(*id, exp, mem),
                None => mem,
            },
            Instr::Store { lhs, rhs, loc, .. } => self.visit_store(lhs, rhs, loc, mem),
            Instr::Prune {
                cond,
                true_branch,
                kind,
                loc,
            } => self.visit_prune(cond, *true_branch, *kind, loc, mem),
            Instr::Call {
                ret,
                callee,
                args,
                loc,
            } => self.visit_call(ret.0, callee, args, loc, node, index, mem),
            Instr::DeclareLocals { locals, loc } => self.visit_declare_locals(locals, loc, mem),
            Instr::RemoveTemps { ids, .. } => {
                let mut mem = mem;
                mem.remove_temps(ids);
                mem
            }
            Instr::Abstract { .. } | Instr::Nullify { .. } | Instr::Skip { .. } => mem,
        }
    }

    /// Reads the memory the expression denotes into the temporary.
    #[logfn_inputs(TRACE)]
    fn visit_load(&mut self, id: Ident, exp: &Exp, mut mem: Memory) -> Memory {
        let locs = eval_locs(exp, &mem);
        let mut value = if locs.is_empty() {
            debug!("load from nowhere: {}", exp);
            AbstractValue::top()
        } else {
            mem.find_heap_set(&locs).as_ref().clone()
        };
        if let Some(loc) = single_cell(&locs) {
            value.sym.insert(RelExpr {
                var: RelVar::Value(loc.clone()),
                offset: 0,
            });
            mem.add_stack(Location::temp(id), Rc::new(value));
            mem.load_alias(id, loc);
        } else {
            mem.add_stack(Location::temp(id), Rc::new(value));
        }
        mem
    }

    /// Writes the value of rhs to the memory lhs denotes, keeping the relation and the alias
    /// table in step with the write.
    #[logfn_inputs(TRACE)]
    fn visit_store(&mut self, lhs: &Exp, rhs: &Exp, loc: &SourceLocation, mut mem: Memory) -> Memory {
        let locs = eval_locs(lhs, &mem);
        if locs.is_empty() {
            debug!("store to nowhere: {}", lhs);
            return mem;
        }
        let mut value = eval(rhs, &mem).add_trace_elem(TraceElem::Assign { loc: loc.clone() });
        let rhs_syms = rel_exprs(rhs, &value, &mem);
        match single_cell(&locs) {
            Some(target) => {
                let target_var = RelVar::Value(target.clone());
                // x = x + c keeps what is known about x, shifted by c
                let increment = rhs_syms
                    .iter()
                    .find(|e| e.var == target_var)
                    .map(|e| e.offset);
                match increment {
                    Some(c) => mem.relation.shift(&target_var, c),
                    None => {
                        mem.relation.forget(&target_var);
                        for e in rhs_syms.iter() {
                            mem.relation.add_eq(&target_var, &e.var, e.offset);
                        }
                    }
                }
                mem.forget_sym_of(&target_var);
                mem.invalidate_aliases_of(target);
                let mut sym = RelExprSet::new();
                sym.insert(RelExpr {
                    var: target_var,
                    offset: 0,
                });
                value.sym = sym;
            }
            None => {
                for l in locs.iter() {
                    let var = RelVar::Value(l.clone());
                    mem.relation.forget(&var);
                    mem.forget_sym_of(&var);
                    mem.invalidate_aliases_of(l);
                }
                value.sym = RelExprSet::new();
            }
        }
        mem.update_mem(&locs, Rc::new(value));
        if let Exp::Var(id) = rhs {
            if matches!(lhs, Exp::Lvar(Variable::Return)) {
                let target = mem.find_alias(*id).cloned();
                mem.store_ret_alias(target);
            } else if let Some(target) = single_cell(&locs) {
                // the temporary now holds what the target holds
                mem.load_alias(*id, target);
            }
        }
        mem
    }

    /// Narrows the state to the executions in which the condition holds. A condition that
    /// cannot hold on a reachable path is reported.
    #[logfn_inputs(TRACE)]
    /// A prune that leaves nothing reachable is a branch that is never taken. The false edge
    /// of a branch assumes the negated condition, so its death means the condition always
    /// holds.
    fn visit_prune(
        &mut self,
        cond: &Exp,
        true_branch: bool,
        kind: IfKind,
        loc: &SourceLocation,
        mem: Memory,
    ) -> Memory {
        let pruned = prune(cond, mem);
        if self.bv.check_for_errors
            && pruned.is_bottom()
            && matches!(kind, IfKind::If | IfKind::Loop)
        {
            let (report_kind, message) = if true_branch {
                (
                    ReportKind::ConditionAlwaysFalse,
                    format!("The condition `{}` is always false", cond),
                )
            } else {
                let holds = match cond {
                    Exp::UnOp(UnOp::LNot, operand) => operand.to_string(),
                    _ => format!("!{}", cond),
                };
                (
                    ReportKind::ConditionAlwaysTrue,
                    format!("The condition `{}` is always true", holds),
                )
            };
            self.bv.reporting.report(report_kind, loc, message, vec![]);
        }
        pruned
    }

    #[allow(clippy::too_many_arguments)]
    fn visit_call(
        &mut self,
        ret: Ident,
        callee: &Exp,
        args: &[(Exp, Typ)],
        loc: &SourceLocation,
        node: NodeIndex,
        index: usize,
        mem: Memory,
    ) -> Memory {
        match callee {
            Exp::Const(Constant::Fn(name)) => {
                let mut call_visitor = CallVisitor {
                    block_visitor: self,
                    callee: name.clone(),
                    args,
                    ret,
                    loc,
                    node: node.index(),
                    instr: index,
                };
                call_visitor.visit_call(mem)
            }
            _ => {
                debug!("indirect call through {} at {} is not modeled", callee, loc);
                mem
            }
        }
    }

    /// Gives local arrays their blocks and modeled local structs their initial values, then
    /// gives the formal parameters their symbolic values.
    #[logfn_inputs(TRACE)]
    fn visit_declare_locals(
        &mut self,
        locals: &[(Rc<str>, Typ)],
        loc: &SourceLocation,
        mut mem: Memory,
    ) -> Memory {
        let proc = self.bv.procedure.name.clone();
        for (name, typ) in locals.iter() {
            let location = Location::var(Variable::Local(name.clone()));
            self.declare_local(&proc, name, &location, typ, 0, loc, &mut mem);
        }
        let mut declarer = SymbolicDeclarer::new(
            &proc,
            &self.bv.program.tenv,
            self.bv.models,
            self.bv.options.max_declaration_depth,
            loc,
        );
        declarer.declare_formals(&self.bv.procedure.formals, &mut mem);
        trace!("{} symbols declared for {}", declarer.symbol_count(), proc);
        mem
    }

    /// Declares what a local variable (or part of one) of the given type holds before the
    /// body assigns it. Scalars are left alone.
    #[allow(clippy::too_many_arguments)]
    fn declare_local(
        &mut self,
        proc: &Rc<str>,
        var: &Rc<str>,
        location: &Rc<Location>,
        typ: &Typ,
        dimension: usize,
        loc: &SourceLocation,
        mem: &mut Memory,
    ) {
        match typ {
            Typ::Array { element, length } => {
                let block = Location::allocsite(Allocsite::Local {
                    proc: proc.clone(),
                    var: var.clone(),
                    dimension,
                });
                let size = match length {
                    Some(n) => Interval::from(*n),
                    None => Interval::nat(),
                };
                let value = Rc::new(
                    AbstractValue::of_array(block.clone(), Interval::from(0), size)
                        .add_trace_elem(TraceElem::ArrayDeclaration { loc: loc.clone() }),
                );
                if location.is_local_variable() {
                    mem.add_stack(location.clone(), value);
                } else {
                    mem.add_heap(location.clone(), value);
                }
                if matches!(element.as_ref(), Typ::Array { .. }) {
                    let elements = Location::index(&block);
                    self.declare_local(proc, var, &elements, element, dimension + 1, loc, mem);
                }
            }
            Typ::Struct(name) => {
                let model = self
                    .bv
                    .models
                    .type_model(name)
                    .and_then(|model| model.declare_local);
                if let Some(declare_local) = model {
                    let ctx = LocalContext {
                        proc,
                        var,
                        location: location.clone(),
                        loc,
                    };
                    declare_local(&ctx, mem);
                    return;
                }
                if dimension > self.bv.options.max_declaration_depth {
                    return;
                }
                let tenv = &self.bv.program.tenv;
                let fields = match tenv.lookup(name) {
                    Some(def) => def.fields.clone(),
                    None => {
                        debug!("no definition or model for local struct {}", name);
                        return;
                    }
                };
                for (field, field_typ) in fields.iter() {
                    let field_var: Rc<str> = Rc::from(format!("{}.{}", var, field));
                    let field_location = Location::field(location, field);
                    self.declare_local(
                        proc,
                        &field_var,
                        &field_location,
                        field_typ,
                        dimension + 1,
                        loc,
                        mem,
                    );
                }
            }
            _ => {}
        }
    }

    /// Collects the conditions of the instruction and reports it if it cannot be reached.
    fn check_instr(&mut self, mem: &Memory, node: NodeIndex, index: usize, instr: &Instr) {
        precondition!(self.bv.check_for_errors);
        let is_effectful = matches!(
            instr,
            Instr::Load { .. } | Instr::Store { .. } | Instr::Call { .. }
        );
        if mem.is_bottom() {
            if is_effectful && !self.is_trailing_exit_call(node, index, instr) {
                self.bv.reporting.report(
                    ReportKind::UnreachableCode,
                    instr.location(),
                    "This instruction is never executed".to_string(),
                    vec![],
                );
            }
            return;
        }
        match instr {
            Instr::Load { exp, .. } => self.collect_conditions(exp, mem),
            Instr::Store { lhs, rhs, .. } => {
                self.collect_conditions(lhs, mem);
                self.collect_conditions(rhs, mem);
            }
            Instr::Prune { cond, .. } => self.collect_conditions(cond, mem),
            Instr::Call { args, .. } => {
                for (arg, _) in args.iter() {
                    self.collect_conditions(arg, mem);
                }
            }
            _ => {}
        }
    }

    /// A call that ends the program is expected where a branch gives up. It is the last
    /// thing its node does and control would otherwise continue at a join or at the exit.
    fn is_trailing_exit_call(&self, node: NodeIndex, index: usize, instr: &Instr) -> bool {
        let name = match instr {
            Instr::Call {
                callee: Exp::Const(Constant::Fn(name)),
                ..
            } => name,
            _ => return false,
        };
        if !self.bv.models.is_no_return(name) {
            return false;
        }
        let cfg = self.bv.cfg;
        let is_last = cfg.node(node).instrs[index + 1..].iter().all(|i| {
            !matches!(
                i,
                Instr::Load { .. } | Instr::Store { .. } | Instr::Call { .. }
            )
        });
        let successors: Vec<NodeIndex> = cfg.successors(node).collect();
        match successors.as_slice() {
            [succ] => {
                is_last
                    && (*succ == cfg.exit
                        || (cfg.node(*succ).kind == NodeKind::Join
                            && cfg.predecessors(*succ).count() >= 2))
            }
            _ => false,
        }
    }

    /// Adds a condition for every array access and every piece of pointer arithmetic in the
    /// expression.
    fn collect_conditions(&mut self, exp: &Exp, mem: &Memory) {
        match exp {
            Exp::Index(array, index) => {
                self.collect_conditions(array, mem);
                self.collect_conditions(index, mem);
                let array_value = eval_array(array, mem);
                let index_value = eval(index, mem);
                let index_sym = rel_exprs(index, &index_value, mem);
                self.add_condition(&array_value, &index_value, index_sym, mem, true, false);
            }
            Exp::BinOp(op @ (BinOp::PlusPI | BinOp::MinusPI), left, right) => {
                self.collect_conditions(left, mem);
                self.collect_conditions(right, mem);
                let pointer = eval(left, mem);
                let offset = eval(right, mem);
                let offset_sym = rel_exprs(right, &offset, mem);
                self.add_condition(
                    &pointer,
                    &offset,
                    offset_sym,
                    mem,
                    *op == BinOp::PlusPI,
                    true,
                );
            }
            Exp::BinOp(_, left, right) => {
                self.collect_conditions(left, mem);
                self.collect_conditions(right, mem);
            }
            Exp::UnOp(_, operand) | Exp::Cast(_, operand) | Exp::Field(operand, _) => {
                self.collect_conditions(operand, mem)
            }
            Exp::Var(..) | Exp::Lvar(..) | Exp::Const(..) => {}
        }
    }

    fn add_condition(
        &mut self,
        array: &AbstractValue,
        index: &AbstractValue,
        index_sym: RelExprSet,
        mem: &Memory,
        is_plus: bool,
        last_included: bool,
    ) {
        if let Some(condition) = Condition::new(
            array,
            index,
            index_sym,
            &mem.relation,
            is_plus,
            last_included,
            &self.bv.current_location,
            &self.bv.procedure.name,
        ) {
            self.bv.conditions.add(condition);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelRegistry;
    use crate::options::Options;
    use crate::program::{Procedure, ProcedureBuilder, Program};
    use crate::summaries::InMemorySummaryStore;

    fn empty_procedure() -> Procedure {
        let mut builder = ProcedureBuilder::new("f");
        let (start, exit) = (builder.start(), builder.exit());
        builder.chain(&[start, exit]);
        builder.build()
    }

    /// Runs the instructions one after the other from the given state, as a single node would.
    fn run(mem: Memory, instrs: &[Instr]) -> Memory {
        let program = Program::default();
        let options = Options::default();
        let store = InMemorySummaryStore::default();
        let procedure = empty_procedure();
        let cfg = match &procedure.cfg {
            Some(cfg) => cfg,
            None => unreachable!(),
        };
        let mut body_visitor = BodyVisitor::new(
            &program,
            &options,
            &store,
            ModelRegistry::builtin(),
            &procedure,
            cfg,
        );
        let mut visitor = BlockVisitor::new(&mut body_visitor);
        instrs.iter().enumerate().fold(mem, |mem, (index, instr)| {
            visitor.visit_instr(mem, cfg.start, index, instr)
        })
    }

    fn declare(locals: Vec<(&str, Typ)>) -> Instr {
        Instr::DeclareLocals {
            locals: locals
                .into_iter()
                .map(|(n, t)| (Rc::<str>::from(n), t))
                .collect(),
            loc: SourceLocation::line(1),
        }
    }

    #[test]
    fn a_load_after_a_store_to_a_variable_sees_exactly_the_stored_value() {
        let mem = run(
            Memory::new(),
            &[
                declare(vec![("x", Typ::int())]),
                Instr::store(Exp::lvar("x"), Exp::int(3), 2),
                Instr::store(Exp::lvar("x"), Exp::int(7), 3),
                Instr::load(1, Exp::lvar("x"), 4),
            ],
        );
        assert_eq!(mem.find(&Location::temp(Ident(1))).itv, Interval::from(7));
    }

    #[test]
    fn stores_to_array_elements_accumulate() {
        let mem = run(
            Memory::new(),
            &[
                declare(vec![("a", Typ::array(Typ::int(), Some(4)))]),
                Instr::store(Exp::index(Exp::lvar("a"), Exp::int(0)), Exp::int(1), 2),
                Instr::store(Exp::index(Exp::lvar("a"), Exp::int(1)), Exp::int(9), 3),
                Instr::load(1, Exp::index(Exp::lvar("a"), Exp::int(2)), 4),
            ],
        );
        assert_eq!(
            mem.find(&Location::temp(Ident(1))).itv,
            Interval::range(1, 9)
        );
    }

    #[test]
    fn every_instruction_keeps_unreachable_states_unreachable() {
        let loc = SourceLocation::line(2);
        let instrs = vec![
            declare(vec![("a", Typ::array(Typ::int(), Some(4)))]),
            Instr::load(1, Exp::lvar("x"), 2),
            Instr::store(Exp::lvar("x"), Exp::int(1), 2),
            Instr::Prune {
                cond: Exp::binop(BinOp::Lt, Exp::var(1), Exp::int(3)),
                true_branch: true,
                kind: IfKind::If,
                loc: loc.clone(),
            },
            Instr::call(2, "malloc", vec![(Exp::int(4), Typ::int())], 2),
            Instr::call(3, "g", vec![(Exp::lvar("x"), Typ::ptr(Typ::int()))], 2),
            Instr::RemoveTemps {
                ids: vec![Ident(1)],
                loc: loc.clone(),
            },
            Instr::Abstract { loc: loc.clone() },
            Instr::Nullify {
                var: Variable::local("x"),
                loc: loc.clone(),
            },
            Instr::Skip { loc },
        ];
        for instr in instrs.iter() {
            assert!(
                run(Memory::bottom(), std::slice::from_ref(instr)).is_bottom(),
                "{:?}",
                instr
            );
        }
    }

    #[test]
    fn calls_that_never_return_make_the_state_unreachable() {
        let mem = run(
            Memory::new(),
            &[Instr::call(1, "exit", vec![(Exp::int(1), Typ::int())], 2)],
        );
        assert!(mem.is_bottom());
        let mem = run(
            Memory::new(),
            &[Instr::call(1, "quit", vec![(Exp::int(1), Typ::int())], 2)],
        );
        assert!(!mem.is_bottom());
    }
}
