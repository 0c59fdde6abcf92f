// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::memory::Memory;
use crate::program::{Cfg, Instr};

use log_derive::*;
use petgraph::algo::dominators::{self, Dominators};
use petgraph::graph::NodeIndex;
use rpds::HashTrieSet;
use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Formatter, Result};

/// The per instruction state transformer that the fixed point computation drives.
pub trait TransferFunctions {
    /// The state after executing the instruction at position `index` of `node` in `mem`.
    fn exec_instr(&mut self, mem: Memory, node: NodeIndex, index: usize, instr: &Instr) -> Memory;
}

pub struct FixedPointVisitor<'fixed, T: TransferFunctions> {
    pub transfer: &'fixed mut T,
    cfg: &'fixed Cfg,
    max_iterations: usize,
    widen_after: usize,
    already_visited: HashTrieSet<NodeIndex>,
    pub block_indices: Vec<NodeIndex>,
    loop_anchors: HashSet<NodeIndex>,
    dominators: Dominators<NodeIndex>,
    /// in_state[n] is the join (or widening) of the out_state values of the predecessors of n.
    pub in_state: HashMap<NodeIndex, Memory>,
    /// out_state[n] is the state that results from executing the instructions of n in in_state[n].
    pub out_state: HashMap<NodeIndex, Memory>,
    /// Loop anchors whose iteration was stopped before the state stabilized.
    pub cut_off_anchors: Vec<NodeIndex>,
}

impl<'fixed, T: TransferFunctions> Debug for FixedPointVisitor<'fixed, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        "FixedPoint".fmt(f)
    }
}

impl<'fixed, T: TransferFunctions> FixedPointVisitor<'fixed, T> {
    pub fn new(
        transfer: &'fixed mut T,
        cfg: &'fixed Cfg,
        max_iterations: usize,
        widen_after: usize,
    ) -> FixedPointVisitor<'fixed, T> {
        let dominators = dominators::simple_fast(&cfg.graph, cfg.start);
        let (block_indices, loop_anchors) = get_sorted_block_indices(cfg, &dominators);
        FixedPointVisitor {
            transfer,
            cfg,
            max_iterations,
            widen_after,
            already_visited: HashTrieSet::new(),
            block_indices,
            loop_anchors,
            dominators,
            in_state: HashMap::new(),
            out_state: HashMap::new(),
            cut_off_anchors: Vec::new(),
        }
    }

    /// Visits every node, computing a fixed point for every loop on the way.
    #[logfn_inputs(TRACE)]
    pub fn visit_blocks(&mut self) {
        let blocks = self.block_indices.clone();
        for node in blocks {
            if !self.already_visited.contains(&node) {
                if !self.loop_anchors.contains(&node) {
                    self.visit_basic_block(node, 0);
                } else {
                    self.compute_fixed_point(node);
                }
            }
        }
    }

    /// The state at the entry of a node, bottom if the node was never reached.
    pub fn in_state_of(&self, node: NodeIndex) -> Memory {
        self.in_state
            .get(&node)
            .cloned()
            .unwrap_or_else(Memory::bottom)
    }

    /// Visits a single node, starting with an in_state that is the join of all of the
    /// out_state values of its predecessors, and records the resulting out_state.
    /// iteration_count is zero unless the node is a loop anchor.
    #[logfn_inputs(TRACE)]
    fn visit_basic_block(&mut self, node: NodeIndex, iteration_count: usize) {
        let mut i_state = self.get_initial_state_from_predecessors(node, iteration_count);
        if iteration_count > 1 {
            if let Some(previous_state) = self.in_state.get(&node) {
                i_state = if iteration_count <= self.widen_after {
                    previous_state.join(&i_state)
                } else {
                    previous_state.widen(&i_state)
                };
            }
        }
        self.in_state.insert(node, i_state.clone());
        let mut mem = i_state;
        for (index, instr) in self.cfg.node(node).instrs.iter().enumerate() {
            mem = self.transfer.exec_instr(mem, node, index, instr);
        }
        self.out_state.insert(node, mem);
        self.already_visited.insert_mut(node);
    }

    /// Repeatedly evaluates the loop body starting at loop_anchor until widening kicked in
    /// and a fixed point has been reached.
    #[logfn_inputs(TRACE)]
    fn compute_fixed_point(&mut self, loop_anchor: NodeIndex) -> NodeIndex {
        let saved_already_visited = self.already_visited.clone();
        let mut iteration_count = 1;
        let mut changed = true;
        let mut last_block = loop_anchor;
        // Iterate until at least one iteration started from a widened state.
        while iteration_count <= self.widen_after + 1 || changed {
            self.already_visited = saved_already_visited.clone();
            let result = self.visit_loop_body(loop_anchor, iteration_count);
            changed = result.0;
            last_block = result.1;
            if iteration_count >= self.max_iterations {
                break;
            }
            iteration_count += 1;
        }
        if iteration_count >= self.max_iterations && changed {
            debug!(
                "fixed point iteration of the loop at {:?} cut off after {} iterations",
                loop_anchor, iteration_count
            );
            self.cut_off_anchors.push(loop_anchor);
        }
        last_block
    }

    /// Visits a loop body: all of the nodes dominated by the loop anchor. Returns true if
    /// some out_state computed by this visit is not below the one computed previously.
    #[logfn_inputs(TRACE)]
    fn visit_loop_body(&mut self, loop_anchor: NodeIndex, iteration_count: usize) -> (bool, NodeIndex) {
        let mut changed = false;
        let mut last_block = loop_anchor;
        let blocks = self.block_indices.clone();
        let old_state = self.out_state.clone();
        for node in blocks {
            if !self.already_visited.contains(&node) && self.is_dominated_by(node, loop_anchor) {
                last_block = node;
                // Visit the next node, or the entire nested loop anchored by it.
                if node == loop_anchor {
                    self.visit_basic_block(node, iteration_count);
                } else if self.loop_anchors.contains(&node) {
                    last_block = self.compute_fixed_point(node);
                } else {
                    self.visit_basic_block(node, 0);
                }
                if iteration_count > self.widen_after {
                    match (self.out_state.get(&last_block), old_state.get(&last_block)) {
                        (Some(new_state), Some(old_state)) if new_state.leq(old_state) => {}
                        _ => changed = true,
                    }
                }
            }
        }
        (changed, last_block)
    }

    /// Joins the out states of the predecessors that have been visited. The first time
    /// around a loop, only the states that flow into the loop count. After that, only the
    /// states that flow back from the loop body count.
    #[logfn_inputs(TRACE)]
    fn get_initial_state_from_predecessors(&self, node: NodeIndex, iteration_count: usize) -> Memory {
        let mut state = if node == self.cfg.start && iteration_count <= 1 {
            Memory::new()
        } else {
            Memory::bottom()
        };
        for pred in self.cfg.predecessors(node) {
            let is_loop_back = self.is_dominated_by(pred, node);
            if iteration_count == 1 && is_loop_back {
                continue;
            }
            if iteration_count > 1 && !is_loop_back {
                continue;
            }
            if let Some(pred_state) = self.out_state.get(&pred) {
                state = state.join(pred_state);
            }
        }
        state
    }

    fn is_dominated_by(&self, node: NodeIndex, dominator: NodeIndex) -> bool {
        is_dominated_by(&self.dominators, node, dominator)
    }
}

fn is_dominated_by(dominators: &Dominators<NodeIndex>, node: NodeIndex, dominator: NodeIndex) -> bool {
    dominators
        .dominators(node)
        .map_or(false, |mut doms| doms.any(|d| d == dominator))
}

/// Adds the predecessors of root_block (other than those reached by going around a loop)
/// and then root_block itself.
fn add_predecessors_then_root_block(
    cfg: &Cfg,
    root_block: NodeIndex,
    dominators: &Dominators<NodeIndex>,
    block_indices: &mut Vec<NodeIndex>,
    already_added: &mut HashSet<NodeIndex>,
) {
    if !already_added.insert(root_block) {
        return;
    }
    for pred in cfg.predecessors(root_block) {
        if already_added.contains(&pred) || is_dominated_by(dominators, pred, root_block) {
            continue;
        }
        add_predecessors_then_root_block(cfg, pred, dominators, block_indices, already_added);
    }
    block_indices.push(root_block);
}

/// Sorts the nodes so that they are visited after their predecessors, except for the
/// predecessors that close a loop. A loop anchor is a node that dominates one of its
/// predecessors.
#[logfn_inputs(TRACE)]
fn get_sorted_block_indices(
    cfg: &Cfg,
    dominators: &Dominators<NodeIndex>,
) -> (Vec<NodeIndex>, HashSet<NodeIndex>) {
    let mut loop_anchors = HashSet::new();
    for node in cfg.nodes() {
        if cfg
            .predecessors(node)
            .any(|pred| is_dominated_by(dominators, pred, node))
        {
            loop_anchors.insert(node);
        }
    }
    let mut block_indices = Vec::new();
    let mut already_added = HashSet::new();
    for node in std::iter::once(cfg.start).chain(cfg.nodes()) {
        add_predecessors_then_root_block(
            cfg,
            node,
            dominators,
            &mut block_indices,
            &mut already_added,
        );
    }
    (block_indices, loop_anchors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{LocSet, Location};
    use crate::program::{BinOp, Exp, IfKind, ProcedureBuilder, Typ};
    use crate::semantics::{eval, eval_locs, prune, single_cell};
    use std::rc::Rc;

    /// Stores and prunes, nothing else.
    struct Interpreter;

    impl TransferFunctions for Interpreter {
        fn exec_instr(&mut self, mut mem: Memory, _node: NodeIndex, _index: usize, instr: &Instr) -> Memory {
            match instr {
                Instr::Load { id: Some(id), exp, .. } => {
                    let locs = eval_locs(exp, &mem);
                    let value = mem.find_heap_set(&locs);
                    mem.add_stack(Location::temp(*id), value);
                    if let Some(loc) = single_cell(&locs) {
                        mem.load_alias(*id, loc);
                    }
                    mem
                }
                Instr::Store { lhs, rhs, .. } => {
                    let value = Rc::new(eval(rhs, &mem));
                    let locs: LocSet = eval_locs(lhs, &mem);
                    mem.update_mem(&locs, value);
                    mem
                }
                Instr::Prune { cond, .. } => prune(cond, mem),
                _ => mem,
            }
        }
    }

    #[test]
    fn loops_are_iterated_to_a_fixed_point() {
        // i = 0; while (i < 10) { i = i + 1 }
        let mut builder = ProcedureBuilder::new("f").local("i", Typ::int());
        let init = builder.node(vec![Instr::store(Exp::lvar("i"), Exp::int(0), 1)]);
        let head = builder.node(vec![Instr::load(1, Exp::lvar("i"), 2)]);
        let cond = Exp::binop(BinOp::Lt, Exp::var(1), Exp::int(10));
        let (body_entry, exit_entry) = builder.branch(head, cond, IfKind::Loop, 2);
        let body = builder.node(vec![
            Instr::load(2, Exp::lvar("i"), 3),
            Instr::store(
                Exp::lvar("i"),
                Exp::binop(BinOp::PlusA, Exp::var(2), Exp::int(1)),
                3,
            ),
        ]);
        let start = builder.start();
        let exit = builder.exit();
        builder.chain(&[start, init, head]);
        builder.chain(&[body_entry, body, head]);
        builder.edge(exit_entry, exit);
        let procedure = builder.build();
        let cfg = procedure.cfg.as_ref().unwrap();

        let mut interpreter = Interpreter;
        let mut visitor = FixedPointVisitor::new(&mut interpreter, cfg, 10, 2);
        visitor.visit_blocks();
        assert!(visitor.cut_off_anchors.is_empty());
        let at_exit = &visitor.out_state[&cfg.exit];
        let i = at_exit.find(&Location::local("i"));
        assert_eq!(i.itv.lower().and_then(|b| b.as_const()), Some(10));
    }

    #[test]
    fn unreached_nodes_are_bottom() {
        let mut builder = ProcedureBuilder::new("f");
        let orphan = builder.node(vec![]);
        let start = builder.start();
        let exit = builder.exit();
        builder.edge(start, exit);
        let procedure = builder.build();
        let cfg = procedure.cfg.as_ref().unwrap();
        let mut interpreter = Interpreter;
        let mut visitor = FixedPointVisitor::new(&mut interpreter, cfg, 10, 2);
        visitor.visit_blocks();
        assert!(visitor.in_state_of(orphan).is_bottom());
        assert!(!visitor.in_state_of(exit).is_bottom());
    }
}
