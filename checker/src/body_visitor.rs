// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::block_visitor::BlockVisitor;
use crate::conditions::ConditionSet;
use crate::fixed_point_visitor::{FixedPointVisitor, TransferFunctions};
use crate::memory::Memory;
use crate::models::ModelRegistry;
use crate::options::{DiagLevel, Options};
use crate::program::{Cfg, Instr, NodeKind, Procedure, Program, SourceLocation};
use crate::reporting::{Report, ReportKind, ReportingContext};
use crate::summaries::{self, Summary, SummaryStore};

use log_derive::*;
use mirai_annotations::*;
use petgraph::graph::NodeIndex;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result};
use std::time::Instant;

/// Holds the state for the procedure body visitor.
pub struct BodyVisitor<'analysis> {
    pub program: &'analysis Program,
    pub options: &'analysis Options,
    pub summaries: &'analysis dyn SummaryStore,
    pub models: &'analysis ModelRegistry,
    pub procedure: &'analysis Procedure,
    pub cfg: &'analysis Cfg,

    pub check_for_errors: bool,
    /// The array accesses found while checking, safe or not yet known to be safe.
    pub conditions: ConditionSet,
    pub current_location: SourceLocation,
    pub reporting: ReportingContext,
    pub start_instant: Instant,
}

impl<'analysis> Debug for BodyVisitor<'analysis> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        "BodyVisitor".fmt(f)
    }
}

impl<'analysis> TransferFunctions for BodyVisitor<'analysis> {
    fn exec_instr(&mut self, mem: Memory, node: NodeIndex, index: usize, instr: &Instr) -> Memory {
        BlockVisitor::new(self).visit_instr(mem, node, index, instr)
    }
}

impl<'analysis> BodyVisitor<'analysis> {
    pub fn new(
        program: &'analysis Program,
        options: &'analysis Options,
        summaries: &'analysis dyn SummaryStore,
        models: &'analysis ModelRegistry,
        procedure: &'analysis Procedure,
        cfg: &'analysis Cfg,
    ) -> BodyVisitor<'analysis> {
        BodyVisitor {
            program,
            options,
            summaries,
            models,
            procedure,
            cfg,
            check_for_errors: false,
            conditions: ConditionSet::default(),
            current_location: procedure.loc.clone(),
            reporting: ReportingContext::new(procedure.name.clone(), options.diag_level),
            start_instant: Instant::now(),
        }
    }

    /// Analyzes the body until every node has a stable state, then goes over it once more to
    /// check the array accesses in those states. Returns the summary of the procedure and the
    /// problems found in it.
    pub fn visit_body(mut self) -> (Summary, Vec<Report>) {
        self.verify_cfg();
        let cfg = self.cfg;
        let max_iterations = self.options.max_fixpoint_iterations;
        let widen_after = self.options.widen_after;
        let mut fixed_point_visitor =
            FixedPointVisitor::new(&mut self, cfg, max_iterations, widen_after);
        fixed_point_visitor.visit_blocks();
        let block_indices = fixed_point_visitor.block_indices.clone();
        let in_states: HashMap<NodeIndex, Memory> = block_indices
            .iter()
            .map(|node| (*node, fixed_point_visitor.in_state_of(*node)))
            .collect();
        let cut_off_anchors = std::mem::take(&mut fixed_point_visitor.cut_off_anchors);
        let out_state = std::mem::take(&mut fixed_point_visitor.out_state);

        for anchor in cut_off_anchors {
            self.report_iteration_limit(anchor);
        }

        // Now traverse the nodes again, doing checks and emitting diagnostics.
        // in_states[n] is now complete for every node n in the body.
        self.check_for_errors(&block_indices, &in_states);
        let pending = self.conditions.check_all(&mut self.reporting);
        debug!(
            "{} conditions left to callers of {}",
            pending.len(),
            self.procedure.name
        );
        let summary = summaries::summarize(
            self.procedure,
            out_state.get(&cfg.start),
            out_state.get(&cfg.exit),
            pending,
        );
        info!(
            "analyzed {} in {}ms",
            self.procedure.name,
            self.start_instant.elapsed().as_millis()
        );
        (summary, self.reporting.finish())
    }

    /// Prune nodes assume exactly one condition. Anything else is a malformed graph.
    fn verify_cfg(&self) {
        for node in self.cfg.nodes() {
            let n = self.cfg.node(node);
            if n.kind == NodeKind::Prune {
                checked_assume!(
                    n.instrs.len() == 1 && matches!(n.instrs[0], Instr::Prune { .. })
                );
            }
        }
    }

    fn report_iteration_limit(&mut self, anchor: NodeIndex) {
        let location = self
            .cfg
            .node(anchor)
            .instrs
            .first()
            .map(|instr| instr.location().clone())
            .unwrap_or_else(|| self.procedure.loc.clone());
        if self.options.diag_level == DiagLevel::Paranoid {
            self.reporting.report(
                ReportKind::IterationLimit,
                &location,
                format!(
                    "Fixed point loop iterations exceeded limit of {}",
                    self.options.max_fixpoint_iterations
                ),
                vec![],
            );
        } else {
            warn!(
                "fixed point iteration for the loop at {} in {} stopped before stabilizing",
                location, self.procedure.name
            );
        }
    }

    /// Executes every node once more, in the state that reached it, collecting the conditions
    /// its array accesses impose and reporting what cannot be executed.
    #[logfn_inputs(TRACE)]
    fn check_for_errors(&mut self, block_indices: &[NodeIndex], in_states: &HashMap<NodeIndex, Memory>) {
        self.check_for_errors = true;
        for node in block_indices.iter() {
            let mut mem = in_states.get(node).cloned().unwrap_or_else(Memory::bottom);
            let cfg = self.cfg;
            for (index, instr) in cfg.node(*node).instrs.iter().enumerate() {
                mem = self.exec_instr(mem, *node, index, instr);
            }
        }
        self.check_for_errors = false;
    }
}
