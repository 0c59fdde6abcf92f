// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::body_visitor::BodyVisitor;
use crate::call_graph::CallGraph;
use crate::models::ModelRegistry;
use crate::options::Options;
use crate::program::Program;
use crate::reporting::ReportSink;
use crate::summaries::{InMemorySummaryStore, PersistentSummaryStore, Summary, SummaryStore};

use log_derive::logfn;
use std::collections::HashSet;
use std::fmt::{Debug, Formatter, Result};
use std::rc::Rc;
use std::time::Instant;

/// A visitor that analyzes the procedures of a program, callees first, so that every call can
/// be resolved with the summary of its callee. Problems found in each procedure go to the sink
/// as soon as the procedure is done.
pub struct ProgramVisitor<'analysis> {
    pub program: &'analysis Program,
    pub options: &'analysis Options,
    pub summary_store: Box<dyn SummaryStore>,
    /// The call and type models, the built in ones unless the front end supplies its own.
    pub models: &'analysis ModelRegistry,
    pub sink: &'analysis mut dyn ReportSink,
    pub call_graph: CallGraph,
}

impl<'analysis> Debug for ProgramVisitor<'analysis> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        "ProgramVisitor".fmt(f)
    }
}

impl<'analysis> ProgramVisitor<'analysis> {
    /// A visitor whose summaries live as long as the run, or in the database named by the
    /// options if there is one.
    pub fn new(
        program: &'analysis Program,
        options: &'analysis Options,
        sink: &'analysis mut dyn ReportSink,
    ) -> sled::Result<ProgramVisitor<'analysis>> {
        let summary_store: Box<dyn SummaryStore> = match &options.summary_store {
            Some(dir) => Box::new(PersistentSummaryStore::new(dir)?),
            None => Box::new(InMemorySummaryStore::default()),
        };
        Ok(Self::with_store(program, options, sink, summary_store))
    }

    pub fn with_store(
        program: &'analysis Program,
        options: &'analysis Options,
        sink: &'analysis mut dyn ReportSink,
        summary_store: Box<dyn SummaryStore>,
    ) -> ProgramVisitor<'analysis> {
        ProgramVisitor {
            program,
            options,
            summary_store,
            models: ModelRegistry::builtin(),
            sink,
            call_graph: CallGraph::new(program),
        }
    }

    /// Uses the given models instead of the built in ones.
    #[must_use]
    pub fn with_models(mut self, models: &'analysis ModelRegistry) -> ProgramVisitor<'analysis> {
        self.models = models;
        self
    }

    /// Analyze the procedures of the program. Returns the number of procedures analyzed.
    #[logfn(TRACE)]
    pub fn analyze_all(&mut self) -> usize {
        let start_instant = Instant::now();
        trace!("call graph:\n{}", self.call_graph.to_dot());
        let selected = self.selected_procedures();
        let mut analyzed = 0;
        for name in self.call_graph.bottom_up_order() {
            if let Some(selected) = &selected {
                if !selected.contains(&name) {
                    debug!(
                        "skipping procedure {} as it is not selected for analysis",
                        name
                    );
                    continue;
                }
            }
            let procedure = match self.program.procedure(&name) {
                Some(procedure) => procedure,
                None => continue,
            };
            let cfg = match &procedure.cfg {
                Some(cfg) => cfg,
                None => {
                    self.declare(&name);
                    continue;
                }
            };
            info!("analyzing procedure {}", name);
            let (summary, reports) = BodyVisitor::new(
                self.program,
                self.options,
                self.summary_store.as_ref(),
                self.models,
                procedure,
                cfg,
            )
            .visit_body();
            self.summary_store.write(&name, summary);
            if self.is_checked(&name) {
                self.sink.consume(&name, reports);
            } else {
                debug!("{} reports for {} dropped", reports.len(), name);
            }
            analyzed += 1;
        }
        if let Err(err) = self.summary_store.flush() {
            warn!("unable to flush the summary store: {}", err);
        }
        info!(
            "analyzed {} procedures in {}ms",
            analyzed,
            start_instant.elapsed().as_millis()
        );
        analyzed
    }

    /// A procedure without a body gets a summary that makes its callers assume nothing about
    /// the call, unless an earlier run left a real summary for it.
    fn declare(&mut self, name: &Rc<str>) {
        let known = self
            .summary_store
            .read(name, name)
            .map_or(false, |summary| summary.has_body);
        if known {
            debug!("using the stored summary of {}", name);
            return;
        }
        if let Some(procedure) = self.program.procedure(name) {
            self.summary_store
                .write(name, Summary::for_declaration(procedure));
        }
    }

    /// Only the procedure named by the options, if any, gets its problems reported.
    fn is_checked(&self, name: &str) -> bool {
        self.options
            .single_proc
            .as_deref()
            .map_or(true, |single_proc| single_proc == name)
    }

    /// The procedure named by the options along with everything it calls, directly or not.
    /// None means everything.
    fn selected_procedures(&self) -> Option<HashSet<Rc<str>>> {
        let root: Rc<str> = Rc::from(self.options.single_proc.as_deref()?);
        let mut selected = HashSet::new();
        let mut work = vec![root];
        while let Some(name) = work.pop() {
            if selected.insert(name.clone()) {
                work.extend(self.call_graph.callees_of(&name));
            }
        }
        Some(selected)
    }
}
