// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::program::Program;

use petgraph::algo::kosaraju_scc;
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DefaultIx, NodeIndex};
use petgraph::Graph;
use std::collections::HashMap;
use std::rc::Rc;

type NodeIdx = NodeIndex<DefaultIx>;

/// The static calls between the procedures of a program. Edges go from caller to callee.
/// Callees that the program does not define still get nodes, so that the graph shows
/// everything a procedure depends on.
#[derive(Debug, Default)]
pub struct CallGraph {
    graph: Graph<Rc<str>, ()>,
    nodes: HashMap<Rc<str>, NodeIdx>,
}

impl CallGraph {
    pub fn new(program: &Program) -> CallGraph {
        let mut call_graph = CallGraph::default();
        for (name, procedure) in program.procedures.iter() {
            let caller = call_graph.add_node(name);
            for callee in procedure.callees() {
                let callee = call_graph.add_node(&callee);
                if call_graph.graph.find_edge(caller, callee).is_none() {
                    call_graph.graph.add_edge(caller, callee, ());
                }
            }
        }
        call_graph
    }

    fn add_node(&mut self, name: &Rc<str>) -> NodeIdx {
        if let Some(node) = self.nodes.get(name) {
            return *node;
        }
        let node = self.graph.add_node(name.clone());
        self.nodes.insert(name.clone(), node);
        node
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// The names of the procedures called by the named one.
    pub fn callees_of(&self, name: &str) -> Vec<Rc<str>> {
        match self.nodes.get(name) {
            Some(node) => {
                let mut callees: Vec<Rc<str>> = self
                    .graph
                    .neighbors(*node)
                    .map(|n| self.graph[n].clone())
                    .collect();
                callees.sort();
                callees
            }
            None => vec![],
        }
    }

    /// All procedure names, callees before their callers. Procedures that call each other
    /// (directly or not) come out next to each other, in name order. Their summaries cannot
    /// all be available when the first of them is analyzed.
    pub fn bottom_up_order(&self) -> Vec<Rc<str>> {
        let mut result = Vec::with_capacity(self.graph.node_count());
        // kosaraju_scc lists the components in reverse topological order
        for mut component in kosaraju_scc(&self.graph) {
            component.sort_by(|n1, n2| self.graph[*n1].cmp(&self.graph[*n2]));
            if component.len() > 1 {
                debug!(
                    "mutually recursive: {:?}",
                    component.iter().map(|n| &self.graph[*n]).collect::<Vec<_>>()
                );
            }
            result.extend(component.into_iter().map(|n| self.graph[n].clone()));
        }
        result
    }

    /// The graph in graphviz format.
    pub fn to_dot(&self) -> String {
        format!(
            "{:?}",
            Dot::with_config(&self.graph, &[Config::EdgeNoLabel])
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Exp, Instr, ProcedureBuilder, Typ};

    fn calling(name: &str, callees: &[&str]) -> crate::program::Procedure {
        let mut builder = ProcedureBuilder::new(name);
        let start = builder.start();
        let exit = builder.exit();
        let instrs = callees
            .iter()
            .enumerate()
            .map(|(i, callee)| Instr::call(i as u32, callee, vec![(Exp::int(0), Typ::int())], 1))
            .collect();
        let body = builder.node(instrs);
        builder.chain(&[start, body, exit]);
        builder.build()
    }

    fn position(order: &[Rc<str>], name: &str) -> usize {
        order
            .iter()
            .position(|n| n.as_ref() == name)
            .unwrap_or(usize::MAX)
    }

    #[test]
    fn callees_come_before_callers() {
        let mut program = Program::default();
        program.add_procedure(calling("main", &["a", "b"]));
        program.add_procedure(calling("a", &["b", "malloc"]));
        program.add_procedure(calling("b", &[]));
        let call_graph = CallGraph::new(&program);
        assert_eq!(call_graph.len(), 4);
        let order = call_graph.bottom_up_order();
        assert!(position(&order, "b") < position(&order, "a"));
        assert!(position(&order, "a") < position(&order, "main"));
        assert!(position(&order, "malloc") < position(&order, "a"));
    }

    #[test]
    fn recursive_procedures_are_grouped() {
        let mut program = Program::default();
        program.add_procedure(calling("main", &["even"]));
        program.add_procedure(calling("even", &["odd"]));
        program.add_procedure(calling("odd", &["even"]));
        let call_graph = CallGraph::new(&program);
        let order = call_graph.bottom_up_order();
        assert_eq!(position(&order, "even") + 1, position(&order, "odd"));
        assert_eq!(position(&order, "main"), 2);
        assert_eq!(call_graph.callees_of("main").len(), 1);
        assert!(call_graph.to_dot().contains("even"));
    }
}
