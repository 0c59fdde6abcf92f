// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! The program representation consumed by the analysis: procedures made of control flow
//! graphs whose nodes hold straight line lists of instructions over side effect free
//! expressions. Front ends lower source programs into this form.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Display, Formatter, Result};
use std::rc::Rc;

/// A position in the source text of the analyzed program.
#[derive(Serialize, Deserialize, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SourceLocation {
    pub file: Rc<str>,
    pub line: u32,
    pub column: u32,
}

impl Default for SourceLocation {
    fn default() -> SourceLocation {
        SourceLocation::line(0)
    }
}

impl SourceLocation {
    pub fn new(file: &str, line: u32, column: u32) -> SourceLocation {
        SourceLocation {
            file: Rc::from(file),
            line,
            column,
        }
    }

    /// A location that only knows its line.
    pub fn line(line: u32) -> SourceLocation {
        SourceLocation {
            file: Rc::from(""),
            line,
            column: 0,
        }
    }
}

impl Debug for SourceLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        Display::fmt(self, f)
    }
}

impl Display for SourceLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        if self.file.is_empty() {
            write!(f, "line {}", self.line)
        } else {
            write!(f, "{}:{}:{}", self.file, self.line, self.column)
        }
    }
}

/// A temporary identifier. Temporaries hold the results of loads and calls.
#[derive(Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Ident(pub u32);

impl Debug for Ident {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "n${}", self.0)
    }
}

/// A program variable. Formal parameters are locals whose names appear in the formals list.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Variable {
    Local(Rc<str>),
    /// The slot a procedure writes its result to.
    Return,
    Global(Rc<str>),
}

impl Variable {
    pub fn local(name: &str) -> Variable {
        Variable::Local(Rc::from(name))
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Variable::Local(name) | Variable::Global(name) => f.write_str(name),
            Variable::Return => f.write_str("return"),
        }
    }
}

/// The declared type of a variable, field or parameter. Symbolic declaration dispatches over
/// this closed set of cases.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Typ {
    Int { unsigned: bool },
    Float,
    Void,
    Ptr(Box<Typ>),
    /// A fixed or variable length array. `length` is the declared literal length, if any.
    Array { element: Box<Typ>, length: Option<i128> },
    /// A struct or class stored inline, described in the type environment.
    Struct(Rc<str>),
    /// A reference to a heap object of the named struct type, as found in languages where
    /// objects are only reachable through references.
    ObjectRef(Rc<str>),
    /// Anything the analysis has no model for.
    Opaque(Rc<str>),
}

impl Typ {
    pub fn int() -> Typ {
        Typ::Int { unsigned: false }
    }

    pub fn uint() -> Typ {
        Typ::Int { unsigned: true }
    }

    pub fn ptr(pointee: Typ) -> Typ {
        Typ::Ptr(Box::new(pointee))
    }

    pub fn array(element: Typ, length: Option<i128>) -> Typ {
        Typ::Array {
            element: Box::new(element),
            length,
        }
    }

    pub fn structure(name: &str) -> Typ {
        Typ::Struct(Rc::from(name))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Typ::Ptr(..) | Typ::ObjectRef(..))
    }
}

/// The fields of a struct type, in declaration order.
#[derive(Serialize, Deserialize, Clone, Debug, Default, Eq, PartialEq)]
pub struct StructDef {
    pub fields: Vec<(Rc<str>, Typ)>,
}

/// The type environment: struct definitions by name.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Tenv {
    pub structs: HashMap<Rc<str>, StructDef>,
}

impl Tenv {
    pub fn lookup(&self, name: &str) -> Option<&StructDef> {
        self.structs.get(name)
    }

    pub fn add_struct(&mut self, name: &str, fields: Vec<(&str, Typ)>) {
        let fields = fields
            .into_iter()
            .map(|(f, t)| (Rc::<str>::from(f), t))
            .collect();
        self.structs.insert(Rc::from(name), StructDef { fields });
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Constant {
    Int(i128),
    /// The name of a procedure, used as a static callee.
    Fn(Rc<str>),
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BinOp {
    /// Integer addition.
    PlusA,
    /// Integer subtraction.
    MinusA,
    Mult,
    Div,
    Mod,
    /// Pointer plus integer.
    PlusPI,
    /// Pointer minus integer.
    MinusPI,
    /// Pointer minus pointer.
    MinusPP,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    LAnd,
    LOr,
    BAnd,
    BOr,
    BXor,
    Shiftlt,
    Shiftrt,
}

impl Display for BinOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(match self {
            BinOp::PlusA | BinOp::PlusPI => "+",
            BinOp::MinusA | BinOp::MinusPI | BinOp::MinusPP => "-",
            BinOp::Mult => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::LAnd => "&&",
            BinOp::LOr => "||",
            BinOp::BAnd => "&",
            BinOp::BOr => "|",
            BinOp::BXor => "^",
            BinOp::Shiftlt => "<<",
            BinOp::Shiftrt => ">>",
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum UnOp {
    Neg,
    LNot,
    BNot,
}

/// Side effect free expressions. `Lvar`, `Field` and `Index` denote addresses; reading the
/// memory they denote needs a `Load`.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Exp {
    Var(Ident),
    Lvar(Variable),
    Const(Constant),
    Field(Box<Exp>, Rc<str>),
    Index(Box<Exp>, Box<Exp>),
    BinOp(BinOp, Box<Exp>, Box<Exp>),
    UnOp(UnOp, Box<Exp>),
    Cast(Typ, Box<Exp>),
}

impl Exp {
    pub fn int(i: i128) -> Exp {
        Exp::Const(Constant::Int(i))
    }

    pub fn var(id: u32) -> Exp {
        Exp::Var(Ident(id))
    }

    pub fn lvar(name: &str) -> Exp {
        Exp::Lvar(Variable::local(name))
    }

    pub fn ret() -> Exp {
        Exp::Lvar(Variable::Return)
    }

    pub fn func(name: &str) -> Exp {
        Exp::Const(Constant::Fn(Rc::from(name)))
    }

    pub fn index(array: Exp, index: Exp) -> Exp {
        Exp::Index(Box::new(array), Box::new(index))
    }

    pub fn field(base: Exp, field: &str) -> Exp {
        Exp::Field(Box::new(base), Rc::from(field))
    }

    pub fn binop(op: BinOp, left: Exp, right: Exp) -> Exp {
        Exp::BinOp(op, Box::new(left), Box::new(right))
    }

    pub fn not(operand: Exp) -> Exp {
        Exp::UnOp(UnOp::LNot, Box::new(operand))
    }
}

impl Display for Exp {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Exp::Var(id) => write!(f, "{:?}", id),
            Exp::Lvar(var) => write!(f, "&{}", var),
            Exp::Const(Constant::Int(i)) => write!(f, "{}", i),
            Exp::Const(Constant::Fn(name)) => f.write_str(name),
            Exp::Field(base, field) => write!(f, "{}.{}", base, field),
            Exp::Index(array, index) => write!(f, "{}[{}]", array, index),
            Exp::BinOp(op, left, right) => write!(f, "({} {} {})", left, op, right),
            Exp::UnOp(UnOp::Neg, operand) => write!(f, "-{}", operand),
            Exp::UnOp(UnOp::LNot, operand) => write!(f, "!{}", operand),
            Exp::UnOp(UnOp::BNot, operand) => write!(f, "~{}", operand),
            Exp::Cast(_, operand) => write!(f, "{}", operand),
        }
    }
}

/// The syntactic origin of a branch condition.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum IfKind {
    If,
    Loop,
    /// A condition introduced to translate a short circuit `&&` or `||`.
    LandLor,
    /// A condition introduced to translate a boolean expression used as a value.
    Bexp,
}

#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub enum Instr {
    /// Reads the memory denoted by `exp` into `id`. A missing `id` means the result is unused.
    Load {
        id: Option<Ident>,
        exp: Exp,
        typ: Typ,
        loc: SourceLocation,
    },
    /// Writes the value of `rhs` to the memory denoted by `lhs`.
    Store {
        lhs: Exp,
        typ: Typ,
        rhs: Exp,
        loc: SourceLocation,
    },
    /// Assumes `cond` holds. Branches are pairs of prune nodes with opposite conditions.
    Prune {
        cond: Exp,
        true_branch: bool,
        kind: IfKind,
        loc: SourceLocation,
    },
    Call {
        ret: (Ident, Typ),
        callee: Exp,
        args: Vec<(Exp, Typ)>,
        loc: SourceLocation,
    },
    /// Marks the start of the procedure body and lists its local variables.
    DeclareLocals {
        locals: Vec<(Rc<str>, Typ)>,
        loc: SourceLocation,
    },
    /// Ends the lifetime of some temporaries.
    RemoveTemps {
        ids: Vec<Ident>,
        loc: SourceLocation,
    },
    Abstract {
        loc: SourceLocation,
    },
    Nullify {
        var: Variable,
        loc: SourceLocation,
    },
    Skip {
        loc: SourceLocation,
    },
}

impl Instr {
    pub fn location(&self) -> &SourceLocation {
        match self {
            Instr::Load { loc, .. }
            | Instr::Store { loc, .. }
            | Instr::Prune { loc, .. }
            | Instr::Call { loc, .. }
            | Instr::DeclareLocals { loc, .. }
            | Instr::RemoveTemps { loc, .. }
            | Instr::Abstract { loc }
            | Instr::Nullify { loc, .. }
            | Instr::Skip { loc } => loc,
        }
    }

    pub fn load(id: u32, exp: Exp, line: u32) -> Instr {
        Instr::Load {
            id: Some(Ident(id)),
            exp,
            typ: Typ::int(),
            loc: SourceLocation::line(line),
        }
    }

    pub fn store(lhs: Exp, rhs: Exp, line: u32) -> Instr {
        Instr::Store {
            lhs,
            typ: Typ::int(),
            rhs,
            loc: SourceLocation::line(line),
        }
    }

    pub fn call(ret: u32, callee: &str, args: Vec<(Exp, Typ)>, line: u32) -> Instr {
        Instr::Call {
            ret: (Ident(ret), Typ::int()),
            callee: Exp::func(callee),
            args,
            loc: SourceLocation::line(line),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeKind {
    Start,
    Exit,
    Statement,
    Prune,
    Join,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub instrs: Vec<Instr>,
}

/// The control flow graph of a procedure body.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Cfg {
    pub graph: DiGraph<Node, ()>,
    pub start: NodeIndex,
    pub exit: NodeIndex,
}

impl Cfg {
    pub fn node(&self, index: NodeIndex) -> &Node {
        &self.graph[index]
    }

    pub fn successors(&self, index: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(index, Direction::Outgoing)
    }

    pub fn predecessors(&self, index: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(index, Direction::Incoming)
    }

    /// Node indices in order of creation.
    pub fn nodes(&self) -> impl Iterator<Item = NodeIndex> {
        self.graph.node_indices()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Procedure {
    pub name: Rc<str>,
    pub formals: Vec<(Rc<str>, Typ)>,
    pub ret_type: Typ,
    /// None for procedures that are only declared.
    pub cfg: Option<Cfg>,
    pub loc: SourceLocation,
}

impl Procedure {
    /// A procedure without a body.
    pub fn declaration(name: &str, formals: Vec<(&str, Typ)>, ret_type: Typ) -> Procedure {
        Procedure {
            name: Rc::from(name),
            formals: formals
                .into_iter()
                .map(|(n, t)| (Rc::<str>::from(n), t))
                .collect(),
            ret_type,
            cfg: None,
            loc: SourceLocation::default(),
        }
    }

    pub fn has_body(&self) -> bool {
        self.cfg.is_some()
    }

    /// The static callees of all call instructions in the body.
    pub fn callees(&self) -> Vec<Rc<str>> {
        let mut result = Vec::new();
        if let Some(cfg) = &self.cfg {
            for node in cfg.graph.node_weights() {
                for instr in node.instrs.iter() {
                    if let Instr::Call {
                        callee: Exp::Const(Constant::Fn(name)),
                        ..
                    } = instr
                    {
                        result.push(name.clone());
                    }
                }
            }
        }
        result
    }
}

/// A whole program: procedures by name plus the type environment.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Program {
    pub procedures: BTreeMap<Rc<str>, Procedure>,
    pub tenv: Tenv,
}

impl Program {
    pub fn add_procedure(&mut self, procedure: Procedure) {
        self.procedures.insert(procedure.name.clone(), procedure);
    }

    pub fn procedure(&self, name: &str) -> Option<&Procedure> {
        self.procedures.get(name)
    }
}

/// Builds procedure bodies node by node. The start node gets a declare-locals instruction
/// listing every local added to the builder.
#[derive(Debug)]
pub struct ProcedureBuilder {
    name: Rc<str>,
    formals: Vec<(Rc<str>, Typ)>,
    locals: Vec<(Rc<str>, Typ)>,
    ret_type: Typ,
    graph: DiGraph<Node, ()>,
    start: NodeIndex,
    exit: NodeIndex,
}

impl ProcedureBuilder {
    pub fn new(name: &str) -> ProcedureBuilder {
        let mut graph = DiGraph::new();
        let start = graph.add_node(Node {
            kind: NodeKind::Start,
            instrs: vec![],
        });
        let exit = graph.add_node(Node {
            kind: NodeKind::Exit,
            instrs: vec![],
        });
        ProcedureBuilder {
            name: Rc::from(name),
            formals: vec![],
            locals: vec![],
            ret_type: Typ::Void,
            graph,
            start,
            exit,
        }
    }

    pub fn formal(mut self, name: &str, typ: Typ) -> Self {
        self.formals.push((Rc::from(name), typ));
        self
    }

    pub fn local(mut self, name: &str, typ: Typ) -> Self {
        self.locals.push((Rc::from(name), typ));
        self
    }

    pub fn returns(mut self, typ: Typ) -> Self {
        self.ret_type = typ;
        self
    }

    pub fn start(&self) -> NodeIndex {
        self.start
    }

    pub fn exit(&self) -> NodeIndex {
        self.exit
    }

    pub fn node(&mut self, instrs: Vec<Instr>) -> NodeIndex {
        self.graph.add_node(Node {
            kind: NodeKind::Statement,
            instrs,
        })
    }

    pub fn join_node(&mut self) -> NodeIndex {
        self.graph.add_node(Node {
            kind: NodeKind::Join,
            instrs: vec![],
        })
    }

    /// A node that assumes `cond` on one edge of a branch.
    pub fn prune(&mut self, cond: Exp, true_branch: bool, kind: IfKind, line: u32) -> NodeIndex {
        self.graph.add_node(Node {
            kind: NodeKind::Prune,
            instrs: vec![Instr::Prune {
                cond,
                true_branch,
                kind,
                loc: SourceLocation::line(line),
            }],
        })
    }

    /// Adds the pair of prune nodes for `if (cond)` below `from` and returns them as
    /// (true node, false node).
    pub fn branch(
        &mut self,
        from: NodeIndex,
        cond: Exp,
        kind: IfKind,
        line: u32,
    ) -> (NodeIndex, NodeIndex) {
        let t = self.prune(cond.clone(), true, kind, line);
        let f = self.prune(Exp::not(cond), false, kind, line);
        self.edge(from, t);
        self.edge(from, f);
        (t, f)
    }

    pub fn edge(&mut self, from: NodeIndex, to: NodeIndex) {
        self.graph.add_edge(from, to, ());
    }

    /// Connects the nodes in sequence.
    pub fn chain(&mut self, nodes: &[NodeIndex]) {
        for pair in nodes.windows(2) {
            self.edge(pair[0], pair[1]);
        }
    }

    pub fn build(mut self) -> Procedure {
        let loc = SourceLocation::default();
        self.graph[self.start].instrs = vec![Instr::DeclareLocals {
            locals: self.locals.clone(),
            loc: loc.clone(),
        }];
        Procedure {
            name: self.name,
            formals: self.formals,
            ret_type: self.ret_type,
            cfg: Some(Cfg {
                graph: self.graph,
                start: self.start,
                exit: self.exit,
            }),
            loc,
        }
    }
}
