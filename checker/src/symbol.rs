// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter, Result};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Describes, in terms of the formal parameters of a procedure, which caller side quantity a
/// symbol (or a symbolic allocation site) stands for. Instantiating a summary evaluates these
/// paths in the caller's state.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum SymbolPath {
    /// The value of the formal parameter with the given ordinal.
    Param { ordinal: usize, name: Rc<str> },
    /// The memory that the pointer value at the inner path points to.
    Deref(Rc<SymbolPath>),
    /// The named field of the aggregate at the inner path.
    Field(Rc<SymbolPath>, Rc<str>),
}

impl SymbolPath {
    pub fn param(ordinal: usize, name: Rc<str>) -> Rc<SymbolPath> {
        Rc::new(SymbolPath::Param { ordinal, name })
    }

    pub fn deref(path: &Rc<SymbolPath>) -> Rc<SymbolPath> {
        Rc::new(SymbolPath::Deref(path.clone()))
    }

    pub fn field(path: &Rc<SymbolPath>, field: &Rc<str>) -> Rc<SymbolPath> {
        Rc::new(SymbolPath::Field(path.clone(), field.clone()))
    }

    /// The formal parameter this path is rooted in.
    pub fn root_ordinal(&self) -> usize {
        match self {
            SymbolPath::Param { ordinal, .. } => *ordinal,
            SymbolPath::Deref(inner) | SymbolPath::Field(inner, _) => inner.root_ordinal(),
        }
    }
}

impl Display for SymbolPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            SymbolPath::Param { name, .. } => f.write_str(name),
            SymbolPath::Deref(inner) => write!(f, "*{}", inner),
            SymbolPath::Field(inner, field) => match inner.as_ref() {
                SymbolPath::Deref(pointer) => write!(f, "{}->{}", pointer, field),
                _ => write!(f, "{}.{}", inner, field),
            },
        }
    }
}

/// Which aspect of the value at a symbol path a symbol denotes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum SymbolKind {
    /// The integer value stored at the path.
    Value,
    /// The offset of the pointer stored at the path, relative to the start of its block.
    Offset,
    /// The number of elements of the block the pointer stored at the path points to.
    Length,
}

/// An opaque placeholder for an unknown integer that flows in across a call boundary.
/// Two symbols are the same symbol iff they were made by the same declaration pass of the
/// same procedure with the same counter value.
#[derive(Serialize, Deserialize, Clone)]
pub struct Symbol {
    pub proc: Rc<str>,
    pub id: usize,
    pub kind: SymbolKind,
    pub path: Rc<SymbolPath>,
    /// Set when the symbol is known to be non negative.
    pub unsigned: bool,
}

impl Debug for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "s${}@{}({})", self.id, self.proc, self)
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self.kind {
            SymbolKind::Value => write!(f, "{}", self.path),
            SymbolKind::Offset => write!(f, "offset({})", self.path),
            SymbolKind::Length => write!(f, "length({})", self.path),
        }
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Symbol) -> bool {
        self.id == other.id && self.proc == other.proc
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.proc.hash(state);
        self.id.hash(state);
    }
}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Symbol) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Symbol {
    fn cmp(&self, other: &Symbol) -> Ordering {
        self.proc
            .cmp(&other.proc)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Hands out fresh symbols during one declaration pass over the formals of a procedure.
#[derive(Debug)]
pub struct SymbolCounter {
    proc: Rc<str>,
    next: usize,
}

impl SymbolCounter {
    pub fn new(proc: Rc<str>) -> SymbolCounter {
        SymbolCounter { proc, next: 0 }
    }

    pub fn fresh(&mut self, kind: SymbolKind, path: &Rc<SymbolPath>, unsigned: bool) -> Symbol {
        let id = self.next;
        self.next += 1;
        Symbol {
            proc: self.proc.clone(),
            id,
            kind,
            path: path.clone(),
            unsigned,
        }
    }

    /// The number of symbols handed out so far.
    pub fn count(&self) -> usize {
        self.next
    }
}
