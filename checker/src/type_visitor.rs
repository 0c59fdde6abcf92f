// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::abstract_value::{AbstractValue, RelExpr};
use crate::interval_domain::Interval;
use crate::location::Location;
use crate::memory::Memory;
use crate::models::ModelRegistry;
use crate::program::{SourceLocation, Tenv, Typ, Variable};
use crate::relation_domain::RelVar;
use crate::symbol::{Symbol, SymbolCounter, SymbolKind, SymbolPath};
use crate::trace::TraceElem;

use log_derive::*;
use std::fmt::{Debug, Formatter, Result};
use std::rc::Rc;

/// Where a declaration happens in the unfolding of a parameter's type.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DeclContext {
    /// The number of pointer, array and object reference levels unfolded so far.
    pub depth: usize,
    /// Set for the last field of a struct, which may be a variable length array in disguise.
    pub may_last_field: bool,
}

impl DeclContext {
    fn deeper(self) -> DeclContext {
        DeclContext {
            depth: self.depth + 1,
            may_last_field: false,
        }
    }
}

/// Gives the formal parameters of a procedure symbolic values, so that the body can be
/// analyzed without knowing its callers. Symbols carry the path of the caller side quantity
/// they stand for, which is what instantiation at call sites evaluates.
pub struct SymbolicDeclarer<'a> {
    pub tenv: &'a Tenv,
    pub models: &'a ModelRegistry,
    counter: SymbolCounter,
    max_depth: usize,
    loc: SourceLocation,
    /// The struct types being unfolded, innermost last.
    visiting: Vec<Rc<str>>,
}

impl<'a> Debug for SymbolicDeclarer<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        "SymbolicDeclarer".fmt(f)
    }
}

impl<'a> SymbolicDeclarer<'a> {
    pub fn new(
        proc: &Rc<str>,
        tenv: &'a Tenv,
        models: &'a ModelRegistry,
        max_depth: usize,
        loc: &SourceLocation,
    ) -> SymbolicDeclarer<'a> {
        SymbolicDeclarer {
            tenv,
            models,
            counter: SymbolCounter::new(proc.clone()),
            max_depth,
            loc: loc.clone(),
            visiting: Vec::new(),
        }
    }

    pub fn fresh(&mut self, kind: SymbolKind, path: &Rc<SymbolPath>, unsigned: bool) -> Symbol {
        self.counter.fresh(kind, path, unsigned)
    }

    pub fn symbol_count(&self) -> usize {
        self.counter.count()
    }

    /// The value of a parameter (or part of one), with its origin recorded.
    pub fn parameter_value(&self, location: &Rc<Location>, value: AbstractValue) -> AbstractValue {
        value.add_trace_elem(TraceElem::Parameter {
            location: location.clone(),
            loc: self.loc.clone(),
        })
    }

    #[logfn_inputs(TRACE)]
    pub fn declare_formals(&mut self, formals: &[(Rc<str>, Typ)], mem: &mut Memory) {
        for (ordinal, (name, typ)) in formals.iter().enumerate() {
            let loc = Location::var(Variable::Local(name.clone()));
            let path = SymbolPath::param(ordinal, name.clone());
            self.declare(&loc, &path, typ, DeclContext::default(), mem);
        }
    }

    /// Declares the symbolic content of the location, which holds a value of the given type
    /// that the caller side path describes.
    #[logfn_inputs(TRACE)]
    pub fn declare(
        &mut self,
        loc: &Rc<Location>,
        path: &Rc<SymbolPath>,
        typ: &Typ,
        ctx: DeclContext,
        mem: &mut Memory,
    ) {
        match typ {
            Typ::Int { unsigned } => self.declare_scalar(loc, path, *unsigned, mem),
            Typ::Float => self.declare_scalar(loc, path, false, mem),
            Typ::Ptr(pointee) => self.declare_pointer(loc, path, pointee, ctx, mem),
            Typ::Array { element, length } => {
                self.declare_array(loc, path, element, *length, ctx, mem)
            }
            Typ::Struct(name) => self.declare_struct(loc, path, name, ctx, mem),
            Typ::ObjectRef(name) => self.declare_object_ref(loc, path, name, ctx, mem),
            Typ::Void | Typ::Opaque(..) => {
                debug!("no symbolic value for {} of type {:?}", loc, typ);
            }
        }
    }

    fn declare_scalar(
        &mut self,
        loc: &Rc<Location>,
        path: &Rc<SymbolPath>,
        unsigned: bool,
        mem: &mut Memory,
    ) {
        let sym = self.fresh(SymbolKind::Value, path, unsigned);
        let mut value = AbstractValue::from(Interval::of_symbol(&sym));
        if !loc.represents_multiple_values() {
            value.sym.insert(RelExpr {
                var: RelVar::Value(loc.clone()),
                offset: 0,
            });
        }
        let value = self.parameter_value(loc, value);
        mem.add_heap(loc.clone(), Rc::new(value));
    }

    fn declare_pointer(
        &mut self,
        loc: &Rc<Location>,
        path: &Rc<SymbolPath>,
        pointee: &Typ,
        ctx: DeclContext,
        mem: &mut Memory,
    ) {
        if ctx.depth >= self.max_depth {
            debug!("declaration of {} cut off at depth {}", loc, ctx.depth);
            return;
        }
        let block = Location::symbolic_block(path);
        let offset = self.fresh(SymbolKind::Offset, path, true);
        let length = self.fresh(SymbolKind::Length, path, true);
        let value = AbstractValue::of_array(
            block.clone(),
            Interval::of_symbol(&offset),
            Interval::of_symbol(&length),
        );
        let value = self.parameter_value(loc, value);
        mem.add_heap(loc.clone(), Rc::new(value));
        self.declare_behind_indirection(&block, path, pointee, ctx, mem);
    }

    fn declare_array(
        &mut self,
        loc: &Rc<Location>,
        path: &Rc<SymbolPath>,
        element: &Typ,
        length: Option<i128>,
        ctx: DeclContext,
        mem: &mut Memory,
    ) {
        if ctx.depth >= self.max_depth {
            debug!("declaration of {} cut off at depth {}", loc, ctx.depth);
            return;
        }
        let block = Location::symbolic_block(path);
        let size = match length {
            // a trailing one element array is how variable length structs get declared
            Some(n) if !(ctx.may_last_field && n <= 1) => Interval::from(n),
            _ => Interval::of_symbol(&self.fresh(SymbolKind::Length, path, true)),
        };
        let value = AbstractValue::of_array(block.clone(), Interval::from(0), size);
        let value = self.parameter_value(loc, value);
        mem.add_heap(loc.clone(), Rc::new(value));
        self.declare_behind_indirection(&block, path, element, ctx, mem);
    }

    /// Declares the elements of a block. Structs seen on the way here may be unfolded again,
    /// since the depth limit bounds the recursion from now on.
    fn declare_behind_indirection(
        &mut self,
        block: &Rc<Location>,
        path: &Rc<SymbolPath>,
        element: &Typ,
        ctx: DeclContext,
        mem: &mut Memory,
    ) {
        let outer = std::mem::take(&mut self.visiting);
        self.declare(
            &Location::index(block),
            &SymbolPath::deref(path),
            element,
            ctx.deeper(),
            mem,
        );
        self.visiting = outer;
    }

    fn declare_struct(
        &mut self,
        loc: &Rc<Location>,
        path: &Rc<SymbolPath>,
        name: &Rc<str>,
        ctx: DeclContext,
        mem: &mut Memory,
    ) {
        if let Some(declare_symbolic) = self
            .models
            .type_model(name)
            .and_then(|model| model.declare_symbolic)
        {
            declare_symbolic(self, loc, path, mem);
            return;
        }
        if self.visiting.contains(name) {
            debug!("recursive struct {} is not unfolded at {}", name, loc);
            return;
        }
        let tenv = self.tenv;
        let def = match tenv.lookup(name) {
            Some(def) => def,
            None => {
                debug!("no definition for struct {}", name);
                return;
            }
        };
        self.visiting.push(name.clone());
        let last = def.fields.len().saturating_sub(1);
        for (i, (field, typ)) in def.fields.iter().enumerate() {
            let field_ctx = DeclContext {
                depth: ctx.depth,
                may_last_field: i == last,
            };
            self.declare(
                &Location::field(loc, field),
                &SymbolPath::field(path, field),
                typ,
                field_ctx,
                mem,
            );
        }
        self.visiting.pop();
    }

    fn declare_object_ref(
        &mut self,
        loc: &Rc<Location>,
        path: &Rc<SymbolPath>,
        name: &Rc<str>,
        ctx: DeclContext,
        mem: &mut Memory,
    ) {
        if ctx.depth >= self.max_depth {
            debug!("declaration of {} cut off at depth {}", loc, ctx.depth);
            return;
        }
        // An object is reached directly through its reference, never through an element region.
        let object = Location::symbolic_block(path);
        let value = self.parameter_value(loc, AbstractValue::of_loc(object.clone()));
        mem.add_heap(loc.clone(), Rc::new(value));
        let outer = std::mem::take(&mut self.visiting);
        self.declare_struct(
            &object,
            &SymbolPath::deref(path),
            name,
            ctx.deeper(),
            mem,
        );
        self.visiting = outer;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k_limits;

    fn declare(formals: Vec<(&str, Typ)>, tenv: &Tenv, max_depth: usize) -> (Memory, usize) {
        let formals: Vec<(Rc<str>, Typ)> = formals
            .into_iter()
            .map(|(n, t)| (Rc::<str>::from(n), t))
            .collect();
        let proc: Rc<str> = Rc::from("f");
        let mut declarer = SymbolicDeclarer::new(
            &proc,
            tenv,
            ModelRegistry::builtin(),
            max_depth,
            &SourceLocation::line(1),
        );
        let mut mem = Memory::new();
        declarer.declare_formals(&formals, &mut mem);
        (mem, declarer.symbol_count())
    }

    #[test]
    fn integers_get_a_symbol_of_their_own() {
        let (mem, count) = declare(
            vec![("n", Typ::int()), ("m", Typ::uint())],
            &Tenv::default(),
            k_limits::MAX_DECLARATION_DEPTH,
        );
        assert_eq!(count, 2);
        let n = mem.find(&Location::local("n"));
        assert!(n.itv.is_symbolic());
        assert_eq!(n.sym.len(), 1);
        assert!(!n.traces.is_empty());
    }

    #[test]
    fn pointers_get_a_symbolic_block() {
        let (mem, count) = declare(
            vec![("p", Typ::ptr(Typ::int()))],
            &Tenv::default(),
            k_limits::MAX_DECLARATION_DEPTH,
        );
        // offset, length and the element
        assert_eq!(count, 3);
        let p = mem.find(&Location::local("p"));
        let info = p.array_info().unwrap();
        assert!(info.offset.is_symbolic());
        assert!(info.size.is_symbolic());
    }

    #[test]
    fn recursive_structs_are_unfolded_a_bounded_number_of_times() {
        let mut tenv = Tenv::default();
        tenv.add_struct(
            "node",
            vec![
                ("value", Typ::int()),
                ("next", Typ::ptr(Typ::structure("node"))),
            ],
        );
        let (_, shallow) = declare(vec![("n", Typ::ptr(Typ::structure("node")))], &tenv, 2);
        let (_, deep) = declare(vec![("n", Typ::ptr(Typ::structure("node")))], &tenv, 3);
        assert_eq!(shallow, 2 + 1 + 2 + 1);
        assert_eq!(deep, shallow + 3);
    }

    #[test]
    fn inline_structs_do_not_recurse_into_themselves() {
        let mut tenv = Tenv::default();
        tenv.add_struct("s", vec![("inner", Typ::structure("s"))]);
        let (_, count) = declare(vec![("x", Typ::structure("s"))], &tenv, 2);
        assert_eq!(count, 0);
    }

    #[test]
    fn trailing_tiny_arrays_get_symbolic_sizes() {
        let mut tenv = Tenv::default();
        tenv.add_struct(
            "buf",
            vec![
                ("len", Typ::int()),
                ("data", Typ::array(Typ::int(), Some(1))),
            ],
        );
        let (mem, _) = declare(vec![("b", Typ::ptr(Typ::structure("buf")))], &tenv, 3);
        let block = Location::symbolic_block(&SymbolPath::param(0, Rc::from("b")));
        let data = Location::field(&Location::index(&block), &Rc::from("data"));
        let info = mem.find(&data).array_info().unwrap();
        assert!(info.size.is_symbolic());
    }
}
