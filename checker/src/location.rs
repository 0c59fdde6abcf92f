// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.
//
use crate::program::{Ident, Variable};
use crate::symbol::SymbolPath;

use log_derive::*;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::fmt::{Debug, Display, Formatter, Result};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// A set of locations, ordered so that iteration is deterministic.
pub type LocSet = BTreeSet<Rc<Location>>;

/// During join and widen operations, locations are copied from one memory to another, causing
/// them to get rehashed. This turns out to be expensive, so the hash is cached.
#[derive(Serialize, Deserialize, Clone, Eq, Ord, PartialOrd)]
pub struct Location {
    pub value: LocationEnum,
    hash: u64,
}

impl Debug for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        self.value.fmt(f)
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match &self.value {
            LocationEnum::Variable(var) => write!(f, "{}", var),
            LocationEnum::Temp(id) => write!(f, "{:?}", id),
            LocationEnum::Allocsite(site) => write!(f, "{}", site),
            LocationEnum::Field { base, field } => write!(f, "{}.{}", base, field),
            LocationEnum::Index { base } => write!(f, "{}[*]", base),
            LocationEnum::Unknown => f.write_str("unknown"),
        }
    }
}

impl Hash for Location {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl PartialEq for Location {
    fn eq(&self, other: &Location) -> bool {
        self.hash == other.hash && self.value == other.value
    }
}

impl From<LocationEnum> for Location {
    #[logfn_inputs(TRACE)]
    fn from(value: LocationEnum) -> Self {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        Location {
            value,
            hash: hasher.finish(),
        }
    }
}

/// An abstract memory location. Equality is syntactic.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum LocationEnum {
    /// A program variable of the procedure being analyzed.
    Variable(Variable),
    /// A temporary identifier of the procedure being analyzed.
    Temp(Ident),
    /// A memory block, named by where it was allocated.
    Allocsite(Allocsite),
    /// The named field of the aggregate at base.
    Field { base: Rc<Location>, field: Rc<str> },
    /// All of the elements of the array block at base, smashed into one location.
    Index { base: Rc<Location> },
    /// Anything written by code the analysis cannot see.
    Unknown,
}

/// Names a memory block.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Allocsite {
    /// A block allocated by a particular instruction of a particular procedure.
    /// Multidimensional arrays get a block per dimension.
    Known {
        proc: Rc<str>,
        node: usize,
        instr: usize,
        dimension: usize,
    },
    /// The array (or container) declared as a local variable of a procedure.
    Local {
        proc: Rc<str>,
        var: Rc<str>,
        dimension: usize,
    },
    /// The block that the pointer at the given formal parameter path points to.
    Symbol(Rc<SymbolPath>),
}

impl Display for Allocsite {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Allocsite::Known {
                proc,
                node,
                instr,
                dimension,
            } => {
                write!(f, "alloc({}:{}:{}", proc, node, instr)?;
                if *dimension > 0 {
                    write!(f, ":{}", dimension)?;
                }
                f.write_str(")")
            }
            Allocsite::Local {
                proc,
                var,
                dimension,
            } => {
                write!(f, "{}::{}", proc, var)?;
                if *dimension > 0 {
                    write!(f, "[{}]", dimension)?;
                }
                Ok(())
            }
            Allocsite::Symbol(path) => write!(f, "{}", path),
        }
    }
}

impl Location {
    pub fn var(var: Variable) -> Rc<Location> {
        Rc::new(LocationEnum::Variable(var).into())
    }

    pub fn local(name: &str) -> Rc<Location> {
        Location::var(Variable::local(name))
    }

    pub fn ret() -> Rc<Location> {
        Location::var(Variable::Return)
    }

    pub fn temp(id: Ident) -> Rc<Location> {
        Rc::new(LocationEnum::Temp(id).into())
    }

    pub fn allocsite(site: Allocsite) -> Rc<Location> {
        Rc::new(LocationEnum::Allocsite(site).into())
    }

    pub fn symbolic_block(path: &Rc<SymbolPath>) -> Rc<Location> {
        Location::allocsite(Allocsite::Symbol(path.clone()))
    }

    pub fn unknown() -> Rc<Location> {
        Rc::new(LocationEnum::Unknown.into())
    }

    pub fn field(base: &Rc<Location>, field: &Rc<str>) -> Rc<Location> {
        Rc::new(
            LocationEnum::Field {
                base: base.clone(),
                field: field.clone(),
            }
            .into(),
        )
    }

    /// The element region of the block at base. Only memory blocks have element regions;
    /// indexing any other location denotes the location itself.
    pub fn index(base: &Rc<Location>) -> Rc<Location> {
        if base.is_allocsite() {
            Rc::new(LocationEnum::Index { base: base.clone() }.into())
        } else {
            base.clone()
        }
    }

    pub fn is_allocsite(&self) -> bool {
        matches!(self.value, LocationEnum::Allocsite(..))
    }

    pub fn is_temp(&self) -> bool {
        matches!(self.value, LocationEnum::Temp(..))
    }

    pub fn is_return(&self) -> bool {
        matches!(self.value, LocationEnum::Variable(Variable::Return))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self.value, LocationEnum::Unknown)
    }

    /// True for a local variable (or formal) of the procedure, but not for globals.
    pub fn is_local_variable(&self) -> bool {
        matches!(self.value, LocationEnum::Variable(Variable::Local(..)))
    }

    /// True if a single concrete memory cell cannot be named by this location, so that
    /// writes to it must be weak updates.
    pub fn represents_multiple_values(&self) -> bool {
        match &self.value {
            LocationEnum::Index { .. } | LocationEnum::Unknown => true,
            LocationEnum::Field { base, .. } => base.represents_multiple_values(),
            _ => false,
        }
    }

    /// The location this one is a field or element region of, if any.
    pub fn base(&self) -> Option<&Rc<Location>> {
        match &self.value {
            LocationEnum::Field { base, .. } | LocationEnum::Index { base } => Some(base),
            _ => None,
        }
    }

    /// The location at the root of a chain of fields and element regions.
    pub fn root(self: &Rc<Location>) -> Rc<Location> {
        match self.base() {
            Some(base) => base.root(),
            None => self.clone(),
        }
    }

    /// True if the location is a symbolic block or lies within one.
    pub fn is_symbolic(&self) -> bool {
        match &self.value {
            LocationEnum::Allocsite(Allocsite::Symbol(..)) => true,
            LocationEnum::Field { base, .. } | LocationEnum::Index { base } => base.is_symbolic(),
            _ => false,
        }
    }
}
