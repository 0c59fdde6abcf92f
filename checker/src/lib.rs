// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! An interprocedural buffer overrun checker. Every procedure of a program is interpreted over
//! an abstract domain of symbolic intervals, array blocks and difference constraints, callees
//! first. Array accesses become conditions that are either discharged in the procedure or
//! handed to its callers through its summary.

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

pub mod abstract_value;
pub mod block_visitor;
pub mod body_visitor;
pub mod bool_domain;
pub mod call_graph;
pub mod call_visitor;
pub mod conditions;
pub mod expected_errors;
pub mod fixed_point_visitor;
pub mod interval_domain;
pub mod k_limits;
pub mod location;
pub mod memory;
pub mod models;
pub mod options;
pub mod program;
pub mod program_visitor;
pub mod relation_domain;
pub mod reporting;
pub mod semantics;
pub mod summaries;
pub mod symbol;
pub mod trace;
pub mod type_visitor;
