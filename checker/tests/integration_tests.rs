// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

// Whole program runs over small hand built programs. Each test builds its procedures with a
// ProcedureBuilder, runs every procedure callees first and compares the reports with the
// messages it expects.

use overrun::expected_errors::ExpectedErrors;
use overrun::models::ModelRegistry;
use overrun::options::{DiagLevel, Options};
use overrun::program::{
    BinOp, Exp, IfKind, Instr, Procedure, ProcedureBuilder, Program, Typ,
};
use overrun::program_visitor::ProgramVisitor;
use overrun::reporting::{CollectingSink, Report, ReportKind};
use overrun::summaries::{InMemorySummaryStore, PersistentSummaryStore};
use std::rc::Rc;
use tempfile::TempDir;

fn analyze_with(program: &Program, options: &Options) -> Vec<Report> {
    let mut sink = CollectingSink::default();
    let mut visitor = ProgramVisitor::with_store(
        program,
        options,
        &mut sink,
        Box::new(InMemorySummaryStore::default()),
    );
    visitor.analyze_all();
    sink.reports
}

fn analyze(program: &Program) -> Vec<Report> {
    analyze_with(program, &Options::default())
}

fn library_options() -> Options {
    Options {
        diag_level: DiagLevel::Library,
        ..Options::default()
    }
}

fn check(reports: &[Report], expected: &[&str]) {
    assert!(ExpectedErrors::new(expected).check_messages(reports));
}

fn kinds(reports: &[Report]) -> Vec<ReportKind> {
    let mut kinds: Vec<ReportKind> = reports.iter().map(|r| r.kind).collect();
    kinds.sort();
    kinds
}

fn program_of(procedures: Vec<Procedure>) -> Program {
    let mut program = Program::default();
    for procedure in procedures {
        program.add_procedure(procedure);
    }
    program
}

/// a[10] = 1 with a declared as int a[10].
fn write_past_local_array(proc: &str, array: &str) -> Procedure {
    let mut builder =
        ProcedureBuilder::new(proc).local(array, Typ::array(Typ::int(), Some(10)));
    let (start, exit) = (builder.start(), builder.exit());
    let body = builder.node(vec![Instr::store(
        Exp::index(Exp::lvar(array), Exp::int(10)),
        Exp::int(1),
        3,
    )]);
    builder.chain(&[start, body, exit]);
    builder.build()
}

/// Reads p[0] for a pointer parameter p.
fn read_through_parameter() -> Procedure {
    let mut builder = ProcedureBuilder::new("get").formal("p", Typ::ptr(Typ::int()));
    let (start, exit) = (builder.start(), builder.exit());
    let body = builder.node(vec![
        Instr::load(1, Exp::lvar("p"), 2),
        Instr::load(2, Exp::index(Exp::var(1), Exp::int(0)), 2),
    ]);
    builder.chain(&[start, body, exit]);
    builder.build()
}

/// Writes p[index] for a pointer parameter p.
fn write_through_parameter(index: i128) -> Procedure {
    let mut builder = ProcedureBuilder::new("callee").formal("p", Typ::ptr(Typ::int()));
    let (start, exit) = (builder.start(), builder.exit());
    let body = builder.node(vec![
        Instr::load(1, Exp::lvar("p"), 2),
        Instr::store(Exp::index(Exp::var(1), Exp::int(index)), Exp::int(1), 2),
    ]);
    builder.chain(&[start, body, exit]);
    builder.build()
}

/// Declares int arr[1] and passes it to callee.
fn pass_local_array() -> Procedure {
    let mut builder = ProcedureBuilder::new("caller").local("arr", Typ::array(Typ::int(), Some(1)));
    let (start, exit) = (builder.start(), builder.exit());
    let body = builder.node(vec![Instr::call(
        1,
        "callee",
        vec![(Exp::lvar("arr"), Typ::ptr(Typ::int()))],
        7,
    )]);
    builder.chain(&[start, body, exit]);
    builder.build()
}

#[test]
fn constant_index_past_the_end_is_an_overrun() {
    let program = program_of(vec![write_past_local_array("f", "a")]);
    let reports = analyze(&program);
    check(&reports, &["BUFFER_OVERRUN: Offset: 10 Size: 10"]);
    assert_eq!(reports[0].location.line, 3);
    assert_eq!(reports[0].procedure.as_ref(), "f");
    assert!(!reports[0].trace.is_empty());
}

#[test]
fn renaming_locals_does_not_change_the_findings() {
    let original = analyze(&program_of(vec![write_past_local_array("f", "a")]));
    let renamed = analyze(&program_of(vec![write_past_local_array("g", "buffer")]));
    assert_eq!(kinds(&original), kinds(&renamed));
    assert_eq!(original[0].message, renamed[0].message);
}

#[test]
fn accesses_through_parameters_are_left_to_callers() {
    let program = program_of(vec![read_through_parameter()]);
    check(&analyze(&program), &[]);
    check(
        &analyze_with(&program, &library_options()),
        &["BUFFER_OVERRUN_MAYBE"],
    );
}

#[test]
fn callers_discharge_the_conditions_of_their_callees() {
    let program = program_of(vec![write_through_parameter(0), pass_local_array()]);
    check(&analyze(&program), &[]);
    let options = Options {
        single_proc: Some("caller".to_string()),
        diag_level: DiagLevel::Library,
        ..Options::default()
    };
    check(&analyze_with(&program, &options), &[]);
}

#[test]
fn callers_report_the_conditions_they_violate() {
    let program = program_of(vec![write_through_parameter(1), pass_local_array()]);
    let reports = analyze(&program);
    check(&reports, &["BUFFER_OVERRUN: Offset: 1 Size: 1 by call to `callee`"]);
    assert_eq!(reports[0].procedure.as_ref(), "caller");
    assert_eq!(reports[0].location.line, 7);
}

#[test]
fn only_the_selected_procedure_is_reported() {
    let program = program_of(vec![
        write_past_local_array("f", "a"),
        write_past_local_array("g", "b"),
    ]);
    let options = Options {
        single_proc: Some("g".to_string()),
        ..Options::default()
    };
    let reports = analyze_with(&program, &options);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].procedure.as_ref(), "g");
}

#[test]
fn dead_branches_and_unreachable_instructions_are_reported() {
    let mut builder = ProcedureBuilder::new("f").local("x", Typ::int());
    let (start, exit) = (builder.start(), builder.exit());
    let before = builder.node(vec![Instr::store(Exp::lvar("x"), Exp::int(0), 2)]);
    builder.edge(start, before);
    let cond = Exp::binop(BinOp::Ne, Exp::int(1), Exp::int(0));
    let (t, f) = builder.branch(before, cond, IfKind::If, 4);
    let dead = builder.node(vec![
        Instr::store(Exp::lvar("x"), Exp::int(1), 5),
        Instr::call(2, "exit", vec![(Exp::int(1), Typ::int())], 6),
    ]);
    let join = builder.join_node();
    builder.chain(&[f, dead, join]);
    builder.chain(&[t, join, exit]);
    let program = program_of(vec![builder.build()]);
    let reports = analyze(&program);
    check(
        &reports,
        &[
            "CONDITION_ALWAYS_TRUE: The condition",
            "UNREACHABLE_CODE: This instruction is never executed",
        ],
    );
    let unreachable = reports
        .iter()
        .find(|r| r.kind == ReportKind::UnreachableCode)
        .map(|r| r.location.line);
    assert_eq!(unreachable, Some(5));
    let dead_branch = reports
        .iter()
        .find(|r| r.kind == ReportKind::ConditionAlwaysTrue)
        .map(|r| r.location.line);
    assert_eq!(dead_branch, Some(4));
    assert!(!kinds(&reports).contains(&ReportKind::ConditionAlwaysFalse));
}

#[test]
fn branches_whose_then_edge_is_dead_are_always_false() {
    let mut builder = ProcedureBuilder::new("f").local("x", Typ::int());
    let (start, exit) = (builder.start(), builder.exit());
    let before = builder.node(vec![Instr::store(Exp::lvar("x"), Exp::int(0), 2)]);
    builder.edge(start, before);
    let cond = Exp::binop(BinOp::Eq, Exp::int(1), Exp::int(0));
    let (t, f) = builder.branch(before, cond, IfKind::If, 4);
    let dead = builder.node(vec![Instr::store(Exp::lvar("x"), Exp::int(1), 5)]);
    let join = builder.join_node();
    builder.chain(&[t, dead, join]);
    builder.chain(&[f, join, exit]);
    let program = program_of(vec![builder.build()]);
    let reports = analyze(&program);
    check(
        &reports,
        &[
            "CONDITION_ALWAYS_FALSE: The condition",
            "UNREACHABLE_CODE: This instruction is never executed",
        ],
    );
    let dead_branch = reports
        .iter()
        .find(|r| r.kind == ReportKind::ConditionAlwaysFalse)
        .map(|r| r.location.line);
    assert_eq!(dead_branch, Some(4));
    assert!(!kinds(&reports).contains(&ReportKind::ConditionAlwaysTrue));
}

#[test]
fn blocks_returned_by_callees_keep_their_size() {
    let mut builder = ProcedureBuilder::new("mk").returns(Typ::ptr(Typ::int()));
    let (start, exit) = (builder.start(), builder.exit());
    let body = builder.node(vec![
        Instr::call(1, "malloc", vec![(Exp::int(10), Typ::int())], 2),
        Instr::store(Exp::ret(), Exp::var(1), 3),
    ]);
    builder.chain(&[start, body, exit]);
    let mk = builder.build();

    let mut builder = ProcedureBuilder::new("use_it");
    let (start, exit) = (builder.start(), builder.exit());
    let body = builder.node(vec![
        Instr::call(1, "mk", vec![], 8),
        Instr::load(2, Exp::index(Exp::var(1), Exp::int(10)), 9),
        Instr::load(3, Exp::index(Exp::var(1), Exp::int(9)), 10),
    ]);
    builder.chain(&[start, body, exit]);
    let program = program_of(vec![mk, builder.build()]);
    let reports = analyze(&program);
    check(&reports, &["BUFFER_OVERRUN: Offset: 10 Size: 10"]);
    assert_eq!(reports[0].location.line, 9);
}

/// p = malloc(n); i = 0; while (i `op` n) { p[i] = 0; i = i + 1; }
fn fill_allocated_block(op: BinOp) -> Procedure {
    let mut builder = ProcedureBuilder::new("fill")
        .formal("n", Typ::int())
        .local("p", Typ::ptr(Typ::int()))
        .local("i", Typ::int());
    let (start, exit) = (builder.start(), builder.exit());
    let init = builder.node(vec![
        Instr::load(1, Exp::lvar("n"), 2),
        Instr::call(2, "malloc", vec![(Exp::var(1), Typ::int())], 2),
        Instr::store(Exp::lvar("p"), Exp::var(2), 2),
        Instr::store(Exp::lvar("i"), Exp::int(0), 3),
    ]);
    let head = builder.join_node();
    let test = builder.node(vec![
        Instr::load(3, Exp::lvar("i"), 4),
        Instr::load(4, Exp::lvar("n"), 4),
    ]);
    let cond = Exp::binop(op, Exp::var(3), Exp::var(4));
    let (t, f) = builder.branch(test, cond, IfKind::Loop, 4);
    let body = builder.node(vec![
        Instr::load(5, Exp::lvar("p"), 5),
        Instr::load(6, Exp::lvar("i"), 5),
        Instr::store(Exp::index(Exp::var(5), Exp::var(6)), Exp::int(0), 5),
        Instr::load(7, Exp::lvar("i"), 6),
        Instr::store(
            Exp::lvar("i"),
            Exp::binop(BinOp::PlusA, Exp::var(7), Exp::int(1)),
            6,
        ),
    ]);
    builder.chain(&[start, init, head, test]);
    builder.chain(&[t, body, head]);
    builder.chain(&[f, exit]);
    builder.build()
}

#[test]
fn loop_bounds_relate_indices_to_sizes() {
    let program = program_of(vec![fill_allocated_block(BinOp::Lt)]);
    check(&analyze_with(&program, &library_options()), &[]);
}

#[test]
fn one_iteration_too_many_may_overrun() {
    let program = program_of(vec![fill_allocated_block(BinOp::Le)]);
    check(&analyze(&program), &[]);
    let reports = analyze_with(&program, &library_options());
    check(&reports, &["BUFFER_OVERRUN_MAYBE"]);
    assert_eq!(reports[0].location.line, 5);
}

#[test]
fn callees_update_the_objects_of_their_callers() {
    let mut program = Program::default();
    program.tenv.add_struct("box", vec![("len", Typ::int())]);

    let mut builder =
        ProcedureBuilder::new("set_len").formal("o", Typ::ObjectRef(Rc::from("box")));
    let (start, exit) = (builder.start(), builder.exit());
    let body = builder.node(vec![
        Instr::load(1, Exp::lvar("o"), 2),
        Instr::store(Exp::field(Exp::var(1), "len"), Exp::int(20), 2),
    ]);
    builder.chain(&[start, body, exit]);
    program.add_procedure(builder.build());

    let mut builder = ProcedureBuilder::new("main")
        .local("b", Typ::structure("box"))
        .local("a", Typ::array(Typ::int(), Some(10)));
    let (start, exit) = (builder.start(), builder.exit());
    let body = builder.node(vec![
        Instr::store(Exp::field(Exp::lvar("b"), "len"), Exp::int(1), 5),
        Instr::call(
            1,
            "set_len",
            vec![(Exp::lvar("b"), Typ::ObjectRef(Rc::from("box")))],
            6,
        ),
        Instr::load(2, Exp::field(Exp::lvar("b"), "len"), 7),
        Instr::load(3, Exp::index(Exp::lvar("a"), Exp::var(2)), 7),
    ]);
    builder.chain(&[start, body, exit]);
    program.add_procedure(builder.build());

    check(&analyze(&program), &["BUFFER_OVERRUN: Offset: 20 Size: 10"]);
}

#[test]
fn memset_is_checked_against_the_size_of_its_target() {
    let mut builder = ProcedureBuilder::new("clear").local("a", Typ::array(Typ::int(), Some(4)));
    let (start, exit) = (builder.start(), builder.exit());
    let args = |n: i128| {
        vec![
            (Exp::lvar("a"), Typ::ptr(Typ::int())),
            (Exp::int(0), Typ::int()),
            (Exp::int(n), Typ::int()),
        ]
    };
    let body = builder.node(vec![
        Instr::call(1, "memset", args(4), 2),
        Instr::call(2, "memset", args(8), 3),
    ]);
    builder.chain(&[start, body, exit]);
    let reports = analyze(&program_of(vec![builder.build()]));
    check(&reports, &["BUFFER_OVERRUN"]);
    assert_eq!(reports[0].location.line, 3);
}

#[test]
fn vectors_grow_with_push_back() {
    let mut builder = ProcedureBuilder::new("push").local("v", Typ::structure("std::vector"));
    let (start, exit) = (builder.start(), builder.exit());
    let v = || (Exp::lvar("v"), Typ::ptr(Typ::structure("std::vector")));
    let body = builder.node(vec![
        Instr::call(1, "std::vector::push_back", vec![v(), (Exp::int(7), Typ::int())], 2),
        Instr::call(2, "std::vector::push_back", vec![v(), (Exp::int(8), Typ::int())], 3),
        Instr::call(3, "std::vector::at", vec![v(), (Exp::int(1), Typ::int())], 4),
        Instr::call(4, "std::vector::at", vec![v(), (Exp::int(2), Typ::int())], 5),
    ]);
    builder.chain(&[start, body, exit]);
    let reports = analyze(&program_of(vec![builder.build()]));
    check(&reports, &["BUFFER_OVERRUN: Offset: 2 Size: 2"]);
    assert_eq!(reports[0].location.line, 5);
}

#[test]
fn summaries_survive_in_the_summary_store() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_str().unwrap().to_string();
    let options = Options {
        summary_store: Some(path.clone()),
        ..Options::default()
    };

    let first = program_of(vec![write_through_parameter(1)]);
    let mut sink = CollectingSink::default();
    {
        let mut visitor = ProgramVisitor::new(&first, &options, &mut sink).unwrap();
        assert_eq!(visitor.analyze_all(), 1);
    }
    assert!(sink.reports.is_empty());

    // The callee is now only declared, so its conditions must come from the store.
    let second = program_of(vec![
        Procedure::declaration("callee", vec![("p", Typ::ptr(Typ::int()))], Typ::Void),
        pass_local_array(),
    ]);
    let mut sink = CollectingSink::default();
    {
        let store = PersistentSummaryStore::new(&path).unwrap();
        let mut visitor = ProgramVisitor::with_store(&second, &options, &mut sink, Box::new(store));
        assert_eq!(visitor.analyze_all(), 1);
    }
    check(
        &sink.reports,
        &["BUFFER_OVERRUN: Offset: 1 Size: 1 by call to `callee`"],
    );
}

#[test]
fn declared_procedures_make_callers_assume_nothing() {
    let mut builder = ProcedureBuilder::new("caller").local("a", Typ::array(Typ::int(), Some(4)));
    let (start, exit) = (builder.start(), builder.exit());
    let body = builder.node(vec![
        Instr::call(1, "unknown", vec![(Exp::lvar("a"), Typ::ptr(Typ::int()))], 2),
        Instr::load(2, Exp::index(Exp::lvar("a"), Exp::var(1)), 3),
    ]);
    builder.chain(&[start, body, exit]);
    let program = program_of(vec![
        Procedure::declaration("unknown", vec![("p", Typ::ptr(Typ::int()))], Typ::int()),
        builder.build(),
    ]);
    // an unknown index is not worth a report
    check(&analyze(&program), &[]);
}

/// Writes p[n] for a pointer parameter p and an integer parameter n.
fn write_at_parameter_index() -> Procedure {
    let mut builder = ProcedureBuilder::new("write_at")
        .formal("p", Typ::ptr(Typ::int()))
        .formal("n", Typ::int());
    let (start, exit) = (builder.start(), builder.exit());
    let body = builder.node(vec![
        Instr::load(1, Exp::lvar("p"), 2),
        Instr::load(2, Exp::lvar("n"), 2),
        Instr::store(Exp::index(Exp::var(1), Exp::var(2)), Exp::int(0), 2),
    ]);
    builder.chain(&[start, body, exit]);
    builder.build()
}

#[test]
fn each_call_site_instantiates_the_callee_with_its_own_arguments() {
    let mut builder = ProcedureBuilder::new("caller")
        .local("a", Typ::array(Typ::int(), Some(4)))
        .local("b", Typ::array(Typ::int(), Some(2)));
    let (start, exit) = (builder.start(), builder.exit());
    let body = builder.node(vec![
        Instr::call(
            1,
            "write_at",
            vec![
                (Exp::lvar("a"), Typ::ptr(Typ::int())),
                (Exp::int(3), Typ::int()),
            ],
            10,
        ),
        Instr::call(
            2,
            "write_at",
            vec![
                (Exp::lvar("b"), Typ::ptr(Typ::int())),
                (Exp::int(2), Typ::int()),
            ],
            11,
        ),
    ]);
    builder.chain(&[start, body, exit]);
    let program = program_of(vec![write_at_parameter_index(), builder.build()]);
    let reports = analyze(&program);
    check(
        &reports,
        &["BUFFER_OVERRUN: Offset: 2 Size: 2 by call to `write_at`"],
    );
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].location.line, 11);
    assert_eq!(&*reports[0].procedure, "caller");
}

#[test]
fn front_ends_can_register_their_own_models() {
    let mut builder = ProcedureBuilder::new("f").local("x", Typ::int());
    let (start, exit) = (builder.start(), builder.exit());
    let body = builder.node(vec![
        Instr::call(1, "die", vec![], 2),
        Instr::store(Exp::lvar("x"), Exp::int(1), 3),
    ]);
    builder.chain(&[start, body, exit]);
    let program = program_of(vec![builder.build()]);

    assert!(analyze(&program).is_empty());

    let mut registry = ModelRegistry::with_builtins();
    registry.add_no_return("die", Some(0));
    let options = Options::default();
    let mut sink = CollectingSink::default();
    let mut visitor = ProgramVisitor::with_store(
        &program,
        &options,
        &mut sink,
        Box::new(InMemorySummaryStore::default()),
    )
    .with_models(&registry);
    visitor.analyze_all();
    drop(visitor);
    check(
        &sink.reports,
        &["UNREACHABLE_CODE: This instruction is never executed"],
    );
    assert_eq!(sink.reports[0].location.line, 3);
}
