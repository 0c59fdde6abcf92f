// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

extern crate env_logger;

use overrun::options::Options;
use overrun::program::Program;
use overrun::program_visitor::ProgramVisitor;
use overrun::reporting::PrintingSink;
use std::env;
use std::fs::File;
use std::io::BufReader;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize loggers.
    if env::var("OVERRUN_LOG").is_ok() {
        let e = env_logger::Env::new()
            .filter("OVERRUN_LOG")
            .write_style("OVERRUN_LOG_STYLE");
        env_logger::init_from_env(e);
    }

    // Options can come from the command line and from the environment.
    let mut options = Options::default();
    let mut inputs = match env::var("OVERRUN_FLAGS") {
        Ok(flags) => options.parse_from_str(&flags),
        Err(_) => vec![],
    };
    let command_line_arguments: Vec<String> = env::args().skip(1).collect();
    inputs.extend(options.parse(&command_line_arguments));

    let mut sink = PrintingSink::default();
    for input in inputs.iter() {
        let program: Program = serde_json::from_reader(BufReader::new(File::open(input)?))?;
        let mut visitor = ProgramVisitor::new(&program, &options, &mut sink)?;
        visitor.analyze_all();
    }
    if sink.count > 0 {
        eprintln!("{} problems found", sink.count);
        std::process::exit(1);
    }
    Ok(())
}
