// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::k_limits;

use clap::error::ErrorKind;
use clap::{value_parser, Arg, ArgAction, Command, Error};
use mirai_annotations::*;

/// Creates the clap::Command metadata for argument parsing.
fn make_options_parser() -> Command {
    // We could put this into lazy_static! with a Mutex around, but we really do not expect
    // to construct this more then once per regular program run.
    Command::new("overrun")
    .no_binary_name(true)
    .version("v0.1.0")
    .arg(Arg::new("single_proc")
        .long("single_proc")
        .num_args(1)
        .help("Focus analysis on the named procedure.")
        .long_help("The named procedure and the procedures it calls are analyzed, but only the named procedure is checked."))
    .arg(Arg::new("diag")
        .long("diag")
        .value_parser(["default", "library", "paranoid"])
        .default_value("default")
        .help("Level of diagnostics.\n")
        .long_help("With `default`, possible overruns are only reported when their bounds do not depend on inputs of the procedure.\nWith `library`, they are reported whatever the bounds depend on.\nWith `paranoid`, everything that may go wrong will be reported.\n"))
    .arg(Arg::new("max_fixpoint_iterations")
        .long("max_fixpoint_iterations")
        .value_parser(value_parser!(usize))
        .help("The maximum number of times a loop head is visited.")
        .long_help("The default is 10."))
    .arg(Arg::new("widen_after")
        .long("widen_after")
        .value_parser(value_parser!(usize))
        .help("The number of visits to a loop head that join rather than widen.")
        .long_help("The default is 2."))
    .arg(Arg::new("max_declaration_depth")
        .long("max_declaration_depth")
        .value_parser(value_parser!(usize))
        .help("How many pointer levels of a parameter get symbolic values.")
        .long_help("The default is 2."))
    .arg(Arg::new("summary_store")
        .long("summary_store")
        .num_args(1)
        .help("Directory of a persistent summary store.")
        .long_help("Without this option, summaries are only kept in memory for the duration of the run."))
    .arg(Arg::new("inputs")
        .action(ArgAction::Append)
        .num_args(1..)
        .help("Programs to analyze, serialized as JSON."))
}

/// Represents options passed to the checker.
#[derive(Debug)]
pub struct Options {
    pub single_proc: Option<String>,
    pub diag_level: DiagLevel,
    pub max_fixpoint_iterations: usize,
    pub widen_after: usize,
    pub max_declaration_depth: usize,
    pub summary_store: Option<String>,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            single_proc: None,
            diag_level: DiagLevel::default(),
            max_fixpoint_iterations: k_limits::MAX_FIXPOINT_ITERATIONS,
            widen_after: k_limits::WIDEN_AFTER_ITERATIONS,
            max_declaration_depth: k_limits::MAX_DECLARATION_DEPTH,
            summary_store: None,
        }
    }
}

/// Represents diag level.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, PartialOrd)]
pub enum DiagLevel {
    /// Possible overruns whose bounds are symbolic are assumed to be the responsibility of
    /// callers and are only reported where the callers instantiate them.
    #[default]
    Default,
    /// Like Default, but also reports possible overruns whose bounds depend on the inputs of the
    /// procedure. This mode should be used for any library whose callers are not known and
    /// therefore not analyzed.
    Library,
    /// Like Library, but also reports when fixpoint iteration is cut off.
    Paranoid,
}

impl Options {
    /// Parse options from an argument string. The argument string will be split using unix
    /// shell escaping rules. Returns the input files named by the string.
    pub fn parse_from_str(&mut self, s: &str) -> Vec<String> {
        let args = shellwords::split(s).unwrap_or_else(|e| {
            Error::raw(
                ErrorKind::InvalidValue,
                format!("Cannot parse argument string: {:?}\n", e),
            )
            .exit()
        });
        self.parse(&args)
    }

    /// Parses options from a list of strings, exiting the process on invalid input.
    /// Returns the input files named by the arguments.
    pub fn parse(&mut self, args: &[String]) -> Vec<String> {
        match self.try_parse(args) {
            Ok(inputs) => inputs,
            Err(e) => e.exit(),
        }
    }

    /// Parses options from a list of strings. Returns the input files named by the arguments.
    pub fn try_parse(&mut self, args: &[String]) -> Result<Vec<String>, Error> {
        let matches = make_options_parser().try_get_matches_from(args.iter())?;
        if let Some(name) = matches.get_one::<String>("single_proc") {
            self.single_proc = Some(name.clone());
        }
        if let Some(level) = matches.get_one::<String>("diag") {
            self.diag_level = match level.as_str() {
                "default" => DiagLevel::Default,
                "library" => DiagLevel::Library,
                "paranoid" => DiagLevel::Paranoid,
                _ => assume_unreachable!(),
            };
        }
        if let Some(n) = matches.get_one::<usize>("max_fixpoint_iterations") {
            self.max_fixpoint_iterations = *n;
        }
        if let Some(n) = matches.get_one::<usize>("widen_after") {
            self.widen_after = *n;
        }
        if let Some(n) = matches.get_one::<usize>("max_declaration_depth") {
            self.max_declaration_depth = *n;
        }
        if let Some(dir) = matches.get_one::<String>("summary_store") {
            self.summary_store = Some(dir.clone());
        }
        Ok(matches
            .get_many::<String>("inputs")
            .map(|inputs| inputs.cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_are_parsed_from_a_shell_string() {
        let mut options = Options::default();
        let inputs = options.parse_from_str(
            "--diag library --single_proc main --widen_after 3 'a program.json' b.json",
        );
        assert_eq!(options.diag_level, DiagLevel::Library);
        assert_eq!(options.single_proc.as_deref(), Some("main"));
        assert_eq!(options.widen_after, 3);
        assert_eq!(
            options.max_fixpoint_iterations,
            k_limits::MAX_FIXPOINT_ITERATIONS
        );
        assert_eq!(inputs, vec!["a program.json".to_string(), "b.json".to_string()]);
    }

    #[test]
    fn unknown_diag_levels_are_rejected() {
        let mut options = Options::default();
        let args = vec!["--diag".to_string(), "verify".to_string()];
        assert!(options.try_parse(&args).is_err());
    }
}
