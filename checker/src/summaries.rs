// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::conditions::ConditionSet;
use crate::k_limits;
use crate::memory::Memory;
use crate::program::{Procedure, Typ};
use crate::relation_domain::Relation;

use log_derive::{logfn, logfn_inputs};
use serde::{Deserialize, Serialize};
use sled::{Config, Db};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result};
use std::ops::Deref;
use std::rc::Rc;

/// A summary is a declarative abstract description of what a procedure does.
/// It is computed once per procedure and is used by callers of the procedure, which
/// specialize it by replacing the symbols that stand for inputs with what the call site
/// actually passes.
///
/// The entry state is what the procedure assumed about its inputs, which tells callers what
/// each symbol stands for. The exit state is what the procedure leaves behind, restricted to
/// what callers can see: the return value, the memory reachable from the parameters and
/// memory the procedure allocated. The conditions are the array accesses that could not be
/// shown to be safe without knowing the inputs.
#[derive(Serialize, Deserialize, Clone, Debug, Default, Eq, PartialEq)]
pub struct Summary {
    pub formals: Vec<(Rc<str>, Typ)>,
    /// False for procedures that are only declared. Such summaries cannot be instantiated.
    pub has_body: bool,
    pub entry: Memory,
    pub exit: Memory,
    pub conditions: ConditionSet,
}

impl Summary {
    /// The summary of a procedure the analysis has no code for.
    pub fn for_declaration(procedure: &Procedure) -> Summary {
        Summary {
            formals: procedure.formals.clone(),
            has_body: false,
            entry: Memory::new(),
            exit: Memory::new(),
            conditions: ConditionSet::default(),
        }
    }

    /// What the procedure guarantees about its inputs and outputs on exit.
    pub fn relation(&self) -> &Relation {
        &self.exit.relation
    }
}

/// Constructs a summary of a procedure body from the states found at its entry and exit.
/// A missing exit state means the procedure never returns.
#[logfn_inputs(TRACE)]
pub fn summarize(
    procedure: &Procedure,
    entry: Option<&Memory>,
    exit: Option<&Memory>,
    conditions: ConditionSet,
) -> Summary {
    let exit = match exit {
        Some(exit) if !exit.is_bottom() => {
            let mut exit = exit.clone();
            let mut locals = exit.temps();
            locals.extend(exit.local_variable_locs());
            exit.forget_locs(&locals);
            exit
        }
        _ => Memory::bottom(),
    };
    Summary {
        formals: procedure.formals.clone(),
        has_body: procedure.has_body(),
        entry: entry.cloned().unwrap_or_default(),
        exit,
        conditions,
    }
}

/// Where the summaries of analyzed procedures are kept. Each procedure's summary is written
/// once, after the procedure has been analyzed, and read by the callers analyzed later.
pub trait SummaryStore {
    fn read(&self, caller: &str, callee: &str) -> Option<Rc<Summary>>;
    fn write(&mut self, procedure: &str, summary: Summary);

    /// Makes sure everything written so far is on disk.
    fn flush(&self) -> sled::Result<usize> {
        Ok(0)
    }
}

/// Keeps summaries for the duration of one run.
#[derive(Debug, Default)]
pub struct InMemorySummaryStore {
    summaries: HashMap<Rc<str>, Rc<Summary>>,
}

impl SummaryStore for InMemorySummaryStore {
    fn read(&self, caller: &str, callee: &str) -> Option<Rc<Summary>> {
        trace!("{} reads the summary of {}", caller, callee);
        self.summaries.get(callee).cloned()
    }

    fn write(&mut self, procedure: &str, summary: Summary) {
        self.summaries.insert(Rc::from(procedure), Rc::new(summary));
    }
}

/// Keeps summaries in a Sled database, so that they outlive the run.
pub struct PersistentSummaryStore {
    db: Db,
    cache: RefCell<HashMap<String, Option<Rc<Summary>>>>,
}

impl Debug for PersistentSummaryStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        "PersistentSummaryStore".fmt(f)
    }
}

impl PersistentSummaryStore {
    /// Creates a new persistent summary store, using (or creating) a Sled database in the
    /// given directory. Another process may hold the database, so opening is retried a few
    /// times before giving up.
    #[logfn(TRACE)]
    pub fn new(summary_store_directory_str: &str) -> sled::Result<PersistentSummaryStore> {
        use rand::{thread_rng, Rng};
        use std::thread;
        use std::time::Duration;

        let mut rng = thread_rng();
        let store_path =
            std::path::Path::new(summary_store_directory_str).join(".summary_store.sled");
        let config = Config::default().path(store_path);
        let mut attempts = 1;
        let db = loop {
            match config.open() {
                Ok(db) => break db,
                Err(err) if attempts < k_limits::MAX_SUMMARY_STORE_OPEN_ATTEMPTS => {
                    debug!("opening db failed {:?}", err);
                    attempts += 1;
                    let num_millis = rng.gen_range(100..200);
                    thread::sleep(Duration::from_millis(num_millis));
                }
                Err(err) => return Err(err),
            }
        };
        Ok(PersistentSummaryStore {
            db,
            cache: RefCell::new(HashMap::new()),
        })
    }

    /// Returns the summary stored under the key. The caller is expected to cache this.
    #[logfn(TRACE)]
    fn get_persistent_summary_for_db(db: &Db, persistent_key: &str) -> Option<Summary> {
        match db.get(persistent_key.as_bytes()) {
            Ok(Some(pinned_value)) => match bincode::deserialize(pinned_value.deref()) {
                Ok(summary) => Some(summary),
                Err(err) => {
                    warn!("the stored summary of {} is corrupt: {}", persistent_key, err);
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!("unable to read the summary of {}: {}", persistent_key, err);
                None
            }
        }
    }
}

impl SummaryStore for PersistentSummaryStore {
    #[logfn_inputs(TRACE)]
    fn read(&self, caller: &str, callee: &str) -> Option<Rc<Summary>> {
        if let Some(summary) = self.cache.borrow().get(callee) {
            return summary.clone();
        }
        let summary = Self::get_persistent_summary_for_db(&self.db, callee).map(Rc::new);
        if summary.is_none() {
            info!("Summary store has no entry for {}", callee);
        }
        self.cache
            .borrow_mut()
            .insert(callee.to_string(), summary.clone());
        summary
    }

    #[logfn_inputs(TRACE)]
    fn write(&mut self, procedure: &str, summary: Summary) {
        match bincode::serialize(&summary) {
            Ok(serialized_summary) => {
                let result = self.db.insert(procedure.as_bytes(), serialized_summary);
                if result.is_err() {
                    warn!("unable to set key in summary database: {:?}", result);
                }
            }
            Err(err) => warn!("unable to serialize the summary of {}: {}", procedure, err),
        }
        self.cache
            .get_mut()
            .insert(procedure.to_string(), Some(Rc::new(summary)));
    }

    fn flush(&self) -> sled::Result<usize> {
        self.db.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstract_value::AbstractValue;
    use crate::location::{LocSet, Location};
    use crate::program::{Procedure, ProcedureBuilder};

    #[test]
    fn exit_states_do_not_mention_locals() {
        let procedure = ProcedureBuilder::new("f")
            .formal("p", Typ::ptr(Typ::int()))
            .local("x", Typ::int())
            .build();
        let mut exit = Memory::new();
        let mut locs = LocSet::new();
        locs.insert(Location::local("x"));
        exit.update_mem(&locs, Rc::new(AbstractValue::from(3)));
        let mut ret = LocSet::new();
        ret.insert(Location::ret());
        exit.update_mem(&ret, Rc::new(AbstractValue::from(4)));
        let summary = summarize(&procedure, None, Some(&exit), ConditionSet::default());
        assert!(summary.has_body);
        assert!(!summary.exit.locations().contains(&Location::local("x")));
        assert_eq!(
            summary.exit.find(&Location::ret()).as_ref(),
            &AbstractValue::from(4)
        );
    }

    #[test]
    fn procedures_that_never_return_have_unreachable_exits() {
        let procedure = ProcedureBuilder::new("f").build();
        let summary = summarize(
            &procedure,
            Some(&Memory::new()),
            Some(&Memory::bottom()),
            ConditionSet::default(),
        );
        assert!(summary.exit.is_bottom());
    }

    #[test]
    fn the_in_memory_store_returns_what_was_written() {
        let mut store = InMemorySummaryStore::default();
        assert!(store.read("main", "f").is_none());
        let declaration = Procedure::declaration("f", vec![], Typ::Void);
        store.write("f", Summary::for_declaration(&declaration));
        let summary = store.read("main", "f").unwrap();
        assert!(!summary.has_body);
    }
}
