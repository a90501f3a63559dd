//! Test-case execution seam and per-case reproduction state.
//!
//! The executor (driver, SQL generator and oracle) lives outside this
//! crate. It reports each case as an [`ExecOutcome`] and records the
//! statements it issued into a [`CaseLog`], so a violation can be
//! reproduced later.

use crate::action::Assignment;
use crate::feature::Feature;
use std::collections::VecDeque;
use std::fmt;

/// A genuine inconsistency detected by a test oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub message: String,
}

impl Violation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Result of running one test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    Success,
    /// The case was meaningless (e.g. invalid random SQL). Still counted.
    Ignorable,
    Violation(Violation),
}

/// Runs single test cases against the target DBMS.
pub trait TestExecutor: Send {
    /// Apply `assignment`, generate SQL biased by `feature`, run it and
    /// check the oracle. Statements issued should be recorded in `log`.
    fn run_one(
        &mut self,
        assignment: &Assignment,
        feature: Feature,
        log: &mut CaseLog<'_>,
    ) -> ExecOutcome;
}

/// Statements of one finished test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseRecord {
    pub statements: Vec<String>,
    /// Set on every exit path, including early return on a violation.
    pub executed: bool,
}

/// Bounded history of recent test cases.
#[derive(Debug)]
pub struct ReproductionLog {
    history: VecDeque<CaseRecord>,
    capacity: usize,
    executed: u64,
}

impl ReproductionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            executed: 0,
        }
    }

    /// Open the reproduction state of a new test case.
    ///
    /// The case is committed to the history when the returned guard drops.
    pub fn begin_case(&mut self) -> CaseLog<'_> {
        CaseLog {
            owner: self,
            statements: Vec::new(),
        }
    }

    pub fn last(&self) -> Option<&CaseRecord> {
        self.history.back()
    }

    pub fn history(&self) -> impl Iterator<Item = &CaseRecord> {
        self.history.iter()
    }

    /// Cases closed so far, including those evicted from the history.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    fn commit(&mut self, statements: Vec<String>) {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(CaseRecord {
            statements,
            executed: true,
        });
        self.executed += 1;
    }
}

/// Scoped reproduction state of one test case.
pub struct CaseLog<'a> {
    owner: &'a mut ReproductionLog,
    statements: Vec<String>,
}

impl CaseLog<'_> {
    pub fn record(&mut self, statement: impl Into<String>) {
        self.statements.push(statement.into());
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }
}

impl Drop for CaseLog<'_> {
    fn drop(&mut self) {
        let statements = std::mem::take(&mut self.statements);
        self.owner.commit(statements);
    }
}
