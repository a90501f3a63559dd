//! Bugs found and coverage accumulated over a campaign.

use crate::action::{Assignment, Combo};
use crate::coverage::CoverageBitmap;
use crate::feature::Feature;

/// An oracle violation with enough context to reproduce it.
#[derive(Debug, Clone, PartialEq)]
pub struct BugReport {
    /// Unique bug ID, assigned by the corpus.
    pub bug_id: u64,
    /// Controller step at which the violation was raised.
    pub step: u64,
    /// The combo being exercised.
    pub combo: Combo,
    /// `(action, literal)` pairs of the concrete assignment.
    pub values: Vec<(String, String)>,
    pub feature: Feature,
    /// The oracle's message.
    pub message: String,
    /// Statements of the failing test case, in execution order.
    pub statements: Vec<String>,
}

impl BugReport {
    pub fn new(
        step: u64,
        assignment: &Assignment,
        feature: Feature,
        message: impl Into<String>,
        statements: Vec<String>,
    ) -> Self {
        Self {
            bug_id: 0,
            step,
            combo: assignment.combo().clone(),
            values: assignment.describe(),
            feature,
            message: message.into(),
            statements,
        }
    }
}

/// Bugs and global coverage collected by one controller.
pub struct Corpus {
    bugs: Vec<BugReport>,
    /// Global coverage union.
    global_coverage: CoverageBitmap,
    discoveries: u64,
    next_bug_id: u64,
}

impl Corpus {
    /// Create a new empty corpus.
    pub fn new() -> Self {
        Self {
            bugs: Vec::new(),
            global_coverage: CoverageBitmap::new(),
            discoveries: 0,
            next_bug_id: 0,
        }
    }

    /// Add a bug, assigning its ID. Returns the ID.
    pub fn add_bug(&mut self, mut bug: BugReport) -> u64 {
        bug.bug_id = self.next_bug_id;
        self.next_bug_id += 1;
        let id = bug.bug_id;
        self.bugs.push(bug);
        id
    }

    /// Fold a snapshot into the global coverage union.
    pub fn merge_coverage(&mut self, snapshot: &CoverageBitmap) {
        self.global_coverage.merge(snapshot);
    }

    pub fn record_discovery(&mut self) {
        self.discoveries += 1;
    }

    pub fn bugs(&self) -> &[BugReport] {
        &self.bugs
    }

    /// Get a reference to the global coverage.
    pub fn global_coverage(&self) -> &CoverageBitmap {
        &self.global_coverage
    }

    /// Get corpus statistics.
    pub fn stats(&self) -> CorpusStats {
        CorpusStats {
            total_bugs: self.bugs.len(),
            total_edges: self.global_coverage.count_bits(),
            discoveries: self.discoveries,
        }
    }

    pub(crate) fn restore(&mut self, bugs: Vec<BugReport>, discoveries: u64) {
        self.next_bug_id = bugs.iter().map(|b| b.bug_id + 1).max().unwrap_or(0);
        self.bugs = bugs;
        self.discoveries = discoveries;
    }
}

impl Default for Corpus {
    fn default() -> Self {
        Self::new()
    }
}

/// Corpus statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusStats {
    pub total_bugs: usize,
    /// Total unique edges.
    pub total_edges: usize,
    /// Steps that found at least one new edge.
    pub discoveries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ConfigAction, ParamValue, Scope};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn make_bug(message: &str) -> BugReport {
        let action = ConfigAction::new("autocommit", &[Scope::Session], |_| {
            ParamValue::Bool(false)
        })
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let assignment = Combo::new([action]).roll(&mut rng);
        BugReport::new(
            7,
            &assignment,
            Feature(1),
            message,
            vec!["SELECT 1".to_string()],
        )
    }

    #[test]
    fn test_corpus_new() {
        let corpus = Corpus::new();
        assert_eq!(
            corpus.stats(),
            CorpusStats {
                total_bugs: 0,
                total_edges: 0,
                discoveries: 0,
            }
        );
    }

    #[test]
    fn test_corpus_bug_id_assignment() {
        let mut corpus = Corpus::new();
        assert_eq!(corpus.add_bug(make_bug("a")), 0);
        assert_eq!(corpus.add_bug(make_bug("b")), 1);
        assert_eq!(corpus.bugs()[1].bug_id, 1);
        assert_eq!(corpus.bugs()[1].message, "b");
    }

    #[test]
    fn test_corpus_global_coverage() {
        let mut corpus = Corpus::new();

        let mut first = CoverageBitmap::new();
        first.record_hit(1);
        first.record_hit(2);
        corpus.merge_coverage(&first);

        let mut second = CoverageBitmap::new();
        second.record_hit(2);
        second.record_hit(3);
        corpus.merge_coverage(&second);

        assert_eq!(corpus.stats().total_edges, 3); // edges 1, 2, 3
    }

    #[test]
    fn test_bug_report_captures_assignment() {
        let bug = make_bug("wrong row count");
        assert_eq!(bug.step, 7);
        assert_eq!(bug.combo.names(), vec!["autocommit"]);
        assert_eq!(
            bug.values,
            vec![("autocommit".to_string(), "OFF".to_string())]
        );
    }

    #[test]
    fn test_restore_continues_ids() {
        let mut corpus = Corpus::new();
        let mut old = make_bug("old");
        old.bug_id = 4;
        corpus.restore(vec![old], 9);

        assert_eq!(corpus.add_bug(make_bug("new")), 5);
        assert_eq!(corpus.stats().discoveries, 9);
    }
}
