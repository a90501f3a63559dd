//! Coverage-guided adaptive search over DBMS configuration parameters.
//!
//! A logic-bug fuzzer finds more when the database runs under unusual
//! settings. This crate decides *which* settings to run under: it treats
//! every pair of configuration parameters as an arm of a bandit and learns,
//! from code-coverage feedback, which pairs keep uncovering new edges.
//!
//! # Architecture
//!
//! ```text
//! 1. Enumerate all pairwise combos of the target's parameters (the universe)
//! 2. Each step: pick a combo (epsilon-greedy over learned weights) and a
//!    query-shape feature, roll concrete values
//! 3. Run the test generator for one time slice, diff coverage
//!    - new edges   → run a second slice on the same values
//!    - no new edges → re-roll the values and run one more slice
//! 4. Credit executions and new edges to the combo
//! 5. Every N steps: recompute weights (reward decays with staleness),
//!    distil the top-K combos into the production pool
//! 6. Production campaigns draw from the pool with a small diversity rate
//! ```
//!
//! # Example Usage
//!
//! ```no_run
//! use paramfuzz_explore::action::Combo;
//! use paramfuzz_explore::controller::{Controller, ControllerConfig};
//! use paramfuzz_explore::coverage::FileCoverageMonitor;
//! use paramfuzz_explore::feature::UniformFeatureSpace;
//! use paramfuzz_explore::report::format_summary;
//! use paramfuzz_explore::tables::SharedTables;
//! use paramfuzz_explore::targets::{DbmsTarget, MySqlTarget};
//! # use paramfuzz_explore::exec::{CaseLog, ExecOutcome, TestExecutor};
//! # use paramfuzz_explore::action::Assignment;
//! # use paramfuzz_explore::feature::Feature;
//! # struct MyExecutor;
//! # impl TestExecutor for MyExecutor {
//! #     fn run_one(&mut self, _: &Assignment, _: Feature, _: &mut CaseLog<'_>) -> ExecOutcome {
//! #         ExecOutcome::Success
//! #     }
//! # }
//! use std::sync::Arc;
//!
//! let target = MySqlTarget::new();
//! let tables = Arc::new(SharedTables::new(6));
//! let mut controller = Controller::new(
//!     ControllerConfig::default(),
//!     Combo::pairwise(target.list_actions().as_slice()),
//!     Arc::clone(&tables),
//!     Box::new(MyExecutor),
//!     Box::new(FileCoverageMonitor::new("/tmp/mysql-coverage.bin")),
//!     Box::new(UniformFeatureSpace::new(6)),
//! )
//! .unwrap();
//!
//! let summary = controller.run().unwrap();
//! println!("{}", format_summary(&summary));
//! ```
//!
//! # Module Structure
//!
//! - [`action`]: Configuration actions, combos and concrete assignments
//! - [`sampler`]: Weighted random selection with a positive weight floor
//! - [`distill`]: Top-K extraction of the production pool
//! - [`coverage`]: Edge bitmaps, diffing and the coverage monitor
//! - [`feature`]: Query-shape features and their per-action probabilities
//! - [`exec`]: The test-executor seam and reproduction log
//! - [`controller`]: The epsilon-greedy bandit loop
//! - [`tables`]: Weight tables shared across campaigns
//! - [`persist`]: Text formats of the trained tables
//! - [`campaign`]: Background runs, cancellation and status queries
//! - [`checkpoint`]: Resumable controller state
//! - [`targets`]: Per-DBMS parameter catalogues
//! - [`report`]: Human-readable reports and reproduction scripts
//!
//! # Determinism
//!
//! Selection is deterministic given the same seed and the same coverage
//! feedback. The controller uses a seeded RNG and BTreeMaps throughout;
//! only time-slice lengths depend on wall-clock time.

pub mod action;
pub mod campaign;
pub mod checkpoint;
pub mod controller;
pub mod corpus;
pub mod coverage;
pub mod distill;
pub mod exec;
pub mod feature;
pub mod persist;
pub mod report;
pub mod sampler;
pub mod tables;
pub mod targets;

// Re-export main types for convenience
pub use action::{ActionSet, Assignment, Combo, ConfigAction, ParamValue, Scope};
pub use campaign::{Campaign, CampaignError, CancellationToken, StatusReport};
pub use controller::{Controller, ControllerConfig, ControllerError, EpsilonSchedule, Mode};
pub use corpus::{BugReport, Corpus, CorpusStats};
pub use coverage::{CoverageBitmap, CoverageMonitor, FileCoverageMonitor};
pub use distill::{distill, WeightTable};
pub use exec::{CaseLog, ExecOutcome, TestExecutor, Violation};
pub use feature::{Feature, FeatureProbabilities, FeatureSpace};
pub use persist::{CampaignFiles, PersistError};
pub use sampler::{SampleError, WeightedSampler};
pub use tables::SharedTables;
pub use targets::{DbmsTarget, MySqlTarget, TargetRegistry};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        // Verify all main types are accessible
        let _ = CoverageBitmap::new();
        let _ = Corpus::new();
        let _ = SharedTables::default();
        let _ = WeightedSampler::<u32>::new();
        let _ = ControllerConfig::default();
        let _ = CancellationToken::new();
        let _ = TargetRegistry::with_builtin();
    }
}
