//! The adaptive fuzz loop: an epsilon-greedy bandit over configuration combos.
//!
//! Each step picks a combo and a feature, runs a time-sliced episode and
//! credits the coverage it found to the combo:
//!
//! ```text
//! before ── slice ── after1          new1 = diff(before, after1)
//!   new1 > 0:  ── same assignment ── after2   diff(after1, after2)
//!   new1 == 0: ── mutated values  ── after3   diff(after1, after3)
//! ```
//!
//! Every `update_every` steps (Training mode only) the combo weights are
//! recomputed from the accumulated stats, published to the shared tables
//! and the production pool is re-distilled.

use crate::action::{Assignment, Combo, ConfigAction};
use crate::campaign::{CampaignMetrics, CancellationToken};
use crate::checkpoint::{
    save_checkpoint, CheckpointConfig, CheckpointError, ComboEntry, ControllerCheckpoint,
    SerializableBug,
};
use crate::corpus::{BugReport, Corpus};
use crate::coverage::{diff, CoverageBitmap, CoverageMonitor};
use crate::distill::{distill, WeightTable};
use crate::exec::{ExecOutcome, ReproductionLog, TestExecutor};
use crate::feature::{Feature, FeatureSpace, FeatureTally};
use crate::sampler::{SampleError, WeightedSampler, DEFAULT_WEIGHT_FLOOR};
use crate::tables::SharedTables;
use log::{debug, info, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors from the controller.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Combo universe is empty")]
    EmptyUniverse,

    #[error("Sampling error: {0}")]
    Sample(#[from] SampleError),
}

/// Whether the controller learns or only serves the distilled pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Training,
    Production,
}

/// Exploration rates as a function of the step counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpsilonSchedule {
    pub init: f64,
    pub min: f64,
    /// Decay time constant, in steps.
    pub tau: f64,
}

impl EpsilonSchedule {
    /// `max(min, init * exp(-t / tau))`, clamped to `[0, 1]`.
    ///
    /// A non-positive `tau` means no decay budget at all: the rate is `min`.
    pub fn combo_rate(&self, t: u64) -> f64 {
        let decay = if self.tau > 0.0 {
            (-(t as f64) / self.tau).exp()
        } else {
            0.0
        };
        (self.init * decay).max(self.min).clamp(0.0, 1.0)
    }

    /// `min(1, 2 * combo_rate(t))`.
    pub fn feature_rate(&self, t: u64) -> f64 {
        (2.0 * self.combo_rate(t)).min(1.0)
    }
}

impl Default for EpsilonSchedule {
    fn default() -> Self {
        Self {
            init: 0.5,
            min: 0.1,
            tau: 10_000.0,
        }
    }
}

/// Configuration for a controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Master seed.
    pub seed: u64,
    pub mode: Mode,
    pub epsilon: EpsilonSchedule,
    /// Reward amplification.
    pub beta: f64,
    /// Per-step decay of a stale combo's reward.
    pub lambda: f64,
    /// Steps between distribution updates.
    pub update_every: u64,
    /// Wall-clock length of one slice.
    pub slice: Duration,
    /// Production pool size (K).
    pub pool_size: usize,
    /// Production-mode chance of drawing a combo outside the pool.
    pub diversity_prob: f64,
    pub weight_floor: f64,
    /// Stop after this many steps (None = until cancelled).
    pub max_steps: Option<u64>,
    /// Test cases kept for reproduction.
    pub reproduction_history: usize,
    /// Written after every distribution update when set.
    pub checkpoint_path: Option<PathBuf>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            mode: Mode::Training,
            epsilon: EpsilonSchedule::default(),
            beta: 1.0,
            lambda: 0.0001,
            update_every: 1000,
            slice: Duration::from_secs(60),
            pool_size: 20,
            diversity_prob: 0.01,
            weight_floor: DEFAULT_WEIGHT_FLOOR,
            max_steps: None,
            reproduction_history: 64,
            checkpoint_path: None,
        }
    }
}

/// Running counters of one combo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComboStats {
    pub total_exec: u64,
    pub new_edges: u64,
    /// Step of the last discovery (0 = never).
    pub last_discovery: u64,
}

/// `base * (1 + beta * R)` with `R = new_edges / (total_exec + 1) * exp(-lambda * dt)`.
///
/// `dt` counts from the combo's last discovery, or from the global last
/// discovery if the combo never found anything. It saturates at 0.
pub fn dynamic_weight(
    base: f64,
    stats: &ComboStats,
    t: u64,
    global_last_discovery: u64,
    beta: f64,
    lambda: f64,
) -> f64 {
    let reference = if stats.last_discovery > 0 {
        stats.last_discovery
    } else {
        global_last_discovery
    };
    let delta_t = t.saturating_sub(reference) as f64;
    let time_factor = (-lambda * delta_t).exp();
    let reward = stats.new_edges as f64 / (stats.total_exec as f64 + 1.0) * time_factor;
    base * (1.0 + beta * reward)
}

/// Which slice of an episode a report describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceKind {
    Initial,
    /// Second slice on the same assignment after a discovery.
    Extended,
    /// One slice on re-rolled values after a barren first slice.
    Mutated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceReport {
    pub kind: SliceKind,
    pub executions: u64,
    pub new_edges: usize,
}

/// What one committed step did.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step: u64,
    pub combo: Combo,
    pub feature: Feature,
    pub slices: Vec<SliceReport>,
    pub discovered: bool,
    /// ID of the bug raised during this step, if any.
    pub bug: Option<u64>,
}

/// Result of [`Controller::run`].
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub steps: u64,
    pub executions: u64,
    pub discoveries: u64,
    pub total_edges: usize,
    pub bugs: Vec<BugReport>,
    /// Whether the run ended on cancellation rather than `max_steps`.
    pub interrupted: bool,
}

struct SliceRun {
    executions: u64,
    bug: Option<BugReport>,
}

struct Episode {
    slices: Vec<SliceReport>,
    discovered: bool,
    bug: Option<BugReport>,
    coverage: CoverageBitmap,
}

/// The bandit controller.
pub struct Controller {
    config: ControllerConfig,
    universe: Vec<Combo>,
    /// Dynamic distribution over the whole universe.
    weights: WeightedSampler<Combo>,
    /// Distribution over the production pool.
    pool: WeightedSampler<Combo>,
    pool_source: Arc<WeightTable>,
    stats: BTreeMap<Combo, ComboStats>,
    tallies: BTreeMap<ConfigAction, FeatureTally>,
    tables: Arc<SharedTables>,
    executor: Box<dyn TestExecutor>,
    monitor: Box<dyn CoverageMonitor>,
    features: Box<dyn FeatureSpace>,
    rng: ChaCha8Rng,
    step: u64,
    last_discovery: u64,
    repro: ReproductionLog,
    corpus: Corpus,
    metrics: Arc<CampaignMetrics>,
    token: CancellationToken,
}

impl Controller {
    /// Create a controller over `universe`.
    ///
    /// Empty and duplicate combos are dropped. Static weights come from the
    /// shared full table (1.0 when absent), and the pool is distilled once
    /// so exploitation has something to draw from.
    pub fn new(
        config: ControllerConfig,
        universe: impl IntoIterator<Item = Combo>,
        tables: Arc<SharedTables>,
        executor: Box<dyn TestExecutor>,
        monitor: Box<dyn CoverageMonitor>,
        features: Box<dyn FeatureSpace>,
    ) -> Result<Self, ControllerError> {
        let mut seen = BTreeSet::new();
        let universe: Vec<Combo> = universe
            .into_iter()
            .filter(|c| !c.is_empty() && seen.insert(c.clone()))
            .collect();
        if universe.is_empty() {
            return Err(ControllerError::EmptyUniverse);
        }

        tables.seed_full(&universe);

        let mut weights = WeightedSampler::with_floor(config.weight_floor);
        let mut stats = BTreeMap::new();
        let mut tallies = BTreeMap::new();
        for combo in &universe {
            weights.set_weight(combo.clone(), tables.full_weight(combo).unwrap_or(1.0));
            stats.insert(combo.clone(), ComboStats::default());
            for action in combo.iter() {
                tallies
                    .entry(action.clone())
                    .or_insert_with(|| FeatureTally::new(features.dimension()));
            }
        }
        weights.rebuild();

        let pool_source = tables.redistill(config.pool_size);
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        let repro = ReproductionLog::new(config.reproduction_history);

        let mut controller = Self {
            pool: WeightedSampler::with_floor(config.weight_floor),
            pool_source: Arc::new(WeightTable::new()),
            config,
            universe,
            weights,
            stats,
            tallies,
            tables,
            executor,
            monitor,
            features,
            rng,
            step: 0,
            last_discovery: 0,
            repro,
            corpus: Corpus::new(),
            metrics: Arc::new(CampaignMetrics::new()),
            token: CancellationToken::new(),
        };
        controller.rebuild_pool(pool_source);
        Ok(controller)
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    pub fn universe(&self) -> &[Combo] {
        &self.universe
    }

    /// Steps committed so far.
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn last_discovery(&self) -> u64 {
        self.last_discovery
    }

    pub fn stats(&self, combo: &Combo) -> Option<&ComboStats> {
        self.stats.get(combo)
    }

    /// Current dynamic weight of `combo`.
    pub fn weight(&self, combo: &Combo) -> Option<f64> {
        self.weights.weight(combo)
    }

    /// Combos the controller currently exploits from.
    pub fn pool_combos(&self) -> Vec<Combo> {
        self.pool.iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn reproduction_log(&self) -> &ReproductionLog {
        &self.repro
    }

    pub fn metrics(&self) -> Arc<CampaignMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Token that stops the controller between test cases.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Share a token with other components (e.g. a signal handler).
    pub fn set_cancellation_token(&mut self, token: CancellationToken) {
        self.token = token;
    }

    /// Run steps until cancelled or `max_steps` is reached.
    pub fn run(&mut self) -> Result<RunSummary, ControllerError> {
        info!(
            "Controller starting: {:?} mode, {} combos, pool {}, seed {}",
            self.config.mode,
            self.universe.len(),
            self.pool.len(),
            self.config.seed
        );

        let mut interrupted = false;
        loop {
            if let Some(max) = self.config.max_steps {
                if self.step >= max {
                    break;
                }
            }
            match self.step_once()? {
                Some(outcome) => {
                    if outcome.discovered {
                        debug!(
                            "Step {}: {} found new edges ({:?})",
                            outcome.step, outcome.combo, outcome.slices
                        );
                    }
                }
                None => {
                    interrupted = true;
                    break;
                }
            }
        }

        self.write_checkpoint();
        let summary = self.summary(interrupted);
        info!(
            "Controller stopped at step {}: {} executions, {} discoveries, {} bugs",
            summary.steps,
            summary.executions,
            summary.discoveries,
            summary.bugs.len()
        );
        Ok(summary)
    }

    /// Run one full step.
    ///
    /// Returns `Ok(None)` when cancellation was observed; nothing from the
    /// interrupted step is committed.
    pub fn step_once(&mut self) -> Result<Option<StepOutcome>, ControllerError> {
        if self.token.is_cancelled() {
            return Ok(None);
        }
        let t = self.step + 1;

        self.refresh_pool();
        let combo = self.choose_combo(t)?;
        let feature = self.choose_feature(&combo, t);
        self.metrics.set_current_combo(Some(combo.to_string()));

        let Some(episode) = self.execute_with_time_slicing(&combo, feature, t) else {
            debug!("Step {} interrupted, discarded", t);
            return Ok(None);
        };

        self.step = t;
        for slice in &episode.slices {
            self.record_stats(&combo, feature, slice.new_edges, slice.executions, t);
        }
        if episode.discovered {
            self.last_discovery = t;
            self.corpus.record_discovery();
            self.metrics.record_discovery();
        }
        self.corpus.merge_coverage(&episode.coverage);
        self.metrics
            .set_edges(self.corpus.global_coverage().count_bits());

        let bug = episode.bug.map(|bug| {
            warn!("Step {}: oracle violation on {}: {}", t, combo, bug.message);
            self.metrics.record_bug();
            self.corpus.add_bug(bug)
        });

        self.metrics.record_step();
        if self.config.mode == Mode::Training
            && self.config.update_every > 0
            && t % self.config.update_every == 0
        {
            self.update_distribution(t);
        }

        Ok(Some(StepOutcome {
            step: t,
            combo,
            feature,
            slices: episode.slices,
            discovered: episode.discovered,
            bug,
        }))
    }

    fn choose_combo(&mut self, t: u64) -> Result<Combo, ControllerError> {
        match self.config.mode {
            Mode::Training => {
                if self.rng.gen::<f64>() < self.config.epsilon.combo_rate(t) {
                    let index = self.rng.gen_range(0..self.universe.len());
                    return Ok(self.universe[index].clone());
                }
                self.exploit()
            }
            Mode::Production => self.production_combo(),
        }
    }

    /// Serving-time draw: occasionally a combo outside the pool, otherwise
    /// a weighted pool draw.
    pub fn production_combo(&mut self) -> Result<Combo, ControllerError> {
        if self.rng.gen::<f64>() < self.config.diversity_prob {
            let outside: Vec<&Combo> = self
                .universe
                .iter()
                .filter(|c| !self.pool.contains(c))
                .collect();
            if !outside.is_empty() {
                let index = self.rng.gen_range(0..outside.len());
                return Ok(outside[index].clone());
            }
        }
        self.exploit()
    }

    fn exploit(&mut self) -> Result<Combo, ControllerError> {
        let sampler = if self.pool.is_empty() {
            &self.weights
        } else {
            &self.pool
        };
        Ok(sampler.sample(&mut self.rng)?.clone())
    }

    fn choose_feature(&mut self, combo: &Combo, t: u64) -> Feature {
        if self.rng.gen::<f64>() < self.config.epsilon.feature_rate(t) {
            self.features.uniform_sample(&mut self.rng)
        } else {
            self.features.sample_conditional(combo, &mut self.rng)
        }
    }

    fn execute_with_time_slicing(
        &mut self,
        combo: &Combo,
        feature: Feature,
        t: u64,
    ) -> Option<Episode> {
        let assignment = combo.roll(&mut self.rng);

        let before = self.monitor.snapshot();
        let first = self.run_slice(&assignment, feature, t)?;
        let after1 = self.monitor.snapshot();
        let new1 = diff(&before, &after1);

        let mut slices = vec![SliceReport {
            kind: SliceKind::Initial,
            executions: first.executions,
            new_edges: new1,
        }];
        if first.bug.is_some() {
            return Some(Episode {
                slices,
                discovered: new1 > 0,
                bug: first.bug,
                coverage: after1,
            });
        }

        if new1 > 0 {
            let second = self.run_slice(&assignment, feature, t)?;
            let after2 = self.monitor.snapshot();
            slices.push(SliceReport {
                kind: SliceKind::Extended,
                executions: second.executions,
                new_edges: diff(&after1, &after2),
            });
            return Some(Episode {
                slices,
                discovered: true,
                bug: second.bug,
                coverage: after2,
            });
        }

        let mutated = assignment.mutate(&mut self.rng);
        let third = self.run_slice(&mutated, feature, t)?;
        let after3 = self.monitor.snapshot();
        // Against after1, not before: only what mutation adds beyond the plateau.
        let new3 = diff(&after1, &after3);
        slices.push(SliceReport {
            kind: SliceKind::Mutated,
            executions: third.executions,
            new_edges: new3,
        });
        Some(Episode {
            slices,
            discovered: new3 > 0,
            bug: third.bug,
            coverage: after3,
        })
    }

    /// Run test cases until the slice deadline. `None` on cancellation.
    fn run_slice(&mut self, assignment: &Assignment, feature: Feature, t: u64) -> Option<SliceRun> {
        let deadline = Instant::now() + self.config.slice;
        let mut executions = 0;

        while Instant::now() < deadline {
            if self.token.is_cancelled() {
                return None;
            }

            let outcome = {
                let mut case = self.repro.begin_case();
                self.executor.run_one(assignment, feature, &mut case)
            };
            executions += 1;
            self.metrics.record_execution();

            match outcome {
                ExecOutcome::Success => {}
                ExecOutcome::Ignorable => self.metrics.record_ignorable(),
                ExecOutcome::Violation(violation) => {
                    let statements = self
                        .repro
                        .last()
                        .map(|case| case.statements.clone())
                        .unwrap_or_default();
                    let bug = BugReport::new(t, assignment, feature, violation.message, statements);
                    return Some(SliceRun {
                        executions,
                        bug: Some(bug),
                    });
                }
            }
        }

        Some(SliceRun {
            executions,
            bug: None,
        })
    }

    fn record_stats(
        &mut self,
        combo: &Combo,
        feature: Feature,
        new_edges: usize,
        executions: u64,
        t: u64,
    ) {
        let stats = self.stats.entry(combo.clone()).or_default();
        stats.total_exec += executions;
        stats.new_edges += new_edges as u64;
        if new_edges > 0 {
            stats.last_discovery = t;
        }

        if self.config.mode == Mode::Training && new_edges > 0 {
            for action in combo.iter() {
                if let Some(tally) = self.tallies.get_mut(action) {
                    tally.observe(feature, new_edges);
                }
            }
        }
    }

    /// Recompute every combo's weight from its stats, publish, re-distil.
    fn update_distribution(&mut self, t: u64) {
        for combo in &self.universe {
            let stats = self.stats.get(combo).copied().unwrap_or_default();
            let base = self.weights.base_weight(combo);
            let weight = dynamic_weight(
                base,
                &stats,
                t,
                self.last_discovery,
                self.config.beta,
                self.config.lambda,
            );
            self.weights
                .set_weight(combo.clone(), weight.max(self.config.weight_floor));
        }
        self.weights.rebuild();

        self.tables
            .publish_weights(self.weights.iter().map(|(c, w)| (c.clone(), w)));
        let vectors: Vec<_> = self
            .tallies
            .iter()
            .map(|(action, tally)| (action.clone(), tally.probabilities()))
            .collect();
        if let Err(e) = self.tables.publish_feature_vectors(vectors) {
            warn!("Step {}: feature vectors not published: {}", t, e);
        }

        let pool = self.tables.redistill(self.config.pool_size);
        self.rebuild_pool(pool);

        info!(
            "Step {}: updated {} combo weights, pool {}, last discovery at {}",
            t,
            self.weights.len(),
            self.pool.len(),
            self.last_discovery
        );
        self.write_checkpoint();
    }

    /// Pick up a pool distilled by any campaign since the last step.
    fn refresh_pool(&mut self) {
        let current = self.tables.pool();
        if !Arc::ptr_eq(&current, &self.pool_source) {
            self.rebuild_pool(current);
        }
    }

    fn rebuild_pool(&mut self, source: Arc<WeightTable>) {
        self.pool.clear();
        for (combo, &weight) in source.iter() {
            if self.weights.contains(combo) {
                self.pool.set_weight(combo.clone(), weight);
            }
        }
        if self.pool.is_empty() {
            // Shared pool holds none of our combos: use our own top-K.
            let own: WeightTable = self.weights.iter().map(|(c, w)| (c.clone(), w)).collect();
            for (combo, weight) in distill(&own, self.config.pool_size, &WeightTable::new()) {
                self.pool.set_weight(combo, weight);
            }
        }
        self.pool.rebuild();
        self.pool_source = source;
    }

    /// Snapshot of the controller's learning state.
    pub fn checkpoint(&self) -> ControllerCheckpoint {
        ControllerCheckpoint {
            config: CheckpointConfig {
                seed: self.config.seed,
                mode: self.config.mode,
                pool_size: self.config.pool_size,
                update_every: self.config.update_every,
            },
            step: self.step,
            last_discovery: self.last_discovery,
            discoveries: self.corpus.stats().discoveries,
            global_coverage: self.corpus.global_coverage().as_slice().to_vec(),
            combos: self
                .universe
                .iter()
                .map(|combo| ComboEntry {
                    combo: combo.names(),
                    weight: self.weights.base_weight(combo),
                    stats: self.stats.get(combo).copied().unwrap_or_default(),
                })
                .collect(),
            bugs: self.corpus.bugs().iter().map(SerializableBug::from).collect(),
        }
    }

    /// Resume from a checkpoint. Entries for combos outside this
    /// controller's universe are dropped.
    pub fn restore(&mut self, checkpoint: &ControllerCheckpoint) {
        let by_names: BTreeMap<Vec<String>, Combo> = self
            .universe
            .iter()
            .map(|c| (c.names(), c.clone()))
            .collect();
        let actions: BTreeMap<String, ConfigAction> = self
            .universe
            .iter()
            .flat_map(|c| c.iter())
            .map(|a| (a.name().to_string(), a.clone()))
            .collect();

        let mut dropped = 0;
        for entry in &checkpoint.combos {
            match by_names.get(&entry.combo) {
                Some(combo) => {
                    self.weights.set_weight(combo.clone(), entry.weight);
                    self.stats.insert(combo.clone(), entry.stats);
                }
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            warn!("Checkpoint: dropped {} combos not in the universe", dropped);
        }
        self.weights.rebuild();

        self.step = checkpoint.step;
        self.last_discovery = checkpoint.last_discovery;
        let mut coverage = CoverageBitmap::from_slice(&checkpoint.global_coverage);
        coverage.merge(self.corpus.global_coverage());
        self.corpus = Corpus::new();
        self.corpus.merge_coverage(&coverage);
        self.corpus.restore(
            checkpoint
                .bugs
                .iter()
                .map(|b| b.to_report(&actions))
                .collect(),
            checkpoint.discoveries,
        );
        self.metrics.set_edges(coverage.count_bits());

        let own: WeightTable = self.weights.iter().map(|(c, w)| (c.clone(), w)).collect();
        self.rebuild_pool(Arc::new(distill(&own, self.config.pool_size, &WeightTable::new())));
        info!(
            "Restored controller at step {} ({} combos, {} bugs)",
            self.step,
            checkpoint.combos.len() - dropped,
            self.corpus.bugs().len()
        );
    }

    fn write_checkpoint(&self) {
        let Some(path) = &self.config.checkpoint_path else {
            return;
        };
        match save_checkpoint(path, &self.checkpoint()) {
            Ok(()) => debug!("Checkpoint saved to {}", path.display()),
            Err(e) => warn!("Failed to save checkpoint: {}", e),
        }
    }

    /// Load and apply a checkpoint file.
    pub fn restore_from(&mut self, path: impl AsRef<std::path::Path>) -> Result<(), CheckpointError> {
        let checkpoint = crate::checkpoint::load_checkpoint(path)?;
        self.restore(&checkpoint);
        Ok(())
    }

    fn summary(&self, interrupted: bool) -> RunSummary {
        let stats = self.corpus.stats();
        RunSummary {
            steps: self.step,
            executions: self.metrics.executions(),
            discoveries: stats.discoveries,
            total_edges: stats.total_edges,
            bugs: self.corpus.bugs().to_vec(),
            interrupted,
        }
    }
}
