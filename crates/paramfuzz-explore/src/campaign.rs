//! Background campaign runner with cooperative cancellation and status.
//!
//! A [`Campaign`] owns at most one running controller thread. The
//! controller publishes progress through [`CampaignMetrics`] (atomics, no
//! locks on the hot path) and polls a [`CancellationToken`] between test
//! cases, so `stop()` returns within one test-case latency.

use crate::controller::{Controller, ControllerError, RunSummary};
use crate::tables::SharedTables;
use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use thiserror::Error;

/// Errors from campaign lifecycle operations.
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Campaign {0} is already running")]
    AlreadyRunning(String),

    #[error("Campaign {0} is not running")]
    NotRunning(String),

    #[error("Controller error: {0}")]
    Controller(#[from] ControllerError),

    #[error("Failed to spawn controller thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Controller thread panicked")]
    Panicked,
}

/// A cancellation token that can be shared across threads.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Reset the token for reuse.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
    }
}

/// Live counters of one controller.
#[derive(Debug)]
pub struct CampaignMetrics {
    steps: AtomicU64,
    executions: AtomicU64,
    ignorable: AtomicU64,
    discoveries: AtomicU64,
    bugs: AtomicU64,
    edges: AtomicU64,
    current_combo: RwLock<Option<String>>,
}

impl CampaignMetrics {
    pub fn new() -> Self {
        Self {
            steps: AtomicU64::new(0),
            executions: AtomicU64::new(0),
            ignorable: AtomicU64::new(0),
            discoveries: AtomicU64::new(0),
            bugs: AtomicU64::new(0),
            edges: AtomicU64::new(0),
            current_combo: RwLock::new(None),
        }
    }

    pub fn record_step(&self) {
        self.steps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_execution(&self) {
        self.executions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ignorable(&self) {
        self.ignorable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discovery(&self) {
        self.discoveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bug(&self) {
        self.bugs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_edges(&self, edges: usize) {
        self.edges.store(edges as u64, Ordering::Relaxed);
    }

    pub fn set_current_combo(&self, combo: Option<String>) {
        *self.current_combo.write() = combo;
    }

    pub fn steps(&self) -> u64 {
        self.steps.load(Ordering::Relaxed)
    }

    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    pub fn ignorable(&self) -> u64 {
        self.ignorable.load(Ordering::Relaxed)
    }

    pub fn discoveries(&self) -> u64 {
        self.discoveries.load(Ordering::Relaxed)
    }

    pub fn bugs(&self) -> u64 {
        self.bugs.load(Ordering::Relaxed)
    }

    pub fn edges(&self) -> u64 {
        self.edges.load(Ordering::Relaxed)
    }

    pub fn current_combo(&self) -> Option<String> {
        self.current_combo.read().clone()
    }
}

impl Default for CampaignMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// One production-pool entry in a status report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComboWeight {
    pub combo: Vec<String>,
    pub weight: f64,
}

/// Snapshot answered to a status query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub name: String,
    pub running: bool,
    pub steps: u64,
    pub executions: u64,
    pub ignorable: u64,
    /// Executions per second since the previous status query.
    pub throughput: f64,
    pub discoveries: u64,
    pub edges: u64,
    pub bugs: u64,
    pub current_combo: Option<String>,
    /// Production pool, heaviest first.
    pub top_combos: Vec<ComboWeight>,
}

struct Running {
    handle: JoinHandle<Result<RunSummary, ControllerError>>,
    token: CancellationToken,
}

struct Throughput {
    at: Instant,
    executions: u64,
}

/// A named fuzzing campaign against one target.
pub struct Campaign {
    name: String,
    tables: Arc<SharedTables>,
    metrics: Arc<CampaignMetrics>,
    running: Option<Running>,
    last_poll: Mutex<Throughput>,
}

impl Campaign {
    pub fn new(name: impl Into<String>, tables: Arc<SharedTables>) -> Self {
        Self {
            name: name.into(),
            tables,
            metrics: Arc::new(CampaignMetrics::new()),
            running: None,
            last_poll: Mutex::new(Throughput {
                at: Instant::now(),
                executions: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the controller thread is still alive.
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .map_or(false, |r| !r.handle.is_finished())
    }

    /// Run `controller` on a background thread.
    pub fn start(&mut self, controller: Controller) -> Result<(), CampaignError> {
        if self.is_running() {
            return Err(CampaignError::AlreadyRunning(self.name.clone()));
        }
        if let Some(finished) = self.running.take() {
            if let Err(e) = Self::join(finished) {
                warn!("Previous run of campaign {} failed: {}", self.name, e);
            }
        }

        let token = controller.cancellation_token();
        token.reset();
        self.metrics = controller.metrics();
        *self.last_poll.lock() = Throughput {
            at: Instant::now(),
            executions: self.metrics.executions(),
        };

        let mut controller = controller;
        let handle = std::thread::Builder::new()
            .name(format!("campaign-{}", self.name))
            .spawn(move || controller.run())?;

        info!("Campaign {} started", self.name);
        self.running = Some(Running { handle, token });
        Ok(())
    }

    /// Cancel the controller and wait for it to finish its current test case.
    pub fn stop(&mut self) -> Result<RunSummary, CampaignError> {
        let running = self
            .running
            .take()
            .ok_or_else(|| CampaignError::NotRunning(self.name.clone()))?;
        running.token.cancel();
        let summary = Self::join(running)?;
        self.metrics.set_current_combo(None);
        info!(
            "Campaign {} stopped after {} steps, {} bugs",
            self.name,
            summary.steps,
            summary.bugs.len()
        );
        Ok(summary)
    }

    fn join(running: Running) -> Result<RunSummary, CampaignError> {
        match running.handle.join() {
            Ok(result) => Ok(result?),
            Err(_) => Err(CampaignError::Panicked),
        }
    }

    /// Current progress and the `top_n` heaviest production combos.
    pub fn status(&self, top_n: usize) -> StatusReport {
        let executions = self.metrics.executions();
        let throughput = {
            let mut last = self.last_poll.lock();
            let now = Instant::now();
            let elapsed = now.duration_since(last.at).as_secs_f64();
            let delta = executions.saturating_sub(last.executions);
            *last = Throughput {
                at: now,
                executions,
            };
            if elapsed > 0.0 {
                delta as f64 / elapsed
            } else {
                0.0
            }
        };

        let top_combos = self
            .tables
            .top_pool(top_n)
            .into_iter()
            .map(|(combo, weight)| ComboWeight {
                combo: combo.names(),
                weight,
            })
            .collect();

        StatusReport {
            name: self.name.clone(),
            running: self.is_running(),
            steps: self.metrics.steps(),
            executions,
            ignorable: self.metrics.ignorable(),
            throughput,
            discoveries: self.metrics.discoveries(),
            edges: self.metrics.edges(),
            bugs: self.metrics.bugs(),
            current_combo: self.metrics.current_combo(),
            top_combos,
        }
    }
}

impl Drop for Campaign {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.token.cancel();
            if let Err(e) = Self::join(running) {
                warn!("Campaign {} ended with error: {}", self.name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionSet, Assignment, Combo, ConfigAction, ParamValue, Scope};
    use crate::controller::ControllerConfig;
    use crate::coverage::{CoverageBitmap, CoverageMonitor};
    use crate::exec::{CaseLog, ExecOutcome, TestExecutor, Violation};
    use crate::feature::{Feature, UniformFeatureSpace};
    use std::time::Duration;

    /// Every snapshot covers one more edge than the previous one.
    struct GrowingMonitor {
        edges: usize,
    }

    impl CoverageMonitor for GrowingMonitor {
        fn snapshot(&mut self) -> CoverageBitmap {
            self.edges += 1;
            let mut bitmap = CoverageBitmap::new();
            for i in 0..self.edges {
                bitmap.record_hit(i);
            }
            bitmap
        }
    }

    /// Raises a violation on every `fail_every`-th case (never when 0).
    struct CountingExecutor {
        fail_every: u64,
        runs: u64,
    }

    impl TestExecutor for CountingExecutor {
        fn run_one(
            &mut self,
            _assignment: &Assignment,
            _feature: Feature,
            log: &mut CaseLog<'_>,
        ) -> ExecOutcome {
            self.runs += 1;
            log.record(format!("SELECT {}", self.runs));
            if self.fail_every > 0 && self.runs % self.fail_every == 0 {
                ExecOutcome::Violation(Violation::new("row count mismatch"))
            } else {
                ExecOutcome::Success
            }
        }
    }

    fn controller(tables: &Arc<SharedTables>, fail_every: u64, max_steps: Option<u64>) -> Controller {
        controller_over(
            tables,
            &["autocommit", "big_tables", "sql_log_off"],
            fail_every,
            max_steps,
        )
    }

    fn controller_over(
        tables: &Arc<SharedTables>,
        names: &[&str],
        fail_every: u64,
        max_steps: Option<u64>,
    ) -> Controller {
        let actions = ActionSet::new(names.iter().map(|n| {
            ConfigAction::new(*n, &[Scope::Session], |_| ParamValue::Bool(true)).unwrap()
        }));
        let config = ControllerConfig {
            slice: Duration::from_millis(2),
            update_every: 2,
            pool_size: 2,
            max_steps,
            ..Default::default()
        };
        Controller::new(
            config,
            Combo::pairwise(actions.as_slice()),
            Arc::clone(tables),
            Box::new(CountingExecutor { fail_every, runs: 0 }),
            Box::new(GrowingMonitor { edges: 0 }),
            Box::new(UniformFeatureSpace::new(2)),
        )
        .unwrap()
    }

    fn wait_until_finished(campaign: &Campaign) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while campaign.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_cancellation_token() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        clone.reset();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_metrics_counters() {
        let metrics = CampaignMetrics::new();
        metrics.record_execution();
        metrics.record_execution();
        metrics.record_ignorable();
        metrics.record_bug();
        metrics.set_current_combo(Some("autocommit,big_tables".into()));

        assert_eq!(metrics.executions(), 2);
        assert_eq!(metrics.ignorable(), 1);
        assert_eq!(metrics.bugs(), 1);
        assert_eq!(
            metrics.current_combo().as_deref(),
            Some("autocommit,big_tables")
        );
    }

    #[test]
    fn test_stop_when_idle() {
        let mut campaign = Campaign::new("idle", Arc::new(SharedTables::default()));
        assert!(!campaign.is_running());
        assert!(matches!(
            campaign.stop(),
            Err(CampaignError::NotRunning(_))
        ));
    }

    #[test]
    fn test_status_when_idle() {
        let campaign = Campaign::new("idle", Arc::new(SharedTables::default()));
        let status = campaign.status(5);
        assert!(!status.running);
        assert_eq!(status.executions, 0);
        assert_eq!(status.throughput, 0.0);
        assert!(status.top_combos.is_empty());
    }

    #[test]
    fn test_start_status_stop() {
        let tables = Arc::new(SharedTables::new(2));
        let mut campaign = Campaign::new("mysql", Arc::clone(&tables));
        campaign.start(controller(&tables, 0, None)).unwrap();
        assert!(campaign.is_running());

        assert!(matches!(
            campaign.start(controller(&tables, 0, None)),
            Err(CampaignError::AlreadyRunning(_))
        ));

        std::thread::sleep(Duration::from_millis(50));
        let status = campaign.status(5);
        assert!(status.running);
        assert!(status.executions > 0);
        assert!(status.top_combos.len() <= 2);

        let summary = campaign.stop().unwrap();
        assert!(summary.interrupted);
        assert!(!campaign.is_running());
        assert!(campaign.status(5).current_combo.is_none());
    }

    #[test]
    fn test_violations_become_bugs() {
        let tables = Arc::new(SharedTables::new(2));
        let mut campaign = Campaign::new("mysql", Arc::clone(&tables));
        campaign.start(controller(&tables, 5, Some(3))).unwrap();
        wait_until_finished(&campaign);
        assert!(!campaign.is_running());

        let status = campaign.status(5);
        assert_eq!(status.steps, 3);
        assert_eq!(status.bugs, 3);

        let summary = campaign.stop().unwrap();
        assert!(!summary.interrupted);
        assert_eq!(summary.bugs.len(), 3);
        assert_eq!(summary.bugs[0].message, "row count mismatch");
        assert_eq!(summary.bugs[0].statements, vec!["SELECT 5".to_string()]);
    }

    #[test]
    fn test_restart_after_finish() {
        let tables = Arc::new(SharedTables::new(2));
        let mut campaign = Campaign::new("mysql", Arc::clone(&tables));
        campaign.start(controller(&tables, 0, Some(1))).unwrap();
        wait_until_finished(&campaign);

        campaign.start(controller(&tables, 0, Some(1))).unwrap();
        wait_until_finished(&campaign);
        let summary = campaign.stop().unwrap();
        assert_eq!(summary.steps, 1);
    }

    #[test]
    fn test_campaigns_share_tables() {
        let tables = Arc::new(SharedTables::new(2));
        let mut first = Campaign::new("first", Arc::clone(&tables));
        let mut second = Campaign::new("second", Arc::clone(&tables));
        let first_names = ["autocommit", "big_tables", "sql_log_off"];
        let second_names = ["foreign_key_checks", "unique_checks", "sql_buffer_result"];

        first.start(controller(&tables, 0, Some(6))).unwrap();
        second
            .start(controller_over(&tables, &second_names, 0, Some(6)))
            .unwrap();
        wait_until_finished(&first);
        wait_until_finished(&second);

        assert_eq!(first.stop().unwrap().steps, 6);
        assert_eq!(second.stop().unwrap().steps, 6);

        // Both universes land in the one full table.
        assert_eq!(tables.full_len(), 6);
        let pool = tables.pool();
        assert!(!pool.is_empty());
        assert!(pool.len() <= 2);
        for combo in pool.keys() {
            let names = combo.names();
            let known = names.iter().all(|n| first_names.contains(&n.as_str()))
                || names.iter().all(|n| second_names.contains(&n.as_str()));
            assert!(known, "pool holds a combo from neither campaign: {}", combo);
        }
    }
}
