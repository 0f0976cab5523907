//! Per-request wall-clock budget with per-stage sub-budgets.
//!
//! Every request owns one [`Budget`]. The orchestrator consults
//! [`Budget::can_run`] before each stage and passes
//! [`Budget::timeout_for`] down as the stage deadline, so no awaited
//! operation can outlive the request's total envelope.

use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Pipeline stages that receive a sub-budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Cache,
    FastPath,
    SlowPath,
}

/// Stage sub-budgets as fractions of the total envelope.
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    pub total: Duration,
    pub cache: Duration,
    pub fastpath: Duration,
    pub slowpath: Duration,
    /// Below this much remaining the request short-circuits.
    pub min_remaining: Duration,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            total: Duration::from_secs_f64(12.0),
            cache: Duration::from_secs_f64(0.5),
            fastpath: Duration::from_secs_f64(4.0),
            slowpath: Duration::from_secs_f64(6.5),
            min_remaining: Duration::from_secs_f64(1.0),
        }
    }
}

impl BudgetConfig {
    /// Validate that the stage sub-budgets fit inside the total.
    pub fn validate(&self) -> Result<()> {
        if self.cache + self.fastpath + self.slowpath > self.total {
            bail!(
                "stage budgets exceed total: cache {:?} + fastpath {:?} + slowpath {:?} > {:?}",
                self.cache,
                self.fastpath,
                self.slowpath,
                self.total
            );
        }
        Ok(())
    }
}

/// Tracks elapsed time for one request and hands out stage deadlines.
#[derive(Debug)]
pub struct Budget {
    config: BudgetConfig,
    started: Option<Instant>,
    checkpoints: BTreeMap<String, f64>,
}

impl Budget {
    /// Build a budget from a validated config.
    pub fn new(config: BudgetConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            started: None,
            checkpoints: BTreeMap::new(),
        })
    }

    /// Start the clock. Clears any checkpoints from a previous run.
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
        self.checkpoints.clear();
    }

    /// Seconds elapsed since `start()`. Zero before start.
    pub fn elapsed(&self) -> f64 {
        self.started.map_or(0.0, |t| t.elapsed().as_secs_f64())
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed() * 1000.0
    }

    /// Seconds remaining in the total envelope. Never negative.
    pub fn remaining(&self) -> Duration {
        self.config
            .total
            .saturating_sub(Duration::from_secs_f64(self.elapsed()))
    }

    /// The configured sub-budget for a stage, independent of elapsed time.
    pub fn stage_default(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Cache => self.config.cache,
            Stage::FastPath => self.config.fastpath,
            Stage::SlowPath => self.config.slowpath,
        }
    }

    /// Deadline to pass down for a stage: `min(stage_default, remaining)`.
    pub fn timeout_for(&self, stage: Stage) -> Duration {
        self.stage_default(stage).min(self.remaining())
    }

    /// Strict gate: a stage only starts if its full default still fits,
    /// so a partially consumed stage is never entered.
    pub fn can_run(&self, stage: Stage) -> bool {
        self.remaining() >= self.stage_default(stage)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() < self.config.min_remaining
    }

    /// Record elapsed seconds under a named event for the final report.
    pub fn checkpoint(&mut self, name: &str) {
        self.checkpoints.insert(name.to_string(), self.elapsed());
    }

    /// Widen the FastPath sub-budget for a broad query. The remaining
    /// envelope is unchanged; SlowPath is disabled by the orchestrator,
    /// not here.
    pub fn widen_fastpath(&mut self, timeout: Duration) {
        self.config.fastpath = timeout.min(self.config.total);
    }

    /// Snapshot of budget usage for logging and diagnostics.
    pub fn report(&self) -> BudgetReport {
        BudgetReport {
            total: self.config.total.as_secs_f64(),
            elapsed: self.elapsed(),
            remaining: self.remaining().as_secs_f64(),
            is_exhausted: self.is_exhausted(),
            checkpoints: self.checkpoints.clone(),
        }
    }

    pub fn slowpath_default(&self) -> Duration {
        self.config.slowpath
    }
}

/// Budget usage snapshot.
#[derive(Debug, Clone)]
pub struct BudgetReport {
    pub total: f64,
    pub elapsed: f64,
    pub remaining: f64,
    pub is_exhausted: bool,
    pub checkpoints: BTreeMap<String, f64>,
}
