//! Run statistics: best-ever tracking, stagnation and convergence detection.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{EvoError, Result};

use super::population::{FitnessDistribution, Population};

fn default_improvement_threshold() -> f64 {
    0.001
}

fn default_stagnation_generations() -> usize {
    50
}

fn default_diversity_threshold() -> f64 {
    1.0
}

/// Thresholds for [`RunStats`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Smallest best-fitness gain that counts as an improvement.
    #[serde(default = "default_improvement_threshold")]
    pub improvement_threshold: f64,
    /// Generations without improvement before the run counts as stagnant.
    #[serde(default = "default_stagnation_generations")]
    pub stagnation_generations: usize,
    /// Fitness variance above which the population counts as diverse.
    #[serde(default = "default_diversity_threshold")]
    pub diversity_threshold: f64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            improvement_threshold: default_improvement_threshold(),
            stagnation_generations: default_stagnation_generations(),
            diversity_threshold: default_diversity_threshold(),
        }
    }
}

/// Variance below which a stagnant run is considered converged.
pub const CONVERGENCE_VARIANCE: f64 = 0.01;

/// Rolling statistics over the generations of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    #[serde(skip)]
    config: StatsConfig,
    #[serde(skip)]
    started: Instant,

    pub generation: u64,
    pub best_fitness: f64,
    pub avg_fitness: f64,
    pub worst_fitness: f64,
    pub best_fitness_ever: f64,
    pub worst_fitness_ever: f64,
    /// Gain of the last improvement divided by its generation.
    pub improvement_rate: f64,
    pub fitness_variance: f64,
    pub diverse: bool,
    /// Consecutive updates without an improvement.
    pub stagnation_count: usize,
    pub distribution: FitnessDistribution,

    pub total_evaluations: u64,
    pub mutations: u64,
    pub crossovers: u64,

    pub elapsed_ms: f64,
    pub generation_time_ms: f64,
}

impl RunStats {
    pub fn new(config: StatsConfig) -> Self {
        Self {
            config,
            started: Instant::now(),
            generation: 0,
            best_fitness: f64::NEG_INFINITY,
            avg_fitness: f64::NAN,
            worst_fitness: f64::INFINITY,
            best_fitness_ever: f64::NEG_INFINITY,
            worst_fitness_ever: f64::INFINITY,
            improvement_rate: 0.0,
            fitness_variance: 0.0,
            diverse: false,
            stagnation_count: 0,
            distribution: FitnessDistribution::default(),
            total_evaluations: 0,
            mutations: 0,
            crossovers: 0,
            elapsed_ms: 0.0,
            generation_time_ms: 0.0,
        }
    }

    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    /// Fold in the current state of `population`, whose cached statistics
    /// must be up to date.
    pub fn update(&mut self, population: &Population) {
        let elapsed = self.started.elapsed().as_secs_f64() * 1000.0;
        self.generation_time_ms = elapsed - self.elapsed_ms;
        self.elapsed_ms = elapsed;

        self.generation = population.generation();
        self.best_fitness = population.best_fitness();
        self.avg_fitness = population.avg_fitness();
        self.worst_fitness = population.worst_fitness();

        let gain = self.best_fitness - self.best_fitness_ever;
        let first = self.best_fitness_ever == f64::NEG_INFINITY && self.best_fitness.is_finite();
        if first || gain > self.config.improvement_threshold {
            if !first && self.generation > 0 {
                self.improvement_rate = gain / self.generation as f64;
            }
            self.best_fitness_ever = self.best_fitness;
            self.stagnation_count = 0;
        } else {
            if self.best_fitness > self.best_fitness_ever {
                self.best_fitness_ever = self.best_fitness;
            }
            self.stagnation_count += 1;
        }
        self.worst_fitness_ever = self.worst_fitness_ever.min(self.worst_fitness);

        self.distribution = population.fitness_distribution();
        self.fitness_variance = self.distribution.stddev * self.distribution.stddev;
        self.diverse = self.fitness_variance > self.config.diversity_threshold;
    }

    pub fn record_operations(&mut self, evaluations: u64, mutations: u64, crossovers: u64) {
        self.total_evaluations += evaluations;
        self.mutations += mutations;
        self.crossovers += crossovers;
    }

    pub fn is_stagnant(&self) -> bool {
        self.stagnation_count >= self.config.stagnation_generations
    }

    /// Stagnant and with near-zero fitness variance.
    pub fn is_converged(&self) -> bool {
        self.is_stagnant() && self.fitness_variance < CONVERGENCE_VARIANCE
    }

    /// Evaluations per second since the stats were created.
    pub fn throughput(&self) -> f64 {
        if self.elapsed_ms <= 0.0 {
            0.0
        } else {
            self.total_evaluations as f64 / (self.elapsed_ms / 1000.0)
        }
    }

    /// Pretty JSON snapshot. Non-finite values serialize as `null`.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| EvoError::invalid_arg(e.to_string()))
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new(StatsConfig::default())
    }
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "gen {} best={:.6} avg={:.6} worst={:.6} best_ever={:.6} var={:.6}",
            self.generation,
            self.best_fitness,
            self.avg_fitness,
            self.worst_fitness,
            self.best_fitness_ever,
            self.fitness_variance
        )?;
        if self.is_converged() {
            write!(f, " [converged]")
        } else if self.is_stagnant() {
            write!(f, " [stagnant]")
        } else {
            Ok(())
        }
    }
}
