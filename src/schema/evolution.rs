//! Run progress, history and result types.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Per-generation history of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvolutionHistory {
    /// Best fitness per generation.
    pub best_fitness: Vec<f64>,
    /// Average fitness per generation.
    pub avg_fitness: Vec<f64>,
    /// Standard deviation per generation.
    pub fitness_std: Vec<f64>,
    /// Mean pairwise genome distance per generation.
    pub diversity: Vec<f64>,
}

impl EvolutionHistory {
    pub fn len(&self) -> usize {
        self.best_fitness.len()
    }

    pub fn is_empty(&self) -> bool {
        self.best_fitness.is_empty()
    }

    /// Running maximum of `best_fitness`.
    pub fn best_so_far(&self) -> Vec<f64> {
        let mut best = f64::NEG_INFINITY;
        self.best_fitness
            .iter()
            .map(|&f| {
                if f > best {
                    best = f;
                }
                best
            })
            .collect()
    }
}

/// Snapshot handed to progress callbacks.
#[derive(Debug, Clone, Serialize)]
pub struct EvolutionProgress {
    /// Current generation number.
    pub generation: u64,
    /// Generation cap of the run.
    pub max_generations: u64,
    /// Best fitness seen so far.
    pub best_fitness: f64,
    /// Best fitness of the current population.
    pub generation_best: f64,
    /// Average fitness of the current population.
    pub avg_fitness: f64,
    /// Generations since the last improvement.
    pub stagnation_count: usize,
    /// Current immigrant share, when exploration is enabled.
    pub exploration_rate: Option<f64>,
    /// Fitness evaluations so far.
    pub evaluations: u64,
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Stagnant with near-zero fitness variance.
    Converged,
    /// Reached maximum generations.
    MaxGenerations,
    /// Reached target fitness.
    TargetReached,
    /// User cancelled.
    Cancelled,
}

impl StopReason {
    /// Status code reported for this outcome.
    pub fn code(self) -> ErrorCode {
        match self {
            StopReason::Converged | StopReason::TargetReached => ErrorCode::Converged,
            StopReason::MaxGenerations => ErrorCode::MaxGenerations,
            StopReason::Cancelled => ErrorCode::Ok,
        }
    }
}

/// Statistics from a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct EvolutionStats {
    /// Total generations run.
    pub generations: u64,
    /// Total evaluations performed.
    pub total_evaluations: u64,
    /// Best fitness achieved.
    pub best_fitness: f64,
    /// Average fitness of final population.
    pub final_avg_fitness: f64,
    /// Time taken (in seconds).
    pub elapsed_seconds: f64,
    /// Evaluations per second.
    pub evaluations_per_second: f64,
    /// Why evolution stopped.
    pub stop_reason: StopReason,
}

/// Outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct EvolutionResult {
    /// Best genome found, in the domain's text form.
    pub best_genome: String,
    /// Statistics from the run.
    pub stats: EvolutionStats,
    /// Full history for analysis.
    pub history: EvolutionHistory,
}
