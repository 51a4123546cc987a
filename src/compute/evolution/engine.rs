//! The generational loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::checkpoint::{Checkpoint, CheckpointManager, exact_f64};
use crate::compute::gpu::GpuAccelerator;
use crate::compute::operators::{BreedingPlan, BreedingReport, breed_generation_with};
use crate::compute::{
    BatchEvaluator, Domain, DomainFitness, DomainRegistry, EvoRng, ExplorationController, Genome,
    Individual, NegativeLearning, PARALLEL_THRESHOLD, Population, RunStats, SeverityThresholds,
};
use crate::error::{EvoError, Result};
use crate::schema::{
    EngineConfig, EvolutionHistory, EvolutionProgress, EvolutionResult, EvolutionStats,
    ExplorationConfig, MetaParams, NegativeConfig, StopReason,
};

/// Stream index for the initial population; generation streams use the
/// generation number.
const INIT_STREAM: u64 = u64::MAX;

/// Individuals sampled when estimating genome diversity.
const DIVERSITY_SAMPLE: usize = 64;

/// Drives a population of one domain through evaluate, select, breed.
///
/// Each generation draws from `EvoRng::derive(seed, generation)`, so a run
/// restored from a checkpoint continues exactly as the original would have.
pub struct EvolutionEngine {
    config: EngineConfig,
    domain: Arc<dyn Domain>,
    population: Population,
    evaluator: BatchEvaluator,
    exploration: Option<ExplorationController>,
    negative: Option<NegativeLearning>,
    stats: RunStats,
    history: EvolutionHistory,
    best: Option<Individual>,
    checkpoints: Option<CheckpointManager>,
    meta: Option<MetaParams>,
    cancelled: Arc<AtomicBool>,
    initialized: bool,
}

impl EvolutionEngine {
    /// Validate `config` and prepare an engine for `domain`.
    pub fn new(config: EngineConfig, domain: Arc<dyn Domain>) -> Result<Self> {
        config.validate()?;
        let evaluator = build_evaluator(&config)?;
        Self::with_evaluator(config, domain, evaluator)
    }

    /// Like [`EvolutionEngine::new`] but with a caller-supplied evaluator,
    /// e.g. one shared across many short runs.
    pub fn with_evaluator(
        config: EngineConfig,
        domain: Arc<dyn Domain>,
        evaluator: BatchEvaluator,
    ) -> Result<Self> {
        config.validate()?;

        let genome_size = config.evolution.genome_size;
        if genome_size != 0 && genome_size != domain.genome_size() {
            return Err(EvoError::ConfigInvalid(format!(
                "evolution.genome_size {} does not match domain {:?} ({} bytes)",
                genome_size,
                domain.name(),
                domain.genome_size()
            )));
        }

        let exploration = config
            .exploration
            .as_ref()
            .map(build_exploration)
            .transpose()?;
        let negative = config
            .negative
            .as_ref()
            .map(build_negative)
            .transpose()?;
        let checkpoints = if config.checkpoint.enabled {
            Some(CheckpointManager::new(config.checkpoint.clone())?)
        } else {
            None
        };

        Ok(Self {
            population: Population::new(config.evolution.population_size)?,
            stats: RunStats::new(config.stats),
            config,
            domain,
            evaluator,
            exploration,
            negative,
            history: EvolutionHistory::default(),
            best: None,
            checkpoints,
            meta: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            initialized: false,
        })
    }

    /// Look up `config.evolution.domain` in `registry`.
    pub fn from_registry(config: EngineConfig, registry: &DomainRegistry) -> Result<Self> {
        let domain = registry.require(&config.evolution.domain)?;
        Self::new(config, domain)
    }

    /// Meta-parameters recorded in this run's checkpoints.
    pub fn with_meta(mut self, meta: MetaParams) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Take the evaluator back out.
    pub fn into_evaluator(self) -> BatchEvaluator {
        self.evaluator
    }

    /// Get cancellation handle.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn domain(&self) -> &Arc<dyn Domain> {
        &self.domain
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn history(&self) -> &EvolutionHistory {
        &self.history
    }

    pub fn evaluator(&self) -> &BatchEvaluator {
        &self.evaluator
    }

    pub fn exploration(&self) -> Option<&ExplorationController> {
        self.exploration.as_ref()
    }

    pub fn negative(&self) -> Option<&NegativeLearning> {
        self.negative.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.population.generation()
    }

    /// Best individual seen over the whole run.
    pub fn best(&self) -> Option<&Individual> {
        self.best.as_ref()
    }

    pub fn best_fitness(&self) -> f64 {
        self.best.as_ref().map_or(f64::NEG_INFINITY, |b| b.fitness)
    }

    /// Fill the population with random genomes and reset run state.
    pub fn initialize(&mut self) -> Result<()> {
        self.population.clear();
        let size = self.domain.genome_size();
        let mut rng = EvoRng::derive(self.config.evolution.seed, INIT_STREAM);
        for _ in 0..self.config.evolution.population_size {
            let mut genome = Genome::new(size)?;
            genome.set_size(size)?;
            self.domain.random_init(&mut genome, &mut rng)?;
            self.population.add(&genome, f64::NAN)?;
        }

        self.stats = RunStats::new(self.config.stats);
        self.history = EvolutionHistory::default();
        self.best = None;
        if let Some(exploration) = &mut self.exploration {
            exploration.reset();
        }
        self.negative = self
            .config
            .negative
            .as_ref()
            .map(build_negative)
            .transpose()?;
        self.initialized = true;

        debug!(
            "Initialized {} genomes of {} bytes for domain {:?}",
            self.population.len(),
            size,
            self.domain.name()
        );
        Ok(())
    }

    /// Score every unevaluated individual. Small batches run inline; larger
    /// ones go through the batch evaluator.
    pub fn evaluate(&mut self) -> Result<usize> {
        let pending = self.population.unevaluated();
        if pending.is_empty() {
            self.population.update_stats();
            return Ok(0);
        }

        let count = if pending.len() <= PARALLEL_THRESHOLD && !self.evaluator.accelerator_enabled()
        {
            let domain = &self.domain;
            self.population.evaluate(|g| domain.fitness(g))
        } else {
            let mut scores = vec![0.0; pending.len()];
            let genomes: Vec<&[u8]> = pending
                .iter()
                .filter_map(|&i| self.population.get(i))
                .map(|ind| ind.genome.as_bytes())
                .collect();
            self.evaluator
                .evaluate(&genomes, &mut scores, &DomainFitness(self.domain.as_ref()))?;

            for (&i, &score) in pending.iter().zip(&scores) {
                if let Some(ind) = self.population.get_mut(i) {
                    ind.fitness = score;
                }
            }
            self.population.update_stats();
            pending.len()
        };

        if let Some(negative) = &mut self.negative {
            let generation = self.population.generation();
            negative.set_generation(generation);
            for &i in &pending {
                if let Some(ind) = self.population.get(i) {
                    negative.record_failure(ind.genome.as_bytes(), ind.fitness, generation);
                }
            }
        }

        self.stats.record_operations(count as u64, 0, 0);
        Ok(count)
    }

    /// Breeding parameters for the next step.
    pub fn breeding_plan(&self) -> BreedingPlan {
        let immigrant_rate = self
            .exploration
            .as_ref()
            .map_or(self.config.selection.immigrant_rate, |e| e.rate());
        BreedingPlan {
            target_size: self.config.evolution.population_size,
            tournament_size: self.config.selection.tournament_size,
            elite_count: self.config.selection.elite_count,
            culling_ratio: self.config.selection.culling_ratio,
            crossover_rate: self.config.crossover.rate,
            mutation_rate: self.config.mutation.rate,
            immigrant_rate,
        }
    }

    /// Replace the population with the next generation. The new individuals
    /// are unevaluated apart from carried-over elites. With negative learning
    /// on, tournaments rank parents by penalized fitness.
    pub fn step_generation(&mut self) -> Result<BreedingReport> {
        let generation = self.population.generation();
        let mut rng = EvoRng::derive(self.config.evolution.seed, generation);
        let plan = self.breeding_plan();
        let negative = self.negative.as_ref();
        let report = breed_generation_with(
            &mut self.population,
            &plan,
            self.domain.as_ref(),
            &mut rng,
            |ind| match negative {
                Some(negative) => negative.adjust_fitness(ind.genome.as_bytes(), ind.fitness),
                None => ind.fitness,
            },
        )?;
        self.population.increment_generation();
        self.stats
            .record_operations(0, report.mutations, report.crossovers);
        Ok(report)
    }

    /// Fold the freshly evaluated population into stats, history, best-ever
    /// and the exploration controller.
    fn record_generation(&mut self) {
        self.stats.update(&self.population);

        if let Some(best) = self.population.best()
            && self.best.as_ref().is_none_or(|b| best.fitness > b.fitness)
        {
            self.best = Some(best.clone());
        }

        let generation = self.population.generation();
        let best_fitness = self.population.best_fitness();
        self.history.best_fitness.push(best_fitness);
        self.history.avg_fitness.push(self.population.avg_fitness());
        self.history
            .fitness_std
            .push(self.stats.distribution.stddev);
        self.history
            .diversity
            .push(sampled_diversity(&self.population, self.domain.as_ref()));

        if let Some(exploration) = &mut self.exploration {
            exploration.update(generation, best_fitness);
        }

        debug!("{}", self.stats);
    }

    /// Current progress.
    pub fn progress(&self) -> EvolutionProgress {
        EvolutionProgress {
            generation: self.population.generation(),
            max_generations: self.config.evolution.max_generations,
            best_fitness: self.best_fitness(),
            generation_best: self.population.best_fitness(),
            avg_fitness: self.population.avg_fitness(),
            stagnation_count: self.stats.stagnation_count,
            exploration_rate: self.exploration.as_ref().map(|e| e.rate()),
            evaluations: self.stats.total_evaluations,
        }
    }

    /// Check if evolution should stop.
    pub fn should_stop(&self) -> Option<StopReason> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Some(StopReason::Cancelled);
        }

        if let Some(target) = self.config.evolution.target_fitness
            && self.best_fitness() >= target
        {
            return Some(StopReason::TargetReached);
        }

        if self.population.generation() >= self.config.evolution.max_generations {
            return Some(StopReason::MaxGenerations);
        }

        if self.stats.is_converged() {
            return Some(StopReason::Converged);
        }

        None
    }

    /// Run evolution with progress callback. Continues from the current
    /// state if the engine was already initialized or restored.
    pub fn run_with_callback<F>(&mut self, mut callback: F) -> Result<EvolutionResult>
    where
        F: FnMut(&EvolutionProgress),
    {
        let start_time = Instant::now();

        if !self.initialized {
            self.initialize()?;
            self.evaluate()?;
            self.record_generation();
            callback(&self.progress());
        }

        info!(
            "Evolving {:?} from generation {}: population {}, max {} generations",
            self.domain.name(),
            self.population.generation(),
            self.population.len(),
            self.config.evolution.max_generations
        );

        let stop_reason = loop {
            if let Some(reason) = self.should_stop() {
                break reason;
            }

            self.step_generation()?;
            self.evaluate()?;
            self.record_generation();
            self.auto_checkpoint();

            callback(&self.progress());
        };

        info!(
            "Stopped at generation {} ({:?}): best {:.6}",
            self.population.generation(),
            stop_reason,
            self.best_fitness()
        );
        if let Some(summary) = self.domain.statistics(&self.population) {
            info!("{}", summary);
        }

        Ok(self.result(stop_reason, start_time.elapsed()))
    }

    /// Run evolution (blocking).
    pub fn run(&mut self) -> Result<EvolutionResult> {
        self.run_with_callback(|_| {})
    }

    fn result(&self, stop_reason: StopReason, elapsed: Duration) -> EvolutionResult {
        let elapsed = elapsed.as_secs_f64();
        let total_evaluations = self.stats.total_evaluations;
        let best_genome = self
            .best
            .as_ref()
            .map(|b| self.domain.serialize_genome(&b.genome))
            .unwrap_or_default();

        EvolutionResult {
            best_genome,
            stats: EvolutionStats {
                generations: self.population.generation(),
                total_evaluations,
                best_fitness: self.best_fitness(),
                final_avg_fitness: self.population.avg_fitness(),
                elapsed_seconds: elapsed,
                evaluations_per_second: if elapsed > 0.0 {
                    total_evaluations as f64 / elapsed
                } else {
                    0.0
                },
                stop_reason,
            },
            history: self.history.clone(),
        }
    }

    fn auto_checkpoint(&self) {
        let Some(manager) = &self.checkpoints else {
            return;
        };
        if !manager.is_due(self.population.generation()) {
            return;
        }
        if let Err(e) = self.checkpoint().and_then(|cp| manager.save(&cp)) {
            warn!(
                "Checkpoint at generation {} failed: {}",
                self.population.generation(),
                e
            );
        }
    }

    /// Snapshot of everything needed to resume this run.
    pub fn checkpoint(&self) -> Result<Checkpoint> {
        let state = EngineState::capture(self);
        let user_data = serde_json::to_vec(&state)
            .map_err(|e| EvoError::CheckpointFormat(e.to_string()))?;
        let checkpoint =
            Checkpoint::capture(&self.population, self.domain.name()).with_user_data(user_data);
        Ok(match &self.meta {
            Some(meta) => checkpoint.with_meta(meta.clone()),
            None => checkpoint,
        })
    }

    /// Continue from `checkpoint`. The next [`EvolutionEngine::run`] picks up
    /// at the checkpoint's generation.
    pub fn restore(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        if checkpoint.domain_name != self.domain.name() {
            return Err(EvoError::CheckpointFormat(format!(
                "checkpoint is for domain {:?}, engine runs {:?}",
                checkpoint.domain_name,
                self.domain.name()
            )));
        }

        let mut population = checkpoint.to_population()?;
        let capacity = population
            .capacity()
            .max(self.config.evolution.population_size);
        population.resize(capacity)?;

        let mut stats = RunStats::new(self.config.stats);
        stats.generation = population.generation();
        stats.best_fitness = population.best_fitness();
        stats.avg_fitness = population.avg_fitness();
        stats.worst_fitness = population.worst_fitness();
        stats.distribution = population.fitness_distribution();
        stats.fitness_variance = stats.distribution.stddev * stats.distribution.stddev;
        stats.diverse = stats.fitness_variance > self.config.stats.diversity_threshold;

        let mut history = EvolutionHistory::default();
        let mut best = population.best().cloned();

        if !checkpoint.user_data.is_empty() {
            let state: EngineState = serde_json::from_slice(&checkpoint.user_data)
                .map_err(|e| EvoError::CheckpointFormat(format!("engine state: {}", e)))?;
            stats.best_fitness_ever = state.best_fitness_ever;
            stats.worst_fitness_ever = state.worst_fitness_ever;
            stats.stagnation_count = state.stagnation_count;
            stats.total_evaluations = state.total_evaluations;
            stats.mutations = state.mutations;
            stats.crossovers = state.crossovers;
            for row in &state.history {
                history.best_fitness.push(row.best);
                history.avg_fitness.push(row.avg);
                history.fitness_std.push(row.std);
                history.diversity.push(row.diversity);
            }
            if let Some(record) = &state.best {
                best = Some(Individual {
                    genome: Genome::from_hex(&record.genome)?,
                    fitness: record.fitness,
                });
            }
            if self.exploration.is_some()
                && let Some(exploration) = state.exploration
            {
                self.exploration = Some(exploration);
            }
            if self.negative.is_some()
                && let Some(negative) = state.negative
            {
                self.negative = Some(negative);
            }
        }

        self.population = population;
        self.stats = stats;
        self.history = history;
        self.best = best;
        self.meta = checkpoint.meta.clone().or(self.meta.take());
        self.initialized = true;

        info!(
            "Restored {} individuals at generation {}",
            self.population.len(),
            self.population.generation()
        );
        Ok(())
    }
}

impl std::fmt::Debug for EvolutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvolutionEngine")
            .field("domain", &self.domain.name())
            .field("generation", &self.population.generation())
            .field("population", &self.population.len())
            .field("best_fitness", &self.best_fitness())
            .finish()
    }
}

/// CPU evaluator sized by `performance`, with the device attached when
/// `gpu.enabled` and one can be opened.
pub fn build_evaluator(config: &EngineConfig) -> Result<BatchEvaluator> {
    let evaluator = BatchEvaluator::new(config.performance.num_threads)?
        .with_scratch_capacity(config.performance.arena_capacity)
        .with_max_batch_size(config.gpu.batch_size);
    if !config.gpu.enabled {
        return Ok(evaluator);
    }

    match pollster::block_on(GpuAccelerator::new(config.gpu.device, config.gpu.batch_size)) {
        Ok(accelerator) => Ok(evaluator.with_accelerator(Box::new(accelerator))),
        Err(e) => {
            warn!("GPU requested but unavailable ({}); evaluating on CPU", e);
            Ok(evaluator)
        }
    }
}

fn build_exploration(config: &ExplorationConfig) -> Result<ExplorationController> {
    let mut controller = ExplorationController::new(config.strategy, config.base_rate)?;
    controller.set_bounds(config.min_rate, config.max_rate);
    controller.set_decay_rate(config.decay_rate);
    controller.set_temperature(config.temperature, config.cooling_rate);
    controller.set_ucb_c(config.ucb_c);
    Ok(controller)
}

fn build_negative(config: &NegativeConfig) -> Result<NegativeLearning> {
    let mut negative = NegativeLearning::new(
        config.capacity,
        config.penalty_weight,
        config.decay_rate,
        config.similarity_threshold,
    )?;
    negative.set_repeat_multiplier(config.repeat_multiplier);
    negative.set_thresholds(SeverityThresholds::from(config.severity_thresholds))?;
    Ok(negative)
}

/// Mean pairwise [`Domain::diversity`] over an evenly strided sample.
fn sampled_diversity(population: &Population, domain: &dyn Domain) -> f64 {
    let n = population.len();
    if n < 2 {
        return 0.0;
    }
    let sample: Vec<&Genome<'static>> = if n <= DIVERSITY_SAMPLE {
        population.iter().map(|ind| &ind.genome).collect()
    } else {
        (0..DIVERSITY_SAMPLE)
            .filter_map(|i| population.get(i * n / DIVERSITY_SAMPLE))
            .map(|ind| &ind.genome)
            .collect()
    };

    let mut total = 0.0;
    let mut pairs = 0usize;
    for (i, a) in sample.iter().enumerate() {
        for b in &sample[i + 1..] {
            total += domain.diversity(a, b);
            pairs += 1;
        }
    }
    total / pairs as f64
}

#[derive(Serialize, Deserialize)]
struct BestRecord {
    genome: String,
    #[serde(with = "exact_f64")]
    fitness: f64,
}

#[derive(Serialize, Deserialize)]
struct HistoryRow {
    #[serde(with = "exact_f64")]
    best: f64,
    #[serde(with = "exact_f64")]
    avg: f64,
    #[serde(with = "exact_f64")]
    std: f64,
    #[serde(with = "exact_f64")]
    diversity: f64,
}

/// Engine state carried in a checkpoint's user data.
#[derive(Serialize, Deserialize)]
struct EngineState {
    #[serde(with = "exact_f64")]
    best_fitness_ever: f64,
    #[serde(with = "exact_f64")]
    worst_fitness_ever: f64,
    stagnation_count: usize,
    total_evaluations: u64,
    mutations: u64,
    crossovers: u64,
    best: Option<BestRecord>,
    history: Vec<HistoryRow>,
    exploration: Option<ExplorationController>,
    #[serde(default)]
    negative: Option<NegativeLearning>,
}

impl EngineState {
    fn capture(engine: &EvolutionEngine) -> Self {
        let h = &engine.history;
        let history = (0..h.len())
            .map(|i| HistoryRow {
                best: h.best_fitness[i],
                avg: h.avg_fitness[i],
                std: h.fitness_std[i],
                diversity: h.diversity[i],
            })
            .collect();
        Self {
            best_fitness_ever: engine.stats.best_fitness_ever,
            worst_fitness_ever: engine.stats.worst_fitness_ever,
            stagnation_count: engine.stats.stagnation_count,
            total_evaluations: engine.stats.total_evaluations,
            mutations: engine.stats.mutations,
            crossovers: engine.stats.crossovers,
            best: engine.best.as_ref().map(|b| BestRecord {
                genome: b.genome.to_hex(),
                fitness: b.fitness,
            }),
            history,
            exploration: engine.exploration.clone(),
            negative: engine.negative.clone(),
        }
    }
}
