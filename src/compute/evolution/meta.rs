//! Meta-evolution: a small population of [`MetaParams`] scored by running
//! the inner engine with each of them.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};
use serde::Serialize;

use crate::compute::operators::elite_count;
use crate::compute::{BatchEvaluator, Domain, EvoRng, compare_fitness_desc};
use crate::error::{EvoError, Result};
use crate::schema::{
    EngineConfig, EvolutionResult, MetaConfig, MetaFitnessStatistic, MetaParams, NegativeConfig,
};

use super::MAX_META_POPULATION;
use super::engine::{EvolutionEngine, build_evaluator};

/// Meta-fitness values remembered per individual.
pub const META_HISTORY_LEN: usize = 50;

/// Share of the meta-population kept as elites on each evolve.
pub const META_ELITE_RATIO: f64 = 0.3;

/// Share of the meta-population replaced on each evolve.
pub const META_REPLACE_RATIO: f64 = 0.5;

/// Stream index for meta-level randomness.
const META_STREAM: u64 = u64::MAX - 1;

/// One parameter set and how it has scored.
#[derive(Debug, Clone, Serialize)]
pub struct MetaIndividual {
    pub params: MetaParams,
    /// Latest meta-fitness; NaN until evaluated.
    pub meta_fitness: f64,
    /// Meta-generation this individual was created in.
    pub generation: u64,
    history: VecDeque<f64>,
}

impl MetaIndividual {
    pub fn new(params: MetaParams, generation: u64) -> Self {
        Self {
            params,
            meta_fitness: f64::NAN,
            generation,
            history: VecDeque::with_capacity(META_HISTORY_LEN),
        }
    }

    pub fn is_evaluated(&self) -> bool {
        !self.meta_fitness.is_nan()
    }

    /// Set the current meta-fitness and append it to the history, dropping
    /// the oldest entry once [`META_HISTORY_LEN`] are stored.
    pub fn record_fitness(&mut self, fitness: f64) {
        self.meta_fitness = fitness;
        if self.history.len() == META_HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(fitness);
    }

    /// Recorded values, oldest first.
    pub fn history(&self) -> impl Iterator<Item = f64> + '_ {
        self.history.iter().copied()
    }

    /// Mean of the recorded values; 0 when none are recorded.
    pub fn average_fitness(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        self.history.iter().sum::<f64>() / self.history.len() as f64
    }

    /// Least-squares slope of the history against its index; 0 with fewer
    /// than two points.
    pub fn improvement_trend(&self) -> f64 {
        let n = self.history.len();
        if n < 2 {
            return 0.0;
        }
        let n_f = n as f64;
        let mean_x = (n_f - 1.0) / 2.0;
        let mean_y = self.average_fitness();
        let mut num = 0.0;
        let mut den = 0.0;
        for (i, y) in self.history.iter().enumerate() {
            let dx = i as f64 - mean_x;
            num += dx * (y - mean_y);
            den += dx * dx;
        }
        num / den
    }
}

/// Population of parameter sets.
#[derive(Debug, Clone)]
pub struct MetaPopulation {
    individuals: Vec<MetaIndividual>,
    generation: u64,
    low_variance_streak: usize,
}

impl MetaPopulation {
    /// `size` individuals: `base` followed by mutated copies of it.
    pub fn new(size: usize, base: MetaParams, rng: &mut EvoRng) -> Result<Self> {
        if size == 0 || size > MAX_META_POPULATION {
            return Err(EvoError::PopulationSize(format!(
                "meta-population of {} outside 1..={}",
                size, MAX_META_POPULATION
            )));
        }
        base.validate()?;

        let mut individuals = Vec::with_capacity(size);
        individuals.push(MetaIndividual::new(base.clone(), 0));
        for _ in 1..size {
            let mut params = base.clone();
            params.mutate(rng)?;
            individuals.push(MetaIndividual::new(params, 0));
        }

        Ok(Self {
            individuals,
            generation: 0,
            low_variance_streak: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.individuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.individuals.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn individuals(&self) -> &[MetaIndividual] {
        &self.individuals
    }

    pub fn get(&self, index: usize) -> Option<&MetaIndividual> {
        self.individuals.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut MetaIndividual> {
        self.individuals.get_mut(index)
    }

    /// Highest evaluated meta-fitness.
    pub fn best(&self) -> Option<&MetaIndividual> {
        self.individuals
            .iter()
            .filter(|i| i.is_evaluated())
            .min_by(|a, b| compare_fitness_desc(a.meta_fitness, b.meta_fitness))
    }

    /// Descending meta-fitness, unevaluated last.
    pub fn sort(&mut self) {
        self.individuals
            .sort_by(|a, b| compare_fitness_desc(a.meta_fitness, b.meta_fitness));
    }

    /// Population variance of the evaluated meta-fitness values, or `None`
    /// with fewer than two.
    pub fn fitness_variance(&self) -> Option<f64> {
        let values: Vec<f64> = self
            .individuals
            .iter()
            .filter(|i| i.is_evaluated())
            .map(|i| i.meta_fitness)
            .collect();
        if values.len() < 2 {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        Some(values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n)
    }

    /// Keep the top 30% (at least one) and replace the bottom half with
    /// mutated copies of the better of two random elites. Each child mutates
    /// with its parent's own `meta_mutation_rate`.
    pub fn evolve(&mut self, rng: &mut EvoRng) -> Result<()> {
        self.sort();

        let threshold = self
            .best()
            .map_or(0.0, |b| b.params.meta_convergence_threshold);
        match self.fitness_variance() {
            Some(variance) if variance < threshold => self.low_variance_streak += 1,
            _ => self.low_variance_streak = 0,
        }

        let n = self.individuals.len();
        let elites = elite_count(META_ELITE_RATIO, n).max(1);
        let replaced = (n as f64 * META_REPLACE_RATIO).floor() as usize;
        let start = (n - replaced).max(elites);

        let mut children = Vec::with_capacity(n - start);
        for _ in start..n {
            let a = &self.individuals[rng.index(elites)];
            let b = &self.individuals[rng.index(elites)];
            let parent = if compare_fitness_desc(a.meta_fitness, b.meta_fitness).is_le() {
                a
            } else {
                b
            };
            let mut params = parent.params.clone();
            params.mutate(rng)?;
            children.push(MetaIndividual::new(params, self.generation + 1));
        }

        for (slot, child) in self.individuals[start..].iter_mut().zip(children) {
            *slot = child;
        }
        self.generation += 1;
        Ok(())
    }

    /// True once the meta-fitness variance stayed below the best
    /// individual's `meta_convergence_threshold` for `window` consecutive
    /// evolve calls.
    pub fn converged(&self, window: usize) -> bool {
        window > 0 && self.low_variance_streak >= window
    }
}

/// Weighted blend of an inner run's outcome:
/// `0.5 best + 0.2 avg + 20 diversity + 100 / generations`, with the
/// diversity term boosted by 1.2 inside `(0.3, 0.5)`.
pub fn composite_score(best: f64, avg: f64, diversity: f64, generations: u64) -> f64 {
    let bonus = if diversity > 0.3 && diversity < 0.5 {
        1.2
    } else {
        1.0
    };
    0.5 * best + 0.2 * avg + 20.0 * diversity * bonus + 100.0 / generations.max(1) as f64
}

/// Scores a parameter set by running the inner engine with it.
pub struct MetaEvaluator {
    base: EngineConfig,
    domain: Arc<dyn Domain>,
    inner_generations: u64,
    population_cap: usize,
    statistic: MetaFitnessStatistic,
    evaluator: Option<BatchEvaluator>,
    runs: u64,
}

impl MetaEvaluator {
    pub fn new(base: EngineConfig, domain: Arc<dyn Domain>, meta: &MetaConfig) -> Result<Self> {
        let evaluator = build_evaluator(&base)?;
        Ok(Self {
            base,
            domain,
            inner_generations: meta.inner_generations,
            population_cap: meta.inner_population_cap,
            statistic: meta.statistic,
            evaluator: Some(evaluator),
            runs: 0,
        })
    }

    pub fn statistic(&self) -> MetaFitnessStatistic {
        self.statistic
    }

    /// Inner runs performed so far.
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// Inner-loop configuration for `params`.
    pub fn inner_config(&self, params: &MetaParams) -> EngineConfig {
        let mut config = self.base.clone();
        let size = params
            .target_population_size
            .min(self.population_cap)
            .max(2);

        config.evolution.population_size = size;
        config.evolution.max_generations = self.inner_generations;
        config.performance.max_population = config.performance.max_population.max(size);
        config.mutation.rate = params.optimization_mutation_rate;
        config.selection.elite_count =
            elite_count(params.elite_protection_ratio, size).min(size - 1);
        config.selection.culling_ratio = params.culling_ratio;
        config.selection.immigrant_rate = params.experimentation_rate;
        config.negative = Some(NegativeConfig {
            penalty_weight: params.negative_penalty_weight,
            decay_rate: params.negative_decay_rate,
            similarity_threshold: params.negative_similarity_threshold,
            ..self.base.negative.clone().unwrap_or_default()
        });
        config.exploration = None;
        config.meta = None;
        config.checkpoint.enabled = false;
        config
    }

    /// Run the inner engine with `params` and reduce it to one number.
    pub fn evaluate(&mut self, params: &MetaParams) -> Result<f64> {
        let config = self.inner_config(params);
        let evaluator = match self.evaluator.take() {
            Some(evaluator) => evaluator,
            None => build_evaluator(&config)?,
        };
        let mut engine = EvolutionEngine::with_evaluator(config, Arc::clone(&self.domain), evaluator)?
            .with_meta(params.clone());

        let outcome = engine.run();
        let score = outcome
            .as_ref()
            .map(|result| self.score(&engine, result))
            .unwrap_or(f64::NAN);
        self.evaluator = Some(engine.into_evaluator());
        self.runs += 1;
        outcome?;
        Ok(score)
    }

    fn score(&self, engine: &EvolutionEngine, result: &EvolutionResult) -> f64 {
        match self.statistic {
            MetaFitnessStatistic::BestFitness => result.stats.best_fitness,
            MetaFitnessStatistic::AreaUnderCurve => {
                let curve = result.history.best_so_far();
                if curve.is_empty() {
                    f64::NEG_INFINITY
                } else {
                    curve.iter().sum::<f64>() / curve.len() as f64
                }
            }
            MetaFitnessStatistic::MeanTopK { k } => {
                let mut values: Vec<f64> = engine
                    .population()
                    .iter()
                    .map(|i| i.fitness)
                    .filter(|f| !f.is_nan())
                    .collect();
                values.sort_by(|a, b| compare_fitness_desc(*a, *b));
                values.truncate(k.max(1));
                if values.is_empty() {
                    f64::NEG_INFINITY
                } else {
                    values.iter().sum::<f64>() / values.len() as f64
                }
            }
            MetaFitnessStatistic::Composite => composite_score(
                result.stats.best_fitness,
                result.stats.final_avg_fitness,
                result.history.diversity.last().copied().unwrap_or(0.0),
                result.stats.generations,
            ),
        }
    }
}

impl std::fmt::Debug for MetaEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaEvaluator")
            .field("domain", &self.domain.name())
            .field("inner_generations", &self.inner_generations)
            .field("population_cap", &self.population_cap)
            .field("statistic", &self.statistic)
            .field("runs", &self.runs)
            .finish()
    }
}

/// Outcome of a meta-run.
#[derive(Debug, Clone, Serialize)]
pub struct MetaResult {
    pub best_params: MetaParams,
    pub best_fitness: f64,
    /// Meta-generations evaluated.
    pub generations: u64,
    pub converged: bool,
    pub inner_runs: u64,
    /// Best meta-fitness per meta-generation.
    pub history: Vec<f64>,
}

/// Evolves [`MetaParams`] until convergence or the generation cap.
#[derive(Debug)]
pub struct MetaOptimizer {
    config: MetaConfig,
    population: MetaPopulation,
    evaluator: MetaEvaluator,
    rng: EvoRng,
    history: Vec<f64>,
    cancelled: Arc<AtomicBool>,
}

impl MetaOptimizer {
    /// Meta-settings come from `config.meta` (defaults when absent); the
    /// rest of `config` is the template for inner runs.
    pub fn new(config: EngineConfig, domain: Arc<dyn Domain>, base: MetaParams) -> Result<Self> {
        config.validate()?;
        let meta = config.meta.clone().unwrap_or_default();
        let mut rng = EvoRng::derive(config.evolution.seed, META_STREAM);
        let population = MetaPopulation::new(meta.population_size, base, &mut rng)?;
        let evaluator = MetaEvaluator::new(config, domain, &meta)?;
        Ok(Self {
            config: meta,
            population,
            evaluator,
            rng,
            history: Vec::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn population(&self) -> &MetaPopulation {
        &self.population
    }

    pub fn evaluator(&self) -> &MetaEvaluator {
        &self.evaluator
    }

    /// Get cancellation handle.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Score every individual without a meta-fitness. Returns how many
    /// were scored.
    pub fn evaluate_population(&mut self) -> Result<usize> {
        let mut count = 0;
        for i in 0..self.population.len() {
            let Some(params) = self
                .population
                .get(i)
                .filter(|ind| !ind.is_evaluated())
                .map(|ind| ind.params.clone())
            else {
                continue;
            };
            let score = self.evaluator.evaluate(&params)?;
            debug!("Meta-individual {}: fitness {:.6}", i, score);
            if let Some(ind) = self.population.get_mut(i) {
                ind.record_fitness(score);
            }
            count += 1;
        }
        Ok(count)
    }

    pub fn run(&mut self) -> Result<MetaResult> {
        info!(
            "Meta-evolution: {} parameter sets, {} generations of {} inner generations",
            self.population.len(),
            self.config.generations,
            self.config.inner_generations
        );

        let mut converged = false;
        loop {
            self.evaluate_population()?;
            let best = self.population.best().map_or(f64::NEG_INFINITY, |b| b.meta_fitness);
            self.history.push(best);
            info!(
                "Meta-generation {}: best {:.6}, variance {:.6}",
                self.population.generation(),
                best,
                self.population.fitness_variance().unwrap_or(0.0)
            );

            if converged
                || self.cancelled.load(Ordering::Relaxed)
                || self.population.generation() + 1 >= self.config.generations
            {
                break;
            }
            self.population.evolve(&mut self.rng)?;
            converged = self.population.converged(self.config.convergence_window);
        }

        let best = self
            .population
            .best()
            .ok_or(EvoError::PopulationEmpty)?;
        info!("Best meta-fitness {:.6}", best.meta_fitness);

        Ok(MetaResult {
            best_params: best.params.clone(),
            best_fitness: best.meta_fitness,
            generations: self.population.generation() + 1,
            converged,
            inner_runs: self.evaluator.runs(),
            history: self.history.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::SphereDomain;

    fn scored(population: &mut MetaPopulation, scores: &[f64]) {
        for (i, &s) in scores.iter().enumerate() {
            population.get_mut(i).unwrap().record_fitness(s);
        }
    }

    fn small_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.performance.num_threads = 1;
        config.meta = Some(MetaConfig {
            population_size: 4,
            generations: 3,
            inner_generations: 4,
            inner_population_cap: 16,
            ..Default::default()
        });
        config
    }

    #[test]
    fn test_history_is_circular() {
        let mut ind = MetaIndividual::new(MetaParams::default(), 0);
        for i in 0..(META_HISTORY_LEN + 10) {
            ind.record_fitness(i as f64);
        }
        let history: Vec<f64> = ind.history().collect();
        assert_eq!(history.len(), META_HISTORY_LEN);
        assert_eq!(history[0], 10.0);
        assert_eq!(ind.meta_fitness, (META_HISTORY_LEN + 9) as f64);
    }

    #[test]
    fn test_trend_and_average() {
        let mut ind = MetaIndividual::new(MetaParams::default(), 0);
        assert_eq!(ind.improvement_trend(), 0.0);
        assert_eq!(ind.average_fitness(), 0.0);
        for v in [1.0, 3.0, 5.0, 7.0] {
            ind.record_fitness(v);
        }
        assert!((ind.improvement_trend() - 2.0).abs() < 1e-12);
        assert_eq!(ind.average_fitness(), 4.0);
    }

    #[test]
    fn test_population_bounds() {
        let mut rng = EvoRng::new(1);
        assert!(MetaPopulation::new(0, MetaParams::default(), &mut rng).is_err());
        assert!(MetaPopulation::new(21, MetaParams::default(), &mut rng).is_err());
        let pop = MetaPopulation::new(20, MetaParams::default(), &mut rng).unwrap();
        assert_eq!(pop.get(0).unwrap().params, MetaParams::default());
        assert!(pop.individuals().iter().all(|i| i.params.validate().is_ok()));
    }

    #[test]
    fn test_evolve_keeps_elites_and_replaces_bottom_half() {
        let mut rng = EvoRng::new(2);
        let mut pop = MetaPopulation::new(10, MetaParams::default(), &mut rng).unwrap();
        let scores: Vec<f64> = (0..10).map(|i| i as f64).collect();
        scored(&mut pop, &scores);

        pop.evolve(&mut rng).unwrap();
        assert_eq!(pop.generation(), 1);
        assert_eq!(pop.len(), 10);

        let kept: Vec<f64> = pop.individuals()[..5].iter().map(|i| i.meta_fitness).collect();
        assert_eq!(kept, vec![9.0, 8.0, 7.0, 6.0, 5.0]);
        assert!(pop.individuals()[5..].iter().all(|i| !i.is_evaluated()));
        assert!(pop.individuals()[5..].iter().all(|i| i.generation == 1));
        assert_eq!(pop.best().unwrap().meta_fitness, 9.0);
    }

    #[test]
    fn test_convergence_window() {
        let mut rng = EvoRng::new(3);
        let mut pop = MetaPopulation::new(4, MetaParams::default(), &mut rng).unwrap();
        for _ in 0..3 {
            scored(&mut pop, &[1.0, 1.0, 1.0, 1.0]);
            assert!(!pop.converged(3));
            pop.evolve(&mut rng).unwrap();
        }
        assert!(pop.converged(3));
        assert!(!pop.converged(0));

        scored(&mut pop, &[10.0, 0.0, 5.0, -5.0]);
        pop.evolve(&mut rng).unwrap();
        assert!(!pop.converged(1));
    }

    #[test]
    fn test_composite_score() {
        let plain = composite_score(-10.0, -20.0, 0.2, 4);
        assert!((plain - (-5.0 - 4.0 + 4.0 + 25.0)).abs() < 1e-12);
        let boosted = composite_score(-10.0, -20.0, 0.4, 4);
        assert!((boosted - (-5.0 - 4.0 + 9.6 + 25.0)).abs() < 1e-12);
    }

    #[test]
    fn test_inner_config_mapping() {
        let config = small_config();
        let meta = config.meta.clone().unwrap();
        let evaluator =
            MetaEvaluator::new(config, Arc::new(SphereDomain::default()), &meta).unwrap();
        let params = MetaParams {
            optimization_mutation_rate: 0.2,
            elite_protection_ratio: 0.25,
            culling_ratio: 0.3,
            experimentation_rate: 0.1,
            negative_penalty_weight: 0.7,
            negative_decay_rate: 0.1,
            negative_similarity_threshold: 0.9,
            ..Default::default()
        };
        let inner = evaluator.inner_config(&params);
        let negative = inner.negative.clone().unwrap();
        assert_eq!(negative.penalty_weight, 0.7);
        assert_eq!(negative.decay_rate, 0.1);
        assert_eq!(negative.similarity_threshold, 0.9);
        assert_eq!(negative.capacity, NegativeConfig::default().capacity);
        assert_eq!(inner.evolution.population_size, 16);
        assert_eq!(inner.evolution.max_generations, 4);
        assert_eq!(inner.mutation.rate, 0.2);
        assert_eq!(inner.selection.elite_count, 4);
        assert_eq!(inner.selection.culling_ratio, 0.3);
        assert_eq!(inner.selection.immigrant_rate, 0.1);
        inner.validate().unwrap();
    }

    #[test]
    fn test_optimizer_run() {
        let mut optimizer = MetaOptimizer::new(
            small_config(),
            Arc::new(SphereDomain::default()),
            MetaParams::default(),
        )
        .unwrap();
        let result = optimizer.run().unwrap();

        assert!(result.generations >= 1 && result.generations <= 3);
        assert_eq!(result.history.len() as u64, result.generations);
        assert!(result.best_fitness.is_finite());
        assert!(result.best_fitness <= 0.0);
        assert!(result.inner_runs >= 4);
        result.best_params.validate().unwrap();
        assert!(result.history.windows(2).all(|w| w[1] >= w[0]));
    }
}
