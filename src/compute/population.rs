//! Population: individuals with cached fitness statistics.

use std::cmp::Ordering;

use rand::seq::index;
use serde::{Deserialize, Serialize};

use crate::error::{EvoError, Result};

use super::genome::Genome;
use super::rng::EvoRng;

/// A genome and its fitness. NaN fitness means "not yet evaluated".
#[derive(Debug, Clone)]
pub struct Individual {
    pub genome: Genome<'static>,
    pub fitness: f64,
}

impl Individual {
    /// Unevaluated individual.
    pub fn new(genome: Genome<'static>) -> Self {
        Self {
            genome,
            fitness: f64::NAN,
        }
    }

    pub fn is_evaluated(&self) -> bool {
        !self.fitness.is_nan()
    }
}

/// Bitwise fitness equality, so unevaluated individuals compare equal.
impl PartialEq for Individual {
    fn eq(&self, other: &Self) -> bool {
        self.genome == other.genome && self.fitness.to_bits() == other.fitness.to_bits()
    }
}

/// Summary of evaluated fitness values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FitnessDistribution {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    /// Number of evaluated individuals the summary covers.
    pub count: usize,
}

/// Descending fitness order with NaN last.
pub fn compare_fitness_desc(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

/// Dense collection of individuals.
#[derive(Debug, Clone)]
pub struct Population {
    individuals: Vec<Individual>,
    capacity: usize,
    generation: u64,
    best_fitness: f64,
    avg_fitness: f64,
    worst_fitness: f64,
    best_index: Option<usize>,
}

impl Population {
    /// Empty population holding at most `capacity` individuals.
    ///
    /// Storage is reserved up front; a capacity that cannot be allocated is
    /// `OutOfMemory`.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(EvoError::PopulationSize(
                "capacity must be at least 1".into(),
            ));
        }
        let mut individuals = Vec::new();
        reserve_individuals(&mut individuals, capacity)?;
        Ok(Self {
            individuals,
            capacity,
            generation: 0,
            best_fitness: f64::NEG_INFINITY,
            avg_fitness: f64::NAN,
            worst_fitness: f64::INFINITY,
            best_index: None,
        })
    }

    pub fn len(&self) -> usize {
        self.individuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.individuals.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Restore a generation counter, e.g. from a checkpoint.
    pub fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    pub fn increment_generation(&mut self) {
        self.generation += 1;
    }

    /// Best fitness as of the last [`Population::update_stats`].
    pub fn best_fitness(&self) -> f64 {
        self.best_fitness
    }

    pub fn avg_fitness(&self) -> f64 {
        self.avg_fitness
    }

    pub fn worst_fitness(&self) -> f64 {
        self.worst_fitness
    }

    pub fn best_index(&self) -> Option<usize> {
        self.best_index
    }

    /// Individual at `best_index`.
    pub fn best(&self) -> Option<&Individual> {
        self.best_index.and_then(|i| self.individuals.get(i))
    }

    pub fn get(&self, index: usize) -> Option<&Individual> {
        self.individuals.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Individual> {
        self.individuals.get_mut(index)
    }

    pub fn individuals(&self) -> &[Individual] {
        &self.individuals
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Individual> {
        self.individuals.iter()
    }

    /// Append a copy of `genome`. The caller keeps the original.
    pub fn add(&mut self, genome: &Genome<'_>, fitness: f64) -> Result<usize> {
        if self.individuals.len() >= self.capacity {
            return Err(EvoError::PopulationFull(self.capacity));
        }
        self.individuals.push(Individual {
            genome: genome.to_owned_genome(),
            fitness,
        });
        Ok(self.individuals.len() - 1)
    }

    /// Remove the individual at `index`, keeping the order of the rest.
    pub fn remove(&mut self, index: usize) -> Result<Individual> {
        if index >= self.individuals.len() {
            return Err(EvoError::invalid_arg(format!(
                "index {} out of range for population of {}",
                index,
                self.individuals.len()
            )));
        }
        let removed = self.individuals.remove(index);
        self.best_index = None;
        Ok(removed)
    }

    /// Change capacity. Cannot drop below the current size.
    pub fn resize(&mut self, capacity: usize) -> Result<()> {
        if capacity == 0 || capacity < self.individuals.len() {
            return Err(EvoError::PopulationSize(format!(
                "capacity {} below current size {}",
                capacity,
                self.individuals.len()
            )));
        }
        reserve_individuals(&mut self.individuals, capacity)?;
        self.capacity = capacity;
        Ok(())
    }

    /// Drop every individual and reset the generation counter.
    pub fn clear(&mut self) {
        self.individuals.clear();
        self.generation = 0;
        self.reset_stats();
    }

    fn reset_stats(&mut self) {
        self.best_fitness = f64::NEG_INFINITY;
        self.avg_fitness = f64::NAN;
        self.worst_fitness = f64::INFINITY;
        self.best_index = None;
    }

    /// Recompute cached best/avg/worst/best_index, skipping NaN fitness.
    ///
    /// The average covers finite values only. A population of nothing but
    /// infinities averages to the infinity when all share a sign and to 0
    /// otherwise.
    pub fn update_stats(&mut self) {
        self.reset_stats();

        let mut finite_sum = 0.0;
        let mut finite = 0usize;
        let mut infinite_sum = 0.0;
        let mut evaluated = 0usize;
        for (i, ind) in self.individuals.iter().enumerate() {
            let f = ind.fitness;
            if f.is_nan() {
                continue;
            }
            if self.best_index.is_none() || f > self.best_fitness {
                self.best_fitness = f;
                self.best_index = Some(i);
            }
            self.worst_fitness = self.worst_fitness.min(f);
            if f.is_finite() {
                finite_sum += f;
                finite += 1;
            } else {
                infinite_sum += f;
            }
            evaluated += 1;
        }

        if evaluated > 0 {
            let mean = if finite > 0 {
                finite_sum / finite as f64
            } else if infinite_sum.is_nan() {
                0.0
            } else {
                infinite_sum
            };
            // Clamp guards the mean against rounding outside [worst, best].
            self.avg_fitness = mean.clamp(self.worst_fitness, self.best_fitness);
        }
    }

    /// Stable sort by descending fitness with NaN at the end.
    pub fn sort(&mut self) {
        self.individuals
            .sort_by(|a, b| compare_fitness_desc(a.fitness, b.fitness));
        self.best_index = self.individuals.first().filter(|i| i.is_evaluated()).map(|_| 0);
    }

    /// Tournament of `k` draws; returns the fittest contestant's index.
    ///
    /// Contestants are distinct when the population has at least `k`
    /// members. NaN fitness loses against any evaluated contestant.
    pub fn tournament_select(&self, k: usize, rng: &mut EvoRng) -> Result<usize> {
        let n = self.individuals.len();
        if n == 0 {
            return Err(EvoError::PopulationEmpty);
        }
        let k = k.max(1);

        let better = |a: usize, b: usize| -> usize {
            if compare_fitness_desc(self.individuals[b].fitness, self.individuals[a].fitness)
                == Ordering::Less
            {
                b
            } else {
                a
            }
        };

        let winner = if n >= k {
            let mut draws = index::sample(rng, n, k).into_iter();
            let first = draws.next().unwrap_or(0);
            draws.fold(first, better)
        } else {
            let first = rng.index(n);
            (1..k).fold(first, |best, _| better(best, rng.index(n)))
        };
        Ok(winner)
    }

    /// Sort, then keep only the best `n`.
    pub fn truncate(&mut self, n: usize) {
        self.sort();
        self.individuals.truncate(n);
        if self.individuals.is_empty() {
            self.best_index = None;
        }
    }

    /// Score every unevaluated individual, then refresh statistics.
    /// Returns the number of individuals scored.
    pub fn evaluate<F>(&mut self, mut fitness: F) -> usize
    where
        F: FnMut(&Genome<'_>) -> f64,
    {
        let mut count = 0;
        for ind in self.individuals.iter_mut().filter(|i| !i.is_evaluated()) {
            ind.fitness = fitness(&ind.genome);
            count += 1;
        }
        self.update_stats();
        count
    }

    /// Replace every individual at once. Used to swap in a staged
    /// generation; fails without side effects if it would overflow.
    pub fn replace_all(&mut self, individuals: Vec<Individual>) -> Result<()> {
        if individuals.len() > self.capacity {
            return Err(EvoError::PopulationFull(self.capacity));
        }
        self.individuals = individuals;
        self.best_index = None;
        Ok(())
    }

    /// Indices of individuals without a fitness value.
    pub fn unevaluated(&self) -> Vec<usize> {
        self.individuals
            .iter()
            .enumerate()
            .filter(|(_, ind)| !ind.is_evaluated())
            .map(|(i, _)| i)
            .collect()
    }

    /// Min/max/mean/stddev over evaluated individuals.
    pub fn fitness_distribution(&self) -> FitnessDistribution {
        let values: Vec<f64> = self
            .individuals
            .iter()
            .map(|i| i.fitness)
            .filter(|f| !f.is_nan())
            .collect();
        if values.is_empty() {
            return FitnessDistribution::default();
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|f| (f - mean).powi(2)).sum::<f64>() / n;

        FitnessDistribution {
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean,
            stddev: variance.sqrt(),
            count: values.len(),
        }
    }

    /// Mean pairwise byte distance normalized by genome size, in `[0, 1]`.
    /// Pairs of different sizes count as fully distinct.
    pub fn diversity(&self) -> f64 {
        let n = self.individuals.len();
        if n < 2 {
            return 0.0;
        }

        let mut total = 0.0;
        let mut pairs = 0usize;
        for i in 0..n {
            for j in (i + 1)..n {
                let a = &self.individuals[i].genome;
                let b = &self.individuals[j].genome;
                total += match a.distance(b) {
                    Ok(_) if a.is_empty() => 0.0,
                    Ok(d) => d as f64 / a.size() as f64,
                    Err(_) => 1.0,
                };
                pairs += 1;
            }
        }
        total / pairs as f64
    }
}

/// Grow `individuals` to hold `capacity` without aborting on huge requests.
fn reserve_individuals(individuals: &mut Vec<Individual>, capacity: usize) -> Result<()> {
    let additional = capacity.saturating_sub(individuals.len());
    individuals.try_reserve_exact(additional).map_err(|_| {
        EvoError::OutOfMemory(capacity.saturating_mul(std::mem::size_of::<Individual>()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genome(bytes: &[u8]) -> Genome<'static> {
        Genome::from_data(bytes).unwrap()
    }

    fn population(fitness: &[f64]) -> Population {
        let mut pop = Population::new(fitness.len().max(1)).unwrap();
        for (i, &f) in fitness.iter().enumerate() {
            pop.add(&genome(&[i as u8]), f).unwrap();
        }
        pop
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            Population::new(0),
            Err(EvoError::PopulationSize(_))
        ));
    }

    #[test]
    fn test_unallocatable_capacity_is_an_error() {
        assert!(matches!(
            Population::new(1 << 60),
            Err(EvoError::OutOfMemory(_))
        ));
        let mut pop = population(&[1.0]);
        assert!(matches!(pop.resize(usize::MAX), Err(EvoError::OutOfMemory(_))));
        assert_eq!(pop.capacity(), 1);
    }

    #[test]
    fn test_update_stats_mixed_infinities() {
        let mut pop = population(&[f64::INFINITY, 2.0, f64::NEG_INFINITY, 4.0]);
        pop.update_stats();
        assert_eq!(pop.best_fitness(), f64::INFINITY);
        assert_eq!(pop.worst_fitness(), f64::NEG_INFINITY);
        assert_eq!(pop.avg_fitness(), 3.0);

        let mut pop = population(&[f64::INFINITY, f64::NEG_INFINITY]);
        pop.update_stats();
        assert_eq!(pop.avg_fitness(), 0.0);

        let mut pop = population(&[f64::NEG_INFINITY, f64::NAN, f64::NEG_INFINITY]);
        pop.update_stats();
        assert_eq!(pop.avg_fitness(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_add_clones_and_fills() {
        let mut pop = Population::new(2).unwrap();
        let data = [1u8, 2, 3];
        let view = Genome::view(&data);
        pop.add(&view, 1.0).unwrap();
        assert!(pop.get(0).unwrap().genome.owns_memory());

        pop.add(&view, 2.0).unwrap();
        assert!(matches!(
            pop.add(&view, 3.0),
            Err(EvoError::PopulationFull(2))
        ));
    }

    #[test]
    fn test_update_stats_skips_nan() {
        let mut pop = population(&[1.0, f64::NAN, 5.0, 3.0]);
        pop.update_stats();
        assert_eq!(pop.best_fitness(), 5.0);
        assert_eq!(pop.worst_fitness(), 1.0);
        assert_eq!(pop.avg_fitness(), 3.0);
        assert_eq!(pop.best_index(), Some(2));
    }

    #[test]
    fn test_update_stats_all_nan() {
        let mut pop = population(&[f64::NAN, f64::NAN]);
        pop.update_stats();
        assert_eq!(pop.best_index(), None);
        assert!(pop.avg_fitness().is_nan());
    }

    #[test]
    fn test_sort_descending_nan_last_stable() {
        let mut pop = population(&[1.0, f64::NAN, 3.0, 3.0, -2.0]);
        pop.sort();
        let fit: Vec<f64> = pop.iter().map(|i| i.fitness).collect();
        assert_eq!(&fit[..4], &[3.0, 3.0, 1.0, -2.0]);
        assert!(fit[4].is_nan());
        // Ties keep insertion order
        assert_eq!(pop.get(0).unwrap().genome.as_bytes(), &[2]);
        assert_eq!(pop.get(1).unwrap().genome.as_bytes(), &[3]);
    }

    #[test]
    fn test_tournament_prefers_fit() {
        let pop = population(&[1.0, 2.0, 10.0, 3.0]);
        let mut rng = EvoRng::new(42);
        // With k == size every contestant is drawn
        for _ in 0..20 {
            assert_eq!(pop.tournament_select(4, &mut rng).unwrap(), 2);
        }
    }

    #[test]
    fn test_tournament_nan_loses() {
        let pop = population(&[f64::NAN, 0.5]);
        let mut rng = EvoRng::new(1);
        assert_eq!(pop.tournament_select(2, &mut rng).unwrap(), 1);
    }

    #[test]
    fn test_tournament_small_population() {
        let pop = population(&[1.0]);
        let mut rng = EvoRng::new(9);
        assert_eq!(pop.tournament_select(5, &mut rng).unwrap(), 0);

        let empty = Population::new(3).unwrap();
        assert!(matches!(
            empty.tournament_select(2, &mut rng),
            Err(EvoError::PopulationEmpty)
        ));
    }

    #[test]
    fn test_remove_and_truncate() {
        let mut pop = population(&[4.0, 1.0, 3.0, 2.0]);
        let removed = pop.remove(1).unwrap();
        assert_eq!(removed.fitness, 1.0);
        assert_eq!(pop.len(), 3);
        assert!(pop.remove(10).is_err());

        pop.truncate(2);
        let fit: Vec<f64> = pop.iter().map(|i| i.fitness).collect();
        assert_eq!(fit, vec![4.0, 3.0]);
    }

    #[test]
    fn test_resize() {
        let mut pop = population(&[1.0, 2.0]);
        assert!(pop.resize(1).is_err());
        pop.resize(10).unwrap();
        assert_eq!(pop.capacity(), 10);
    }

    #[test]
    fn test_evaluate_only_nan() {
        let mut pop = population(&[7.0, f64::NAN, f64::NAN]);
        let mut calls = 0;
        let count = pop.evaluate(|g| {
            calls += 1;
            g.as_bytes()[0] as f64
        });
        assert_eq!(count, 2);
        assert_eq!(calls, 2);
        assert_eq!(pop.get(0).unwrap().fitness, 7.0);
        assert_eq!(pop.get(2).unwrap().fitness, 2.0);
        assert_eq!(pop.best_fitness(), 7.0);
    }

    #[test]
    fn test_clear_resets_generation() {
        let mut pop = population(&[1.0]);
        pop.increment_generation();
        pop.increment_generation();
        assert_eq!(pop.generation(), 2);
        pop.clear();
        assert_eq!(pop.generation(), 0);
        assert!(pop.is_empty());
    }

    #[test]
    fn test_distribution_and_diversity() {
        let mut pop = Population::new(3).unwrap();
        pop.add(&genome(&[0, 0]), 1.0).unwrap();
        pop.add(&genome(&[0, 1]), 3.0).unwrap();
        pop.add(&genome(&[1, 1]), f64::NAN).unwrap();

        let dist = pop.fitness_distribution();
        assert_eq!(dist.count, 2);
        assert_eq!(dist.min, 1.0);
        assert_eq!(dist.max, 3.0);
        assert_eq!(dist.mean, 2.0);
        assert_eq!(dist.stddev, 1.0);

        // Distances: 1/2, 2/2, 1/2
        let d = pop.diversity();
        assert!((d - 2.0 / 3.0).abs() < 1e-12);
    }
}
