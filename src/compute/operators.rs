//! Variation and replacement operators.
//!
//! The byte-level operators (`uniform_crossover`, `mutate_bytes`) are the
//! defaults domains reach for when their genomes have no finer structure.
//! [`breed_generation`] assembles a complete next generation from a sorted
//! population through a [`Domain`], staging every child before touching the
//! population.

use crate::error::{EvoError, Result};

use super::domain::Domain;
use super::genome::Genome;
use super::population::{Individual, Population};
use super::rng::EvoRng;

/// Uniform crossover over raw bytes.
///
/// For every position in the shared prefix a fair coin decides whether the
/// children inherit straight (`p1 → c1`, `p2 → c2`) or swapped. When the
/// parents differ in length, the longer parent's suffix is appended to the
/// first child only, so `c1` has the longer length and `c2` the shorter.
pub fn uniform_crossover(p1: &[u8], p2: &[u8], rng: &mut EvoRng) -> (Vec<u8>, Vec<u8>) {
    let shared = p1.len().min(p2.len());
    let longer = if p1.len() >= p2.len() { p1 } else { p2 };

    let mut c1 = Vec::with_capacity(longer.len());
    let mut c2 = Vec::with_capacity(shared);

    for i in 0..shared {
        if rng.chance(0.5) {
            c1.push(p1[i]);
            c2.push(p2[i]);
        } else {
            c1.push(p2[i]);
            c2.push(p1[i]);
        }
    }
    c1.extend_from_slice(&longer[shared..]);

    (c1, c2)
}

/// Replace each byte with a uniform random byte with probability `rate`.
pub fn mutate_bytes(bytes: &mut [u8], rate: f64, rng: &mut EvoRng) -> usize {
    if rate <= 0.0 {
        return 0;
    }
    let mut mutated = 0;
    for byte in bytes.iter_mut() {
        if rng.chance(rate) {
            *byte = rng.next_seed() as u8;
            mutated += 1;
        }
    }
    mutated
}

/// Number of elites for `ratio` of `size`; at least one when the ratio is
/// positive and the population is not empty.
pub fn elite_count(ratio: f64, size: usize) -> usize {
    if ratio <= 0.0 || size == 0 {
        return 0;
    }
    ((ratio * size as f64).round() as usize).clamp(1, size)
}

/// Number of individuals removed from the bottom for `ratio` of `size`.
/// Never culls the whole population.
pub fn cull_count(ratio: f64, size: usize) -> usize {
    if ratio <= 0.0 || size == 0 {
        return 0;
    }
    ((ratio * size as f64).floor() as usize).min(size - 1)
}

/// Parameters of one breeding step.
#[derive(Debug, Clone, PartialEq)]
pub struct BreedingPlan {
    /// Size of the next generation.
    pub target_size: usize,
    /// Contestants per tournament.
    pub tournament_size: usize,
    /// Individuals copied unchanged from the top.
    pub elite_count: usize,
    /// Fraction of the bottom removed from the parent pool.
    pub culling_ratio: f64,
    /// Probability that a pair is recombined rather than copied.
    pub crossover_rate: f64,
    /// Per-gene mutation probability handed to the domain.
    pub mutation_rate: f64,
    /// Probability that an offspring slot is filled with a fresh random genome.
    pub immigrant_rate: f64,
}

impl Default for BreedingPlan {
    fn default() -> Self {
        Self {
            target_size: 100,
            tournament_size: 3,
            elite_count: 2,
            culling_ratio: 0.0,
            crossover_rate: 0.9,
            mutation_rate: 0.05,
            immigrant_rate: 0.0,
        }
    }
}

/// Counts of the variation performed by one breeding step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BreedingReport {
    pub elites: usize,
    pub culled: usize,
    pub crossovers: u64,
    pub mutations: u64,
    pub immigrants: u64,
}

/// Produce the next generation in place.
///
/// Sorts `population`, removes the bottom `culling_ratio` from the parent
/// pool, copies `elite_count` elites, then fills the remaining slots with
/// tournament-selected, recombined and mutated offspring. The children are
/// built in a staging vector and swapped in only when every one of them was
/// produced; on error the population is left exactly as it was.
pub fn breed_generation(
    population: &mut Population,
    plan: &BreedingPlan,
    domain: &dyn Domain,
    rng: &mut EvoRng,
) -> Result<BreedingReport> {
    breed_generation_with(population, plan, domain, rng, |ind| ind.fitness)
}

/// [`breed_generation`] with tournaments ranked by `selection` instead of
/// stored fitness. Culling and elites still follow stored fitness.
pub fn breed_generation_with<F>(
    population: &mut Population,
    plan: &BreedingPlan,
    domain: &dyn Domain,
    rng: &mut EvoRng,
    selection: F,
) -> Result<BreedingReport>
where
    F: Fn(&Individual) -> f64,
{
    if population.is_empty() {
        return Err(EvoError::PopulationEmpty);
    }
    if plan.target_size > population.capacity() {
        return Err(EvoError::PopulationFull(population.capacity()));
    }

    population.sort();

    let mut report = BreedingReport::default();
    let culled = cull_count(plan.culling_ratio, population.len());
    let mut parents = population.clone();
    parents.truncate(population.len() - culled);
    report.culled = culled;

    let mut staged: Vec<Individual> = Vec::with_capacity(plan.target_size);

    let elites = plan.elite_count.min(parents.len()).min(plan.target_size);
    staged.extend(parents.individuals()[..elites].iter().cloned());
    report.elites = elites;

    for i in 0..parents.len() {
        if let Some(ind) = parents.get_mut(i) {
            ind.fitness = selection(ind);
        }
    }

    let genome_size = domain.genome_size();
    while staged.len() < plan.target_size {
        if rng.chance(plan.immigrant_rate) {
            let mut genome = sized_genome(genome_size)?;
            domain.random_init(&mut genome, rng)?;
            staged.push(Individual::new(genome));
            report.immigrants += 1;
            continue;
        }

        let i1 = parents.tournament_select(plan.tournament_size, rng)?;
        let i2 = parents.tournament_select(plan.tournament_size, rng)?;
        let p1 = &parents.individuals()[i1].genome;
        let p2 = &parents.individuals()[i2].genome;

        let (mut c1, mut c2) = if rng.chance(plan.crossover_rate) {
            let mut c1 = sized_genome(p1.size().max(p2.size()))?;
            let mut c2 = sized_genome(p1.size().min(p2.size()))?;
            domain.crossover(p1, p2, &mut c1, &mut c2, rng)?;
            report.crossovers += 1;
            (c1, c2)
        } else {
            (p1.clone(), p2.clone())
        };

        domain.mutate(&mut c1, plan.mutation_rate, rng)?;
        staged.push(Individual::new(c1));
        report.mutations += 1;

        if staged.len() < plan.target_size {
            domain.mutate(&mut c2, plan.mutation_rate, rng)?;
            staged.push(Individual::new(c2));
            report.mutations += 1;
        }
    }

    population.replace_all(staged)?;
    Ok(report)
}

fn sized_genome(size: usize) -> Result<Genome<'static>> {
    let mut genome = Genome::new(size)?;
    genome.set_size(size)?;
    Ok(genome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::NeedleDomain;

    #[test]
    fn test_crossover_equal_parents_identity() {
        let parent: Vec<u8> = (0..64).collect();
        for seed in 0..50 {
            let mut rng = EvoRng::new(seed);
            let (c1, c2) = uniform_crossover(&parent, &parent, &mut rng);
            assert_eq!(c1, parent);
            assert_eq!(c2, parent);
        }
    }

    #[test]
    fn test_crossover_positions_come_from_parents() {
        let p1 = vec![0u8; 32];
        let p2 = vec![1u8; 32];
        let mut rng = EvoRng::new(5);
        let (c1, c2) = uniform_crossover(&p1, &p2, &mut rng);
        for i in 0..32 {
            assert_eq!(c1[i] + c2[i], 1);
        }
    }

    #[test]
    fn test_crossover_unequal_lengths() {
        let p1 = vec![1u8; 4];
        let p2 = vec![2u8; 10];
        let mut rng = EvoRng::new(11);
        let (c1, c2) = uniform_crossover(&p1, &p2, &mut rng);
        assert_eq!(c1.len(), 10);
        assert_eq!(c2.len(), 4);
        assert_eq!(&c1[4..], &[2u8; 6]);
    }

    #[test]
    fn test_mutation_rate_zero_is_identity() {
        let mut bytes: Vec<u8> = (0..=255).collect();
        let original = bytes.clone();
        let mut rng = EvoRng::new(3);
        assert_eq!(mutate_bytes(&mut bytes, 0.0, &mut rng), 0);
        assert_eq!(bytes, original);
    }

    #[test]
    fn test_mutation_rate_one_touches_every_byte() {
        let mut bytes = vec![0u8; 64];
        let mut rng = EvoRng::new(3);
        assert_eq!(mutate_bytes(&mut bytes, 1.0, &mut rng), 64);
    }

    #[test]
    fn test_elite_and_cull_counts() {
        assert_eq!(elite_count(0.1, 100), 10);
        assert_eq!(elite_count(0.01, 10), 1);
        assert_eq!(elite_count(0.0, 10), 0);
        assert_eq!(cull_count(0.25, 100), 25);
        assert_eq!(cull_count(1.0, 4), 3);
        assert_eq!(cull_count(0.5, 0), 0);
    }

    #[test]
    fn test_breed_preserves_elites_and_size() {
        let domain = NeedleDomain::default();
        let mut rng = EvoRng::new(42);
        let mut pop = Population::new(20).unwrap();
        for _ in 0..20 {
            let mut g = sized_genome(domain.genome_size()).unwrap();
            domain.random_init(&mut g, &mut rng).unwrap();
            pop.add(&g, f64::NAN).unwrap();
        }
        pop.evaluate(|g| domain.fitness(g));
        pop.sort();
        let best = pop.get(0).unwrap().clone();

        let plan = BreedingPlan {
            target_size: 20,
            elite_count: 2,
            culling_ratio: 0.25,
            ..Default::default()
        };
        let report = breed_generation(&mut pop, &plan, &domain, &mut rng).unwrap();

        assert_eq!(pop.len(), 20);
        assert_eq!(report.elites, 2);
        assert_eq!(report.culled, 5);
        assert_eq!(pop.get(0).unwrap().genome, best.genome);
        assert_eq!(pop.get(0).unwrap().fitness, best.fitness);
        assert_eq!(pop.unevaluated().len(), 18);
    }

    #[test]
    fn test_selection_fitness_steers_tournaments_not_elites() {
        let domain = NeedleDomain::default();
        let mut pop = Population::new(10).unwrap();
        for i in 0..10u8 {
            let g = Genome::from_vec(vec![i; domain.genome_size()]).unwrap();
            pop.add(&g, i as f64).unwrap();
        }
        pop.update_stats();

        let plan = BreedingPlan {
            target_size: 10,
            tournament_size: 10,
            elite_count: 1,
            crossover_rate: 0.0,
            mutation_rate: 0.0,
            ..Default::default()
        };
        let mut rng = EvoRng::new(8);
        let shunned = vec![9u8; domain.genome_size()];
        breed_generation_with(&mut pop, &plan, &domain, &mut rng, |ind| {
            if ind.genome.as_bytes() == shunned.as_slice() {
                f64::NEG_INFINITY
            } else {
                ind.fitness
            }
        })
        .unwrap();

        assert_eq!(pop.get(0).unwrap().genome.as_bytes(), shunned.as_slice());
        assert_eq!(pop.get(0).unwrap().fitness, 9.0);
        let runner_up = vec![8u8; domain.genome_size()];
        for ind in &pop.individuals()[1..] {
            assert_eq!(ind.genome.as_bytes(), runner_up.as_slice());
        }
    }

    #[test]
    fn test_breed_failure_leaves_population() {
        let domain = NeedleDomain::default();
        let mut pop = Population::new(4).unwrap();
        pop.add(&sized_genome(32).unwrap(), 1.0).unwrap();

        let plan = BreedingPlan {
            target_size: 8,
            ..Default::default()
        };
        let mut rng = EvoRng::new(1);
        assert!(breed_generation(&mut pop, &plan, &domain, &mut rng).is_err());
        assert_eq!(pop.len(), 1);
        assert_eq!(pop.get(0).unwrap().fitness, 1.0);
    }
}
