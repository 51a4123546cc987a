//! Sphere function over `f64` genes.

use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::compute::{Domain, EvoRng, Genome, Population};
use crate::error::{EvoError, Result};

/// Default number of genes.
pub const SPHERE_DIMENSIONS: usize = 10;

/// Genes live in `[-SPHERE_BOUND, SPHERE_BOUND]`.
pub const SPHERE_BOUND: f64 = 5.12;

const GENE_BYTES: usize = std::mem::size_of::<f64>();

/// Maximize `-sum(x_i^2)`; the optimum 0 sits at the origin.
#[derive(Debug, Clone)]
pub struct SphereDomain {
    dimensions: usize,
    sigma: f64,
}

impl SphereDomain {
    /// `dimensions` genes, Gaussian mutation step `sigma`.
    pub fn new(dimensions: usize, sigma: f64) -> Result<Self> {
        if dimensions == 0 {
            return Err(EvoError::invalid_arg("sphere needs at least one dimension"));
        }
        mutation_step(sigma)?;
        Ok(Self { dimensions, sigma })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Decode the genes of a genome.
    pub fn genes(genome: &Genome<'_>) -> Vec<f64> {
        genome
            .as_bytes()
            .chunks_exact(GENE_BYTES)
            .map(|c| f64::from_le_bytes(c.try_into().unwrap_or([0; GENE_BYTES])))
            .collect()
    }

    /// Encode genes into a genome of the right size.
    pub fn encode(&self, genes: &[f64]) -> Result<Genome<'static>> {
        if genes.len() != self.dimensions {
            return Err(EvoError::GenomeInvalid(format!(
                "expected {} genes, got {}",
                self.dimensions,
                genes.len()
            )));
        }
        let bytes: Vec<u8> = genes.iter().flat_map(|g| g.to_le_bytes()).collect();
        Genome::from_vec(bytes)
    }

    fn write_genes(genome: &mut Genome<'_>, genes: &[f64]) -> Result<()> {
        let bytes = genome.as_bytes_mut()?;
        for (slot, gene) in bytes.chunks_exact_mut(GENE_BYTES).zip(genes) {
            slot.copy_from_slice(&gene.to_le_bytes());
        }
        Ok(())
    }

    fn check_size(&self, genome: &Genome<'_>) -> Result<()> {
        if genome.size() != self.genome_size() {
            return Err(EvoError::GenomeInvalid(format!(
                "sphere genome has {} bytes, expected {}",
                genome.size(),
                self.genome_size()
            )));
        }
        Ok(())
    }
}

/// Gaussian step; `sigma` must be positive and finite.
fn mutation_step(sigma: f64) -> Result<Normal<f64>> {
    if !(sigma > 0.0 && sigma.is_finite()) {
        return Err(EvoError::invalid_arg(format!(
            "mutation sigma {} must be positive and finite",
            sigma
        )));
    }
    Normal::new(0.0, sigma)
        .map_err(|e| EvoError::invalid_arg(format!("mutation sigma {}: {}", sigma, e)))
}

impl Default for SphereDomain {
    fn default() -> Self {
        Self {
            dimensions: SPHERE_DIMENSIONS,
            sigma: 0.25,
        }
    }
}

impl Domain for SphereDomain {
    fn name(&self) -> &str {
        "sphere"
    }

    fn genome_size(&self) -> usize {
        self.dimensions * GENE_BYTES
    }

    fn random_init(&self, genome: &mut Genome<'_>, rng: &mut EvoRng) -> Result<()> {
        self.check_size(genome)?;
        let genes: Vec<f64> = (0..self.dimensions)
            .map(|_| rng.gen_range(-SPHERE_BOUND..=SPHERE_BOUND))
            .collect();
        Self::write_genes(genome, &genes)
    }

    fn mutate(&self, genome: &mut Genome<'_>, rate: f64, rng: &mut EvoRng) -> Result<()> {
        self.check_size(genome)?;
        let step = mutation_step(self.sigma)?;
        let mut genes = Self::genes(genome);
        for gene in genes.iter_mut() {
            if rng.chance(rate) {
                *gene = (*gene + step.sample(rng)).clamp(-SPHERE_BOUND, SPHERE_BOUND);
            }
        }
        Self::write_genes(genome, &genes)
    }

    fn crossover(
        &self,
        parent1: &Genome<'_>,
        parent2: &Genome<'_>,
        child1: &mut Genome<'_>,
        child2: &mut Genome<'_>,
        rng: &mut EvoRng,
    ) -> Result<()> {
        for g in [parent1, parent2] {
            self.check_size(g)?;
        }
        let a = Self::genes(parent1);
        let b = Self::genes(parent2);
        let mut c1 = Vec::with_capacity(self.dimensions);
        let mut c2 = Vec::with_capacity(self.dimensions);
        for (x, y) in a.into_iter().zip(b) {
            if rng.chance(0.5) {
                c1.push(x);
                c2.push(y);
            } else {
                c1.push(y);
                c2.push(x);
            }
        }
        child1.set_size(self.genome_size())?;
        child2.set_size(self.genome_size())?;
        Self::write_genes(child1, &c1)?;
        Self::write_genes(child2, &c2)
    }

    /// Mean absolute gene difference over the full range.
    fn diversity(&self, a: &Genome<'_>, b: &Genome<'_>) -> f64 {
        let (ga, gb) = (Self::genes(a), Self::genes(b));
        if ga.is_empty() || ga.len() != gb.len() {
            return 1.0;
        }
        let total: f64 = ga.iter().zip(&gb).map(|(x, y)| (x - y).abs()).sum();
        (total / (ga.len() as f64 * 2.0 * SPHERE_BOUND)).clamp(0.0, 1.0)
    }

    fn fitness(&self, genome: &Genome<'_>) -> f64 {
        if genome.size() != self.genome_size() {
            return f64::NAN;
        }
        -Self::genes(genome).iter().map(|x| x * x).sum::<f64>()
    }

    fn serialize_genome(&self, genome: &Genome<'_>) -> String {
        let genes: Vec<String> = Self::genes(genome)
            .iter()
            .map(|g| format!("{:.6}", g))
            .collect();
        format!("[{}]", genes.join(", "))
    }

    fn deserialize_genome(&self, text: &str) -> Result<Genome<'static>> {
        let inner = text
            .trim()
            .strip_prefix('[')
            .and_then(|t| t.strip_suffix(']'))
            .ok_or_else(|| EvoError::GenomeInvalid("expected [x1, x2, ...]".into()))?;
        let genes = inner
            .split(',')
            .map(|s| {
                s.trim()
                    .parse::<f64>()
                    .map_err(|e| EvoError::GenomeInvalid(format!("gene {:?}: {}", s, e)))
            })
            .collect::<Result<Vec<f64>>>()?;
        self.encode(&genes)
    }

    fn statistics(&self, population: &Population) -> Option<String> {
        let best = population.best()?;
        let norm = Self::genes(&best.genome)
            .iter()
            .map(|x| x * x)
            .sum::<f64>()
            .sqrt();
        Some(format!("best |x| = {:.6}", norm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random(domain: &SphereDomain, rng: &mut EvoRng) -> Genome<'static> {
        let mut g = Genome::new(domain.genome_size()).unwrap();
        g.set_size(domain.genome_size()).unwrap();
        domain.random_init(&mut g, rng).unwrap();
        g
    }

    #[test]
    fn test_fitness_at_origin() {
        let domain = SphereDomain::default();
        let origin = domain.encode(&[0.0; SPHERE_DIMENSIONS]).unwrap();
        assert_eq!(domain.fitness(&origin), 0.0);

        let mut genes = [0.0; SPHERE_DIMENSIONS];
        genes[3] = 2.0;
        assert_eq!(domain.fitness(&domain.encode(&genes).unwrap()), -4.0);
    }

    #[test]
    fn test_genes_within_bounds() {
        let domain = SphereDomain::default();
        let mut rng = EvoRng::new(7);
        let mut g = random(&domain, &mut rng);
        for _ in 0..100 {
            domain.mutate(&mut g, 1.0, &mut rng).unwrap();
        }
        assert!(
            SphereDomain::genes(&g)
                .iter()
                .all(|x| x.abs() <= SPHERE_BOUND)
        );
    }

    #[test]
    fn test_crossover_mixes_whole_genes() {
        let domain = SphereDomain::new(4, 0.1).unwrap();
        let p1 = domain.encode(&[1.0, 1.0, 1.0, 1.0]).unwrap();
        let p2 = domain.encode(&[-1.0, -1.0, -1.0, -1.0]).unwrap();
        let mut c1 = Genome::new(32).unwrap();
        let mut c2 = Genome::new(32).unwrap();
        let mut rng = EvoRng::new(3);
        domain
            .crossover(&p1, &p2, &mut c1, &mut c2, &mut rng)
            .unwrap();

        let (g1, g2) = (SphereDomain::genes(&c1), SphereDomain::genes(&c2));
        for (x, y) in g1.iter().zip(&g2) {
            assert_eq!(x + y, 0.0);
            assert_eq!(x.abs(), 1.0);
        }
    }

    #[test]
    fn test_text_roundtrip() {
        let domain = SphereDomain::new(3, 0.1).unwrap();
        let g = domain.encode(&[0.5, -1.25, 3.0]).unwrap();
        let text = domain.serialize_genome(&g);
        assert_eq!(text, "[0.500000, -1.250000, 3.000000]");
        assert_eq!(domain.deserialize_genome(&text).unwrap(), g);
        assert!(domain.deserialize_genome("0.5, 1").is_err());
    }

    #[test]
    fn test_diversity_range() {
        let domain = SphereDomain::new(2, 0.1).unwrap();
        let a = domain.encode(&[SPHERE_BOUND, SPHERE_BOUND]).unwrap();
        let b = domain.encode(&[-SPHERE_BOUND, -SPHERE_BOUND]).unwrap();
        assert_eq!(domain.diversity(&a, &a), 0.0);
        assert_eq!(domain.diversity(&a, &b), 1.0);
    }

    #[test]
    fn test_invalid_construction() {
        assert!(SphereDomain::new(0, 0.1).is_err());
        assert!(SphereDomain::new(3, -1.0).is_err());
        assert!(SphereDomain::new(3, 0.0).is_err());
        assert!(SphereDomain::new(3, f64::NAN).is_err());
        assert!(SphereDomain::new(3, f64::INFINITY).is_err());
        assert!(matches!(
            SphereDomain::new(3, -1.0),
            Err(EvoError::InvalidArg(_))
        ));
    }
}
