//! Needle-in-a-haystack over a small byte alphabet.

use crate::compute::{Domain, EvoRng, FitnessKernel, Genome, Population, operators};
use crate::error::{EvoError, Result};

pub const NEEDLE_GENOME_SIZE: usize = 32;
pub const NEEDLE_TARGET: u8 = 0xAA;

/// Symbols a needle genome draws from by default.
pub const NEEDLE_ALPHABET: [u8; 4] = [0x00, 0x55, 0xAA, 0xFF];

/// Fitness is the number of bytes equal to the target; the maximum is the
/// genome size.
#[derive(Debug, Clone)]
pub struct NeedleDomain {
    genome_size: usize,
    target: u8,
    alphabet: Vec<u8>,
    kernel: FitnessKernel,
}

impl NeedleDomain {
    /// `alphabet` must be non-empty and contain `target`.
    pub fn new(genome_size: usize, target: u8, alphabet: Vec<u8>) -> Result<Self> {
        if genome_size == 0 {
            return Err(EvoError::invalid_arg("needle genome size is zero"));
        }
        if !alphabet.contains(&target) {
            return Err(EvoError::invalid_arg(format!(
                "alphabet does not contain target {:#04x}",
                target
            )));
        }
        Ok(Self {
            genome_size,
            target,
            alphabet,
            kernel: FitnessKernel::byte_match(target),
        })
    }

    /// Every byte value is a symbol.
    pub fn full_range(genome_size: usize, target: u8) -> Result<Self> {
        Self::new(genome_size, target, (0..=u8::MAX).collect())
    }

    pub fn target(&self) -> u8 {
        self.target
    }

    pub fn alphabet(&self) -> &[u8] {
        &self.alphabet
    }

    /// Largest attainable fitness.
    pub fn max_fitness(&self) -> f64 {
        self.genome_size as f64
    }

    fn symbol(&self, rng: &mut EvoRng) -> u8 {
        self.alphabet[rng.index(self.alphabet.len())]
    }
}

impl Default for NeedleDomain {
    fn default() -> Self {
        Self {
            genome_size: NEEDLE_GENOME_SIZE,
            target: NEEDLE_TARGET,
            alphabet: NEEDLE_ALPHABET.to_vec(),
            kernel: FitnessKernel::byte_match(NEEDLE_TARGET),
        }
    }
}

impl Domain for NeedleDomain {
    fn name(&self) -> &str {
        "needle"
    }

    fn genome_size(&self) -> usize {
        self.genome_size
    }

    fn random_init(&self, genome: &mut Genome<'_>, rng: &mut EvoRng) -> Result<()> {
        for byte in genome.as_bytes_mut()? {
            *byte = self.symbol(rng);
        }
        Ok(())
    }

    fn mutate(&self, genome: &mut Genome<'_>, rate: f64, rng: &mut EvoRng) -> Result<()> {
        for byte in genome.as_bytes_mut()? {
            if rng.chance(rate) {
                *byte = self.symbol(rng);
            }
        }
        Ok(())
    }

    fn crossover(
        &self,
        parent1: &Genome<'_>,
        parent2: &Genome<'_>,
        child1: &mut Genome<'_>,
        child2: &mut Genome<'_>,
        rng: &mut EvoRng,
    ) -> Result<()> {
        let (a, b) = operators::uniform_crossover(parent1.as_bytes(), parent2.as_bytes(), rng);
        child1.set_size(0)?;
        child2.set_size(0)?;
        child1.write(0, &a)?;
        child2.write(0, &b)
    }

    fn diversity(&self, a: &Genome<'_>, b: &Genome<'_>) -> f64 {
        match a.distance(b) {
            Ok(_) if a.is_empty() => 0.0,
            Ok(d) => d as f64 / a.size() as f64,
            Err(_) => 1.0,
        }
    }

    fn fitness(&self, genome: &Genome<'_>) -> f64 {
        genome
            .as_bytes()
            .iter()
            .filter(|&&b| b == self.target)
            .count() as f64
    }

    fn fitness_kernel(&self) -> Option<&FitnessKernel> {
        Some(&self.kernel)
    }

    fn statistics(&self, population: &Population) -> Option<String> {
        let solved = population
            .iter()
            .filter(|i| i.fitness >= self.max_fitness())
            .count();
        Some(format!("{} of {} individuals solved", solved, population.len()))
    }
}
