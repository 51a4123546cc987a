//! Problem domains and the registry that names them.
//!
//! A [`Domain`] gives meaning to genome bytes: it knows how to create,
//! vary and score them. The engine only ever talks to a domain through this
//! trait; any state the domain needs (lookup tables, datasets) lives in the
//! implementing type.
//!
//! Domains are collected in a [`DomainRegistry`], which is an ordinary
//! value passed to whoever needs it. [`DomainRegistry::global`] provides a
//! process-wide instance for programs that prefer one.

use std::sync::{Arc, OnceLock, RwLock};

use crate::checkpoint::DOMAIN_NAME_LEN;
use crate::error::{EvoError, Result};

use super::batch::{BatchFitness, FitnessKernel};
use super::genome::Genome;
use super::population::Population;
use super::rng::EvoRng;

/// Maximum number of registered domains.
pub const MAX_DOMAINS: usize = 16;

/// Version reported by domains that don't override [`Domain::version`].
pub const DEFAULT_DOMAIN_VERSION: &str = "1.0.0";

/// Genome operations and fitness for one problem.
pub trait Domain: Send + Sync {
    /// Unique registry key.
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        DEFAULT_DOMAIN_VERSION
    }

    /// Expected genome size in bytes.
    fn genome_size(&self) -> usize;

    /// Initialize a pre-allocated genome of [`Domain::genome_size`] bytes.
    fn random_init(&self, genome: &mut Genome<'_>, rng: &mut EvoRng) -> Result<()>;

    /// Mutate in place. `rate` is the per-gene mutation probability.
    fn mutate(&self, genome: &mut Genome<'_>, rate: f64, rng: &mut EvoRng) -> Result<()>;

    /// Fill two pre-allocated children from two parents.
    fn crossover(
        &self,
        parent1: &Genome<'_>,
        parent2: &Genome<'_>,
        child1: &mut Genome<'_>,
        child2: &mut Genome<'_>,
        rng: &mut EvoRng,
    ) -> Result<()>;

    /// Dissimilarity in `[0, 1]`.
    fn diversity(&self, a: &Genome<'_>, b: &Genome<'_>) -> f64;

    /// Higher is better; NaN marks an invalid individual.
    fn fitness(&self, genome: &Genome<'_>) -> f64;

    /// Device form of [`Domain::fitness`], if the domain has one.
    fn fitness_kernel(&self) -> Option<&FitnessKernel> {
        None
    }

    /// Text form of a genome for reports and debugging.
    fn serialize_genome(&self, genome: &Genome<'_>) -> String {
        genome.to_hex()
    }

    /// Inverse of [`Domain::serialize_genome`].
    fn deserialize_genome(&self, text: &str) -> Result<Genome<'static>> {
        Genome::from_hex(text)
    }

    /// Domain-specific summary of a population.
    fn statistics(&self, _population: &Population) -> Option<String> {
        None
    }
}

/// A domain's fitness as a [`BatchFitness`], for the batch evaluator.
#[derive(Clone, Copy)]
pub struct DomainFitness<'a>(pub &'a dyn Domain);

impl BatchFitness for DomainFitness<'_> {
    fn evaluate(&self, genome: &[u8]) -> f64 {
        self.0.fitness(&Genome::view(genome))
    }

    fn kernel(&self) -> Option<&FitnessKernel> {
        self.0.fitness_kernel()
    }
}

/// Name-keyed table of domains.
#[derive(Default)]
pub struct DomainRegistry {
    domains: Vec<Arc<dyn Domain>>,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry.
    pub fn global() -> &'static RwLock<DomainRegistry> {
        static GLOBAL: OnceLock<RwLock<DomainRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| RwLock::new(DomainRegistry::new()))
    }

    /// Add a domain. Names must be unique and non-empty.
    pub fn register(&mut self, domain: Arc<dyn Domain>) -> Result<()> {
        let name = domain.name();
        if name.is_empty() {
            return Err(EvoError::invalid_arg("domain name is empty"));
        }
        if name.len() >= DOMAIN_NAME_LEN {
            return Err(EvoError::invalid_arg(format!(
                "domain name {} exceeds {} bytes",
                name,
                DOMAIN_NAME_LEN - 1
            )));
        }
        if domain.genome_size() == 0 {
            return Err(EvoError::invalid_arg(format!(
                "domain {} declares a zero genome size",
                name
            )));
        }
        if self.contains(name) {
            return Err(EvoError::invalid_arg(format!(
                "domain {} is already registered",
                name
            )));
        }
        if self.domains.len() >= MAX_DOMAINS {
            return Err(EvoError::RegistryFull(MAX_DOMAINS));
        }

        log::debug!("Registered domain {} v{}", name, domain.version());
        self.domains.push(domain);
        Ok(())
    }

    /// Remove a domain by name, returning it.
    pub fn unregister(&mut self, name: &str) -> Result<Arc<dyn Domain>> {
        let index = self
            .domains
            .iter()
            .position(|d| d.name() == name)
            .ok_or_else(|| EvoError::DomainNotFound(name.to_string()))?;
        Ok(self.domains.remove(index))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Domain>> {
        self.domains.iter().find(|d| d.name() == name).cloned()
    }

    /// Like [`DomainRegistry::get`], as an error.
    pub fn require(&self, name: &str) -> Result<Arc<dyn Domain>> {
        self.get(name)
            .ok_or_else(|| EvoError::DomainNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.domains.iter().any(|d| d.name() == name)
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Name of the domain in registration slot `index`.
    pub fn name(&self, index: usize) -> Option<&str> {
        self.domains.get(index).map(|d| d.name())
    }

    pub fn names(&self) -> Vec<String> {
        self.domains.iter().map(|d| d.name().to_string()).collect()
    }

    /// Zeroed genome sized for the named domain.
    pub fn create_genome(&self, name: &str) -> Result<Genome<'static>> {
        let domain = self.require(name)?;
        let mut genome = Genome::new(domain.genome_size())?;
        genome.set_size(domain.genome_size())?;
        Ok(genome)
    }
}

impl std::fmt::Debug for DomainRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainRegistry")
            .field("domains", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::operators;

    struct ByteCount {
        name: String,
    }

    impl Domain for ByteCount {
        fn name(&self) -> &str {
            &self.name
        }

        fn genome_size(&self) -> usize {
            4
        }

        fn random_init(&self, genome: &mut Genome<'_>, rng: &mut EvoRng) -> Result<()> {
            genome.randomize(rng)
        }

        fn mutate(&self, genome: &mut Genome<'_>, rate: f64, rng: &mut EvoRng) -> Result<()> {
            operators::mutate_bytes(genome.as_bytes_mut()?, rate, rng);
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
            *child1 = Genome::from_vec(a)?;
            *child2 = Genome::from_vec(b)?;
            Ok(())
        }

        fn diversity(&self, a: &Genome<'_>, b: &Genome<'_>) -> f64 {
            a.distance(b).map(|d| d as f64 / 4.0).unwrap_or(1.0)
        }

        fn fitness(&self, genome: &Genome<'_>) -> f64 {
            genome.as_bytes().iter().map(|&b| b as f64).sum()
        }
    }

    fn domain(name: &str) -> Arc<dyn Domain> {
        Arc::new(ByteCount {
            name: name.to_string(),
        })
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = DomainRegistry::new();
        registry.register(domain("alpha")).unwrap();
        registry.register(domain("beta")).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("beta"));
        assert_eq!(registry.name(0), Some("alpha"));
        assert_eq!(registry.get("alpha").unwrap().version(), "1.0.0");
        assert!(registry.get("gamma").is_none());

        let genome = registry.create_genome("alpha").unwrap();
        assert_eq!(genome.size(), 4);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = DomainRegistry::new();
        registry.register(domain("alpha")).unwrap();
        let err = registry.register(domain("alpha")).unwrap_err();
        assert!(matches!(err, EvoError::InvalidArg(_)));
    }

    #[test]
    fn test_name_must_fit_checkpoint_field() {
        let mut registry = DomainRegistry::new();
        let longest = "n".repeat(DOMAIN_NAME_LEN - 1);
        registry.register(domain(&longest)).unwrap();
        let err = registry
            .register(domain(&"n".repeat(DOMAIN_NAME_LEN)))
            .unwrap_err();
        assert!(matches!(err, EvoError::InvalidArg(_)));
        assert!(matches!(
            registry.register(domain("")),
            Err(EvoError::InvalidArg(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_capacity() {
        let mut registry = DomainRegistry::new();
        for i in 0..MAX_DOMAINS {
            registry.register(domain(&format!("d{}", i))).unwrap();
        }
        let err = registry.register(domain("overflow")).unwrap_err();
        assert!(matches!(err, EvoError::RegistryFull(MAX_DOMAINS)));
    }

    #[test]
    fn test_unregister() {
        let mut registry = DomainRegistry::new();
        registry.register(domain("alpha")).unwrap();
        registry.unregister("alpha").unwrap();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.unregister("alpha"),
            Err(EvoError::DomainNotFound(_))
        ));
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut registry = DomainRegistry::new();
        assert!(registry.register(domain("")).is_err());
    }

    #[test]
    fn test_domain_fitness_adapter() {
        let d = ByteCount {
            name: "adapter".into(),
        };
        let fitness = DomainFitness(&d);
        assert_eq!(fitness.evaluate(&[1, 2, 3, 4]), 10.0);
        assert!(fitness.kernel().is_none());
    }

    #[test]
    fn test_global_registry() {
        let mut global = DomainRegistry::global().write().unwrap();
        global.register(domain("global-test-domain")).unwrap();
        assert!(global.contains("global-test-domain"));
        global.unregister("global-test-domain").unwrap();
    }
}
