//! Engine configuration loaded from JSON.
//!
//! Every key is optional; missing keys take the defaults below and unknown
//! keys are ignored. A handful of environment variables override the file:
//!
//! | Variable | Key |
//! |---|---|
//! | `LOG_LEVEL` | `logging.level` |
//! | `CUDA_DEVICE` | `gpu.device` |
//! | `CHECKPOINT_DIR` | `checkpoint.directory` |
//! | `NUM_THREADS` | `performance.num_threads` |

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::compute::evolution::MAX_META_POPULATION;
use crate::compute::{ExplorationStrategy, SeverityThresholds, StatsConfig};
use crate::error::{EvoError, Result};

use super::MetaFitnessStatistic;

fn default_population_size() -> usize {
    100
}

fn default_max_generations() -> u64 {
    100
}

fn default_seed() -> u64 {
    42
}

fn default_domain() -> String {
    "sphere".to_string()
}

fn default_tournament_size() -> usize {
    3
}

fn default_elite_count() -> usize {
    2
}

fn default_mutation_rate() -> f64 {
    0.05
}

fn default_crossover_rate() -> f64 {
    0.9
}

fn default_arena_capacity() -> usize {
    1024 * 1024
}

fn default_max_population() -> usize {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_checkpoint_interval() -> u64 {
    10
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("./checkpoints")
}

fn default_max_checkpoints() -> usize {
    5
}

fn default_base_rate() -> f64 {
    0.1
}

fn default_min_rate() -> f64 {
    crate::compute::DEFAULT_MIN_RATE
}

fn default_max_rate() -> f64 {
    crate::compute::DEFAULT_MAX_RATE
}

fn default_decay_rate() -> f64 {
    crate::compute::DEFAULT_DECAY_RATE
}

fn default_temperature() -> f64 {
    crate::compute::DEFAULT_TEMPERATURE
}

fn default_cooling_rate() -> f64 {
    crate::compute::DEFAULT_COOLING_RATE
}

fn default_ucb_c() -> f64 {
    crate::compute::DEFAULT_UCB_C
}

fn default_failure_capacity() -> usize {
    crate::compute::DEFAULT_FAILURE_CAPACITY
}

fn default_penalty_weight() -> f64 {
    crate::compute::DEFAULT_PENALTY_WEIGHT
}

fn default_negative_decay_rate() -> f64 {
    crate::compute::DEFAULT_NEGATIVE_DECAY_RATE
}

fn default_similarity_threshold() -> f64 {
    crate::compute::DEFAULT_SIMILARITY_THRESHOLD
}

fn default_repeat_multiplier() -> f64 {
    crate::compute::DEFAULT_REPEAT_MULTIPLIER
}

fn default_severity_thresholds() -> [f64; 4] {
    [-0.10, -0.25, -0.50, -0.90]
}

fn default_meta_population() -> usize {
    8
}

fn default_meta_generations() -> u64 {
    10
}

fn default_inner_generations() -> u64 {
    20
}

fn default_inner_population_cap() -> usize {
    100
}

fn default_convergence_window() -> usize {
    3
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub evolution: EvolutionSection,
    #[serde(default)]
    pub selection: SelectionSection,
    #[serde(default)]
    pub mutation: MutationSection,
    #[serde(default)]
    pub crossover: CrossoverSection,
    #[serde(default)]
    pub gpu: GpuSection,
    #[serde(default)]
    pub performance: PerformanceSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    /// Adaptive immigrant rate; absent means the fixed `selection.immigrant_rate`.
    #[serde(default)]
    pub exploration: Option<ExplorationConfig>,
    /// Failure memory that penalizes parents resembling poor genomes.
    #[serde(default)]
    pub negative: Option<NegativeConfig>,
    /// Meta-evolution of the inner loop's parameters; absent means a plain run.
    #[serde(default)]
    pub meta: Option<MetaConfig>,
}

/// Population and run length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionSection {
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    #[serde(default = "default_max_generations")]
    pub max_generations: u64,
    /// Genome size in bytes; 0 uses the domain's size.
    #[serde(default)]
    pub genome_size: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Registered domain to optimize.
    #[serde(default = "default_domain")]
    pub domain: String,
    /// Stop once best fitness reaches this value.
    #[serde(default)]
    pub target_fitness: Option<f64>,
}

impl Default for EvolutionSection {
    fn default() -> Self {
        Self {
            population_size: default_population_size(),
            max_generations: default_max_generations(),
            genome_size: 0,
            seed: default_seed(),
            domain: default_domain(),
            target_fitness: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionSection {
    #[serde(default = "default_tournament_size")]
    pub tournament_size: usize,
    #[serde(default = "default_elite_count")]
    pub elite_count: usize,
    /// Fraction of the worst individuals excluded from breeding.
    #[serde(default)]
    pub culling_ratio: f64,
    /// Share of offspring replaced by random genomes when `exploration` is
    /// absent.
    #[serde(default)]
    pub immigrant_rate: f64,
}

impl Default for SelectionSection {
    fn default() -> Self {
        Self {
            tournament_size: default_tournament_size(),
            elite_count: default_elite_count(),
            culling_ratio: 0.0,
            immigrant_rate: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationSection {
    /// Per-gene mutation probability.
    #[serde(default = "default_mutation_rate")]
    pub rate: f64,
}

impl Default for MutationSection {
    fn default() -> Self {
        Self {
            rate: default_mutation_rate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossoverSection {
    #[serde(default = "default_crossover_rate")]
    pub rate: f64,
}

impl Default for CrossoverSection {
    fn default() -> Self {
        Self {
            rate: default_crossover_rate(),
        }
    }
}

/// Accelerator settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuSection {
    #[serde(default)]
    pub enabled: bool,
    /// Genomes per device submission; 0 lets the device decide.
    #[serde(default)]
    pub batch_size: usize,
    #[serde(default)]
    pub device: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSection {
    /// Staging arena for accelerator uploads, in bytes.
    #[serde(default = "default_arena_capacity")]
    pub arena_capacity: usize,
    #[serde(default = "default_max_population")]
    pub max_population: usize,
    /// CPU evaluation workers; 0 detects the core count.
    #[serde(default)]
    pub num_threads: usize,
}

impl Default for PerformanceSection {
    fn default() -> Self {
        Self {
            arena_capacity: default_arena_capacity(),
            max_population: default_max_population(),
            num_threads: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// One of off, error, warn, info, debug, trace.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Append log lines to this file instead of stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl LoggingSection {
    pub fn level_filter(&self) -> Result<log::LevelFilter> {
        log::LevelFilter::from_str(&self.level).map_err(|_| {
            EvoError::ConfigInvalid(format!("logging.level {:?} is not a log level", self.level))
        })
    }
}

/// Automatic checkpointing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Generations between checkpoints.
    #[serde(default = "default_checkpoint_interval")]
    pub interval: u64,
    #[serde(default = "default_checkpoint_dir")]
    pub directory: PathBuf,
    /// Newest checkpoints kept on disk.
    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints: usize,
    /// Write the JSON encoding instead of the binary one.
    #[serde(default)]
    pub json: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: default_checkpoint_interval(),
            directory: default_checkpoint_dir(),
            max_checkpoints: default_max_checkpoints(),
            json: false,
        }
    }
}

/// Exploration controller settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationConfig {
    #[serde(default)]
    pub strategy: ExplorationStrategy,
    #[serde(default = "default_base_rate")]
    pub base_rate: f64,
    #[serde(default = "default_min_rate")]
    pub min_rate: f64,
    #[serde(default = "default_max_rate")]
    pub max_rate: f64,
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f64,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_cooling_rate")]
    pub cooling_rate: f64,
    #[serde(default = "default_ucb_c")]
    pub ucb_c: f64,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            strategy: ExplorationStrategy::default(),
            base_rate: default_base_rate(),
            min_rate: default_min_rate(),
            max_rate: default_max_rate(),
            decay_rate: default_decay_rate(),
            temperature: default_temperature(),
            cooling_rate: default_cooling_rate(),
            ucb_c: default_ucb_c(),
        }
    }
}

/// Negative learning settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegativeConfig {
    /// Failure records kept; 0 uses the default.
    #[serde(default = "default_failure_capacity")]
    pub capacity: usize,
    #[serde(default = "default_penalty_weight")]
    pub penalty_weight: f64,
    /// Per-generation penalty decay.
    #[serde(default = "default_negative_decay_rate")]
    pub decay_rate: f64,
    /// Byte similarity at which a genome matches a failure.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_repeat_multiplier")]
    pub repeat_multiplier: f64,
    /// Fitness bounds for mild, moderate, severe and fatal failures.
    #[serde(default = "default_severity_thresholds")]
    pub severity_thresholds: [f64; 4],
}

impl Default for NegativeConfig {
    fn default() -> Self {
        Self {
            capacity: default_failure_capacity(),
            penalty_weight: default_penalty_weight(),
            decay_rate: default_negative_decay_rate(),
            similarity_threshold: default_similarity_threshold(),
            repeat_multiplier: default_repeat_multiplier(),
            severity_thresholds: default_severity_thresholds(),
        }
    }
}

/// Meta-evolution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaConfig {
    /// Meta-individuals, at most 20.
    #[serde(default = "default_meta_population")]
    pub population_size: usize,
    #[serde(default = "default_meta_generations")]
    pub generations: u64,
    /// Inner generations run to score one meta-individual.
    #[serde(default = "default_inner_generations")]
    pub inner_generations: u64,
    /// Upper bound on the inner population size.
    #[serde(default = "default_inner_population_cap")]
    pub inner_population_cap: usize,
    #[serde(default)]
    pub statistic: MetaFitnessStatistic,
    /// Consecutive low-variance meta-generations that count as converged.
    #[serde(default = "default_convergence_window")]
    pub convergence_window: usize,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            population_size: default_meta_population(),
            generations: default_meta_generations(),
            inner_generations: default_inner_generations(),
            inner_population_cap: default_inner_population_cap(),
            statistic: MetaFitnessStatistic::default(),
            convergence_window: default_convergence_window(),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| EvoError::ConfigParse(e.to_string()))
    }

    /// Load a JSON file. Does not apply environment overrides.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EvoError::ConfigNotFound(path.to_path_buf()),
            _ => EvoError::FileRead(e),
        })?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| EvoError::ConfigParse(e.to_string()))
    }

    /// Configuration printed by `evocore --example`.
    pub fn example() -> Self {
        Self {
            exploration: Some(ExplorationConfig::default()),
            negative: Some(NegativeConfig::default()),
            ..Default::default()
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(device) = lookup("CUDA_DEVICE") {
            self.gpu.device = parse_var("CUDA_DEVICE", &device)?;
        }
        if let Some(dir) = lookup("CHECKPOINT_DIR") {
            self.checkpoint.directory = PathBuf::from(dir);
        }
        if let Some(threads) = lookup("NUM_THREADS") {
            self.performance.num_threads = parse_var("NUM_THREADS", &threads)?;
        }
        Ok(())
    }

    /// Check ranges and cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let evo = &self.evolution;
        if evo.population_size == 0 {
            return Err(invalid("evolution.population_size must be positive"));
        }
        if evo.population_size > self.performance.max_population {
            return Err(invalid(format!(
                "evolution.population_size {} exceeds performance.max_population {}",
                evo.population_size, self.performance.max_population
            )));
        }
        if evo.domain.is_empty() {
            return Err(invalid("evolution.domain is empty"));
        }
        if self.selection.tournament_size == 0 {
            return Err(invalid("selection.tournament_size must be positive"));
        }
        if self.selection.elite_count >= evo.population_size {
            return Err(invalid(format!(
                "selection.elite_count {} must be below population_size {}",
                self.selection.elite_count, evo.population_size
            )));
        }
        check_unit("selection.culling_ratio", self.selection.culling_ratio)?;
        if self.selection.culling_ratio >= 1.0 {
            return Err(invalid("selection.culling_ratio must be below 1"));
        }
        check_unit("selection.immigrant_rate", self.selection.immigrant_rate)?;
        check_unit("mutation.rate", self.mutation.rate)?;
        check_unit("crossover.rate", self.crossover.rate)?;
        self.logging.level_filter()?;

        if self.checkpoint.enabled {
            if self.checkpoint.interval == 0 {
                return Err(invalid("checkpoint.interval must be positive"));
            }
            if self.checkpoint.max_checkpoints == 0 {
                return Err(invalid("checkpoint.max_checkpoints must be positive"));
            }
        }

        if let Some(exp) = &self.exploration {
            check_unit("exploration.base_rate", exp.base_rate)?;
            check_unit("exploration.min_rate", exp.min_rate)?;
            check_unit("exploration.max_rate", exp.max_rate)?;
            if exp.min_rate > exp.max_rate {
                return Err(invalid("exploration.min_rate exceeds max_rate"));
            }
        }

        if let Some(neg) = &self.negative {
            check_unit("negative.penalty_weight", neg.penalty_weight)?;
            check_unit("negative.similarity_threshold", neg.similarity_threshold)?;
            if !(neg.decay_rate >= 0.0 && neg.decay_rate.is_finite()) {
                return Err(invalid("negative.decay_rate must be finite and non-negative"));
            }
            SeverityThresholds::from(neg.severity_thresholds)
                .validate()
                .map_err(|_| invalid("negative.severity_thresholds must be non-increasing"))?;
        }

        if let Some(meta) = &self.meta {
            if !(2..=MAX_META_POPULATION).contains(&meta.population_size) {
                return Err(invalid(format!(
                    "meta.population_size must be in 2..={}",
                    MAX_META_POPULATION
                )));
            }
            if meta.inner_generations == 0 || meta.inner_population_cap < 2 {
                return Err(invalid(
                    "meta.inner_generations and meta.inner_population_cap must allow a run",
                ));
            }
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> EvoError {
    EvoError::ConfigInvalid(msg.into())
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(format!("{} = {} outside [0, 1]", name, value)))
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(format!("{}={:?} is not a valid number", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.evolution.population_size, 100);
        assert_eq!(config.evolution.max_generations, 100);
        assert_eq!(config.evolution.seed, 42);
        assert_eq!(config.selection.tournament_size, 3);
        assert_eq!(config.selection.elite_count, 2);
        assert_eq!(config.mutation.rate, 0.05);
        assert_eq!(config.crossover.rate, 0.9);
        assert!(!config.gpu.enabled);
        assert_eq!(config.performance.arena_capacity, 1024 * 1024);
        assert_eq!(config.performance.max_population, 10_000);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.checkpoint.interval, 10);
        assert_eq!(config.checkpoint.max_checkpoints, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_with_unknown_keys() {
        let json = r#"{
            "evolution": { "population_size": 40, "unused": true },
            "mutation": { "rate": 0.2 },
            "something_else": [1, 2, 3]
        }"#;
        let config = EngineConfig::from_json_str(json).unwrap();
        assert_eq!(config.evolution.population_size, 40);
        assert_eq!(config.evolution.max_generations, 100);
        assert_eq!(config.mutation.rate, 0.2);
        assert_eq!(config.crossover.rate, 0.9);
        assert!(config.exploration.is_none());
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            EngineConfig::from_json_str("{ not json"),
            Err(EvoError::ConfigParse(_))
        ));
        assert!(matches!(
            EngineConfig::from_json_file("/nonexistent/evocore.json"),
            Err(EvoError::ConfigNotFound(_))
        ));
    }

    #[test]
    fn test_example_roundtrip() {
        let example = EngineConfig::example();
        let json = example.to_json_pretty().unwrap();
        assert_eq!(EngineConfig::from_json_str(&json).unwrap(), example);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("LOG_LEVEL", "debug"),
            ("CUDA_DEVICE", "2"),
            ("CHECKPOINT_DIR", "/tmp/ck"),
            ("NUM_THREADS", "6"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.gpu.device, 2);
        assert_eq!(config.checkpoint.directory, PathBuf::from("/tmp/ck"));
        assert_eq!(config.performance.num_threads, 6);

        let err = config
            .apply_overrides(|k| (k == "NUM_THREADS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, EvoError::ConfigInvalid(_)));
    }

    #[test]
    fn test_validation() {
        let mut config = EngineConfig::default();
        config.selection.elite_count = 100;
        assert!(matches!(config.validate(), Err(EvoError::ConfigInvalid(_))));

        let mut config = EngineConfig::default();
        config.mutation.rate = 1.5;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.evolution.population_size = 20_000;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::example();
        if let Some(neg) = &mut config.negative {
            neg.severity_thresholds = [-1.0, -0.5, -2.0, -3.0];
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_section() {
        let json = r#"{ "negative": { "penalty_weight": 0.25 } }"#;
        let config = EngineConfig::from_json_str(json).unwrap();
        let neg = config.negative.as_ref().unwrap();
        assert_eq!(neg.penalty_weight, 0.25);
        assert_eq!(neg.capacity, 1000);
        assert_eq!(neg.severity_thresholds, [-0.10, -0.25, -0.50, -0.90]);
        assert!(config.validate().is_ok());
    }
}
