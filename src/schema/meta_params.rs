//! Meta-parameters: the tunable knobs of the inner evolutionary loop.
//!
//! A [`MetaParams`] record is both configuration and genome: the meta layer
//! mutates it field by field and clamps every field back into the range
//! listed in [`FIELDS`].

use std::fmt;

use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::compute::EvoRng;
use crate::error::{EvoError, Result};

/// Number of fields in a [`MetaParams`] record.
pub const META_FIELD_COUNT: usize = 22;

/// Relative standard deviation of a continuous field mutation.
pub const META_MUTATION_SIGMA: f64 = 0.1;

/// Step applied to population-size fields on mutation.
pub const POPULATION_MUTATION_STEP: f64 = 50.0;

/// Name, static range and default of one field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetaField {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
    pub default: f64,
    /// Population sizes mutate by whole steps and round on assignment.
    pub integer: bool,
}

const fn real(name: &'static str, min: f64, max: f64, default: f64) -> MetaField {
    MetaField {
        name,
        min,
        max,
        default,
        integer: false,
    }
}

const fn count(name: &'static str, min: f64, max: f64, default: f64) -> MetaField {
    MetaField {
        name,
        min,
        max,
        default,
        integer: true,
    }
}

/// Field table in storage order.
///
/// `min_population_size` is further bounded above by the target size and
/// `max_population_size` below by it; see [`MetaParams::clamp`].
pub const FIELDS: [MetaField; META_FIELD_COUNT] = [
    real("optimization_mutation_rate", 0.01, 0.50, 0.05),
    real("variance_mutation_rate", 0.05, 0.50, 0.15),
    real("experimentation_rate", 0.01, 0.30, 0.05),
    real("elite_protection_ratio", 0.05, 0.30, 0.10),
    real("culling_ratio", 0.10, 0.50, 0.25),
    real("fitness_threshold_for_breeding", 0.0, 1.0, 0.0),
    count("target_population_size", 50.0, 10_000.0, 500.0),
    count("min_population_size", 10.0, 10_000.0, 50.0),
    count("max_population_size", 50.0, 20_000.0, 2000.0),
    real("learning_rate", 0.01, 1.0, 0.1),
    real("exploration_factor", 0.0, 1.0, 0.3),
    real("confidence_threshold", 0.0, 1.0, 0.7),
    real("profitable_optimization_ratio", 0.5, 1.0, 0.80),
    real("profitable_random_ratio", 0.0, 0.2, 0.05),
    real("losing_optimization_ratio", 0.2, 0.8, 0.50),
    real("losing_random_ratio", 0.1, 0.5, 0.25),
    real("meta_mutation_rate", 0.01, 0.20, 0.05),
    real("meta_learning_rate", 0.01, 0.50, 0.1),
    real("meta_convergence_threshold", 0.001, 0.1, 0.01),
    real("negative_penalty_weight", 0.0, 1.0, 0.5),
    real("negative_decay_rate", 0.0, 0.2, 0.05),
    real("negative_similarity_threshold", 0.5, 0.95, 0.8),
];

/// Tunable parameters of the inner loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaParams {
    /// Per-gene mutation probability when refining.
    pub optimization_mutation_rate: f64,
    /// Mutation probability applied to variance-heavy regions.
    pub variance_mutation_rate: f64,
    /// Share of each generation spent on fresh random individuals.
    pub experimentation_rate: f64,
    /// Share of the population kept unchanged as elites.
    pub elite_protection_ratio: f64,
    /// Share of the worst individuals excluded from breeding.
    pub culling_ratio: f64,
    pub fitness_threshold_for_breeding: f64,

    pub target_population_size: usize,
    pub min_population_size: usize,
    pub max_population_size: usize,

    pub learning_rate: f64,
    pub exploration_factor: f64,
    pub confidence_threshold: f64,

    pub profitable_optimization_ratio: f64,
    pub profitable_random_ratio: f64,
    pub losing_optimization_ratio: f64,
    pub losing_random_ratio: f64,

    /// Per-field perturbation probability of this record itself.
    pub meta_mutation_rate: f64,
    pub meta_learning_rate: f64,
    /// Meta-fitness variance below which the meta layer counts as converged.
    pub meta_convergence_threshold: f64,

    pub negative_penalty_weight: f64,
    pub negative_decay_rate: f64,
    pub negative_similarity_threshold: f64,
}

impl Default for MetaParams {
    fn default() -> Self {
        let mut values = [0.0; META_FIELD_COUNT];
        for (v, field) in values.iter_mut().zip(FIELDS.iter()) {
            *v = field.default;
        }
        Self::from_array(&values)
    }
}

impl MetaParams {
    /// All fields in [`FIELDS`] order.
    pub fn to_array(&self) -> [f64; META_FIELD_COUNT] {
        [
            self.optimization_mutation_rate,
            self.variance_mutation_rate,
            self.experimentation_rate,
            self.elite_protection_ratio,
            self.culling_ratio,
            self.fitness_threshold_for_breeding,
            self.target_population_size as f64,
            self.min_population_size as f64,
            self.max_population_size as f64,
            self.learning_rate,
            self.exploration_factor,
            self.confidence_threshold,
            self.profitable_optimization_ratio,
            self.profitable_random_ratio,
            self.losing_optimization_ratio,
            self.losing_random_ratio,
            self.meta_mutation_rate,
            self.meta_learning_rate,
            self.meta_convergence_threshold,
            self.negative_penalty_weight,
            self.negative_decay_rate,
            self.negative_similarity_threshold,
        ]
    }

    /// Inverse of [`MetaParams::to_array`]. Population fields are rounded;
    /// nothing is clamped.
    pub fn from_array(values: &[f64; META_FIELD_COUNT]) -> Self {
        let size = |v: f64| if v.is_finite() && v > 0.0 { v.round() as usize } else { 0 };
        Self {
            optimization_mutation_rate: values[0],
            variance_mutation_rate: values[1],
            experimentation_rate: values[2],
            elite_protection_ratio: values[3],
            culling_ratio: values[4],
            fitness_threshold_for_breeding: values[5],
            target_population_size: size(values[6]),
            min_population_size: size(values[7]),
            max_population_size: size(values[8]),
            learning_rate: values[9],
            exploration_factor: values[10],
            confidence_threshold: values[11],
            profitable_optimization_ratio: values[12],
            profitable_random_ratio: values[13],
            losing_optimization_ratio: values[14],
            losing_random_ratio: values[15],
            meta_mutation_rate: values[16],
            meta_learning_rate: values[17],
            meta_convergence_threshold: values[18],
            negative_penalty_weight: values[19],
            negative_decay_rate: values[20],
            negative_similarity_threshold: values[21],
        }
    }

    fn field_index(name: &str) -> Result<usize> {
        FIELDS
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| EvoError::invalid_arg(format!("unknown meta parameter {:?}", name)))
    }

    /// Field value by name.
    pub fn get(&self, name: &str) -> Result<f64> {
        let index = Self::field_index(name)?;
        Ok(self.to_array()[index])
    }

    /// Assign a field by name. The value is stored as given (rounded for
    /// population fields); call [`MetaParams::clamp`] or
    /// [`MetaParams::validate`] afterwards.
    pub fn set(&mut self, name: &str, value: f64) -> Result<()> {
        let index = Self::field_index(name)?;
        let mut values = self.to_array();
        values[index] = value;
        *self = Self::from_array(&values);
        Ok(())
    }

    /// Ok when every field lies in its range.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in FIELDS.iter().zip(self.to_array()) {
            if !(field.min..=field.max).contains(&value) {
                return Err(EvoError::ConfigInvalid(format!(
                    "{} = {} outside [{}, {}]",
                    field.name, value, field.min, field.max
                )));
            }
        }
        if self.min_population_size > self.target_population_size {
            return Err(EvoError::ConfigInvalid(format!(
                "min_population_size = {} exceeds target_population_size = {}",
                self.min_population_size, self.target_population_size
            )));
        }
        if self.max_population_size < self.target_population_size {
            return Err(EvoError::ConfigInvalid(format!(
                "max_population_size = {} is below target_population_size = {}",
                self.max_population_size, self.target_population_size
            )));
        }
        Ok(())
    }

    /// Force every field into its range. Non-finite values reset to the
    /// field default.
    pub fn clamp(&mut self) {
        let mut values = self.to_array();
        for (v, field) in values.iter_mut().zip(FIELDS.iter()) {
            *v = if v.is_finite() {
                v.clamp(field.min, field.max)
            } else {
                field.default
            };
        }
        let mut params = Self::from_array(&values);
        params.min_population_size = params.min_population_size.min(params.target_population_size);
        params.max_population_size = params.max_population_size.max(params.target_population_size);
        *self = params;
    }

    /// Perturb each field with probability `meta_mutation_rate`, then clamp.
    ///
    /// Continuous fields are scaled by `1 + N(0, 0.1)`; population sizes
    /// move by 50 up or down.
    pub fn mutate(&mut self, rng: &mut EvoRng) -> Result<()> {
        let factor = Normal::new(1.0, META_MUTATION_SIGMA)
            .map_err(|e| EvoError::invalid_arg(e.to_string()))?;
        let rate = self.meta_mutation_rate;

        let mut values = self.to_array();
        for (v, field) in values.iter_mut().zip(FIELDS.iter()) {
            if !rng.chance(rate) {
                continue;
            }
            if field.integer {
                *v += if rng.chance(0.5) {
                    POPULATION_MUTATION_STEP
                } else {
                    -POPULATION_MUTATION_STEP
                };
            } else {
                *v *= factor.sample(rng);
            }
        }
        *self = Self::from_array(&values);
        self.clamp();
        Ok(())
    }
}

impl fmt::Display for MetaParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Meta-parameters:")?;
        for (field, value) in FIELDS.iter().zip(self.to_array()) {
            if field.integer {
                writeln!(f, "  {:<32} {}", field.name, value as usize)?;
            } else {
                writeln!(f, "  {:<32} {:.4}", field.name, value)?;
            }
        }
        Ok(())
    }
}

/// Scalar that summarizes an inner run as a meta-fitness.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MetaFitnessStatistic {
    /// Best fitness reached.
    #[default]
    BestFitness,
    /// Mean of the best-so-far curve over the inner generations.
    AreaUnderCurve,
    /// Mean fitness of the final `k` best individuals.
    MeanTopK { k: usize },
    /// Weighted blend of best, average, diversity and speed.
    Composite,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let params = MetaParams::default();
        params.validate().unwrap();
        assert_eq!(params.optimization_mutation_rate, 0.05);
        assert_eq!(params.target_population_size, 500);
        assert_eq!(params.min_population_size, 50);
        assert_eq!(params.max_population_size, 2000);
        assert_eq!(params.negative_similarity_threshold, 0.8);
    }

    #[test]
    fn test_field_table_defaults_in_range() {
        for field in FIELDS {
            assert!(field.min <= field.default && field.default <= field.max, "{}", field.name);
        }
        let names: std::collections::HashSet<_> = FIELDS.iter().map(|f| f.name).collect();
        assert_eq!(names.len(), META_FIELD_COUNT);
    }

    #[test]
    fn test_get_set() {
        let mut params = MetaParams::default();
        params.set("culling_ratio", 0.4).unwrap();
        assert_eq!(params.get("culling_ratio").unwrap(), 0.4);
        params.set("target_population_size", 120.6).unwrap();
        assert_eq!(params.target_population_size, 121);

        assert!(matches!(params.get("nope"), Err(EvoError::InvalidArg(_))));
        assert!(params.set("nope", 1.0).is_err());
    }

    #[test]
    fn test_validate_names_field() {
        let mut params = MetaParams::default();
        params.elite_protection_ratio = 0.9;
        match params.validate() {
            Err(EvoError::ConfigInvalid(msg)) => assert!(msg.contains("elite_protection_ratio")),
            other => panic!("unexpected {:?}", other),
        }

        let mut params = MetaParams::default();
        params.min_population_size = 600;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_clamp() {
        let mut params = MetaParams::default();
        params.optimization_mutation_rate = 5.0;
        params.culling_ratio = f64::NAN;
        params.target_population_size = 20;
        params.min_population_size = 9000;
        params.clamp();

        assert_eq!(params.optimization_mutation_rate, 0.5);
        assert_eq!(params.culling_ratio, 0.25);
        assert_eq!(params.target_population_size, 50);
        assert_eq!(params.min_population_size, 50);
        params.validate().unwrap();
    }

    #[test]
    fn test_mutate_stays_valid() {
        let mut rng = EvoRng::new(99);
        let mut params = MetaParams {
            meta_mutation_rate: 0.2,
            ..Default::default()
        };
        let original = params.clone();
        let mut changed = false;
        for _ in 0..200 {
            params.mutate(&mut rng).unwrap();
            params.validate().unwrap();
            changed |= params != original;
        }
        assert!(changed);
    }

    #[test]
    fn test_array_roundtrip() {
        let params = MetaParams::default();
        assert_eq!(MetaParams::from_array(&params.to_array()), params);
    }

    #[test]
    fn test_display_lists_every_field() {
        let text = MetaParams::default().to_string();
        for field in FIELDS {
            assert!(text.contains(field.name));
        }
    }

    #[test]
    fn test_statistic_serde() {
        let s: MetaFitnessStatistic =
            serde_json::from_str(r#"{"kind": "mean_top_k", "k": 5}"#).unwrap();
        assert_eq!(s, MetaFitnessStatistic::MeanTopK { k: 5 });
        assert_eq!(MetaFitnessStatistic::default(), MetaFitnessStatistic::BestFitness);
    }
}
