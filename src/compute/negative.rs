//! Negative learning: remember poor genomes and steer selection away from
//! their neighbourhood.
//!
//! # Overview
//!
//! A failure is an evaluated genome whose fitness falls at or below one of
//! four [`SeverityThresholds`]. Each failure becomes a [`FailureRecord`]
//! carrying a penalty in `[0, 1]`:
//!
//! | Severity | Initial penalty |
//! |---|---|
//! | `Mild` | 0.2 |
//! | `Moderate` | 0.4 |
//! | `Severe` | 0.7 |
//! | `Fatal` | 0.95 |
//!
//! A failure whose byte similarity to an active record reaches the
//! similarity threshold reinforces that record instead of adding a new one.
//! Penalties decay by `exp(-decay_rate)` per generation and a record under
//! [`INACTIVE_PENALTY`] stops counting.
//!
//! [`NegativeLearning::adjust_fitness`] lowers a fitness by
//! `penalty_weight * penalty * |fitness|`, where `penalty` is the strongest
//! similarity-weighted penalty among matching records.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::checkpoint::exact_f64;
use crate::error::{EvoError, Result};

pub const DEFAULT_FAILURE_CAPACITY: usize = 1000;
pub const DEFAULT_PENALTY_WEIGHT: f64 = 0.5;
pub const DEFAULT_NEGATIVE_DECAY_RATE: f64 = 0.05;
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;
pub const DEFAULT_REPEAT_MULTIPLIER: f64 = 1.5;

/// Records below this penalty no longer match anything.
pub const INACTIVE_PENALTY: f64 = 0.05;

/// Pruning applied when the record store is full.
const PRUNE_MIN_PENALTY: f64 = 0.01;
const PRUNE_MAX_AGE: u64 = 100;

/// How bad a failure was.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FailureSeverity {
    #[default]
    None,
    Mild,
    Moderate,
    Severe,
    Fatal,
}

impl FailureSeverity {
    /// NaN is never a failure.
    pub fn classify(fitness: f64, thresholds: &SeverityThresholds) -> Self {
        if fitness.is_nan() {
            FailureSeverity::None
        } else if fitness <= thresholds.fatal {
            FailureSeverity::Fatal
        } else if fitness <= thresholds.severe {
            FailureSeverity::Severe
        } else if fitness <= thresholds.moderate {
            FailureSeverity::Moderate
        } else if fitness <= thresholds.mild {
            FailureSeverity::Mild
        } else {
            FailureSeverity::None
        }
    }

    pub fn initial_penalty(self) -> f64 {
        match self {
            FailureSeverity::None => 0.0,
            FailureSeverity::Mild => 0.2,
            FailureSeverity::Moderate => 0.4,
            FailureSeverity::Severe => 0.7,
            FailureSeverity::Fatal => 0.95,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureSeverity::None => "none",
            FailureSeverity::Mild => "mild",
            FailureSeverity::Moderate => "moderate",
            FailureSeverity::Severe => "severe",
            FailureSeverity::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for FailureSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upper fitness bounds of each severity, from mildest to worst.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityThresholds {
    #[serde(with = "exact_f64")]
    pub mild: f64,
    #[serde(with = "exact_f64")]
    pub moderate: f64,
    #[serde(with = "exact_f64")]
    pub severe: f64,
    #[serde(with = "exact_f64")]
    pub fatal: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self::from([-0.10, -0.25, -0.50, -0.90])
    }
}

impl From<[f64; 4]> for SeverityThresholds {
    fn from([mild, moderate, severe, fatal]: [f64; 4]) -> Self {
        Self {
            mild,
            moderate,
            severe,
            fatal,
        }
    }
}

impl SeverityThresholds {
    /// Thresholds must be finite and non-increasing.
    pub fn validate(&self) -> Result<()> {
        let values = [self.mild, self.moderate, self.severe, self.fatal];
        if values.iter().any(|v| !v.is_finite()) || values.windows(2).any(|w| w[1] > w[0]) {
            return Err(EvoError::invalid_arg(format!(
                "severity thresholds {:?} must be finite and non-increasing",
                values
            )));
        }
        Ok(())
    }
}

/// Share of equal bytes over the shorter genome; 0 when either is empty.
pub fn genome_similarity(a: &[u8], b: &[u8]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let matching = a.iter().zip(b).filter(|(x, y)| x == y).count();
    matching as f64 / n as f64
}

/// One remembered failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub genome: Vec<u8>,
    /// Worst fitness seen for this record.
    #[serde(with = "exact_f64")]
    pub fitness: f64,
    pub severity: FailureSeverity,
    /// Generation of the latest failure matched to this record.
    pub generation: u64,
    #[serde(with = "exact_f64")]
    pub penalty: f64,
    pub repeat_count: u32,
    pub active: bool,
}

/// What [`NegativeLearning::record_failure`] did with a genome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    NotAFailure,
    Recorded,
    /// Matched an existing record, whose index is given.
    Reinforced(usize),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NegativeStats {
    pub total: usize,
    pub active: usize,
    pub mild: usize,
    pub moderate: usize,
    pub severe: usize,
    pub fatal: usize,
    /// Records matched more than once.
    pub repeated: usize,
    pub max_penalty: f64,
    /// Mean penalty of active records.
    pub avg_penalty: f64,
}

/// Store of failure records with decaying penalties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegativeLearning {
    records: Vec<FailureRecord>,
    capacity: usize,
    #[serde(with = "exact_f64")]
    penalty_weight: f64,
    #[serde(with = "exact_f64")]
    decay_rate: f64,
    #[serde(with = "exact_f64")]
    similarity_threshold: f64,
    #[serde(with = "exact_f64")]
    repeat_multiplier: f64,
    thresholds: SeverityThresholds,
    generation: u64,
}

impl Default for NegativeLearning {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            capacity: DEFAULT_FAILURE_CAPACITY,
            penalty_weight: DEFAULT_PENALTY_WEIGHT,
            decay_rate: DEFAULT_NEGATIVE_DECAY_RATE,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            repeat_multiplier: DEFAULT_REPEAT_MULTIPLIER,
            thresholds: SeverityThresholds::default(),
            generation: 0,
        }
    }
}

impl NegativeLearning {
    /// `capacity` of 0 means [`DEFAULT_FAILURE_CAPACITY`]. The weight and
    /// similarity threshold must lie in `[0, 1]`, the decay rate must be
    /// finite and non-negative.
    pub fn new(
        capacity: usize,
        penalty_weight: f64,
        decay_rate: f64,
        similarity_threshold: f64,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&penalty_weight) {
            return Err(EvoError::invalid_arg(format!(
                "penalty weight {} outside [0, 1]",
                penalty_weight
            )));
        }
        if !(decay_rate >= 0.0 && decay_rate.is_finite()) {
            return Err(EvoError::invalid_arg(format!(
                "decay rate {} must be finite and non-negative",
                decay_rate
            )));
        }
        if !(0.0..=1.0).contains(&similarity_threshold) {
            return Err(EvoError::invalid_arg(format!(
                "similarity threshold {} outside [0, 1]",
                similarity_threshold
            )));
        }
        Ok(Self {
            capacity: if capacity == 0 {
                DEFAULT_FAILURE_CAPACITY
            } else {
                capacity
            },
            penalty_weight,
            decay_rate,
            similarity_threshold,
            ..Self::default()
        })
    }

    pub fn set_thresholds(&mut self, thresholds: SeverityThresholds) -> Result<()> {
        thresholds.validate()?;
        self.thresholds = thresholds;
        Ok(())
    }

    /// Floored at 1.
    pub fn set_repeat_multiplier(&mut self, multiplier: f64) {
        self.repeat_multiplier = multiplier.max(1.0);
    }

    pub fn penalty_weight(&self) -> f64 {
        self.penalty_weight
    }

    pub fn decay_rate(&self) -> f64 {
        self.decay_rate
    }

    pub fn similarity_threshold(&self) -> f64 {
        self.similarity_threshold
    }

    pub fn thresholds(&self) -> &SeverityThresholds {
        &self.thresholds
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn records(&self) -> &[FailureRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.records.iter().filter(|r| r.active).count()
    }

    /// Classify `fitness` and remember `genome` if it is a failure.
    pub fn record_failure(&mut self, genome: &[u8], fitness: f64, generation: u64) -> FailureOutcome {
        let severity = FailureSeverity::classify(fitness, &self.thresholds);
        self.record_with_severity(genome, fitness, severity, generation)
    }

    /// Remember `genome` with an explicit severity.
    ///
    /// A full store is pruned first; if that frees nothing the record with
    /// the lowest penalty is replaced.
    pub fn record_with_severity(
        &mut self,
        genome: &[u8],
        fitness: f64,
        severity: FailureSeverity,
        generation: u64,
    ) -> FailureOutcome {
        if severity == FailureSeverity::None {
            return FailureOutcome::NotAFailure;
        }
        self.generation = generation;

        if let Some((index, similarity)) = self.closest(genome)
            && similarity >= self.similarity_threshold
        {
            let multiplier = self.repeat_multiplier;
            let thresholds = self.thresholds;
            let record = &mut self.records[index];
            record.repeat_count += 1;
            record.generation = generation;
            record.penalty =
                (record.penalty + multiplier * record.repeat_count as f64 / 10.0).min(1.0);
            if fitness < record.fitness {
                record.fitness = fitness;
                record.severity = record
                    .severity
                    .max(FailureSeverity::classify(fitness, &thresholds));
            }
            return FailureOutcome::Reinforced(index);
        }

        let record = FailureRecord {
            genome: genome.to_vec(),
            fitness,
            severity,
            generation,
            penalty: severity.initial_penalty(),
            repeat_count: 1,
            active: true,
        };

        if self.records.len() >= self.capacity {
            self.prune(PRUNE_MIN_PENALTY, PRUNE_MAX_AGE);
        }
        if self.records.len() >= self.capacity {
            let weakest = self
                .records
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.penalty.total_cmp(&b.penalty))
                .map(|(i, _)| i)
                .unwrap_or(0);
            self.records[weakest] = record;
        } else {
            self.records.push(record);
        }
        FailureOutcome::Recorded
    }

    /// Move to `generation`, decaying penalties for the generations passed.
    pub fn set_generation(&mut self, generation: u64) {
        if generation > self.generation {
            self.decay(generation - self.generation);
        }
        self.generation = generation;
    }

    /// Multiply every penalty by `exp(-decay_rate * generations)`.
    pub fn decay(&mut self, generations: u64) {
        if generations == 0 {
            return;
        }
        let factor = (-self.decay_rate * generations as f64).exp();
        for record in &mut self.records {
            record.penalty *= factor;
            if record.penalty < INACTIVE_PENALTY {
                record.active = false;
            }
        }
    }

    /// Strongest similarity-weighted penalty among matching active records.
    pub fn penalty(&self, genome: &[u8]) -> f64 {
        self.records
            .iter()
            .filter(|r| r.active)
            .filter_map(|r| {
                let similarity = genome_similarity(genome, &r.genome);
                (similarity >= self.similarity_threshold).then_some(r.penalty * similarity)
            })
            .fold(0.0, f64::max)
    }

    pub fn is_forbidden(&self, genome: &[u8], threshold: f64) -> bool {
        self.penalty(genome) >= threshold
    }

    /// `fitness` lowered by `penalty_weight * penalty * |fitness|`. NaN and
    /// infinities pass through unchanged.
    pub fn adjust_fitness(&self, genome: &[u8], fitness: f64) -> f64 {
        if !fitness.is_finite() || self.penalty_weight == 0.0 {
            return fitness;
        }
        let penalty = self.penalty(genome);
        fitness - self.penalty_weight * penalty * fitness.abs()
    }

    /// Most similar active record at or above the similarity threshold.
    pub fn find_similar(&self, genome: &[u8]) -> Option<(&FailureRecord, f64)> {
        self.closest(genome)
            .filter(|&(_, similarity)| similarity >= self.similarity_threshold)
            .map(|(i, similarity)| (&self.records[i], similarity))
    }

    fn closest(&self, genome: &[u8]) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (i, record) in self.records.iter().enumerate() {
            if !record.active {
                continue;
            }
            let similarity = genome_similarity(genome, &record.genome);
            if similarity > best.map_or(0.0, |(_, s)| s) {
                best = Some((i, similarity));
            }
        }
        best
    }

    /// Drop records under `min_penalty` or older than `max_age` generations
    /// (0 disables the age limit). Returns the number dropped.
    pub fn prune(&mut self, min_penalty: f64, max_age: u64) -> usize {
        let now = self.generation;
        let before = self.records.len();
        self.records.retain(|r| {
            let too_old = max_age > 0 && now.saturating_sub(r.generation) > max_age;
            r.penalty >= min_penalty && !too_old
        });
        let pruned = before - self.records.len();
        if pruned > 0 {
            debug!("Pruned {} failure records", pruned);
        }
        pruned
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn stats(&self) -> NegativeStats {
        let mut stats = NegativeStats {
            total: self.records.len(),
            ..Default::default()
        };
        let mut penalty_sum = 0.0;
        for record in &self.records {
            if record.active {
                stats.active += 1;
                penalty_sum += record.penalty;
                stats.max_penalty = stats.max_penalty.max(record.penalty);
            }
            match record.severity {
                FailureSeverity::None => {}
                FailureSeverity::Mild => stats.mild += 1,
                FailureSeverity::Moderate => stats.moderate += 1,
                FailureSeverity::Severe => stats.severe += 1,
                FailureSeverity::Fatal => stats.fatal += 1,
            }
            if record.repeat_count > 1 {
                stats.repeated += 1;
            }
        }
        if stats.active > 0 {
            stats.avg_penalty = penalty_sum / stats.active as f64;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn learner() -> NegativeLearning {
        NegativeLearning::new(4, 1.0, DEFAULT_NEGATIVE_DECAY_RATE, 0.75).unwrap()
    }

    #[test]
    fn test_classify() {
        let t = SeverityThresholds::default();
        assert_eq!(FailureSeverity::classify(0.0, &t), FailureSeverity::None);
        assert_eq!(FailureSeverity::classify(-0.1, &t), FailureSeverity::Mild);
        assert_eq!(FailureSeverity::classify(-0.3, &t), FailureSeverity::Moderate);
        assert_eq!(FailureSeverity::classify(-0.6, &t), FailureSeverity::Severe);
        assert_eq!(FailureSeverity::classify(-5.0, &t), FailureSeverity::Fatal);
        assert_eq!(FailureSeverity::classify(f64::NAN, &t), FailureSeverity::None);
    }

    #[test]
    fn test_invalid_settings() {
        assert!(NegativeLearning::new(0, 1.5, 0.05, 0.8).is_err());
        assert!(NegativeLearning::new(0, 0.5, -0.1, 0.8).is_err());
        assert!(NegativeLearning::new(0, 0.5, f64::NAN, 0.8).is_err());
        assert!(NegativeLearning::new(0, 0.5, 0.05, 1.2).is_err());
        assert_eq!(
            NegativeLearning::new(0, 0.5, 0.05, 0.8).unwrap().capacity(),
            DEFAULT_FAILURE_CAPACITY
        );

        let mut neg = learner();
        assert!(neg.set_thresholds([-1.0, -0.5, -2.0, -3.0].into()).is_err());
        assert!(neg.set_thresholds([0.0, -1.0, -2.0, -3.0].into()).is_ok());
    }

    #[test]
    fn test_similarity() {
        assert_eq!(genome_similarity(&[1, 2, 3, 4], &[1, 2, 3, 4]), 1.0);
        assert_eq!(genome_similarity(&[1, 2, 3, 4], &[1, 2, 0, 0]), 0.5);
        assert_eq!(genome_similarity(&[1, 2], &[1, 2, 9, 9]), 1.0);
        assert_eq!(genome_similarity(&[], &[1]), 0.0);
    }

    #[test]
    fn test_record_and_reinforce() {
        let mut neg = learner();
        assert_eq!(neg.record_failure(&[1, 1, 1, 1], 0.5, 0), FailureOutcome::NotAFailure);
        assert_eq!(neg.record_failure(&[1, 1, 1, 1], -0.3, 0), FailureOutcome::Recorded);
        assert_eq!(neg.records()[0].penalty, 0.4);

        // 3 of 4 bytes equal reaches the 0.75 threshold
        assert_eq!(neg.record_failure(&[1, 1, 1, 9], -2.0, 1), FailureOutcome::Reinforced(0));
        let record = &neg.records()[0];
        assert_eq!(record.repeat_count, 2);
        assert!((record.penalty - 0.7).abs() < 1e-12);
        assert_eq!(record.fitness, -2.0);
        assert_eq!(record.severity, FailureSeverity::Fatal);

        assert_eq!(neg.record_failure(&[7, 7, 7, 7], -0.2, 1), FailureOutcome::Recorded);
        assert_eq!(neg.len(), 2);
        let stats = neg.stats();
        assert_eq!(stats.active, 2);
        assert_eq!(stats.repeated, 1);
        assert_eq!(stats.fatal, 1);
        assert_eq!(stats.mild, 1);
    }

    #[test]
    fn test_penalty_and_adjustment() {
        let mut neg = learner();
        neg.record_failure(&[5, 5, 5, 5], -10.0, 0);

        assert_eq!(neg.penalty(&[0, 0, 0, 0]), 0.0);
        assert!((neg.penalty(&[5, 5, 5, 5]) - 0.95).abs() < 1e-12);
        assert!((neg.penalty(&[5, 5, 5, 0]) - 0.95 * 0.75).abs() < 1e-12);
        assert!(neg.is_forbidden(&[5, 5, 5, 5], 0.9));
        assert!(!neg.is_forbidden(&[0, 5, 5, 0], 0.1));

        assert!((neg.adjust_fitness(&[5, 5, 5, 5], -2.0) - (-3.9)).abs() < 1e-12);
        assert!((neg.adjust_fitness(&[5, 5, 5, 5], 2.0) - 0.1).abs() < 1e-12);
        assert_eq!(neg.adjust_fitness(&[0, 0, 0, 0], -2.0), -2.0);
        assert!(neg.adjust_fitness(&[5, 5, 5, 5], f64::NAN).is_nan());

        let (record, similarity) = neg.find_similar(&[5, 5, 5, 0]).unwrap();
        assert_eq!(record.fitness, -10.0);
        assert_eq!(similarity, 0.75);
        assert!(neg.find_similar(&[5, 0, 0, 0]).is_none());
    }

    #[test]
    fn test_zero_weight_is_identity() {
        let mut neg = NegativeLearning::new(4, 0.0, 0.05, 0.5).unwrap();
        neg.record_failure(&[5, 5, 5, 5], -10.0, 0);
        assert_eq!(neg.adjust_fitness(&[5, 5, 5, 5], -3.0), -3.0);
    }

    #[test]
    fn test_decay_deactivates() {
        let mut neg = NegativeLearning::new(4, 1.0, 0.5, 0.75).unwrap();
        neg.record_failure(&[1, 2, 3, 4], -0.2, 0);
        neg.set_generation(1);
        assert!((neg.records()[0].penalty - 0.2 * (-0.5f64).exp()).abs() < 1e-12);
        assert_eq!(neg.active_count(), 1);

        neg.set_generation(5);
        assert_eq!(neg.active_count(), 0);
        assert_eq!(neg.penalty(&[1, 2, 3, 4]), 0.0);

        // Going back does not decay
        let before = neg.records()[0].penalty;
        neg.set_generation(2);
        assert_eq!(neg.records()[0].penalty, before);
    }

    #[test]
    fn test_prune_and_capacity() {
        let mut neg = learner();
        for (g, b) in [10u8, 20, 30, 40].into_iter().enumerate() {
            neg.record_failure(&[b; 4], -0.2, g as u64);
        }
        assert_eq!(neg.len(), 4);

        // Full with nothing prunable: the weakest record is replaced
        neg.record_failure(&[50; 4], -5.0, 4);
        assert_eq!(neg.len(), 4);
        assert!(neg.records().iter().any(|r| r.genome == vec![50; 4]));

        neg.set_generation(200);
        assert_eq!(neg.prune(0.0, 50), 4);
        assert!(neg.is_empty());
    }

    #[test]
    fn test_serde_roundtrip_exact() {
        let mut neg = learner();
        neg.record_failure(&[3; 4], -1.0 / 3.0, 2);
        neg.set_generation(7);
        let json = serde_json::to_string(&neg).unwrap();
        let back: NegativeLearning = serde_json::from_str(&json).unwrap();
        assert_eq!(back, neg);
    }
}
