//! Exploration control: how much of each generation goes to new material.
//!
//! # Overview
//!
//! [`ExplorationController`] turns the history of best fitness into an
//! exploration rate in `[min_rate, max_rate]`. The engine feeds that rate
//! into the share of each generation filled by random immigrants.
//!
//! | Strategy | Rate after `update` |
//! |---|---|
//! | `Fixed` | `base` |
//! | `Decay` | `base * exp(-decay * generation)` |
//! | `Adaptive` | `x 0.9` on improvement, `x 1.1` otherwise |
//! | `Ucb1` | `min(1, c * sqrt(ln N / (1 + stagnation)))` |
//! | `Boltzmann` | `T / 100` after cooling `T` |
//!
//! [`Bandit`] is a UCB1 multi-armed bandit for choosing among discrete
//! options (operators, parameter presets). [`boltzmann_select`] samples an
//! index from a softmax over values.

use serde::{Deserialize, Serialize};

use crate::error::{EvoError, Result};

use super::rng::EvoRng;

pub const DEFAULT_MIN_RATE: f64 = 0.01;
pub const DEFAULT_MAX_RATE: f64 = 1.0;
pub const DEFAULT_DECAY_RATE: f64 = 0.02;
pub const DEFAULT_TEMPERATURE: f64 = 100.0;
pub const DEFAULT_COOLING_RATE: f64 = 0.95;
pub const DEFAULT_UCB_C: f64 = std::f64::consts::SQRT_2;

/// Floor for annealing temperatures.
pub const MIN_TEMPERATURE: f64 = 0.001;

/// Rate update rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplorationStrategy {
    Fixed,
    Decay,
    #[default]
    Adaptive,
    Ucb1,
    Boltzmann,
}

/// Adaptive exploration rate.
///
/// Serializable so a checkpoint can carry the controller across a resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationController {
    strategy: ExplorationStrategy,
    #[serde(with = "crate::checkpoint::exact_f64")]
    base_rate: f64,
    #[serde(with = "crate::checkpoint::exact_f64")]
    current_rate: f64,
    #[serde(with = "crate::checkpoint::exact_f64")]
    min_rate: f64,
    #[serde(with = "crate::checkpoint::exact_f64")]
    max_rate: f64,
    #[serde(with = "crate::checkpoint::exact_f64")]
    decay_rate: f64,
    #[serde(with = "crate::checkpoint::exact_f64")]
    initial_temperature: f64,
    #[serde(with = "crate::checkpoint::exact_f64")]
    temperature: f64,
    #[serde(with = "crate::checkpoint::exact_f64")]
    cooling_rate: f64,
    #[serde(with = "crate::checkpoint::exact_f64")]
    ucb_c: f64,

    #[serde(with = "crate::checkpoint::exact_f64")]
    best_fitness: f64,
    #[serde(with = "crate::checkpoint::exact_f64")]
    recent_best: f64,
    stagnation_count: usize,
    total_updates: u64,
}

impl ExplorationController {
    /// `base_rate` must lie in `[0, 1]`.
    pub fn new(strategy: ExplorationStrategy, base_rate: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&base_rate) {
            return Err(EvoError::invalid_arg(format!(
                "exploration base rate {} outside [0, 1]",
                base_rate
            )));
        }
        Ok(Self {
            strategy,
            base_rate,
            current_rate: base_rate,
            min_rate: DEFAULT_MIN_RATE,
            max_rate: DEFAULT_MAX_RATE,
            decay_rate: DEFAULT_DECAY_RATE,
            initial_temperature: DEFAULT_TEMPERATURE,
            temperature: DEFAULT_TEMPERATURE,
            cooling_rate: DEFAULT_COOLING_RATE,
            ucb_c: DEFAULT_UCB_C,
            best_fitness: f64::NEG_INFINITY,
            recent_best: f64::NEG_INFINITY,
            stagnation_count: 0,
            total_updates: 0,
        })
    }

    pub fn strategy(&self) -> ExplorationStrategy {
        self.strategy
    }

    pub fn rate(&self) -> f64 {
        self.current_rate
    }

    pub fn base_rate(&self) -> f64 {
        self.base_rate
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.min_rate, self.max_rate)
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn stagnation_count(&self) -> usize {
        self.stagnation_count
    }

    pub fn best_fitness(&self) -> f64 {
        self.best_fitness
    }

    /// Best fitness passed to the most recent `update`.
    pub fn recent_best(&self) -> f64 {
        self.recent_best
    }

    /// Both bounds are clipped to `[0, 1]`.
    pub fn set_bounds(&mut self, min_rate: f64, max_rate: f64) {
        let lo = min_rate.clamp(0.0, 1.0);
        let hi = max_rate.clamp(0.0, 1.0);
        self.min_rate = lo.min(hi);
        self.max_rate = hi.max(lo);
        self.current_rate = self.current_rate.clamp(self.min_rate, self.max_rate);
    }

    pub fn set_decay_rate(&mut self, decay_rate: f64) {
        self.decay_rate = decay_rate.max(0.0);
    }

    /// Starting temperature, also the one [`ExplorationController::reset`]
    /// returns to.
    pub fn set_temperature(&mut self, temperature: f64, cooling_rate: f64) {
        self.initial_temperature = temperature.max(MIN_TEMPERATURE);
        self.temperature = self.initial_temperature;
        self.cooling_rate = cooling_rate.clamp(0.0, 1.0);
    }

    pub fn set_ucb_c(&mut self, ucb_c: f64) {
        self.ucb_c = ucb_c.max(0.0);
    }

    /// Advance one generation and return the new rate.
    pub fn update(&mut self, generation: u64, best_fitness: f64) -> f64 {
        self.total_updates += 1;
        self.recent_best = best_fitness;

        let improved = best_fitness > self.best_fitness;
        if improved {
            self.best_fitness = best_fitness;
            self.stagnation_count = 0;
        } else {
            self.stagnation_count += 1;
        }

        let rate = match self.strategy {
            ExplorationStrategy::Fixed => self.base_rate,
            ExplorationStrategy::Decay => {
                self.base_rate * (-self.decay_rate * generation as f64).exp()
            }
            ExplorationStrategy::Adaptive => {
                if improved {
                    self.current_rate * 0.9
                } else {
                    self.current_rate * 1.1
                }
            }
            ExplorationStrategy::Ucb1 => {
                let n = self.total_updates as f64;
                let bonus = (n.ln() / (1.0 + self.stagnation_count as f64)).sqrt();
                (self.ucb_c * bonus).min(1.0)
            }
            ExplorationStrategy::Boltzmann => {
                self.temperature = cool_temperature(self.temperature, self.cooling_rate);
                self.temperature / DEFAULT_TEMPERATURE
            }
        };

        self.current_rate = rate.clamp(self.min_rate, self.max_rate);
        self.current_rate
    }

    /// Bernoulli trial with the current rate.
    pub fn should_explore(&self, rng: &mut EvoRng) -> bool {
        rng.chance(self.current_rate)
    }

    pub fn is_stagnant(&self, threshold: usize) -> bool {
        self.stagnation_count >= threshold
    }

    /// Scale the rate by `factor`, staying within bounds.
    pub fn boost(&mut self, factor: f64) {
        self.current_rate = (self.current_rate * factor).clamp(self.min_rate, self.max_rate);
    }

    /// Best fitness per update so far; 0 before any finite best.
    pub fn improvement_rate(&self) -> f64 {
        if self.total_updates == 0 || !self.best_fitness.is_finite() {
            return 0.0;
        }
        self.best_fitness / self.total_updates as f64
    }

    /// Back to the base rate with no history. Bounds and tuning are kept.
    pub fn reset(&mut self) {
        self.current_rate = self.base_rate;
        self.best_fitness = f64::NEG_INFINITY;
        self.recent_best = f64::NEG_INFINITY;
        self.stagnation_count = 0;
        self.total_updates = 0;
        self.temperature = self.initial_temperature;
    }
}

/// Pull statistics of one bandit arm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BanditArm {
    pub pulls: u64,
    pub total_reward: f64,
    pub mean_reward: f64,
}

/// UCB1 multi-armed bandit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bandit {
    arms: Vec<BanditArm>,
    total_pulls: u64,
    exploration_constant: f64,
}

impl Bandit {
    pub fn new(arm_count: usize, exploration_constant: f64) -> Result<Self> {
        if arm_count == 0 {
            return Err(EvoError::invalid_arg("bandit needs at least one arm"));
        }
        Ok(Self {
            arms: vec![BanditArm::default(); arm_count],
            total_pulls: 0,
            exploration_constant,
        })
    }

    /// Arm to pull next: unpulled arms first in index order, then the
    /// highest `mean + c * sqrt(ln N / n)`.
    pub fn select(&self) -> usize {
        if let Some(unpulled) = self.arms.iter().position(|a| a.pulls == 0) {
            return unpulled;
        }

        let ln_n = (self.total_pulls as f64).ln();
        let mut best = 0;
        let mut best_score = f64::NEG_INFINITY;
        for (i, arm) in self.arms.iter().enumerate() {
            let score =
                arm.mean_reward + self.exploration_constant * (ln_n / arm.pulls as f64).sqrt();
            if score > best_score {
                best_score = score;
                best = i;
            }
        }
        best
    }

    pub fn update(&mut self, arm: usize, reward: f64) -> Result<()> {
        let count = self.arms.len();
        let a = self
            .arms
            .get_mut(arm)
            .ok_or_else(|| EvoError::invalid_arg(format!("arm {} of {}", arm, count)))?;
        a.pulls += 1;
        a.total_reward += reward;
        a.mean_reward = a.total_reward / a.pulls as f64;
        self.total_pulls += 1;
        Ok(())
    }

    pub fn arm(&self, index: usize) -> Option<&BanditArm> {
        self.arms.get(index)
    }

    pub fn arm_count(&self) -> usize {
        self.arms.len()
    }

    pub fn total_pulls(&self) -> u64 {
        self.total_pulls
    }

    /// Arm with the highest mean reward among those pulled.
    pub fn best_arm(&self) -> Option<usize> {
        self.arms
            .iter()
            .enumerate()
            .filter(|(_, a)| a.pulls > 0)
            .max_by(|(_, a), (_, b)| a.mean_reward.total_cmp(&b.mean_reward))
            .map(|(i, _)| i)
    }

    pub fn reset(&mut self) {
        self.arms.fill(BanditArm::default());
        self.total_pulls = 0;
    }
}

/// Sample an index with probability proportional to `exp(v / T)`.
///
/// Below [`MIN_TEMPERATURE`] this is argmax. Returns `None` for an empty
/// slice.
pub fn boltzmann_select(values: &[f64], temperature: f64, rng: &mut EvoRng) -> Option<usize> {
    if values.is_empty() {
        return None;
    }

    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if temperature < MIN_TEMPERATURE {
        return values.iter().position(|&v| v == max);
    }

    let weights: Vec<f64> = values
        .iter()
        .map(|&v| ((v - max) / temperature).exp())
        .collect();
    let sum: f64 = weights.iter().sum();
    if !sum.is_finite() || sum < 1e-4 {
        return Some(rng.index(values.len()));
    }

    let target = rng.unit() * sum;
    let mut cumulative = 0.0;
    for (i, w) in weights.iter().enumerate() {
        cumulative += w;
        if target < cumulative {
            return Some(i);
        }
    }
    Some(values.len() - 1)
}

/// One annealing step, floored at [`MIN_TEMPERATURE`].
pub fn cool_temperature(temperature: f64, cooling_rate: f64) -> f64 {
    (temperature * cooling_rate).max(MIN_TEMPERATURE)
}
