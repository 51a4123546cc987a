//! evocore - Meta-evolutionary optimization engine.
//!
//! This crate evolves byte-string genomes against pluggable problem domains
//! and, one level up, evolves the engine's own parameters.
//!
//! # Architecture
//!
//! - `compute`: genomes, populations, operators, batch evaluation (CPU pool
//!   or GPU), exploration control and the evolution drivers
//! - `domains`: built-in problems (`sphere`, `needle`)
//! - `schema`: configuration, meta-parameters and run result types
//! - `checkpoint`: binary/JSON snapshots and on-disk rotation
//! - `error`: the error taxonomy with its numeric codes
//!
//! # Example
//!
//! ```rust,no_run
//! use evocore::{
//!     compute::{DomainRegistry, evolution::EvolutionEngine},
//!     domains,
//!     schema::EngineConfig,
//! };
//!
//! let mut registry = DomainRegistry::new();
//! domains::register_builtin(&mut registry)?;
//!
//! let mut config = EngineConfig::default();
//! config.evolution.domain = "needle".into();
//! config.evolution.max_generations = 200;
//!
//! let mut engine = EvolutionEngine::from_registry(config, &registry)?;
//! let result = engine.run()?;
//! println!("Best fitness {} after {} generations",
//!     result.stats.best_fitness, result.stats.generations);
//! # Ok::<(), evocore::EvoError>(())
//! ```

pub mod checkpoint;
pub mod compute;
pub mod domains;
pub mod error;
pub mod schema;

// Re-export commonly used types
pub use compute::evolution::{EvolutionEngine, MetaOptimizer};
pub use compute::{Domain, DomainRegistry, Genome, Population};
pub use error::{ErrorCode, EvoError, LogErr, Result, error_string};
pub use schema::{EngineConfig, MetaParams};
