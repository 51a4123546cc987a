//! Evolution drivers: the generational engine and the meta layer above it.
//!
//! # Overview
//!
//! - **Engine** (`engine`): evaluate, select, breed, repeat, with stop
//!   conditions, progress callbacks, cancellation and checkpoint resume
//! - **Meta** (`meta`): evolves the engine's own parameters by scoring each
//!   parameter set with a short inner run
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use evocore::compute::evolution::EvolutionEngine;
//! use evocore::domains::SphereDomain;
//! use evocore::schema::EngineConfig;
//!
//! let mut engine = EvolutionEngine::new(EngineConfig::default(), Arc::new(SphereDomain::default()))?;
//! let result = engine.run_with_callback(|progress| {
//!     println!("Generation {}: best fitness = {:.3}",
//!         progress.generation, progress.best_fitness);
//! })?;
//! println!("Stopped: {:?}", result.stats.stop_reason);
//! # Ok::<(), evocore::EvoError>(())
//! ```

mod engine;
mod meta;

pub use engine::*;
pub use meta::*;

/// Largest meta-population.
pub const MAX_META_POPULATION: usize = 20;
