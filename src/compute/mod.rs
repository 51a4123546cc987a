//! Compute module - genomes, populations, operators and evaluation.

mod arena;
mod batch;
mod domain;
mod exploration;
mod genome;
mod negative;
mod population;
mod rng;
mod stats;

pub mod evolution;
pub mod gpu;
pub mod operators;

pub use arena::*;
pub use batch::*;
pub use domain::*;
pub use exploration::*;
pub use genome::*;
pub use negative::*;
pub use population::*;
pub use rng::*;
pub use stats::*;
