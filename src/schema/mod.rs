//! Schema module - Configuration, meta-parameter and run result types.

mod config;
mod evolution;
mod meta_params;

pub use config::*;
pub use evolution::*;
pub use meta_params::*;
