//! Built-in problem domains.
//!
//! - [`SphereDomain`]: continuous minimization of `sum(x^2)`, encoded as
//!   little-endian `f64` genes
//! - [`NeedleDomain`]: count of a target byte over a small symbol alphabet,
//!   with a device fitness kernel for the batch accelerator path

mod needle;
mod sphere;

pub use needle::{NEEDLE_ALPHABET, NEEDLE_GENOME_SIZE, NEEDLE_TARGET, NeedleDomain};
pub use sphere::{SPHERE_BOUND, SPHERE_DIMENSIONS, SphereDomain};

use std::sync::Arc;

use crate::compute::DomainRegistry;
use crate::error::Result;

/// Register every built-in domain with default settings.
pub fn register_builtin(registry: &mut DomainRegistry) -> Result<()> {
    registry.register(Arc::new(SphereDomain::default()))?;
    registry.register(Arc::new(NeedleDomain::default()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_builtin() {
        let mut registry = DomainRegistry::new();
        register_builtin(&mut registry).unwrap();
        assert_eq!(registry.names(), vec!["sphere", "needle"]);
        assert!(register_builtin(&mut registry).is_err());
    }
}
