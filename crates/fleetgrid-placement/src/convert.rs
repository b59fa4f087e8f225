//! Conversions from template configuration to placement inputs.
//!
//! Bridges `fleet_core::PoolConfig` to the state store's `ResourcePool`
//! and the allocator's `ProviderRequest`.

use fleet_core::PoolConfig;
use fleetgrid_state::ResourcePool;

use crate::allocator::ProviderRequest;

/// Build a [`ResourcePool`] from its config entry.
///
/// The image family follows the architecture; the id is assigned by the
/// caller since it depends on the stack the pool belongs to.
pub fn pool_from_config(id: &str, config: &PoolConfig, instance_role: &str) -> ResourcePool {
    ResourcePool {
        id: id.to_string(),
        name: config.name.clone(),
        architecture: config.architecture,
        instance_shape: config.instance_shape.clone(),
        image_family: config.architecture.image_family().to_string(),
        min_capacity: config.min_capacity,
        max_capacity: config.max_capacity,
        desired_capacity: config.desired_capacity,
        instance_role: instance_role.to_string(),
    }
}

/// Pair a pool with the provider settings from its config entry.
pub fn request_from_config(pool: ResourcePool, config: &PoolConfig) -> ProviderRequest {
    ProviderRequest {
        pool,
        weight: config.weight,
        managed_scaling: config.managed_scaling,
        termination_protection: config.termination_protection,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::Architecture;

    fn graviton() -> PoolConfig {
        PoolConfig {
            name: "graviton".to_string(),
            architecture: Architecture::Arm64,
            instance_shape: "m6g.xlarge".to_string(),
            min_capacity: 1,
            max_capacity: 5,
            desired_capacity: 2,
            weight: 3,
            managed_scaling: false,
            termination_protection: true,
        }
    }

    #[test]
    fn pool_takes_image_family_from_architecture() {
        let pool = pool_from_config("pool-abc", &graviton(), "ecs-instance-role");
        assert_eq!(pool.id, "pool-abc");
        assert_eq!(pool.image_family, Architecture::Arm64.image_family());
        assert_eq!(pool.instance_role, "ecs-instance-role");
        assert_eq!(
            (pool.min_capacity, pool.desired_capacity, pool.max_capacity),
            (1, 2, 5)
        );
        assert!(pool.bounds_hold());
    }

    #[test]
    fn request_carries_provider_settings() {
        let config = graviton();
        let req = request_from_config(pool_from_config("pool-abc", &config, "role"), &config);
        assert_eq!(req.weight, 3);
        assert!(!req.managed_scaling);
        assert!(req.termination_protection);
        assert_eq!(req.pool.name, "graviton");
    }
}
