//! Capacity allocator: binds resource pools to a cluster as weighted
//! capacity providers.

use std::collections::HashSet;

use tracing::{debug, info};

use fleetgrid_state::{CapacityProviderBinding, Cluster, ResourcePool};

use crate::error::AllocationError;

/// One pool to attach, with its provider settings.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub pool: ResourcePool,
    pub weight: i64,
    pub managed_scaling: bool,
    pub termination_protection: bool,
}

/// Aggregates resource pools into weighted capacity providers.
#[derive(Debug, Clone)]
pub struct CapacityAllocator {
    managed_scaling: bool,
    termination_protection: bool,
}

impl Default for CapacityAllocator {
    fn default() -> Self {
        Self {
            managed_scaling: true,
            termination_protection: false,
        }
    }
}

impl CapacityAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider settings used by [`allocate`](Self::allocate).
    pub fn with_managed_scaling(mut self, enabled: bool) -> Self {
        self.managed_scaling = enabled;
        self
    }

    pub fn with_termination_protection(mut self, enabled: bool) -> Self {
        self.termination_protection = enabled;
        self
    }

    /// Provider name for a pool.
    pub fn provider_name(pool: &ResourcePool) -> String {
        format!("{}-provider", pool.name)
    }

    /// Bind `pools[i]` with `weights[i]` and register every binding on `cluster`.
    ///
    /// Either all bindings are registered or none are.
    pub fn allocate(
        &self,
        cluster: &mut Cluster,
        pools: &[ResourcePool],
        weights: &[i64],
    ) -> Result<Vec<CapacityProviderBinding>, AllocationError> {
        if pools.len() != weights.len() {
            return Err(AllocationError::LengthMismatch {
                pools: pools.len(),
                weights: weights.len(),
            });
        }
        let requests: Vec<ProviderRequest> = pools
            .iter()
            .zip(weights)
            .map(|(pool, &weight)| ProviderRequest {
                pool: pool.clone(),
                weight,
                managed_scaling: self.managed_scaling,
                termination_protection: self.termination_protection,
            })
            .collect();
        self.allocate_requests(cluster, &requests)
    }

    /// Like [`allocate`](Self::allocate) with per-provider settings.
    pub fn allocate_requests(
        &self,
        cluster: &mut Cluster,
        requests: &[ProviderRequest],
    ) -> Result<Vec<CapacityProviderBinding>, AllocationError> {
        let bindings = validate(cluster, requests)?;

        let mut registered = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let name = binding.name.clone();
            // validate() already ruled out name clashes.
            cluster.register_binding(binding);
            if let Some(b) = cluster.binding(&name) {
                debug!(
                    cluster = %cluster.name,
                    provider = %b.name,
                    ordinal = b.ordinal,
                    weight = b.weight,
                    managed_scaling = b.managed_scaling_enabled,
                    "capacity provider attached"
                );
                registered.push(b.clone());
            }
        }

        info!(
            cluster = %cluster.name,
            providers = registered.len(),
            total_weight = registered.iter().map(|b| u64::from(b.weight)).sum::<u64>(),
            "capacity allocated"
        );
        Ok(registered)
    }
}

fn validate(
    cluster: &Cluster,
    requests: &[ProviderRequest],
) -> Result<Vec<CapacityProviderBinding>, AllocationError> {
    if requests.is_empty() {
        return Err(AllocationError::Empty);
    }

    let mut seen = HashSet::new();
    let mut bindings = Vec::with_capacity(requests.len());
    for req in requests {
        let pool = &req.pool;
        if req.weight < 0 {
            return Err(AllocationError::NegativeWeight {
                pool: pool.name.clone(),
                weight: req.weight,
            });
        }
        let weight = u32::try_from(req.weight).map_err(|_| AllocationError::WeightOutOfRange {
            pool: pool.name.clone(),
            weight: req.weight,
        })?;
        if !pool.bounds_hold() {
            return Err(AllocationError::PoolBounds(pool.name.clone()));
        }
        if !seen.insert(pool.id.as_str()) {
            return Err(AllocationError::DuplicatePool(pool.name.clone()));
        }

        let name = CapacityAllocator::provider_name(pool);
        let clashes = cluster.binding(&name).is_some()
            || bindings
                .iter()
                .any(|b: &CapacityProviderBinding| b.name == name);
        if clashes {
            return Err(AllocationError::AlreadyAttached(name));
        }

        bindings.push(CapacityProviderBinding {
            name,
            ordinal: 0,
            resource_pool_id: pool.id.clone(),
            weight,
            managed_scaling_enabled: req.managed_scaling,
            termination_protection: req.termination_protection,
        });
    }

    if bindings.iter().all(|b| b.weight == 0) {
        return Err(AllocationError::AllZero);
    }

    Ok(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{Architecture, EgressMode};
    use fleetgrid_state::NetworkContext;

    fn pool(name: &str, arch: Architecture) -> ResourcePool {
        ResourcePool {
            id: format!("pool-{name}"),
            name: name.to_string(),
            architecture: arch,
            instance_shape: "m6g.xlarge".to_string(),
            image_family: arch.image_family().to_string(),
            min_capacity: 1,
            max_capacity: 5,
            desired_capacity: 2,
            instance_role: "role".to_string(),
        }
    }

    fn cluster() -> Cluster {
        Cluster::new(
            "cluster-1",
            "main",
            NetworkContext {
                id: "vpc-1".to_string(),
                egress: EgressMode::Nat,
            },
        )
    }

    fn arm_and_x86() -> Vec<ResourcePool> {
        vec![pool("arm", Architecture::Arm64), pool("x86", Architecture::X86_64)]
    }

    #[test]
    fn allocate_registers_bindings_in_order() {
        let mut cluster = cluster();
        let bindings = CapacityAllocator::new()
            .allocate(&mut cluster, &arm_and_x86(), &[1, 3])
            .unwrap();

        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].name, "arm-provider");
        assert_eq!(bindings[0].ordinal, 0);
        assert_eq!(bindings[1].ordinal, 1);
        assert_eq!(bindings[1].weight, 3);
        assert!(bindings[0].managed_scaling_enabled);
        assert!(!bindings[0].termination_protection);
        assert_eq!(cluster.bindings(), bindings.as_slice());
        assert!(cluster.can_place());
    }

    #[test]
    fn negative_weight_is_rejected() {
        let mut cluster = cluster();
        let err = CapacityAllocator::new()
            .allocate(&mut cluster, &arm_and_x86(), &[1, -1])
            .unwrap_err();
        assert!(matches!(err, AllocationError::NegativeWeight { weight: -1, .. }));
        assert!(cluster.bindings().is_empty());
    }

    #[test]
    fn all_zero_weights_are_rejected() {
        let mut cluster = cluster();
        let err = CapacityAllocator::new()
            .allocate(&mut cluster, &arm_and_x86(), &[0, 0])
            .unwrap_err();
        assert_eq!(err, AllocationError::AllZero);
        assert!(cluster.bindings().is_empty());
    }

    #[test]
    fn zero_weight_alongside_positive_is_allowed() {
        let mut cluster = cluster();
        let bindings = CapacityAllocator::new()
            .allocate(&mut cluster, &arm_and_x86(), &[0, 2])
            .unwrap();
        assert_eq!(bindings[0].weight, 0);
        assert_eq!(cluster.placeable_bindings().count(), 1);
    }

    #[test]
    fn length_mismatch_and_empty() {
        let mut cluster = cluster();
        let allocator = CapacityAllocator::new();
        assert_eq!(
            allocator.allocate(&mut cluster, &arm_and_x86(), &[1]),
            Err(AllocationError::LengthMismatch {
                pools: 2,
                weights: 1
            })
        );
        assert_eq!(
            allocator.allocate(&mut cluster, &[], &[]),
            Err(AllocationError::Empty)
        );
    }

    #[test]
    fn weight_out_of_range() {
        let mut cluster = cluster();
        let err = CapacityAllocator::new()
            .allocate(&mut cluster, &arm_and_x86(), &[1, i64::from(u32::MAX) + 1])
            .unwrap_err();
        assert!(matches!(err, AllocationError::WeightOutOfRange { .. }));
    }

    #[test]
    fn pool_bounds_and_duplicates() {
        let mut cluster = cluster();
        let mut pools = arm_and_x86();
        pools[1].desired_capacity = 10;
        assert_eq!(
            CapacityAllocator::new().allocate(&mut cluster, &pools, &[1, 1]),
            Err(AllocationError::PoolBounds("x86".to_string()))
        );

        let dup = vec![pool("arm", Architecture::Arm64), pool("arm", Architecture::Arm64)];
        assert_eq!(
            CapacityAllocator::new().allocate(&mut cluster, &dup, &[1, 1]),
            Err(AllocationError::DuplicatePool("arm".to_string()))
        );
    }

    #[test]
    fn second_allocation_of_same_pool_is_rejected() {
        let mut cluster = cluster();
        let allocator = CapacityAllocator::new().with_termination_protection(true);
        allocator
            .allocate(&mut cluster, &arm_and_x86()[..1], &[1])
            .unwrap();
        let err = allocator
            .allocate(&mut cluster, &arm_and_x86(), &[1, 1])
            .unwrap_err();
        assert_eq!(err, AllocationError::AlreadyAttached("arm-provider".to_string()));
        assert_eq!(cluster.bindings().len(), 1);
        assert!(cluster.bindings()[0].termination_protection);
    }
}
