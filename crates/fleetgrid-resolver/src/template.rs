//! The topology template: one config in, one ordered resource set out.
//!
//! Every stack is the same shape: pools → capacity providers on a cluster →
//! a service spread across the providers → a router in front of it → an
//! autoscaling policy tracking the router's requests per target. Only the
//! knobs in [`TopologyConfig`] differ between stacks.
//!
//! Resolution is synchronous and touches nothing external. All validation
//! (config bounds, weights, network reachability, graph shape) happens
//! here, before synthesis provisions anything.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use fleet_core::{ConfigError, FleetConfig, ImageRef, RegistryCapability, TopologyConfig};
use fleetgrid_placement::{
    CapacityAllocator, PlacementPlan, ProviderRequest, place_on, pool_from_config,
    request_from_config,
};
use fleetgrid_state::{
    AutoscalingPolicy, Cluster, NetworkContext, NetworkMode, ResourceId, ResourceKind,
    ResourcePool, ResourceRecord, ScalingMetric, ServiceSpec, StrategyItem, TaskReservation,
    TopologyDescriptor,
};
use fleetgrid_traffic::{TrafficRouter, bind};

use crate::error::{ResolveError, ResolveResult};
use crate::graph::ResourceGraph;
use crate::identity::resource_id;

/// Name of the single container in the service's task.
pub const CONTAINER_NAME: &str = "web";

/// Stack output carrying the load balancer's DNS name.
pub const OUTPUT_DNS: &str = "DNSLoadBalancer";

const CLUSTER_LOGICAL_NAME: &str = "cluster";

/// Everything resolution produced, typed, alongside the descriptor.
#[derive(Debug, Clone)]
pub struct ResolvedTopology {
    pub descriptor: TopologyDescriptor,
    pub pools: Vec<ResourcePool>,
    pub cluster: Cluster,
    pub service: ServiceSpec,
    pub router: TrafficRouter,
    pub router_id: ResourceId,
    pub policy: AutoscalingPolicy,
    /// Initial split of the service's desired count across providers.
    pub placement: PlacementPlan,
}

/// Resolve every stack in a fleet file.
pub fn resolve_fleet(fleet: &FleetConfig) -> ResolveResult<Vec<ResolvedTopology>> {
    fleet.stacks.iter().map(resolve).collect()
}

/// Resolve one topology config into an ordered, content-addressed
/// resource set.
pub fn resolve(config: &TopologyConfig) -> ResolveResult<ResolvedTopology> {
    config.validate()?;
    let stack = config.name.as_str();

    let image = ImageRef::parse(&config.service.image).map_err(ConfigError::from)?;
    if config.iam.registry.contains(&RegistryCapability::Push) {
        warn!(
            stack,
            execution_role = %config.iam.execution_role,
            "execution role has registry push access; read-only is sufficient for pulling images"
        );
    }

    let mut graph = ResourceGraph::new();

    // Pools.
    let mut pools = Vec::with_capacity(config.pools.len());
    let mut requests: Vec<ProviderRequest> = Vec::with_capacity(config.pools.len());
    for pool_config in &config.pools {
        let draft = pool_from_config("", pool_config, &config.iam.instance_role);
        let id = resource_id(
            stack,
            ResourceKind::ResourcePool,
            &pool_config.name,
            &to_value(&draft, &pool_config.name)?,
            &[],
        );
        let pool = ResourcePool { id, ..draft };
        graph.insert(record(stack, ResourceKind::ResourcePool, &pool.name, &pool.id, vec![], &pool)?)?;
        requests.push(request_from_config(pool.clone(), pool_config));
        pools.push(pool);
    }

    // Cluster and its capacity providers.
    let network = NetworkContext {
        id: config.network.id.clone(),
        egress: config.network.egress,
    };
    let cluster_name = format!("{stack}-cluster");
    let cluster_id = resource_id(
        stack,
        ResourceKind::Cluster,
        CLUSTER_LOGICAL_NAME,
        &to_value(&Cluster::new("", &cluster_name, network.clone()), CLUSTER_LOGICAL_NAME)?,
        &[],
    );
    let mut cluster = Cluster::new(&cluster_id, &cluster_name, network);

    let bindings = CapacityAllocator::new().allocate_requests(&mut cluster, &requests)?;
    graph.insert(record(
        stack,
        ResourceKind::Cluster,
        CLUSTER_LOGICAL_NAME,
        &cluster_id,
        vec![],
        &Cluster::new(&cluster_id, &cluster_name, cluster.network.clone()),
    )?)?;

    let mut provider_ids = Vec::with_capacity(bindings.len());
    for binding in &bindings {
        let deps = vec![binding.resource_pool_id.clone(), cluster_id.clone()];
        let id = resource_id(
            stack,
            ResourceKind::CapacityProvider,
            &binding.name,
            &to_value(binding, &binding.name)?,
            &deps,
        );
        graph.insert(record(stack, ResourceKind::CapacityProvider, &binding.name, &id, deps, binding)?)?;
        provider_ids.push(id);
    }

    // Service.
    let service_config = &config.service;
    let mut service = ServiceSpec {
        id: String::new(),
        name: service_config.name.clone(),
        cluster_id: cluster_id.clone(),
        network_id: cluster.network.id.clone(),
        image: image.reference(),
        execution_role: config.iam.execution_role.clone(),
        registry_capabilities: config.iam.registry.clone(),
        task: TaskReservation {
            cpu_units: service_config.cpu_units,
            memory_reservation_mib: service_config.memory_reservation_mib,
        },
        network_mode: NetworkMode::AwsVpc,
        container_name: CONTAINER_NAME.to_string(),
        container_port: service_config.container_port,
        desired_count: service_config.desired_count,
        placement_strategy: bindings
            .iter()
            .map(|b| StrategyItem {
                capacity_provider: b.name.clone(),
                weight: b.weight,
            })
            .collect(),
        environment: service_config.environment.clone(),
        log_stream_prefix: service_config.log_stream_prefix.clone(),
        assign_public_ip: false,
    };
    let mut service_deps = vec![cluster_id.clone()];
    service_deps.extend(provider_ids.iter().cloned());
    service.id = resource_id(
        stack,
        ResourceKind::Service,
        &service.name,
        &to_value(&service, &service.name)?,
        &service_deps,
    );
    graph.insert(record(stack, ResourceKind::Service, &service.name, &service.id, service_deps, &service)?)?;

    let placement = place_on(&cluster, &service.id, service.desired_count)?;

    // Router.
    let router_config = &config.router;
    let router = bind(&service, &cluster.network, router_config.listener_port, router_config.exposure)?
        .with_target_port(router_config.target_port)?
        .with_health_check_path(&router_config.health_check_path);
    let router_deps = vec![service.id.clone()];
    let router_id = resource_id(
        stack,
        ResourceKind::TrafficRouter,
        &router.name,
        &to_value(&router, &router.name)?,
        &router_deps,
    );
    let dns_name = router.dns_name(&router_id, &config.target.region);
    let mut router_value = to_value(&router, &router.name)?;
    if let Value::Object(map) = &mut router_value {
        map.insert("dns_name".to_string(), Value::String(dns_name.clone()));
    }
    graph.insert(ResourceRecord {
        id: router_id.clone(),
        stack: stack.to_string(),
        kind: ResourceKind::TrafficRouter,
        logical_name: router.name.clone(),
        depends_on: router_deps,
        config: router_value,
    })?;

    // Autoscaling policy.
    let scaling = &config.autoscaling;
    let policy = AutoscalingPolicy {
        service_id: service.id.clone(),
        metric: ScalingMetric::RequestsPerTarget,
        target_value: scaling.target_requests_per_target,
        min_capacity: scaling.min_capacity,
        max_capacity: scaling.max_capacity,
        scale_factor: scaling.scale_factor,
        scale_in_cooldown_secs: scaling.scale_in_cooldown_secs,
        scale_out_cooldown_secs: scaling.scale_out_cooldown_secs,
        evaluation_interval_secs: scaling.evaluation_interval_secs,
    };
    let policy_name = format!("{}-scaling", service.name);
    let policy_deps = vec![service.id.clone(), router_id.clone()];
    let policy_id = resource_id(
        stack,
        ResourceKind::AutoscalingPolicy,
        &policy_name,
        &to_value(&policy, &policy_name)?,
        &policy_deps,
    );
    graph.insert(record(stack, ResourceKind::AutoscalingPolicy, &policy_name, &policy_id, policy_deps, &policy)?)?;

    let order = graph.topological_order()?;
    let descriptor = TopologyDescriptor {
        stack: stack.to_string(),
        target: config.target.clone(),
        order,
        records: graph.into_records(),
        outputs: BTreeMap::from([(OUTPUT_DNS.to_string(), dns_name)]),
    };

    info!(
        stack,
        resources = descriptor.order.len(),
        providers = bindings.len(),
        "topology resolved"
    );
    debug!(stack, placement = ?placement.assignments, "initial placement");

    Ok(ResolvedTopology {
        descriptor,
        pools,
        cluster,
        service,
        router,
        router_id,
        policy,
        placement,
    })
}

fn to_value<T: Serialize>(value: &T, resource: &str) -> ResolveResult<Value> {
    serde_json::to_value(value).map_err(|e| ResolveError::Serialize {
        resource: resource.to_string(),
        message: e.to_string(),
    })
}

fn record<T: Serialize>(
    stack: &str,
    kind: ResourceKind,
    logical_name: &str,
    id: &str,
    depends_on: Vec<ResourceId>,
    value: &T,
) -> ResolveResult<ResourceRecord> {
    Ok(ResourceRecord {
        id: id.to_string(),
        stack: stack.to_string(),
        kind,
        logical_name: logical_name.to_string(),
        depends_on,
        config: to_value(value, logical_name)?,
    })
}
