//! A resolved topology driving its own autoscaling loop.
//!
//! The router's target group is the metrics source; the desired count the
//! loop publishes is spread back over the cluster's capacity providers.

use std::sync::Arc;
use std::time::Duration;

use fleet_core::FleetConfig;
use fleetgrid_autoscale::{AutoscalingSupervisor, ScaleEvent};
use fleetgrid_placement::reconcile;
use fleetgrid_resolver::resolve;
use fleetgrid_traffic::{HealthSettings, ProbeResult, Target, TargetGroup};

const STACK: &str = r#"
[[stack]]
name = "multiarch"

[stack.target]
account = "452922823873"
region = "ap-southeast-3"

[stack.network]
id = "vpc-main"
egress = "nat"

[[stack.pools]]
name = "graviton"
architecture = "arm64"
instance_shape = "m6g.xlarge"
min_capacity = 1
max_capacity = 5
desired_capacity = 2

[[stack.pools]]
name = "intel"
architecture = "x86_64"
instance_shape = "m5.xlarge"
min_capacity = 1
max_capacity = 5
desired_capacity = 2

[stack.service]
name = "web"
image = "tedytirta/demo-docker-ecs"
desired_count = 5
"#;

#[tokio::test]
async fn router_load_scales_service_and_placement_follows() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let config = FleetConfig::from_toml_str(STACK).unwrap().stacks.remove(0);
    let resolved = resolve(&config).unwrap();

    let group = Arc::new(TargetGroup::new(
        &format!("{}-tg", resolved.router.name),
        HealthSettings::default(),
    ));
    for i in 0..resolved.service.desired_count {
        let id = format!("task-{i}");
        group.register(Target {
            id: id.clone(),
            ip: format!("10.0.3.{}", i + 10),
            port: resolved.router.target_group.port,
        });
        group.record_check(&id, ProbeResult::Healthy);
    }
    assert_eq!(group.healthy_count(), 5);
    // 250 requests per target against a target of 100.
    group.record_requests(1250);

    let supervisor = AutoscalingSupervisor::new().with_evaluation_interval(Duration::from_millis(20));
    let mut events = supervisor.subscribe();
    let mut handle = supervisor
        .start(
            resolved.policy.clone(),
            resolved.service.desired_count,
            group.clone(),
        )
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), handle.desired.changed())
        .await
        .expect("desired count did not change")
        .unwrap();
    let desired = *handle.desired.borrow_and_update();
    assert_eq!(desired, 13);

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        ScaleEvent::ScaleUp {
            service_id: resolved.service.id.clone(),
            from: 5,
            to: 13,
            observed: 250.0,
        }
    );

    let plan = reconcile(
        resolved.cluster.bindings(),
        &resolved.placement.assignments,
        desired,
    )
    .unwrap();
    assert_eq!(plan.result.values().sum::<u32>(), 13);
    assert_eq!(plan.result["graviton-provider"], 7);
    assert_eq!(plan.result["intel-provider"], 6);
    assert!(plan.removals.is_empty());

    supervisor.stop_all().await;
    assert!(!supervisor.is_running(&resolved.service.id).await);
}
