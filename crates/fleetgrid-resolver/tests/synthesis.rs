//! End-to-end synthesis tests.
//!
//! Resolve a topology, synthesize it against the redb store through a
//! scriptable provisioner, and check rollback, retry and teardown.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use fleet_core::{FleetConfig, TopologyConfig};
use fleetgrid_resolver::*;
use fleetgrid_state::{ResourceId, ResourceKind, ResourceRecord, StateStore};

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
environment = { TITLE = "multi-arch" }

[stack.autoscaling]
target_requests_per_target = 100
min_capacity = 1
max_capacity = 20
scale_in_cooldown_secs = 0
"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> TopologyConfig {
    FleetConfig::from_toml_str(STACK).unwrap().stacks.remove(0)
}

fn fast_options() -> SynthesisOptions {
    SynthesisOptions {
        call_timeout: Duration::from_millis(50),
        max_attempts: 3,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
    }
}

/// Records into the store like `StoreProvisioner`, with scripted trouble.
struct ScriptedCloud {
    inner: StoreProvisioner,
    /// Remaining transient failures per resource id.
    failures: Mutex<HashMap<ResourceId, u32>>,
    /// Creates of these ids never finish.
    hangs: Vec<ResourceId>,
    /// Deletes of these ids always fail.
    failing_deletes: Mutex<HashSet<ResourceId>>,
    /// Request cancellation after this many successful creates.
    cancel_after: Option<(usize, watch::Sender<bool>)>,
    created: Mutex<Vec<ResourceId>>,
    deleted: Mutex<Vec<ResourceId>>,
    successes: AtomicUsize,
}

impl ScriptedCloud {
    fn new(store: &StateStore) -> Self {
        Self {
            inner: StoreProvisioner::new(store.clone()),
            failures: Mutex::new(HashMap::new()),
            hangs: Vec::new(),
            failing_deletes: Mutex::new(HashSet::new()),
            cancel_after: None,
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            successes: AtomicUsize::new(0),
        }
    }

    fn fail_deletes_of(&self, id: &str) {
        self.failing_deletes.lock().unwrap().insert(id.to_string());
    }

    fn heal_deletes(&self) {
        self.failing_deletes.lock().unwrap().clear();
    }

    fn created(&self) -> Vec<ResourceId> {
        self.created.lock().unwrap().clone()
    }

    fn deleted(&self) -> Vec<ResourceId> {
        self.deleted.lock().unwrap().clone()
    }
}

impl Provisioner for ScriptedCloud {
    fn create<'a>(&'a self, record: &'a ResourceRecord) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            if self.hangs.contains(&record.id) {
                std::future::pending::<()>().await;
            }
            let throttled = {
                let mut failures = self.failures.lock().unwrap();
                match failures.get_mut(&record.id) {
                    Some(left) if *left > 0 => {
                        *left -= 1;
                        true
                    }
                    _ => false,
                }
            };
            if throttled {
                anyhow::bail!("throttled creating {}", record.id);
            }

            self.inner.create(record).await?;
            self.created.lock().unwrap().push(record.id.clone());
            let done = self.successes.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((after, tx)) = &self.cancel_after
                && done == *after
            {
                let _ = tx.send(true);
            }
            Ok(())
        })
    }

    fn delete<'a>(&'a self, record: &'a ResourceRecord) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            if self.failing_deletes.lock().unwrap().contains(&record.id) {
                anyhow::bail!("dependency violation deleting {}", record.id);
            }
            self.inner.delete(record).await?;
            self.deleted.lock().unwrap().push(record.id.clone());
            Ok(())
        })
    }
}

fn reversed(ids: &[ResourceId]) -> Vec<ResourceId> {
    ids.iter().rev().cloned().collect()
}

#[tokio::test]
async fn synthesize_persists_descriptor_and_resynthesis_is_a_noop() {
    init_tracing();
    let store = StateStore::open_in_memory().unwrap();
    let resolved = resolve(&config()).unwrap();
    let synth = Synthesizer::new(Arc::new(StoreProvisioner::new(store.clone())), store.clone())
        .with_options(fast_options());

    let report = synth.synthesize(&resolved.descriptor).await.unwrap();
    assert_eq!(report.created, resolved.descriptor.order);
    assert_eq!(store.count_records("multiarch").unwrap(), 8);
    assert_eq!(
        store.get_descriptor("multiarch").unwrap().as_ref(),
        Some(&resolved.descriptor)
    );
    assert!(report.outputs[OUTPUT_DNS].contains("elb.amazonaws.com"));

    // Same config again: same identities, nothing to do.
    let again = resolve(&config()).unwrap();
    assert_eq!(again.descriptor.order, resolved.descriptor.order);
    let report = synth.synthesize(&again.descriptor).await.unwrap();
    assert!(report.created.is_empty());
    assert_eq!(report.unchanged, 8);
}

#[tokio::test]
async fn cancelling_after_any_k_leaves_nothing_behind() {
    init_tracing();
    let resolved = resolve(&config()).unwrap();
    let n = resolved.descriptor.order.len();

    for k in 0..n {
        let store = StateStore::open_in_memory().unwrap();
        let (tx, rx) = watch::channel(false);
        if k == 0 {
            tx.send(true).unwrap();
        }
        let mut cloud = ScriptedCloud::new(&store);
        cloud.cancel_after = Some((k, tx));
        let cloud = Arc::new(cloud);
        let synth = Synthesizer::new(cloud.clone(), store.clone()).with_options(fast_options());

        let err = synth
            .synthesize_with_cancel(&resolved.descriptor, rx)
            .await
            .unwrap_err();
        match err {
            SynthesisError::Cancelled { rolled_back, .. } => assert_eq!(rolled_back, k, "k = {k}"),
            other => panic!("k = {k}: unexpected error {other}"),
        }

        assert_eq!(store.count_records("multiarch").unwrap(), 0, "k = {k}");
        assert!(store.get_stack("multiarch").unwrap().is_none());
        assert_eq!(cloud.created().len(), k);
        assert_eq!(cloud.deleted(), reversed(&cloud.created()), "k = {k}");
    }
}

#[tokio::test]
async fn exhausted_retries_are_fatal_and_roll_back() {
    init_tracing();
    let store = StateStore::open_in_memory().unwrap();
    let resolved = resolve(&config()).unwrap();

    let mut cloud = ScriptedCloud::new(&store);
    cloud.hangs.push(resolved.service.id.clone());
    let cloud = Arc::new(cloud);
    let synth = Synthesizer::new(cloud.clone(), store.clone()).with_options(fast_options());

    let err = synth.synthesize(&resolved.descriptor).await.unwrap_err();
    match err {
        SynthesisError::ProvisioningTimeout {
            resource,
            attempts,
            last_error,
        } => {
            assert_eq!(resource, resolved.service.id);
            assert_eq!(attempts, 3);
            assert!(last_error.contains("timed out"));
        }
        other => panic!("unexpected error {other}"),
    }

    // Pools, cluster and providers were created, then removed in reverse.
    let created = cloud.created();
    assert_eq!(created.len(), 5);
    assert_eq!(cloud.deleted(), reversed(&created));
    assert_eq!(store.count_records("multiarch").unwrap(), 0);
    assert!(store.get_descriptor("multiarch").unwrap().is_none());
}

#[tokio::test]
async fn transient_failures_are_retried() {
    init_tracing();
    let store = StateStore::open_in_memory().unwrap();
    let resolved = resolve(&config()).unwrap();
    let cluster_id = resolved.cluster.id.clone();

    let cloud = ScriptedCloud::new(&store);
    cloud.failures.lock().unwrap().insert(cluster_id.clone(), 2);
    let synth = Synthesizer::new(Arc::new(cloud), store.clone()).with_options(fast_options());

    let report = synth.synthesize(&resolved.descriptor).await.unwrap();
    assert_eq!(report.created.len(), 8);
    assert!(store.get_record("multiarch", &cluster_id).unwrap().is_some());
}

#[tokio::test]
async fn teardown_runs_in_reverse_dependency_order() {
    init_tracing();
    let store = StateStore::open_in_memory().unwrap();
    let resolved = resolve(&config()).unwrap();
    let cloud = Arc::new(ScriptedCloud::new(&store));
    let synth = Synthesizer::new(cloud.clone(), store.clone()).with_options(fast_options());

    synth.synthesize(&resolved.descriptor).await.unwrap();
    let removed = synth.teardown("multiarch").await.unwrap();

    assert_eq!(removed, reversed(&resolved.descriptor.order));
    assert_eq!(cloud.deleted(), removed);
    let first = &resolved.descriptor.records[&removed[0]];
    assert_eq!(first.kind, ResourceKind::AutoscalingPolicy);
    assert_eq!(store.count_records("multiarch").unwrap(), 0);
    assert!(store.list_stacks().unwrap().is_empty());

    assert!(matches!(
        synth.teardown("multiarch").await,
        Err(SynthesisError::StackNotFound(_))
    ));
}

#[tokio::test]
async fn changed_config_replaces_only_affected_resources() {
    init_tracing();
    let store = StateStore::open_in_memory().unwrap();
    let synth = Synthesizer::new(Arc::new(StoreProvisioner::new(store.clone())), store.clone())
        .with_options(fast_options());

    let before = resolve(&config()).unwrap();
    synth.synthesize(&before.descriptor).await.unwrap();

    let mut cfg = config();
    cfg.pools[1].desired_capacity = 3;
    let after = resolve(&cfg).unwrap();

    let plan = diff(Some(&before.descriptor), &after.descriptor);
    assert_eq!(plan.unchanged.len(), 3);
    assert_eq!(plan.added.len(), 5);
    assert_eq!(plan.removed.len(), 5);

    let report = synth.synthesize(&after.descriptor).await.unwrap();
    assert_eq!(report.created, plan.added);
    assert_eq!(report.deleted, reversed(&plan.removed));
    assert_eq!(report.unchanged, 3);
    assert_eq!(store.count_records("multiarch").unwrap(), 8);
    assert_eq!(
        store.get_descriptor("multiarch").unwrap().as_ref(),
        Some(&after.descriptor)
    );
}

#[tokio::test]
async fn synthesized_stack_survives_reopen() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleet.redb");
    let resolved = resolve(&config()).unwrap();

    {
        let store = StateStore::open(&path).unwrap();
        let synth = Synthesizer::new(Arc::new(StoreProvisioner::new(store.clone())), store);
        synth.synthesize(&resolved.descriptor).await.unwrap();
    }

    let store = StateStore::open(&path).unwrap();
    let stored = store.get_descriptor("multiarch").unwrap().unwrap();
    assert_eq!(stored, resolved.descriptor);
    assert_eq!(stored.outputs[OUTPUT_DNS], resolved.descriptor.outputs[OUTPUT_DNS]);
}

#[tokio::test]
async fn cancelling_an_in_flight_create_rolls_it_back_too() {
    init_tracing();
    let store = StateStore::open_in_memory().unwrap();
    let resolved = resolve(&config()).unwrap();
    let service_id = resolved.service.id.clone();

    let mut cloud = ScriptedCloud::new(&store);
    cloud.hangs.push(service_id.clone());
    let cloud = Arc::new(cloud);
    let options = SynthesisOptions {
        call_timeout: Duration::from_secs(30),
        ..fast_options()
    };
    let synth = Synthesizer::new(cloud.clone(), store.clone()).with_options(options);

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = tx.send(true);
    });

    let err = synth
        .synthesize_with_cancel(&resolved.descriptor, rx)
        .await
        .unwrap_err();
    assert!(matches!(err, SynthesisError::Cancelled { rolled_back: 6, .. }));

    // The interrupted service goes first, then everything before it.
    let created = cloud.created();
    assert_eq!(created.len(), 5);
    let mut expected = vec![service_id];
    expected.extend(reversed(&created));
    assert_eq!(cloud.deleted(), expected);
    assert_eq!(store.count_records("multiarch").unwrap(), 0);
    assert!(store.get_stack("multiarch").unwrap().is_none());
}

#[tokio::test]
async fn failed_rollback_reports_what_is_left() {
    init_tracing();
    let store = StateStore::open_in_memory().unwrap();
    let resolved = resolve(&config()).unwrap();
    let cluster_id = resolved.cluster.id.clone();

    let mut cloud = ScriptedCloud::new(&store);
    cloud.hangs.push(resolved.service.id.clone());
    let cloud = Arc::new(cloud);
    cloud.fail_deletes_of(&cluster_id);
    let synth = Synthesizer::new(cloud.clone(), store.clone()).with_options(fast_options());

    let err = synth.synthesize(&resolved.descriptor).await.unwrap_err();
    match err {
        SynthesisError::RollbackIncomplete { cause, remaining } => {
            assert_eq!(remaining, vec![cluster_id.clone()]);
            match *cause {
                SynthesisError::ProvisioningTimeout { resource, .. } => {
                    assert_eq!(resource, resolved.service.id)
                }
                other => panic!("unexpected cause {other}"),
            }
        }
        other => panic!("unexpected error {other}"),
    }

    // Rollback carried on past the cluster; only it is left.
    assert_eq!(cloud.deleted().len(), 4);
    assert_eq!(store.count_records("multiarch").unwrap(), 1);
    assert!(store.get_record("multiarch", &cluster_id).unwrap().is_some());
    assert!(store.get_stack("multiarch").unwrap().is_none());
}

#[tokio::test]
async fn interrupted_teardown_keeps_the_rest_and_can_resume() {
    init_tracing();
    let store = StateStore::open_in_memory().unwrap();
    let resolved = resolve(&config()).unwrap();
    let service_id = resolved.service.id.clone();
    let cloud = Arc::new(ScriptedCloud::new(&store));
    let synth = Synthesizer::new(cloud.clone(), store.clone()).with_options(fast_options());
    synth.synthesize(&resolved.descriptor).await.unwrap();

    cloud.fail_deletes_of(&service_id);
    let err = synth.teardown("multiarch").await.unwrap_err();
    assert!(matches!(
        err,
        SynthesisError::ProvisioningTimeout { ref resource, attempts: 3, .. } if *resource == service_id
    ));

    // Policy and router are gone; the service and everything under it remain.
    let order = &resolved.descriptor.order;
    let summary = store.get_stack("multiarch").unwrap().unwrap();
    assert_eq!(summary.order, order[..6].to_vec());
    assert_eq!(store.count_records("multiarch").unwrap(), 6);

    cloud.heal_deletes();
    let removed = synth.teardown("multiarch").await.unwrap();
    assert_eq!(removed, reversed(&order[..6]));
    assert_eq!(store.count_records("multiarch").unwrap(), 0);
    assert!(store.get_stack("multiarch").unwrap().is_none());
}

#[tokio::test]
async fn failed_removal_is_retried_by_the_next_synthesis() {
    init_tracing();
    let store = StateStore::open_in_memory().unwrap();
    let cloud = Arc::new(ScriptedCloud::new(&store));
    let synth = Synthesizer::new(cloud.clone(), store.clone()).with_options(fast_options());

    let before = resolve(&config()).unwrap();
    synth.synthesize(&before.descriptor).await.unwrap();

    let mut cfg = config();
    cfg.pools[1].desired_capacity = 3;
    let after = resolve(&cfg).unwrap();
    let old_pool = before.pools[1].id.clone();
    cloud.fail_deletes_of(&old_pool);

    let err = synth.synthesize(&after.descriptor).await.unwrap_err();
    assert!(matches!(
        err,
        SynthesisError::ProvisioningTimeout { ref resource, .. } if *resource == old_pool
    ));

    // The new topology is recorded, with the stranded pool still tracked.
    let stored = store.get_descriptor("multiarch").unwrap().unwrap();
    let mut expected = after.descriptor.order.clone();
    expected.push(old_pool.clone());
    assert_eq!(stored.order, expected);
    assert_eq!(store.count_records("multiarch").unwrap(), 9);

    cloud.heal_deletes();
    let report = synth.synthesize(&after.descriptor).await.unwrap();
    assert!(report.created.is_empty());
    assert_eq!(report.deleted, vec![old_pool]);
    assert_eq!(report.unchanged, 8);
    assert_eq!(store.count_records("multiarch").unwrap(), 8);
    assert_eq!(
        store.get_descriptor("multiarch").unwrap().as_ref(),
        Some(&after.descriptor)
    );
}
