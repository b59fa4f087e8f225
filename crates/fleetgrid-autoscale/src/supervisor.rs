//! Supervisor: one evaluation loop per autoscaled service.
//!
//! Loops never share mutable state. Each owns its controller and the sender
//! side of its desired-count channel; the supervisor only keeps receivers,
//! the sample sender, and the shutdown switch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use fleetgrid_state::AutoscalingPolicy;

use crate::controller::{AutoscalingController, ScaleEvent};
use crate::error::AutoscaleError;
use crate::runner::{LoopChannels, run_controller_loop};
use crate::source::MetricsSource;

const EVENT_CAPACITY: usize = 256;
const SAMPLE_CAPACITY: usize = 64;

/// What callers get back for a running service.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    pub service_id: String,
    /// Current desired count. Read-only; only the loop writes it.
    pub desired: watch::Receiver<u32>,
    /// Push a sample for immediate evaluation.
    pub samples: mpsc::Sender<f64>,
}

struct LoopSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    desired: watch::Receiver<u32>,
    samples: mpsc::Sender<f64>,
}

pub struct AutoscalingSupervisor {
    loops: Arc<RwLock<HashMap<String, LoopSlot>>>,
    events: broadcast::Sender<ScaleEvent>,
    interval_override: Option<Duration>,
}

impl Default for AutoscalingSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl AutoscalingSupervisor {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            loops: Arc::new(RwLock::new(HashMap::new())),
            events,
            interval_override: None,
        }
    }

    /// Evaluate every loop on `interval` instead of the policy's interval.
    pub fn with_evaluation_interval(mut self, interval: Duration) -> Self {
        self.interval_override = Some(interval);
        self
    }

    /// Subscribe to scale events from every loop.
    pub fn subscribe(&self) -> broadcast::Receiver<ScaleEvent> {
        self.events.subscribe()
    }

    /// Start the loop for `policy.service_id` at `initial` desired count.
    ///
    /// A loop already running for the service is stopped first.
    pub async fn start(
        &self,
        policy: AutoscalingPolicy,
        initial: u32,
        source: Arc<dyn MetricsSource>,
    ) -> Result<ServiceHandle, AutoscaleError> {
        let interval = self
            .interval_override
            .unwrap_or(Duration::from_secs(policy.evaluation_interval_secs.max(1)));
        let controller = AutoscalingController::new(policy, initial)?;
        let service_id = controller.service_id().to_string();

        let (desired_tx, desired_rx) = watch::channel(controller.desired());
        let (samples_tx, samples_rx) = mpsc::channel(SAMPLE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let channels = LoopChannels {
            desired_tx,
            events: self.events.clone(),
            samples: samples_rx,
            shutdown: shutdown_rx,
        };
        let handle = tokio::spawn(run_controller_loop(controller, source, interval, channels));

        let slot = LoopSlot {
            handle,
            shutdown_tx,
            desired: desired_rx.clone(),
            samples: samples_tx.clone(),
        };
        let old = self.loops.write().await.insert(service_id.clone(), slot);
        if let Some(old) = old {
            warn!(service = %service_id, "replacing running autoscaling loop");
            shut_down(old).await;
        }

        info!(service = %service_id, initial, ?interval, "autoscaling started");
        Ok(ServiceHandle {
            service_id,
            desired: desired_rx,
            samples: samples_tx,
        })
    }

    /// Stop one service's loop and wait for it to exit.
    pub async fn stop(&self, service_id: &str) -> Result<(), AutoscaleError> {
        let slot = self.loops.write().await.remove(service_id);
        match slot {
            Some(slot) => {
                shut_down(slot).await;
                info!(service = service_id, "autoscaling stopped");
                Ok(())
            }
            None => Err(AutoscaleError::UnknownService(service_id.to_string())),
        }
    }

    /// Stop every loop.
    pub async fn stop_all(&self) {
        let slots: Vec<(String, LoopSlot)> = self.loops.write().await.drain().collect();
        for (id, slot) in slots {
            shut_down(slot).await;
            debug!(service = %id, "autoscaling stopped");
        }
        info!("all autoscaling loops stopped");
    }

    /// Push a sample to a running loop.
    pub async fn push_sample(&self, service_id: &str, sample: f64) -> Result<(), AutoscaleError> {
        let sender = {
            let loops = self.loops.read().await;
            loops
                .get(service_id)
                .map(|slot| slot.samples.clone())
                .ok_or_else(|| AutoscaleError::UnknownService(service_id.to_string()))?
        };
        sender
            .send(sample)
            .await
            .map_err(|_| AutoscaleError::UnknownService(service_id.to_string()))
    }

    /// Latest desired count for a service.
    pub async fn desired(&self, service_id: &str) -> Option<u32> {
        let loops = self.loops.read().await;
        loops.get(service_id).map(|slot| *slot.desired.borrow())
    }

    pub async fn is_running(&self, service_id: &str) -> bool {
        self.loops.read().await.contains_key(service_id)
    }

    pub async fn active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.loops.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

async fn shut_down(slot: LoopSlot) {
    let _ = slot.shutdown_tx.send(true);
    if let Err(e) = slot.handle.await
        && e.is_panic()
    {
        warn!(error = %e, "autoscaling loop panicked");
    }
}
