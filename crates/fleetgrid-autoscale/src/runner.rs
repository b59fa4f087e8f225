//! The per-service evaluation loop.
//!
//! Wakes on the policy's evaluation interval (pulling a sample from the
//! service's [`MetricsSource`]) or whenever a sample is pushed, and stops
//! when the shutdown flag flips. The loop owns the only
//! `watch::Sender<u32>` for the service's desired count.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::controller::{AutoscalingController, ScaleEvent};
use crate::source::MetricsSource;

pub(crate) struct LoopChannels {
    pub desired_tx: watch::Sender<u32>,
    pub events: broadcast::Sender<ScaleEvent>,
    pub samples: mpsc::Receiver<f64>,
    pub shutdown: watch::Receiver<bool>,
}

pub(crate) async fn run_controller_loop(
    mut controller: AutoscalingController,
    source: Arc<dyn MetricsSource>,
    interval: Duration,
    channels: LoopChannels,
) {
    let LoopChannels {
        desired_tx,
        events,
        mut samples,
        mut shutdown,
    } = channels;
    let service_id = controller.service_id().to_string();

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; evaluation starts one interval in.
    ticker.tick().await;

    debug!(service = %service_id, ?interval, "autoscaling loop starting");

    loop {
        let sample = tokio::select! {
            _ = ticker.tick() => {
                match source.sample(&service_id) {
                    Some(m) => m,
                    None => {
                        debug!(service = %service_id, "no metric sample this tick");
                        continue;
                    }
                }
            }
            Some(m) = samples.recv() => m,
            _ = shutdown.changed() => {
                debug!(service = %service_id, "autoscaling loop shutting down");
                break;
            }
        };

        let eval = controller.evaluate(sample, Instant::now());
        if eval.changed {
            desired_tx.send_replace(eval.desired);
        }
        for event in eval.events {
            // No subscribers is fine; the feed is best effort.
            let _ = events.send(event);
        }
    }

    info!(service = %service_id, desired = controller.desired(), "autoscaling loop stopped");
}
