//! Load signal feeding the controllers.

use std::sync::Arc;

use fleetgrid_traffic::TargetGroup;

/// Produces one metric sample per evaluation tick.
///
/// `None` means no sample is available this tick; the controller then
/// leaves the desired count alone.
pub trait MetricsSource: Send + Sync {
    fn sample(&self, service_id: &str) -> Option<f64>;
}

/// A service's target group reports requests per healthy target.
impl MetricsSource for TargetGroup {
    fn sample(&self, _service_id: &str) -> Option<f64> {
        Some(self.take_sample())
    }
}

impl<T: MetricsSource + ?Sized> MetricsSource for Arc<T> {
    fn sample(&self, service_id: &str) -> Option<f64> {
        (**self).sample(service_id)
    }
}

/// A source that never has a sample. For services driven only by pushed samples.
#[derive(Debug, Default, Clone, Copy)]
pub struct PushOnly;

impl MetricsSource for PushOnly {
    fn sample(&self, _service_id: &str) -> Option<f64> {
        None
    }
}
