//! Target-tracking controller for one service's desired count.
//!
//! Each evaluation compares an observed requests-per-target sample `m`
//! with the policy's target `t`:
//!
//! - `m > t` scales out by `ceil(desired * (m/t - 1) * scale_factor)`
//! - `m < t` scales in by `ceil(desired * (1 - m/t) * scale_factor)`
//! - steps are at least one task and clamped to `[min, max]`
//!
//! Hitting a bound parks the controller in `AtMax`/`AtMin` and emits
//! [`ScaleEvent::BoundReached`]. More demand in the same direction is then
//! a no-op that reports the bound again. Scale-in waits for the scale-in
//! cooldown since the last scaling activity; scale-out only waits for its
//! own (usually zero) cooldown.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fleetgrid_state::AutoscalingPolicy;

use crate::error::AutoscaleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingState {
    Stable,
    ScalingUp,
    ScalingDown,
    AtMax,
    AtMin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Out,
    In,
}

/// Observability feed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScaleEvent {
    ScaleUp {
        service_id: String,
        from: u32,
        to: u32,
        observed: f64,
    },
    ScaleDown {
        service_id: String,
        from: u32,
        to: u32,
        observed: f64,
    },
    /// Demand pushes past a bound. A condition, not a failure.
    BoundReached {
        service_id: String,
        bound: Bound,
        desired: u32,
        observed: f64,
    },
    /// A scaling action was due but its cooldown has not elapsed.
    CooldownDeferred {
        service_id: String,
        direction: Direction,
        remaining: Duration,
    },
}

impl ScaleEvent {
    pub fn service_id(&self) -> &str {
        match self {
            ScaleEvent::ScaleUp { service_id, .. }
            | ScaleEvent::ScaleDown { service_id, .. }
            | ScaleEvent::BoundReached { service_id, .. }
            | ScaleEvent::CooldownDeferred { service_id, .. } => service_id,
        }
    }
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub state: ScalingState,
    pub desired: u32,
    pub changed: bool,
    pub events: Vec<ScaleEvent>,
}

#[derive(Debug)]
pub struct AutoscalingController {
    policy: AutoscalingPolicy,
    desired: u32,
    state: ScalingState,
    last_activity: Option<Instant>,
    last_scale_out: Option<Instant>,
}

impl AutoscalingController {
    /// Start `Stable` at `initial` desired count.
    ///
    /// An initial count outside the policy bounds is clamped into them.
    pub fn new(policy: AutoscalingPolicy, initial: u32) -> Result<Self, AutoscaleError> {
        if policy.min_capacity > policy.max_capacity {
            return Err(AutoscaleError::InvalidPolicy(format!(
                "min capacity {} exceeds max capacity {}",
                policy.min_capacity, policy.max_capacity
            )));
        }
        if !(policy.target_value.is_finite() && policy.target_value > 0.0) {
            return Err(AutoscaleError::InvalidPolicy(format!(
                "target value {} must be positive",
                policy.target_value
            )));
        }
        if !(policy.scale_factor.is_finite() && policy.scale_factor > 0.0) {
            return Err(AutoscaleError::InvalidPolicy(format!(
                "scale factor {} must be positive",
                policy.scale_factor
            )));
        }

        let desired = initial.clamp(policy.min_capacity, policy.max_capacity);
        if desired != initial {
            warn!(
                service = %policy.service_id,
                initial,
                desired,
                "initial desired count outside policy bounds, clamped"
            );
        }

        Ok(Self {
            policy,
            desired,
            state: ScalingState::Stable,
            last_activity: None,
            last_scale_out: None,
        })
    }

    pub fn service_id(&self) -> &str {
        &self.policy.service_id
    }

    pub fn policy(&self) -> &AutoscalingPolicy {
        &self.policy
    }

    pub fn desired(&self) -> u32 {
        self.desired
    }

    pub fn state(&self) -> ScalingState {
        self.state
    }

    /// Evaluate one metric sample taken at `now`.
    ///
    /// Samples that are negative or not finite are ignored.
    pub fn evaluate(&mut self, observed: f64, now: Instant) -> Evaluation {
        if !observed.is_finite() || observed < 0.0 {
            warn!(service = %self.policy.service_id, observed, "ignoring invalid metric sample");
            return self.outcome(false, Vec::new());
        }

        let target = self.policy.target_value;
        if observed > target {
            self.scale_out(observed, now)
        } else if observed < target {
            self.scale_in(observed, now)
        } else {
            self.state = ScalingState::Stable;
            self.outcome(false, Vec::new())
        }
    }

    fn scale_out(&mut self, observed: f64, now: Instant) -> Evaluation {
        let max = self.policy.max_capacity;
        if self.desired >= max {
            self.state = ScalingState::AtMax;
            debug!(service = %self.policy.service_id, desired = self.desired, "demand above target at max capacity");
            let event = self.bound_event(Bound::Max, observed);
            return self.outcome(false, vec![event]);
        }

        let cooldown = Duration::from_secs(self.policy.scale_out_cooldown_secs);
        if let Some(remaining) = remaining(self.last_scale_out, cooldown, now) {
            return self.deferred(Direction::Out, remaining);
        }

        let step = self.step(observed / self.policy.target_value - 1.0);
        let raw = u64::from(self.desired) + u64::from(step);
        let from = self.desired;
        self.desired = raw.min(u64::from(max)) as u32;
        self.last_activity = Some(now);
        self.last_scale_out = Some(now);

        info!(
            service = %self.policy.service_id,
            from,
            to = self.desired,
            observed,
            target = self.policy.target_value,
            "scaling out"
        );
        let mut events = vec![ScaleEvent::ScaleUp {
            service_id: self.policy.service_id.clone(),
            from,
            to: self.desired,
            observed,
        }];
        if raw >= u64::from(max) {
            self.state = ScalingState::AtMax;
            events.push(self.bound_event(Bound::Max, observed));
        } else {
            self.state = ScalingState::ScalingUp;
        }
        self.outcome(true, events)
    }

    fn scale_in(&mut self, observed: f64, now: Instant) -> Evaluation {
        let min = self.policy.min_capacity;
        if self.desired <= min {
            self.state = ScalingState::AtMin;
            debug!(service = %self.policy.service_id, desired = self.desired, "demand below target at min capacity");
            let event = self.bound_event(Bound::Min, observed);
            return self.outcome(false, vec![event]);
        }

        let cooldown = Duration::from_secs(self.policy.scale_in_cooldown_secs);
        if let Some(remaining) = remaining(self.last_activity, cooldown, now) {
            return self.deferred(Direction::In, remaining);
        }

        let step = self.step(1.0 - observed / self.policy.target_value);
        let raw = i64::from(self.desired) - i64::from(step);
        let from = self.desired;
        self.desired = raw.max(i64::from(min)) as u32;
        self.last_activity = Some(now);

        info!(
            service = %self.policy.service_id,
            from,
            to = self.desired,
            observed,
            target = self.policy.target_value,
            "scaling in"
        );
        let mut events = vec![ScaleEvent::ScaleDown {
            service_id: self.policy.service_id.clone(),
            from,
            to: self.desired,
            observed,
        }];
        if raw <= i64::from(min) {
            self.state = ScalingState::AtMin;
            events.push(self.bound_event(Bound::Min, observed));
        } else {
            self.state = ScalingState::ScalingDown;
        }
        self.outcome(true, events)
    }

    /// Tasks to add or remove for a relative deviation from target.
    fn step(&self, deviation: f64) -> u32 {
        let raw = (f64::from(self.desired) * deviation * self.policy.scale_factor).ceil();
        // `as` saturates; huge samples simply hit the bound.
        (raw as u32).max(1)
    }

    fn bound_event(&self, bound: Bound, observed: f64) -> ScaleEvent {
        ScaleEvent::BoundReached {
            service_id: self.policy.service_id.clone(),
            bound,
            desired: self.desired,
            observed,
        }
    }

    fn deferred(&self, direction: Direction, remaining: Duration) -> Evaluation {
        debug!(
            service = %self.policy.service_id,
            ?direction,
            remaining_ms = remaining.as_millis() as u64,
            "scaling deferred by cooldown"
        );
        let event = ScaleEvent::CooldownDeferred {
            service_id: self.policy.service_id.clone(),
            direction,
            remaining,
        };
        self.outcome(false, vec![event])
    }

    fn outcome(&self, changed: bool, events: Vec<ScaleEvent>) -> Evaluation {
        Evaluation {
            state: self.state,
            desired: self.desired,
            changed,
            events,
        }
    }
}

/// Time left in a cooldown that started at `since`, if any.
fn remaining(since: Option<Instant>, cooldown: Duration, now: Instant) -> Option<Duration> {
    let since = since?;
    let elapsed = now.saturating_duration_since(since);
    (elapsed < cooldown).then(|| cooldown - elapsed)
}
