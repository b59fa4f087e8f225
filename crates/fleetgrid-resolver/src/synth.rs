//! Synthesis: turning a resolved descriptor into provisioned resources.
//!
//! Resources are created one at a time in dependency order. Every
//! provisioner call runs under a timeout; a timed-out or failed call is
//! retried with exponential backoff up to `max_attempts`. When the attempts
//! run out, or the caller cancels, everything this run created is deleted
//! again in reverse order and synthesis fails. The descriptor is only
//! persisted once every resource exists, so a stack is either fully
//! synthesized or not recorded at all.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use fleetgrid_state::{ResourceId, ResourceRecord, StateStore, TopologyDescriptor};

use crate::diff::{DescriptorDiff, diff};
use crate::error::{SynthesisError, SynthesisResult};
use crate::provisioner::Provisioner;

#[derive(Debug, Clone)]
pub struct SynthesisOptions {
    /// Upper bound on a single create/delete call.
    pub call_timeout: Duration,
    /// Attempts per call before giving up (at least one).
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(300),
            max_attempts: 4,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// What a successful synthesis did.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisReport {
    pub stack: String,
    pub created: Vec<ResourceId>,
    pub updated: Vec<ResourceId>,
    pub deleted: Vec<ResourceId>,
    pub unchanged: usize,
    pub outputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Create,
    Delete,
}

#[derive(Debug)]
enum CallError {
    Exhausted { attempts: u32, last_error: String },
    Cancelled,
}

pub struct Synthesizer {
    provisioner: Arc<dyn Provisioner>,
    store: StateStore,
    options: SynthesisOptions,
}

impl Synthesizer {
    pub fn new(provisioner: Arc<dyn Provisioner>, store: StateStore) -> Self {
        Self {
            provisioner,
            store,
            options: SynthesisOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SynthesisOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Synthesize without a cancellation signal.
    pub async fn synthesize(
        &self,
        descriptor: &TopologyDescriptor,
    ) -> SynthesisResult<SynthesisReport> {
        let (_never, cancel) = watch::channel(false);
        self.synthesize_with_cancel(descriptor, cancel).await
    }

    /// Bring the stored stack in line with `descriptor`.
    ///
    /// Only records that are new or changed since the last synthesis are
    /// created; records that disappeared are deleted afterwards. Setting
    /// `cancel` to true rolls back the records created by this run.
    pub async fn synthesize_with_cancel(
        &self,
        descriptor: &TopologyDescriptor,
        mut cancel: watch::Receiver<bool>,
    ) -> SynthesisResult<SynthesisReport> {
        let stack = descriptor.stack.as_str();
        let previous = self.store.get_descriptor(stack)?;
        let plan: DescriptorDiff = diff(previous.as_ref(), descriptor);

        if plan.is_empty() {
            info!(stack, resources = plan.unchanged.len(), "topology unchanged");
            return Ok(SynthesisReport {
                stack: stack.to_string(),
                created: Vec::new(),
                updated: Vec::new(),
                deleted: Vec::new(),
                unchanged: plan.unchanged.len(),
                outputs: descriptor.outputs.clone(),
            });
        }

        info!(
            stack,
            added = plan.added.len(),
            changed = plan.changed.len(),
            removed = plan.removed.len(),
            "synthesizing topology"
        );

        let mut created: Vec<&ResourceRecord> = Vec::new();
        let mut updated: Vec<ResourceId> = Vec::new();

        for id in &descriptor.order {
            let is_new = plan.added.contains(id);
            if !is_new && !plan.changed.contains(id) {
                continue;
            }
            let Some(record) = descriptor.records.get(id) else {
                continue;
            };

            let cancelled_before = *cancel.borrow();
            let outcome = if cancelled_before {
                Err(CallError::Cancelled)
            } else {
                self.call(Op::Create, record, Some(&mut cancel)).await
            };

            match outcome {
                Ok(attempts) => {
                    debug!(stack, id = %record.id, kind = ?record.kind, attempts, "resource created");
                    if is_new {
                        created.push(record);
                    } else {
                        updated.push(record.id.clone());
                    }
                }
                Err(CallError::Cancelled) => {
                    // An interrupted create may have gone through; delete it too.
                    if is_new && !cancelled_before {
                        created.push(record);
                    }
                    warn!(stack, at = %record.id, created = created.len(), "synthesis cancelled, rolling back");
                    let rolled_back = created.len();
                    let cause = SynthesisError::Cancelled {
                        stack: stack.to_string(),
                        rolled_back,
                    };
                    return Err(self.roll_back(stack, &created, cause).await);
                }
                Err(CallError::Exhausted {
                    attempts,
                    last_error,
                }) => {
                    error!(
                        stack,
                        id = %record.id,
                        attempts,
                        error = %last_error,
                        "provisioning failed, rolling back"
                    );
                    let cause = SynthesisError::ProvisioningTimeout {
                        resource: record.id.clone(),
                        attempts,
                        last_error,
                    };
                    return Err(self.roll_back(stack, &created, cause).await);
                }
            }
        }

        // Everything new exists; retire what the new descriptor dropped.
        let mut deleted = Vec::new();
        if let Some(previous) = &previous {
            for (idx, id) in plan.removed.iter().enumerate().rev() {
                let Some(record) = previous.records.get(id) else {
                    continue;
                };
                if let Err(CallError::Exhausted {
                    attempts,
                    last_error,
                }) = self.call(Op::Delete, record, None).await
                {
                    // Keep what is still standing in the stored stack so the
                    // next synthesis or teardown retries it.
                    let mut kept = descriptor.clone();
                    for left in &plan.removed[..=idx] {
                        if let Some(r) = previous.records.get(left) {
                            kept.order.push(left.clone());
                            kept.records.insert(left.clone(), r.clone());
                        }
                    }
                    self.store.put_descriptor(&kept)?;
                    error!(stack, id = %id, remaining = idx + 1, "resources left behind after re-synthesis");
                    return Err(SynthesisError::ProvisioningTimeout {
                        resource: id.clone(),
                        attempts,
                        last_error,
                    });
                }
                self.store.delete_record(stack, id)?;
                deleted.push(id.clone());
            }
        }

        self.store.put_descriptor(descriptor)?;

        let report = SynthesisReport {
            stack: stack.to_string(),
            created: created.iter().map(|r| r.id.clone()).collect(),
            updated,
            deleted,
            unchanged: plan.unchanged.len(),
            outputs: descriptor.outputs.clone(),
        };
        info!(
            stack,
            created = report.created.len(),
            updated = report.updated.len(),
            deleted = report.deleted.len(),
            "topology synthesized"
        );
        Ok(report)
    }

    /// Destroy a synthesized stack in reverse creation order.
    ///
    /// On failure the stored stack keeps the resources that still exist,
    /// so teardown can be run again.
    pub async fn teardown(&self, stack: &str) -> SynthesisResult<Vec<ResourceId>> {
        let Some(descriptor) = self.store.get_descriptor(stack)? else {
            return Err(SynthesisError::StackNotFound(stack.to_string()));
        };

        let mut removed: Vec<ResourceId> = Vec::new();
        for id in descriptor.order.iter().rev() {
            let Some(record) = descriptor.records.get(id) else {
                continue;
            };
            match self.call(Op::Delete, record, None).await {
                Ok(_) => {
                    self.store.delete_record(stack, id)?;
                    removed.push(id.clone());
                }
                Err(err) => {
                    let mut summary = descriptor.summary();
                    summary.order.retain(|i| !removed.contains(i));
                    self.store.put_stack(&summary)?;

                    let (attempts, last_error) = match err {
                        CallError::Exhausted {
                            attempts,
                            last_error,
                        } => (attempts, last_error),
                        CallError::Cancelled => (0, "cancelled".to_string()),
                    };
                    error!(stack, id = %id, remaining = summary.order.len(), "teardown stopped");
                    return Err(SynthesisError::ProvisioningTimeout {
                        resource: id.clone(),
                        attempts,
                        last_error,
                    });
                }
            }
        }

        self.store.delete_stack(stack)?;
        info!(stack, removed = removed.len(), "topology torn down");
        Ok(removed)
    }

    /// Delete `created` in reverse order. Returns the error to surface.
    async fn roll_back(
        &self,
        stack: &str,
        created: &[&ResourceRecord],
        cause: SynthesisError,
    ) -> SynthesisError {
        let mut remaining = Vec::new();
        for record in created.iter().rev() {
            match self.call(Op::Delete, record, None).await {
                Ok(_) => debug!(stack, id = %record.id, "rolled back"),
                Err(_) => remaining.push(record.id.clone()),
            }
        }

        if remaining.is_empty() {
            info!(stack, rolled_back = created.len(), "rollback complete");
            cause
        } else {
            error!(stack, remaining = ?remaining, "rollback incomplete");
            SynthesisError::RollbackIncomplete {
                cause: Box::new(cause),
                remaining,
            }
        }
    }

    /// One provisioner operation with timeout, retry and backoff.
    ///
    /// Returns the number of attempts used.
    async fn call(
        &self,
        op: Op,
        record: &ResourceRecord,
        mut cancel: Option<&mut watch::Receiver<bool>>,
    ) -> Result<u32, CallError> {
        let max_attempts = self.options.max_attempts.max(1);
        let timeout = self.options.call_timeout;
        let mut backoff = self.options.initial_backoff;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let fut = match op {
                Op::Create => self.provisioner.create(record),
                Op::Delete => self.provisioner.delete(record),
            };
            let outcome = match cancel.as_deref_mut() {
                Some(rx) => tokio::select! {
                    r = tokio::time::timeout(timeout, fut) => r,
                    _ = cancelled(rx) => return Err(CallError::Cancelled),
                },
                None => tokio::time::timeout(timeout, fut).await,
            };

            match outcome {
                Ok(Ok(())) => return Ok(attempt),
                Ok(Err(e)) => last_error = format!("{e:#}"),
                Err(_) => last_error = format!("timed out after {timeout:?}"),
            }
            warn!(
                id = %record.id,
                ?op,
                attempt,
                max_attempts,
                error = %last_error,
                "provisioning call failed"
            );

            if attempt < max_attempts {
                match cancel.as_deref_mut() {
                    Some(rx) => tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancelled(rx) => return Err(CallError::Cancelled),
                    },
                    None => tokio::time::sleep(backoff).await,
                }
                backoff = (backoff * 2).min(self.options.max_backoff);
            }
        }

        Err(CallError::Exhausted {
            attempts: max_attempts,
            last_error,
        })
    }
}

/// Resolves once cancellation is requested. Never resolves if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|c| *c).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}
