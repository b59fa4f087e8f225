//! The seam to whatever actually creates infrastructure.

use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use fleetgrid_state::{ResourceRecord, StateStore};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Creates and deletes individual resources.
///
/// Both calls must be idempotent: synthesis retries them after timeouts,
/// and rollback may delete a resource whose creation was interrupted.
pub trait Provisioner: Send + Sync {
    fn create<'a>(&'a self, record: &'a ResourceRecord) -> BoxFuture<'a, anyhow::Result<()>>;

    fn delete<'a>(&'a self, record: &'a ResourceRecord) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Records resources in the state store instead of creating them.
///
/// Used for dry runs and as the bookkeeping layer under tests.
#[derive(Clone)]
pub struct StoreProvisioner {
    store: StateStore,
}

impl StoreProvisioner {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }
}

impl Provisioner for StoreProvisioner {
    fn create<'a>(&'a self, record: &'a ResourceRecord) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.store.put_record(record)?;
            debug!(id = %record.id, kind = ?record.kind, "resource recorded");
            Ok(())
        })
    }

    fn delete<'a>(&'a self, record: &'a ResourceRecord) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let existed = self.store.delete_record(&record.stack, &record.id)?;
            debug!(id = %record.id, existed, "resource record removed");
            Ok(())
        })
    }
}
