//! Content-addressed resource identities.
//!
//! An id is `{kind prefix}-{16 hex chars}` of a SHA-256 over the stack,
//! kind, logical name, canonical config JSON, and dependency ids. Nothing
//! time- or order-dependent goes in, so resolving the same config twice
//! gives the same ids, and any config change to a resource changes its id
//! and the ids of everything depending on it.

use sha2::{Digest, Sha256};

use fleetgrid_state::{ResourceId, ResourceKind};

const ID_HEX_LEN: usize = 16;

pub fn resource_id(
    stack: &str,
    kind: ResourceKind,
    logical_name: &str,
    config: &serde_json::Value,
    depends_on: &[ResourceId],
) -> ResourceId {
    let mut hasher = Sha256::new();
    for part in [stack, kind.prefix(), logical_name] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    // serde_json maps are sorted by key, so this rendering is canonical.
    hasher.update(config.to_string().as_bytes());
    hasher.update([0u8]);
    for dep in depends_on {
        hasher.update(dep.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hex::encode(hasher.finalize());
    format!("{}-{}", kind.prefix(), &digest[..ID_HEX_LEN])
}
