//! Coordination store abstraction.
//!
//! The shared store is the only cross-instance mutable state in the system.
//! This module treats it as an abstract capability — atomic presence batches,
//! a cached ranking, and publish/subscribe — so the backing store is
//! swappable and tests run against the in-memory backend.
//!
//! Every mutation a backend performs must be a single atomic batch supplied
//! by the store itself; backends never implement read-modify-write with
//! separate read and write calls. The one deliberate exception is the ranking
//! cache, which is written with an absolute score observed inside the same
//! batch — see [`CoordinationStore::presence_add`].

pub mod keys;
pub mod memory;
pub mod redis;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::StoreResult;

/// A raw message received from a pub/sub subscription.
#[derive(Debug, Clone)]
pub struct StoreMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

/// Reverse-map value: what we need to clean up a connection without knowing
/// anything else about it. Stored as JSON so ids may contain any character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseEntry {
    pub user_id: String,
    pub tenant_id: String,
}

/// Result of removing a presence entry.
#[derive(Debug, Clone)]
pub struct RemovedPresence {
    pub user_id: String,
    pub tenant_id: String,
    /// Live cardinality of the tenant set after removal.
    pub remaining: u64,
}

/// Shared reachability flag, flipped by the backend as operations succeed or
/// fail and read by the health surface. Loss of the store degrades the
/// instance to single-node scope; it never crashes it.
#[derive(Debug)]
pub struct StoreHealth {
    reachable: AtomicBool,
}

impl StoreHealth {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Relaxed)
    }

    pub fn mark(&self, reachable: bool) {
        let was = self.reachable.swap(reachable, Ordering::Relaxed);
        if was != reachable {
            if reachable {
                tracing::info!("coordination store reachable again, leaving degraded mode");
            } else {
                tracing::warn!("coordination store unreachable, degrading to single-instance mode");
            }
        }
    }
}

/// Abstract coordination store: atomic presence accounting plus pub/sub.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Short backend name for logs and the health surface.
    fn backend(&self) -> &'static str;

    /// Whether this backend is shared across instances. The in-memory
    /// fallback is not; running on it means degraded (single-instance) mode.
    fn is_clustered(&self) -> bool;

    /// Liveness probe.
    async fn ping(&self) -> StoreResult<()>;

    /// Atomically add a presence entry: tenant-set add, TTL refresh on the
    /// set, tenant-index add, and reverse-map set, observing the new live
    /// cardinality in the same batch. The ranking cache is then written with
    /// that absolute cardinality (never a blind increment). Returns the live
    /// count after the add. Idempotent — re-adding an existing entry only
    /// refreshes the TTL.
    async fn presence_add(
        &self,
        tenant_id: &str,
        user_id: &str,
        connection_id: &str,
        ttl: Duration,
    ) -> StoreResult<u64>;

    /// Atomically remove a presence entry via the reverse map. Returns
    /// `Ok(None)` when the connection id is unknown (already cleaned up or
    /// expired) — callers treat that as an idempotent no-op.
    async fn presence_remove(&self, connection_id: &str) -> StoreResult<Option<RemovedPresence>>;

    /// Authoritative live cardinality of one tenant's presence set.
    async fn presence_count(&self, tenant_id: &str) -> StoreResult<u64>;

    /// All (user id, connection id) members of one tenant's presence set.
    async fn presence_members(&self, tenant_id: &str) -> StoreResult<Vec<(String, String)>>;

    /// Tenant ids currently recorded in the tenant index. May briefly include
    /// tenants whose set already expired; callers re-check live cardinality.
    async fn active_tenants(&self) -> StoreResult<Vec<String>>;

    /// Top tenants by cached live count, highest first. Best-effort cache.
    async fn ranking(&self, limit: usize) -> StoreResult<Vec<(String, u64)>>;

    /// Every reverse-map entry, for the orphan cleanup pass.
    async fn reverse_entries(&self) -> StoreResult<Vec<(String, ReverseEntry)>>;

    /// Drop a reverse-map entry without touching the tenant set (the set is
    /// already gone when this is called).
    async fn remove_reverse(&self, connection_id: &str) -> StoreResult<()>;

    /// Drop a tenant from the index and ranking if its presence set is empty
    /// or expired. Returns whether anything was pruned. A concurrent
    /// registration re-asserts both, so losing this race is harmless.
    async fn prune_tenant(&self, tenant_id: &str) -> StoreResult<bool>;

    /// Publish a payload on a channel. Zero subscribers is a normal,
    /// side-effect-free outcome.
    async fn publish(&self, channel: &str, payload: &[u8]) -> StoreResult<()>;

    /// Subscribe to a set of channels or trailing-`*` patterns. Messages
    /// arrive on the returned receiver until it is dropped. Backends keep the
    /// subscription alive across store reconnects on their own.
    async fn subscribe(&self, patterns: &[String]) -> StoreResult<mpsc::Receiver<StoreMessage>>;
}
