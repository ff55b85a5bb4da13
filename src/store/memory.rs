//! In-process coordination store.
//!
//! Single-instance fallback for degraded mode and the backend integration
//! tests run against. Implements the same TTL and atomicity semantics as the
//! shared backend: batches run under one lock, tenant sets expire as a whole,
//! and expiry leaves reverse-map and ranking entries behind for the cleanup
//! pass to find — exactly what a crashed instance leaves in the real store.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use super::{keys, CoordinationStore, RemovedPresence, ReverseEntry, StoreMessage};
use crate::error::StoreResult;

/// Capacity of the internal fan-out channel. Subscribers that fall behind
/// skip messages, matching pub/sub's no-backlog semantics.
const PUBSUB_CAPACITY: usize = 4096;

#[derive(Debug)]
struct TenantSet {
    /// (user id, connection id) pairs.
    members: HashSet<(String, String)>,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    sets: HashMap<String, TenantSet>,
    index: HashSet<String>,
    reverse: HashMap<String, ReverseEntry>,
    ranking: HashMap<String, u64>,
}

impl Inner {
    /// Lazy expiry: drop tenant sets whose deadline passed. Reverse-map,
    /// index, and ranking entries deliberately survive — they are the orphans
    /// the cleanup pass reconciles.
    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.sets.retain(|_, set| set.expires_at > now);
    }

    fn live_count(&self, tenant_id: &str) -> u64 {
        self.sets
            .get(tenant_id)
            .map(|set| set.members.len() as u64)
            .unwrap_or(0)
    }
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    pubsub: broadcast::Sender<StoreMessage>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (pubsub, _) = broadcast::channel(PUBSUB_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            pubsub,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning only happens if a panic occurred mid-batch; the data
        // is still the best view we have.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn is_clustered(&self) -> bool {
        false
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn presence_add(
        &self,
        tenant_id: &str,
        user_id: &str,
        connection_id: &str,
        ttl: Duration,
    ) -> StoreResult<u64> {
        let mut inner = self.lock();
        inner.purge_expired();

        let set = inner
            .sets
            .entry(tenant_id.to_string())
            .or_insert_with(|| TenantSet {
                members: HashSet::new(),
                expires_at: Instant::now() + ttl,
            });
        set.members
            .insert((user_id.to_string(), connection_id.to_string()));
        set.expires_at = Instant::now() + ttl;
        let count = set.members.len() as u64;

        inner.index.insert(tenant_id.to_string());
        inner.reverse.insert(
            connection_id.to_string(),
            ReverseEntry {
                user_id: user_id.to_string(),
                tenant_id: tenant_id.to_string(),
            },
        );
        inner.ranking.insert(tenant_id.to_string(), count);
        Ok(count)
    }

    async fn presence_remove(&self, connection_id: &str) -> StoreResult<Option<RemovedPresence>> {
        let mut inner = self.lock();
        inner.purge_expired();

        let Some(entry) = inner.reverse.remove(connection_id) else {
            return Ok(None);
        };

        let mut now_empty = false;
        if let Some(set) = inner.sets.get_mut(&entry.tenant_id) {
            set.members
                .remove(&(entry.user_id.clone(), connection_id.to_string()));
            now_empty = set.members.is_empty();
        }
        if now_empty {
            inner.sets.remove(&entry.tenant_id);
        }

        let remaining = inner.live_count(&entry.tenant_id);
        if remaining == 0 {
            inner.ranking.remove(&entry.tenant_id);
            inner.index.remove(&entry.tenant_id);
        } else {
            inner.ranking.insert(entry.tenant_id.clone(), remaining);
        }

        Ok(Some(RemovedPresence {
            user_id: entry.user_id,
            tenant_id: entry.tenant_id,
            remaining,
        }))
    }

    async fn presence_count(&self, tenant_id: &str) -> StoreResult<u64> {
        let mut inner = self.lock();
        inner.purge_expired();
        Ok(inner.live_count(tenant_id))
    }

    async fn presence_members(&self, tenant_id: &str) -> StoreResult<Vec<(String, String)>> {
        let mut inner = self.lock();
        inner.purge_expired();
        Ok(inner
            .sets
            .get(tenant_id)
            .map(|set| set.members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn active_tenants(&self) -> StoreResult<Vec<String>> {
        let mut inner = self.lock();
        inner.purge_expired();
        Ok(inner.index.iter().cloned().collect())
    }

    async fn ranking(&self, limit: usize) -> StoreResult<Vec<(String, u64)>> {
        let inner = self.lock();
        let mut entries: Vec<(String, u64)> = inner
            .ranking
            .iter()
            .map(|(tenant, count)| (tenant.clone(), *count))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn reverse_entries(&self) -> StoreResult<Vec<(String, ReverseEntry)>> {
        let inner = self.lock();
        Ok(inner
            .reverse
            .iter()
            .map(|(conn, entry)| (conn.clone(), entry.clone()))
            .collect())
    }

    async fn remove_reverse(&self, connection_id: &str) -> StoreResult<()> {
        self.lock().reverse.remove(connection_id);
        Ok(())
    }

    async fn prune_tenant(&self, tenant_id: &str) -> StoreResult<bool> {
        let mut inner = self.lock();
        inner.purge_expired();
        if inner.live_count(tenant_id) > 0 {
            return Ok(false);
        }
        let pruned =
            inner.index.remove(tenant_id) | inner.ranking.remove(tenant_id).is_some();
        Ok(pruned)
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> StoreResult<()> {
        // send() errs only when nobody subscribes — a normal outcome.
        let _ = self.pubsub.send(StoreMessage {
            channel: channel.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn subscribe(&self, patterns: &[String]) -> StoreResult<mpsc::Receiver<StoreMessage>> {
        let mut rx = self.pubsub.subscribe();
        let patterns = patterns.to_vec();
        let (tx, out) = mpsc::channel(PUBSUB_CAPACITY);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        if patterns.iter().any(|p| keys::channel_matches(p, &msg.channel))
                            && tx.send(msg).await.is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "memory pub/sub subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_is_idempotent_per_connection() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        assert_eq!(store.presence_add("acme", "u1", "cx_1", ttl).await.unwrap(), 1);
        assert_eq!(store.presence_add("acme", "u1", "cx_1", ttl).await.unwrap(), 1);
        assert_eq!(store.presence_add("acme", "u2", "cx_2", ttl).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn expiry_leaves_orphaned_reverse_entries() {
        let store = MemoryStore::new();
        store
            .presence_add("acme", "u1", "cx_1", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.presence_count("acme").await.unwrap(), 0);
        // The reverse entry survives expiry until the cleanup pass runs.
        assert_eq!(store.reverse_entries().await.unwrap().len(), 1);
        // Removing it afterwards still resolves the entry, with nothing left.
        let removed = store.presence_remove("cx_1").await.unwrap().unwrap();
        assert_eq!(removed.tenant_id, "acme");
        assert_eq!(removed.remaining, 0);
    }

    #[tokio::test]
    async fn remove_unknown_connection_is_noop() {
        let store = MemoryStore::new();
        assert!(store.presence_remove("cx_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ranking_orders_by_count() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.presence_add("acme", "u1", "cx_1", ttl).await.unwrap();
        store.presence_add("acme", "u2", "cx_2", ttl).await.unwrap();
        store.presence_add("globex", "u3", "cx_3", ttl).await.unwrap();

        let ranking = store.ranking(10).await.unwrap();
        assert_eq!(ranking[0], ("acme".to_string(), 2));
        assert_eq!(ranking[1], ("globex".to_string(), 1));
    }

    #[tokio::test]
    async fn pubsub_filters_by_pattern() {
        let store = MemoryStore::new();
        let mut rx = store
            .subscribe(&["events:tenants:*".to_string()])
            .await
            .unwrap();
        // Give the forwarding task a beat to subscribe before publishing.
        tokio::task::yield_now().await;

        store.publish("presence:updates", b"skip").await.unwrap();
        store
            .publish("events:tenants:acme", b"take")
            .await
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.channel, "events:tenants:acme");
        assert_eq!(msg.payload, b"take");
    }
}
