//! Distributed presence registry.
//!
//! The coordination store's per-tenant sets are the single source of truth
//! for "who is online", so any instance answers presence queries without
//! consulting the others. Per-tenant sets give tenant-scoped queries and
//! isolation; the TTL on each set bounds a crashed instance's stale presence
//! to one TTL window.
//!
//! The registry also mirrors its *own* registrations in process. The mirror
//! serves two jobs: the single-instance view when the store is unreachable
//! (degraded mode), and the worklist for the TTL refresh loop that re-asserts
//! local presence — which doubles as re-registration once a store outage
//! ends.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::store::{CoordinationStore, StoreHealth};

/// One locally-owned registration.
#[derive(Debug, Clone)]
pub struct LocalEntry {
    pub user_id: String,
    pub tenant_id: String,
    pub registered_at: DateTime<Utc>,
}

/// Result of unregistering a connection that was actually registered.
#[derive(Debug, Clone)]
pub struct Unregistered {
    pub user_id: String,
    pub tenant_id: String,
    /// Tenant live count after removal.
    pub remaining: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantRank {
    pub tenant_id: String,
    pub online: u64,
}

/// Liveness snapshot for the health surface.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub store_backend: &'static str,
    pub store_reachable: bool,
    /// True when running on a backend that cannot see other instances, or
    /// when the shared backend is currently unreachable.
    pub degraded: bool,
    /// Connections owned by this instance.
    pub local_connections: usize,
    /// Tenants with at least one connection (cluster-wide when reachable,
    /// local view otherwise).
    pub tenant_count: usize,
}

pub struct PresenceRegistry {
    store: Arc<dyn CoordinationStore>,
    store_health: Arc<StoreHealth>,
    ttl: Duration,
    local: DashMap<String, LocalEntry>,
}

impl PresenceRegistry {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        store_health: Arc<StoreHealth>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            store_health,
            ttl,
            local: DashMap::new(),
        }
    }

    pub fn presence_ttl(&self) -> Duration {
        self.ttl
    }

    /// Register a connection: one atomic store batch, then the local mirror.
    /// Returns the tenant's live count after the add. A store failure
    /// degrades to the local view instead of failing the connection.
    pub async fn register(&self, user_id: &str, tenant_id: &str, connection_id: &str) -> u64 {
        self.local.insert(
            connection_id.to_string(),
            LocalEntry {
                user_id: user_id.to_string(),
                tenant_id: tenant_id.to_string(),
                registered_at: Utc::now(),
            },
        );

        match self
            .store
            .presence_add(tenant_id, user_id, connection_id, self.ttl)
            .await
        {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    connection_id = %connection_id,
                    error = %err,
                    "presence register failed, falling back to local view"
                );
                self.local_tenant_count(tenant_id)
            }
        }
    }

    /// Unregister a connection. Idempotent: a second call for the same id, or
    /// a call after the entry already expired, is a no-op returning `None`.
    pub async fn unregister(&self, connection_id: &str) -> Option<Unregistered> {
        let local = self.local.remove(connection_id).map(|(_, entry)| entry);

        match self.store.presence_remove(connection_id).await {
            Ok(Some(removed)) => Some(Unregistered {
                user_id: removed.user_id,
                tenant_id: removed.tenant_id,
                remaining: removed.remaining,
            }),
            Ok(None) => {
                // Already expired or cleaned up in the store. If we owned it
                // locally, the disconnect still happened here.
                local.map(|entry| {
                    let remaining = self.local_tenant_count(&entry.tenant_id);
                    Unregistered {
                        user_id: entry.user_id,
                        tenant_id: entry.tenant_id,
                        remaining,
                    }
                })
            }
            Err(err) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %err,
                    "presence unregister failed, falling back to local view"
                );
                local.map(|entry| {
                    let remaining = self.local_tenant_count(&entry.tenant_id);
                    Unregistered {
                        user_id: entry.user_id,
                        tenant_id: entry.tenant_id,
                        remaining,
                    }
                })
            }
        }
    }

    /// Authoritative live count for one tenant (never the ranking cache).
    pub async fn tenant_count(&self, tenant_id: &str) -> u64 {
        match self.store.presence_count(tenant_id).await {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!(tenant_id = %tenant_id, error = %err, "tenant count degraded to local view");
                self.local_tenant_count(tenant_id)
            }
        }
    }

    /// Global count: the sum of live per-tenant cardinalities. Deliberately
    /// not the ranking cache, which can hold stale scores under churn.
    pub async fn global_count(&self) -> u64 {
        match self.store.active_tenants().await {
            Ok(tenants) => {
                let mut total = 0;
                for tenant in tenants {
                    total += self.tenant_count(&tenant).await;
                }
                total
            }
            Err(err) => {
                tracing::warn!(error = %err, "global count degraded to local view");
                self.local.len() as u64
            }
        }
    }

    /// Top tenants by online users. Served from the ranking cache —
    /// best-effort and eventually consistent, reconcilable from the
    /// authoritative sets at any time.
    pub async fn ranking(&self, limit: usize) -> Vec<TenantRank> {
        match self.store.ranking(limit).await {
            Ok(entries) => entries
                .into_iter()
                .map(|(tenant_id, online)| TenantRank { tenant_id, online })
                .collect(),
            Err(err) => {
                tracing::warn!(error = %err, "ranking degraded to local view");
                let mut counts = std::collections::HashMap::new();
                for entry in self.local.iter() {
                    *counts.entry(entry.tenant_id.clone()).or_insert(0u64) += 1;
                }
                let mut ranks: Vec<TenantRank> = counts
                    .into_iter()
                    .map(|(tenant_id, online)| TenantRank { tenant_id, online })
                    .collect();
                ranks.sort_by(|a, b| b.online.cmp(&a.online).then_with(|| a.tenant_id.cmp(&b.tenant_id)));
                ranks.truncate(limit);
                ranks
            }
        }
    }

    /// Distinct user ids with at least one live connection in the tenant.
    pub async fn tenant_users(&self, tenant_id: &str) -> Vec<String> {
        let members = match self.store.presence_members(tenant_id).await {
            Ok(members) => members,
            Err(err) => {
                tracing::warn!(tenant_id = %tenant_id, error = %err, "tenant users degraded to local view");
                self.local
                    .iter()
                    .filter(|entry| entry.tenant_id == tenant_id)
                    .map(|entry| (entry.user_id.clone(), entry.key().clone()))
                    .collect()
            }
        };
        let mut users: HashSet<String> = HashSet::new();
        for (user_id, _) in members {
            users.insert(user_id);
        }
        let mut users: Vec<String> = users.into_iter().collect();
        users.sort();
        users
    }

    pub async fn is_user_online(&self, user_id: &str, tenant_id: &str) -> bool {
        self.tenant_users(tenant_id).await.iter().any(|u| u == user_id)
    }

    /// Remove reverse mappings whose tenant set has expired or vanished, and
    /// prune empty tenants from the index and ranking. Expiry is the real
    /// crash backstop; this pass is hygiene so the reverse map cannot grow
    /// without bound after crashes. Returns the number of mappings removed.
    pub async fn cleanup_orphans(&self) -> u64 {
        let entries = match self.store.reverse_entries().await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(error = %err, "orphan cleanup skipped, store unreachable");
                return 0;
            }
        };

        let mut dead_tenants: HashSet<String> = HashSet::new();
        let mut checked: HashSet<String> = HashSet::new();
        let mut removed = 0;

        for (connection_id, entry) in entries {
            if checked.insert(entry.tenant_id.clone()) {
                match self.store.presence_count(&entry.tenant_id).await {
                    Ok(0) => {
                        dead_tenants.insert(entry.tenant_id.clone());
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "orphan cleanup aborted mid-pass");
                        return removed;
                    }
                }
            }
            if dead_tenants.contains(&entry.tenant_id)
                && self.store.remove_reverse(&connection_id).await.is_ok()
            {
                removed += 1;
            }
        }

        for tenant in &dead_tenants {
            if let Err(err) = self.store.prune_tenant(tenant).await {
                tracing::warn!(tenant_id = %tenant, error = %err, "tenant prune failed");
            }
        }

        // Index entries can outlive their set after a crash even when no
        // reverse mapping points at them any more.
        if let Ok(tenants) = self.store.active_tenants().await {
            for tenant in tenants {
                if checked.contains(&tenant) || dead_tenants.contains(&tenant) {
                    continue;
                }
                if let Ok(0) = self.store.presence_count(&tenant).await {
                    let _ = self.store.prune_tenant(&tenant).await;
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed, "orphaned presence mappings cleaned up");
        }
        removed
    }

    /// Re-assert every locally-owned registration, refreshing the tenant-set
    /// TTL. Keeps long-lived quiet tenants alive and restores this instance's
    /// entries after a store outage.
    pub async fn refresh_local(&self) {
        // Snapshot first: holding a map guard across store awaits would block
        // concurrent registrations on the same shard.
        let entries: Vec<(String, LocalEntry)> = self
            .local
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (connection_id, entry) in entries {
            if let Err(err) = self
                .store
                .presence_add(&entry.tenant_id, &entry.user_id, &connection_id, self.ttl)
                .await
            {
                tracing::debug!(
                    connection_id = %connection_id,
                    error = %err,
                    "presence refresh failed"
                );
                // Store down: the rest of the pass would fail the same way.
                return;
            }
        }
    }

    pub async fn health(&self) -> HealthReport {
        let reachable = self.store_health.is_reachable();
        let clustered = self.store.is_clustered();
        let tenant_count = match self.store.active_tenants().await {
            Ok(tenants) => tenants.len(),
            Err(_) => self.local_tenants().len(),
        };
        HealthReport {
            store_backend: self.store.backend(),
            store_reachable: reachable,
            degraded: !clustered || !reachable,
            local_connections: self.local.len(),
            tenant_count,
        }
    }

    fn local_tenant_count(&self, tenant_id: &str) -> u64 {
        self.local
            .iter()
            .filter(|entry| entry.tenant_id == tenant_id)
            .count() as u64
    }

    fn local_tenants(&self) -> HashSet<String> {
        self.local
            .iter()
            .map(|entry| entry.tenant_id.clone())
            .collect()
    }
}
