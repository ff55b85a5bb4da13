//! Integration tests for the presence registry: counts, idempotence,
//! orphan cleanup, TTL refresh, and degraded-mode reporting.

use std::sync::Arc;
use std::time::Duration;

use pulse_gateway::presence::PresenceRegistry;
use pulse_gateway::store::memory::MemoryStore;
use pulse_gateway::store::{CoordinationStore, StoreHealth};

fn registry_with_ttl(ttl: Duration) -> (Arc<PresenceRegistry>, Arc<dyn CoordinationStore>) {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let health = Arc::new(StoreHealth::new(true));
    let registry = Arc::new(PresenceRegistry::new(store.clone(), health, ttl));
    (registry, store)
}

fn registry() -> (Arc<PresenceRegistry>, Arc<dyn CoordinationStore>) {
    registry_with_ttl(Duration::from_secs(60))
}

#[tokio::test]
async fn tenant_count_follows_register_unregister_sequence() {
    let (registry, _) = registry();

    assert_eq!(registry.register("alice", "acme", "cx_a").await, 1);
    assert_eq!(registry.register("bob", "acme", "cx_b").await, 2);
    assert_eq!(registry.tenant_count("acme").await, 2);

    let removed = registry.unregister("cx_a").await.expect("was registered");
    assert_eq!(removed.user_id, "alice");
    assert_eq!(removed.tenant_id, "acme");
    assert_eq!(removed.remaining, 1);
    assert_eq!(registry.tenant_count("acme").await, 1);

    registry.unregister("cx_b").await.expect("was registered");
    assert_eq!(registry.tenant_count("acme").await, 0);
}

#[tokio::test]
async fn unregister_twice_is_a_noop_the_second_time() {
    let (registry, _) = registry();
    registry.register("alice", "acme", "cx_a").await;

    assert!(registry.unregister("cx_a").await.is_some());
    assert!(registry.unregister("cx_a").await.is_none());
    assert_eq!(registry.tenant_count("acme").await, 0);
}

#[tokio::test]
async fn concurrent_registrations_never_lose_counts() {
    let (registry, _) = registry();

    let mut handles = Vec::new();
    for i in 0..32 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            let user = format!("user-{i}");
            let conn = format!("cx_{i}");
            let tenant = if i % 2 == 0 { "acme" } else { "globex" };
            registry.register(&user, tenant, &conn).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(registry.tenant_count("acme").await, 16);
    assert_eq!(registry.tenant_count("globex").await, 16);
    assert_eq!(registry.global_count().await, 32);
}

#[tokio::test]
async fn global_count_sums_live_tenant_counts() {
    let (registry, _) = registry();
    registry.register("alice", "acme", "cx_a").await;
    registry.register("bob", "acme", "cx_b").await;
    registry.register("carol", "globex", "cx_c").await;

    assert_eq!(registry.global_count().await, 3);

    registry.unregister("cx_b").await;
    assert_eq!(registry.global_count().await, 2);

    // A user with connections in two tenants counts once per tenant set.
    registry.register("alice", "globex", "cx_d").await;
    assert_eq!(registry.global_count().await, 3);
}

#[tokio::test]
async fn ranking_tracks_observed_cardinalities() {
    let (registry, _) = registry();
    registry.register("a", "acme", "cx_1").await;
    registry.register("b", "acme", "cx_2").await;
    registry.register("c", "acme", "cx_3").await;
    registry.register("d", "globex", "cx_4").await;

    let ranking = registry.ranking(10).await;
    assert_eq!(ranking[0].tenant_id, "acme");
    assert_eq!(ranking[0].online, 3);
    assert_eq!(ranking[1].tenant_id, "globex");
    assert_eq!(ranking[1].online, 1);

    // Unregistering writes the freshly observed cardinality, not a blind
    // decrement.
    registry.unregister("cx_2").await;
    registry.unregister("cx_3").await;
    let ranking = registry.ranking(10).await;
    assert_eq!(ranking[0].online, 1);

    let ranking = registry.ranking(1).await;
    assert_eq!(ranking.len(), 1);
}

#[tokio::test]
async fn tenant_users_deduplicates_multi_connection_users() {
    let (registry, _) = registry();
    registry.register("alice", "acme", "cx_1").await;
    registry.register("alice", "acme", "cx_2").await;
    registry.register("bob", "acme", "cx_3").await;

    let users = registry.tenant_users("acme").await;
    assert_eq!(users, vec!["alice".to_string(), "bob".to_string()]);

    assert!(registry.is_user_online("alice", "acme").await);
    assert!(!registry.is_user_online("alice", "globex").await);

    // Closing one of alice's two connections keeps her online.
    registry.unregister("cx_1").await;
    assert!(registry.is_user_online("alice", "acme").await);
}

#[tokio::test]
async fn cleanup_removes_mappings_whose_tenant_set_expired() {
    let (registry, store) = registry_with_ttl(Duration::from_millis(20));
    registry.register("alice", "acme", "cx_a").await;
    registry.register("bob", "acme", "cx_b").await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(registry.tenant_count("acme").await, 0);
    assert_eq!(store.reverse_entries().await.unwrap().len(), 2);

    let removed = registry.cleanup_orphans().await;
    assert_eq!(removed, 2);
    assert!(store.reverse_entries().await.unwrap().is_empty());
    assert!(store.active_tenants().await.unwrap().is_empty());
}

#[tokio::test]
async fn cleanup_leaves_live_tenants_alone() {
    let (registry, store) = registry();
    registry.register("alice", "acme", "cx_a").await;

    assert_eq!(registry.cleanup_orphans().await, 0);
    assert_eq!(store.reverse_entries().await.unwrap().len(), 1);
    assert_eq!(registry.tenant_count("acme").await, 1);
}

#[tokio::test]
async fn refresh_keeps_quiet_tenants_alive_past_the_ttl() {
    let (registry, _) = registry_with_ttl(Duration::from_millis(200));
    registry.register("alice", "acme", "cx_a").await;

    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        registry.refresh_local().await;
    }

    // Four 100ms sleeps exceed the 200ms TTL; the refreshes kept it alive.
    assert_eq!(registry.tenant_count("acme").await, 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(registry.tenant_count("acme").await, 0);
}

#[tokio::test]
async fn health_reports_single_instance_backend_as_degraded() {
    let (registry, _) = registry();
    registry.register("alice", "acme", "cx_a").await;

    let health = registry.health().await;
    assert_eq!(health.store_backend, "memory");
    assert!(health.store_reachable);
    assert!(health.degraded);
    assert_eq!(health.local_connections, 1);
    assert_eq!(health.tenant_count, 1);
}
