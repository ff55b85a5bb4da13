//! Integration tests for event fanout: tenant/global channel isolation, the
//! distribution adapter's room routing, the recent-events cache, and the
//! stats broadcast loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use pulse_gateway::error::PublishError;
use pulse_gateway::events::publisher::EventPublisher;
use pulse_gateway::events::{EventPayload, EventType, MeetingPayload, PresenceUpdate};
use pulse_gateway::fanout::adapter::run_adapter;
use pulse_gateway::fanout::recent::RecentEvents;
use pulse_gateway::fanout::stats::run_stats_loop;
use pulse_gateway::presence::PresenceRegistry;
use pulse_gateway::store::memory::MemoryStore;
use pulse_gateway::store::{CoordinationStore, StoreHealth};
use pulse_gateway::ws::rooms::{LocalConnection, RoomRegistry};

struct Harness {
    store: Arc<dyn CoordinationStore>,
    rooms: Arc<RoomRegistry>,
    recent: Arc<RecentEvents>,
    publisher: EventPublisher,
    _cancel: CancellationToken,
}

async fn harness() -> Harness {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let rooms = Arc::new(RoomRegistry::new());
    let recent = Arc::new(RecentEvents::new(10));
    let cancel = CancellationToken::new();
    tokio::spawn(run_adapter(
        store.clone(),
        rooms.clone(),
        recent.clone(),
        cancel.child_token(),
    ));
    // Let the adapter establish its subscription before anything publishes.
    tokio::time::sleep(Duration::from_millis(50)).await;

    Harness {
        publisher: EventPublisher::new(store.clone()),
        store,
        rooms,
        recent,
        _cancel: cancel,
    }
}

fn join(
    rooms: &RoomRegistry,
    connection_id: &str,
    user_id: &str,
    tenant_id: &str,
    elevated: bool,
) -> mpsc::UnboundedReceiver<Message> {
    let (tx, rx) = mpsc::unbounded_channel();
    rooms.join(LocalConnection::new(
        connection_id.to_string(),
        user_id.to_string(),
        tenant_id.to_string(),
        elevated,
        tx,
    ));
    rx
}

/// Wait for the next message with the given `op`, skipping others.
async fn next_op(rx: &mut mpsc::UnboundedReceiver<Message>, op: &str) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("connection channel closed");
        if let Message::Text(text) = msg {
            let value: Value = serde_json::from_str(&text).unwrap();
            if value["op"] == op {
                return value;
            }
        }
    }
}

fn assert_silent(rx: &mut mpsc::UnboundedReceiver<Message>) {
    assert!(
        rx.try_recv().is_err(),
        "expected no message, but one was delivered"
    );
}

#[tokio::test]
async fn tenant_event_respects_room_isolation() {
    let h = harness().await;
    let mut acme = join(&h.rooms, "cx_1", "alice", "acme", false);
    let mut globex = join(&h.rooms, "cx_2", "bob", "globex", false);
    let mut watcher = join(&h.rooms, "cx_3", "root", "globex", true);

    h.publisher
        .meeting_event(
            "acme",
            EventType::MeetingStarted,
            "m-1",
            Some("Kickoff".into()),
            None,
        )
        .await
        .unwrap();

    let seen = next_op(&mut acme, "event").await;
    assert_eq!(seen["event"]["type"], "meeting:started");
    assert_eq!(seen["event"]["tenant_id"], "acme");

    // The elevated watcher sees it through the global room even though it
    // belongs to another tenant.
    let seen = next_op(&mut watcher, "event").await;
    assert_eq!(seen["event"]["tenant_id"], "acme");

    // A plain connection in another tenant's room sees nothing.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_silent(&mut globex);
}

#[tokio::test]
async fn presence_delta_is_routed_to_the_tenant_room() {
    let h = harness().await;
    let mut acme = join(&h.rooms, "cx_1", "alice", "acme", false);
    let mut globex = join(&h.rooms, "cx_2", "bob", "globex", false);

    h.publisher
        .publish_presence(&PresenceUpdate {
            tenant_id: "acme".into(),
            user_id: "carol".into(),
            connection_id: "cx_9".into(),
            online: 3,
            joined: true,
            timestamp: Utc::now(),
        })
        .await
        .unwrap();

    let seen = next_op(&mut acme, "presence").await;
    assert_eq!(seen["user_id"], "carol");
    assert_eq!(seen["online"], 3);
    assert_eq!(seen["joined"], true);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_silent(&mut globex);
}

#[tokio::test]
async fn system_events_reach_only_the_global_room() {
    let h = harness().await;
    let mut acme = join(&h.rooms, "cx_1", "alice", "acme", false);
    let mut watcher = join(&h.rooms, "cx_2", "root", "ops", true);

    h.publisher
        .publish_system("maintenance", "scheduled", Some(json!({"window": "22:00Z"})))
        .await
        .unwrap();

    let seen = next_op(&mut watcher, "event").await;
    assert_eq!(seen["event"]["type"], "system:status");
    assert_eq!(seen["event"]["tenant_id"], "_system");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_silent(&mut acme);
}

#[tokio::test]
async fn recent_cache_holds_tenant_events_for_snapshots() {
    let h = harness().await;

    h.publisher
        .meeting_event("acme", EventType::MeetingStarted, "m-1", None, None)
        .await
        .unwrap();
    h.publisher
        .meeting_event("acme", EventType::MeetingEnded, "m-1", None, None)
        .await
        .unwrap();
    h.publisher
        .meeting_event("globex", EventType::MeetingStarted, "m-2", None, None)
        .await
        .unwrap();

    // The cache fills as the adapter processes deliveries.
    let mut events = Vec::new();
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        events = h.recent.for_tenant("acme");
        if events.len() == 2 {
            break;
        }
    }
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, EventType::MeetingStarted);
    assert_eq!(events[1].event_type, EventType::MeetingEnded);
    assert_eq!(h.recent.for_tenant("globex").len(), 1);
}

#[tokio::test]
async fn publish_boundary_rejects_unknown_types_and_bad_payloads() {
    let h = harness().await;

    let err = h
        .publisher
        .publish_raw("acme", "meeting:exploded", json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::UnknownType(_)));

    let err = h
        .publisher
        .publish_raw("acme", "meeting:started", json!({"deal_id": "d-1"}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::InvalidPayload { .. }));

    // Category/type mismatch is caught even for typed payloads.
    let err = h
        .publisher
        .publish(
            "acme",
            EventType::DealStageChanged,
            EventPayload::Meeting(MeetingPayload {
                meeting_id: "m-1".into(),
                title: None,
            }),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::InvalidPayload { .. }));
}

#[tokio::test]
async fn publishing_with_zero_subscribers_succeeds() {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let publisher = EventPublisher::new(store);

    // No adapter, no rooms, nobody listening.
    publisher
        .meeting_event("acme", EventType::MeetingStarted, "m-1", None, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn stats_loop_feeds_the_global_room() {
    let h = harness().await;
    let registry = Arc::new(PresenceRegistry::new(
        h.store.clone(),
        Arc::new(StoreHealth::new(true)),
        Duration::from_secs(60),
    ));
    registry.register("alice", "acme", "cx_a").await;
    registry.register("bob", "acme", "cx_b").await;
    registry.register("carol", "globex", "cx_c").await;

    let cancel = CancellationToken::new();
    tokio::spawn(run_stats_loop(
        registry.clone(),
        h.rooms.clone(),
        Duration::from_millis(50),
        10,
        cancel.child_token(),
    ));

    let mut watcher = join(&h.rooms, "cx_w", "root", "ops", true);
    let seen = next_op(&mut watcher, "stats").await;
    assert_eq!(seen["global"], 3);
    assert_eq!(seen["tenants"][0]["tenant_id"], "acme");
    assert_eq!(seen["tenants"][0]["online"], 2);
    // The in-memory backend is single-instance by definition.
    assert_eq!(seen["degraded"], true);
    cancel.cancel();
}
