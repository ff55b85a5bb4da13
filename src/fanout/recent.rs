//! Best-effort cache of the most recent events per tenant.
//!
//! Feeds the snapshot command so a (re)connecting client has context before
//! its first delta. In-process only, bounded, no durability.

use std::collections::VecDeque;

use dashmap::DashMap;

use crate::events::DomainEvent;

pub struct RecentEvents {
    per_tenant: DashMap<String, VecDeque<DomainEvent>>,
    capacity: usize,
}

impl RecentEvents {
    pub fn new(capacity: usize) -> Self {
        Self {
            per_tenant: DashMap::new(),
            capacity,
        }
    }

    pub fn push(&self, tenant_id: &str, event: DomainEvent) {
        if self.capacity == 0 {
            return;
        }
        let mut buffer = self.per_tenant.entry(tenant_id.to_string()).or_default();
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(event);
    }

    /// Most recent events for a tenant, oldest first.
    pub fn for_tenant(&self, tenant_id: &str) -> Vec<DomainEvent> {
        self.per_tenant
            .get(tenant_id)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventPayload, EventType, MeetingPayload};

    fn event(n: u32) -> DomainEvent {
        DomainEvent::new(
            "acme",
            EventType::MeetingStarted,
            EventPayload::Meeting(MeetingPayload {
                meeting_id: format!("m-{n}"),
                title: None,
            }),
            None,
        )
    }

    #[test]
    fn keeps_at_most_capacity_events() {
        let recent = RecentEvents::new(3);
        for n in 0..5 {
            recent.push("acme", event(n));
        }
        let events = recent.for_tenant("acme");
        assert_eq!(events.len(), 3);
        match &events[0].payload {
            EventPayload::Meeting(m) => assert_eq!(m.meeting_id, "m-2"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn tenants_are_isolated() {
        let recent = RecentEvents::new(3);
        recent.push("acme", event(1));
        assert!(recent.for_tenant("globex").is_empty());
    }
}
