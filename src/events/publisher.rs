//! Event fanout publisher.
//!
//! Validates at the boundary, enriches (id, timestamp), and publishes each
//! event to its tenant channel and, unconditionally, the global channel so
//! elevated subscribers see everything without per-tenant subscriptions.
//! Pub/sub semantics: no delivery guarantee, no backlog, zero subscribers is
//! a normal outcome, and the caller never blocks on subscriber presence.

use std::sync::Arc;

use serde_json::Value;

use super::{
    ActorMeta, BillingPayload, CompliancePayload, ConnectionPayload, DealPayload, DomainEvent,
    EventPayload, EventType, MeetingPayload, PipelinePayload, PresenceUpdate, SystemPayload,
    SYSTEM_TENANT,
};
use crate::error::{PublishError, StoreError, StoreResult};
use crate::store::{keys, CoordinationStore};

pub struct EventPublisher {
    store: Arc<dyn CoordinationStore>,
}

impl EventPublisher {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Publish a validated event. Returns the enriched event so callers can
    /// log or echo it. Store failure is advisory for the caller's primary
    /// operation.
    pub async fn publish(
        &self,
        tenant_id: &str,
        event_type: EventType,
        payload: EventPayload,
        actor: Option<ActorMeta>,
    ) -> Result<DomainEvent, PublishError> {
        if let EventType::Unrecognized(raw) = &event_type {
            return Err(PublishError::UnknownType(raw.clone()));
        }
        if event_type.category() != payload.category() {
            return Err(PublishError::InvalidPayload {
                event_type: event_type.as_str().to_string(),
                reason: format!(
                    "payload category {} does not match {}",
                    payload.category().as_str(),
                    event_type.category().as_str()
                ),
            });
        }

        let event = DomainEvent::new(tenant_id, event_type, payload, actor);
        let bytes = encode(&event)?;
        self.store
            .publish(&keys::tenant_event_channel(tenant_id), &bytes)
            .await?;
        self.store.publish(keys::GLOBAL_EVENT_CHANNEL, &bytes).await?;

        tracing::debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            tenant_id = %event.tenant_id,
            "event published"
        );
        Ok(event)
    }

    /// Publish from raw caller input (the administrative surface): the type
    /// must be inside the closed enumeration and the payload must parse into
    /// that type's category — malformed input is rejected, never dropped.
    pub async fn publish_raw(
        &self,
        tenant_id: &str,
        raw_type: &str,
        data: Value,
        actor: Option<ActorMeta>,
    ) -> Result<DomainEvent, PublishError> {
        let event_type = EventType::parse(raw_type);
        if matches!(event_type, EventType::Unrecognized(_)) {
            return Err(PublishError::UnknownType(raw_type.to_string()));
        }
        let payload = EventPayload::for_type(&event_type, data).map_err(|reason| {
            PublishError::InvalidPayload {
                event_type: raw_type.to_string(),
                reason,
            }
        })?;
        self.publish(tenant_id, event_type, payload, actor).await
    }

    /// Platform-wide health/status signal. Bypasses tenant scoping entirely:
    /// global channel only.
    pub async fn publish_system(
        &self,
        kind: &str,
        status: &str,
        details: Option<Value>,
    ) -> Result<DomainEvent, PublishError> {
        let event = DomainEvent::new(
            SYSTEM_TENANT,
            EventType::SystemStatus,
            EventPayload::System(SystemPayload {
                kind: kind.to_string(),
                status: status.to_string(),
                details,
            }),
            None,
        );
        let bytes = encode(&event)?;
        self.store.publish(keys::GLOBAL_EVENT_CHANNEL, &bytes).await?;
        Ok(event)
    }

    /// Fan a presence delta out to every instance.
    pub async fn publish_presence(&self, update: &PresenceUpdate) -> StoreResult<()> {
        let bytes = serde_json::to_vec(update)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.store.publish(keys::PRESENCE_CHANNEL, &bytes).await
    }

    // --- Category wrappers: build the payload shape and delegate ---

    pub async fn connection_event(
        &self,
        tenant_id: &str,
        user_id: &str,
        connection_id: &str,
        online: u64,
        connected: bool,
    ) -> Result<DomainEvent, PublishError> {
        let event_type = if connected {
            EventType::UserConnected
        } else {
            EventType::UserDisconnected
        };
        self.publish(
            tenant_id,
            event_type,
            EventPayload::Connection(ConnectionPayload {
                user_id: user_id.to_string(),
                connection_id: connection_id.to_string(),
                online,
            }),
            None,
        )
        .await
    }

    pub async fn pipeline_progress(
        &self,
        tenant_id: &str,
        event_type: EventType,
        job_id: &str,
        stage: &str,
        progress: Option<f32>,
        error: Option<String>,
    ) -> Result<DomainEvent, PublishError> {
        self.publish(
            tenant_id,
            event_type,
            EventPayload::Pipeline(PipelinePayload {
                job_id: job_id.to_string(),
                stage: stage.to_string(),
                progress,
                error,
            }),
            None,
        )
        .await
    }

    pub async fn meeting_event(
        &self,
        tenant_id: &str,
        event_type: EventType,
        meeting_id: &str,
        title: Option<String>,
        actor: Option<ActorMeta>,
    ) -> Result<DomainEvent, PublishError> {
        self.publish(
            tenant_id,
            event_type,
            EventPayload::Meeting(MeetingPayload {
                meeting_id: meeting_id.to_string(),
                title,
            }),
            actor,
        )
        .await
    }

    pub async fn deal_stage_changed(
        &self,
        tenant_id: &str,
        deal_id: &str,
        stage: &str,
        amount_cents: Option<i64>,
        actor: Option<ActorMeta>,
    ) -> Result<DomainEvent, PublishError> {
        self.publish(
            tenant_id,
            EventType::DealStageChanged,
            EventPayload::Deal(DealPayload {
                deal_id: deal_id.to_string(),
                stage: stage.to_string(),
                amount_cents,
            }),
            actor,
        )
        .await
    }

    pub async fn billing_plan_changed(
        &self,
        tenant_id: &str,
        plan: &str,
        seats: Option<u32>,
        actor: Option<ActorMeta>,
    ) -> Result<DomainEvent, PublishError> {
        self.publish(
            tenant_id,
            EventType::BillingPlanChanged,
            EventPayload::Billing(BillingPayload {
                plan: plan.to_string(),
                seats,
            }),
            actor,
        )
        .await
    }

    pub async fn compliance_event(
        &self,
        tenant_id: &str,
        event_type: EventType,
        request_id: &str,
        kind: &str,
        status: &str,
    ) -> Result<DomainEvent, PublishError> {
        self.publish(
            tenant_id,
            event_type,
            EventPayload::Compliance(CompliancePayload {
                request_id: request_id.to_string(),
                kind: kind.to_string(),
                status: status.to_string(),
            }),
            None,
        )
        .await
    }
}

fn encode(event: &DomainEvent) -> Result<Vec<u8>, PublishError> {
    serde_json::to_vec(event).map_err(|e| PublishError::InvalidPayload {
        event_type: event.event_type.as_str().to_string(),
        reason: e.to_string(),
    })
}
