//! Domain event model.
//!
//! Events are immutable once published: the publisher assigns the id and
//! timestamp, then the envelope travels the tenant channel and the global
//! channel as JSON. Types form a closed enumeration and payloads are typed
//! per category; anything outside the enumeration maps to an explicit
//! `Unrecognized` variant rather than passing through untyped.

pub mod publisher;
pub mod routes;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Tenant-id sentinel for platform-wide events that belong to no tenant.
pub const SYSTEM_TENANT: &str = "_system";

/// Closed enumeration of domain event types. Wire names are `scope:action`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    UserConnected,
    UserDisconnected,
    UserLoggedIn,
    MeetingStarted,
    MeetingEnded,
    TranscriptReady,
    PipelineStageStarted,
    PipelineStageCompleted,
    PipelineFailed,
    DealStageChanged,
    BillingPlanChanged,
    GdprRequestFiled,
    GdprRequestClosed,
    SystemStatus,
    /// A type outside the enumeration, preserved verbatim. Never produced by
    /// internal publishers; only decoded from legacy or foreign envelopes.
    Unrecognized(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::UserConnected => "user:connected",
            Self::UserDisconnected => "user:disconnected",
            Self::UserLoggedIn => "user:logged-in",
            Self::MeetingStarted => "meeting:started",
            Self::MeetingEnded => "meeting:ended",
            Self::TranscriptReady => "meeting:transcript-ready",
            Self::PipelineStageStarted => "pipeline:stage-started",
            Self::PipelineStageCompleted => "pipeline:stage-completed",
            Self::PipelineFailed => "pipeline:failed",
            Self::DealStageChanged => "deal:stage-changed",
            Self::BillingPlanChanged => "billing:plan-changed",
            Self::GdprRequestFiled => "gdpr:request-filed",
            Self::GdprRequestClosed => "gdpr:request-closed",
            Self::SystemStatus => "system:status",
            Self::Unrecognized(raw) => raw,
        }
    }

    /// Parse a wire name. Unknown names land on `Unrecognized`; callers that
    /// must enforce the closed enumeration check for it explicitly.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "user:connected" => Self::UserConnected,
            "user:disconnected" => Self::UserDisconnected,
            "user:logged-in" => Self::UserLoggedIn,
            "meeting:started" => Self::MeetingStarted,
            "meeting:ended" => Self::MeetingEnded,
            "meeting:transcript-ready" => Self::TranscriptReady,
            "pipeline:stage-started" => Self::PipelineStageStarted,
            "pipeline:stage-completed" => Self::PipelineStageCompleted,
            "pipeline:failed" => Self::PipelineFailed,
            "deal:stage-changed" => Self::DealStageChanged,
            "billing:plan-changed" => Self::BillingPlanChanged,
            "gdpr:request-filed" => Self::GdprRequestFiled,
            "gdpr:request-closed" => Self::GdprRequestClosed,
            "system:status" => Self::SystemStatus,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// The payload category this type requires.
    pub fn category(&self) -> EventCategory {
        match self {
            Self::UserConnected | Self::UserDisconnected => EventCategory::Connection,
            Self::UserLoggedIn => EventCategory::Session,
            Self::MeetingStarted | Self::MeetingEnded | Self::TranscriptReady => {
                EventCategory::Meeting
            }
            Self::PipelineStageStarted | Self::PipelineStageCompleted | Self::PipelineFailed => {
                EventCategory::Pipeline
            }
            Self::DealStageChanged => EventCategory::Deal,
            Self::BillingPlanChanged => EventCategory::Billing,
            Self::GdprRequestFiled | Self::GdprRequestClosed => EventCategory::Compliance,
            Self::SystemStatus => EventCategory::System,
            Self::Unrecognized(_) => EventCategory::Unrecognized,
        }
    }
}

impl From<String> for EventType {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        event_type.as_str().to_string()
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    Connection,
    Session,
    Meeting,
    Pipeline,
    Deal,
    Billing,
    Compliance,
    System,
    Unrecognized,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Session => "session",
            Self::Meeting => "meeting",
            Self::Pipeline => "pipeline",
            Self::Deal => "deal",
            Self::Billing => "billing",
            Self::Compliance => "compliance",
            Self::System => "system",
            Self::Unrecognized => "unrecognized",
        }
    }
}

// --- Typed payloads per category ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionPayload {
    pub user_id: String,
    pub connection_id: String,
    /// Tenant live count observed when the event was produced.
    pub online: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPayload {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingPayload {
    pub meeting_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelinePayload {
    pub job_id: String,
    pub stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealPayload {
    pub deal_id: String,
    pub stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_cents: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingPayload {
    pub plan: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seats: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompliancePayload {
    pub request_id: String,
    pub kind: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemPayload {
    pub kind: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Event payload: one typed variant per category. Serialized adjacently
/// tagged (`category` + `data`); decoding anything that does not match a
/// known category falls back to `Unrecognized` with the raw value preserved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "category", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Connection(ConnectionPayload),
    Session(SessionPayload),
    Meeting(MeetingPayload),
    Pipeline(PipelinePayload),
    Deal(DealPayload),
    Billing(BillingPayload),
    Compliance(CompliancePayload),
    System(SystemPayload),
    Unrecognized(Value),
}

impl EventPayload {
    pub fn category(&self) -> EventCategory {
        match self {
            Self::Connection(_) => EventCategory::Connection,
            Self::Session(_) => EventCategory::Session,
            Self::Meeting(_) => EventCategory::Meeting,
            Self::Pipeline(_) => EventCategory::Pipeline,
            Self::Deal(_) => EventCategory::Deal,
            Self::Billing(_) => EventCategory::Billing,
            Self::Compliance(_) => EventCategory::Compliance,
            Self::System(_) => EventCategory::System,
            Self::Unrecognized(_) => EventCategory::Unrecognized,
        }
    }

    /// Decode a value, mapping anything unrecognizable to the explicit
    /// fallback variant instead of failing.
    pub fn from_value(value: Value) -> Self {
        #[derive(Deserialize)]
        struct Tagged {
            category: String,
            #[serde(default)]
            data: Value,
        }

        let Ok(tagged) = serde_json::from_value::<Tagged>(value.clone()) else {
            return Self::Unrecognized(value);
        };
        let parsed = match tagged.category.as_str() {
            "unrecognized" => return Self::Unrecognized(tagged.data),
            "connection" => serde_json::from_value(tagged.data).map(Self::Connection),
            "session" => serde_json::from_value(tagged.data).map(Self::Session),
            "meeting" => serde_json::from_value(tagged.data).map(Self::Meeting),
            "pipeline" => serde_json::from_value(tagged.data).map(Self::Pipeline),
            "deal" => serde_json::from_value(tagged.data).map(Self::Deal),
            "billing" => serde_json::from_value(tagged.data).map(Self::Billing),
            "compliance" => serde_json::from_value(tagged.data).map(Self::Compliance),
            "system" => serde_json::from_value(tagged.data).map(Self::System),
            _ => return Self::Unrecognized(value),
        };
        parsed.unwrap_or(Self::Unrecognized(value))
    }

    /// Parse a caller-supplied raw payload against the category an event type
    /// requires. This is the publish-boundary validation: a mismatch is an
    /// error, never a silent drop.
    pub fn for_type(event_type: &EventType, data: Value) -> Result<Self, String> {
        let result = match event_type.category() {
            EventCategory::Connection => serde_json::from_value(data).map(Self::Connection),
            EventCategory::Session => serde_json::from_value(data).map(Self::Session),
            EventCategory::Meeting => serde_json::from_value(data).map(Self::Meeting),
            EventCategory::Pipeline => serde_json::from_value(data).map(Self::Pipeline),
            EventCategory::Deal => serde_json::from_value(data).map(Self::Deal),
            EventCategory::Billing => serde_json::from_value(data).map(Self::Billing),
            EventCategory::Compliance => serde_json::from_value(data).map(Self::Compliance),
            EventCategory::System => serde_json::from_value(data).map(Self::System),
            EventCategory::Unrecognized => {
                return Err(format!("type {} is not publishable", event_type))
            }
        };
        result.map_err(|e| e.to_string())
    }
}

impl<'de> Deserialize<'de> for EventPayload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(value))
    }
}

/// Who caused an event, when known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorMeta {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// A domain event, immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Tenant id, or [`SYSTEM_TENANT`] for platform-wide events.
    pub tenant_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<ActorMeta>,
}

impl DomainEvent {
    /// Enrich and seal an event: UUIDv7 id (time-ordered, so ids double as an
    /// ordering hint) and a UTC timestamp.
    pub fn new(
        tenant_id: &str,
        event_type: EventType,
        payload: EventPayload,
        actor: Option<ActorMeta>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type,
            tenant_id: tenant_id.to_string(),
            timestamp: Utc::now(),
            payload,
            actor,
        }
    }

    pub fn is_system(&self) -> bool {
        self.tenant_id == SYSTEM_TENANT
    }
}

/// Presence delta fanned out on the presence channel whenever a connection
/// registers or unregisters anywhere in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub tenant_id: String,
    pub user_id: String,
    pub connection_id: String,
    /// Tenant live count after the change.
    pub online: u64,
    pub joined: bool,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_type_round_trip() {
        for raw in ["meeting:started", "user:connected", "system:status"] {
            assert_eq!(EventType::parse(raw).as_str(), raw);
        }
    }

    #[test]
    fn unknown_type_is_preserved() {
        let parsed = EventType::parse("legacy:thing");
        assert_eq!(parsed, EventType::Unrecognized("legacy:thing".into()));
        assert_eq!(parsed.as_str(), "legacy:thing");
    }

    #[test]
    fn payload_decodes_known_category() {
        let value = json!({"category": "meeting", "data": {"meeting_id": "m-1", "title": "Kickoff"}});
        match EventPayload::from_value(value) {
            EventPayload::Meeting(m) => {
                assert_eq!(m.meeting_id, "m-1");
                assert_eq!(m.title.as_deref(), Some("Kickoff"));
            }
            other => panic!("expected meeting payload, got {other:?}"),
        }
    }

    #[test]
    fn payload_falls_back_to_unrecognized() {
        let value = json!({"category": "telepathy", "data": {"x": 1}});
        match EventPayload::from_value(value.clone()) {
            EventPayload::Unrecognized(raw) => assert_eq!(raw, value),
            other => panic!("expected unrecognized payload, got {other:?}"),
        }
    }

    #[test]
    fn boundary_validation_rejects_shape_mismatch() {
        let err = EventPayload::for_type(&EventType::MeetingStarted, json!({"deal_id": "d-1"}));
        assert!(err.is_err());
    }

    #[test]
    fn events_get_unique_ids_and_timestamps() {
        let a = DomainEvent::new(
            "acme",
            EventType::MeetingStarted,
            EventPayload::Meeting(MeetingPayload {
                meeting_id: "m-1".into(),
                title: None,
            }),
            None,
        );
        let b = DomainEvent::new(
            "acme",
            EventType::MeetingEnded,
            EventPayload::Meeting(MeetingPayload {
                meeting_id: "m-1".into(),
                title: None,
            }),
            None,
        );
        assert_ne!(a.id, b.id);
        assert!(a.timestamp <= b.timestamp);
    }

    #[test]
    fn event_serializes_with_wire_type_name() {
        let event = DomainEvent::new(
            "acme",
            EventType::DealStageChanged,
            EventPayload::Deal(DealPayload {
                deal_id: "d-7".into(),
                stage: "negotiation".into(),
                amount_cents: Some(120_000),
            }),
            Some(ActorMeta {
                user_id: "u-1".into(),
                session_id: None,
                source: Some("crm".into()),
            }),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "deal:stage-changed");
        assert_eq!(value["payload"]["category"], "deal");
        let back: DomainEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }
}
