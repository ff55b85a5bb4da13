//! Key and channel naming for the coordination store.
//!
//! Every name is a pure function of tenant id (plus fixed constants), so any
//! instance can compute the key or channel to read, publish, or subscribe to
//! without coordinating with other instances.
//!
//! # Namespace (v1)
//!
//! - `presence:tenants`           — set of tenant ids with at least one entry
//! - `presence:tenants:{tenant}`  — set of `"{user_id}:{connection_id}"`
//!   members, carries the presence TTL
//! - `presence:connections`       — hash: connection id -> reverse entry JSON
//! - `presence:ranking`           — sorted set: tenant id scored by observed
//!   live cardinality (best-effort cache)
//! - `events:tenants:{tenant}`    — pub/sub channel for tenant-scoped events
//! - `events:global`              — pub/sub channel every event is mirrored to
//! - `presence:updates`           — pub/sub channel for presence deltas

/// Set of tenant ids that currently have at least one presence entry.
pub const TENANT_INDEX_KEY: &str = "presence:tenants";

/// Hash mapping connection id to its reverse entry.
pub const REVERSE_MAP_KEY: &str = "presence:connections";

/// Sorted set caching per-tenant live counts for ranking queries.
pub const RANKING_KEY: &str = "presence:ranking";

/// Pub/sub channel carrying every published event regardless of tenant.
pub const GLOBAL_EVENT_CHANNEL: &str = "events:global";

/// Pub/sub channel carrying presence join/leave deltas for all tenants.
pub const PRESENCE_CHANNEL: &str = "presence:updates";

/// Pattern matching every tenant-scoped event channel.
pub const TENANT_EVENT_PATTERN: &str = "events:tenants:*";

/// Key of the presence set for one tenant.
pub fn tenant_presence_key(tenant_id: &str) -> String {
    format!("presence:tenants:{tenant_id}")
}

/// Pub/sub channel for one tenant's event stream.
pub fn tenant_event_channel(tenant_id: &str) -> String {
    format!("events:tenants:{tenant_id}")
}

/// Extract the tenant id from a tenant event channel name.
pub fn tenant_of_event_channel(channel: &str) -> Option<&str> {
    channel.strip_prefix("events:tenants:")
}

/// Encode a presence set member. Connection ids never contain `:`, so the
/// member splits unambiguously from the right.
pub fn presence_member(user_id: &str, connection_id: &str) -> String {
    format!("{user_id}:{connection_id}")
}

/// Decode a presence set member into (user id, connection id).
pub fn split_presence_member(member: &str) -> Option<(&str, &str)> {
    member.rsplit_once(':')
}

/// Match a channel name against a subscription pattern. Only the trailing-`*`
/// glob form is supported — that is all the adapter subscribes with.
pub fn channel_matches(pattern: &str, channel: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => channel.starts_with(prefix),
        None => pattern == channel,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_round_trip() {
        let member = presence_member("user-1", "cx_0190f");
        assert_eq!(split_presence_member(&member), Some(("user-1", "cx_0190f")));
    }

    #[test]
    fn member_split_tolerates_colons_in_user_id() {
        let member = presence_member("org:user-1", "cx_0190f");
        assert_eq!(
            split_presence_member(&member),
            Some(("org:user-1", "cx_0190f"))
        );
    }

    #[test]
    fn channel_naming_is_tenant_scoped() {
        assert_eq!(tenant_event_channel("acme"), "events:tenants:acme");
        assert_eq!(
            tenant_of_event_channel("events:tenants:acme"),
            Some("acme")
        );
        assert_eq!(tenant_of_event_channel("events:global"), None);
    }

    #[test]
    fn pattern_matching() {
        assert!(channel_matches("events:tenants:*", "events:tenants:acme"));
        assert!(channel_matches("events:global", "events:global"));
        assert!(!channel_matches("events:tenants:*", "presence:updates"));
        assert!(!channel_matches("events:global", "events:globalx"));
    }
}
