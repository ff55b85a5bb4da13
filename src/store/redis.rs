//! Redis-backed coordination store.
//!
//! Commands go through a [`ConnectionManager`] (auto-reconnecting). Pub/sub
//! runs on dedicated connections driven by a forwarding task per
//! subscription, with bounded exponential backoff on reconnect; when the
//! retry budget is exhausted the task commits to degraded mode and probes on
//! a slow interval instead of spinning.
//!
//! Atomicity: presence mutations are single MULTI/EXEC batches that observe
//! the live cardinality (`SCARD`) inside the batch. The ranking cache is then
//! written with that absolute score — one hop behind the batch, but never a
//! blind increment, so concurrent instances cannot drift it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;

use super::{keys, CoordinationStore, RemovedPresence, ReverseEntry, StoreHealth, StoreMessage};
use crate::error::{StoreError, StoreResult};

const SUBSCRIBE_BUFFER: usize = 4096;

/// How long an exhausted subscriber parks before probing the store again.
const REPROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Backoff for pub/sub (re)connect attempts: capped retries, with jitter so a
/// fleet of instances does not reconnect in lockstep.
fn reconnect_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(200))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(6)
        .with_jitter()
}

pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
    health: Arc<StoreHealth>,
}

impl RedisStore {
    /// Connect to the store. Fails fast — the caller owns startup retry and
    /// the decision to fall back to single-instance mode.
    pub async fn connect(url: &str, health: Arc<StoreHealth>) -> StoreResult<Self> {
        let client = redis::Client::open(url).map_err(StoreError::from)?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(StoreError::from)?;
        health.mark(true);
        Ok(Self {
            client,
            conn,
            health,
        })
    }

    /// Record the outcome of a store operation on the shared health flag.
    fn track<T>(&self, result: Result<T, redis::RedisError>) -> StoreResult<T> {
        match result {
            Ok(value) => {
                self.health.mark(true);
                Ok(value)
            }
            Err(err) => {
                let err = StoreError::from(err);
                if matches!(err, StoreError::Unreachable(_)) {
                    self.health.mark(false);
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    fn is_clustered(&self) -> bool {
        true
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let result: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        self.track(result)?;
        Ok(())
    }

    async fn presence_add(
        &self,
        tenant_id: &str,
        user_id: &str,
        connection_id: &str,
        ttl: Duration,
    ) -> StoreResult<u64> {
        let tenant_key = keys::tenant_presence_key(tenant_id);
        let member = keys::presence_member(user_id, connection_id);
        let entry = serde_json::to_string(&ReverseEntry {
            user_id: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
        })
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let ttl_secs = ttl.as_secs().max(1) as i64;

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .sadd(&tenant_key, &member)
            .ignore()
            .expire(&tenant_key, ttl_secs)
            .ignore()
            .sadd(keys::TENANT_INDEX_KEY, tenant_id)
            .ignore()
            .hset(keys::REVERSE_MAP_KEY, connection_id, &entry)
            .ignore()
            .scard(&tenant_key);
        let result: Result<(u64,), _> = pipe.query_async(&mut conn).await;
        let (count,) = self.track(result)?;

        let rank: Result<(), _> = conn
            .zadd(keys::RANKING_KEY, tenant_id, count as i64)
            .await;
        self.track(rank)?;
        Ok(count)
    }

    async fn presence_remove(&self, connection_id: &str) -> StoreResult<Option<RemovedPresence>> {
        let mut conn = self.conn.clone();
        let raw: Result<Option<String>, _> =
            conn.hget(keys::REVERSE_MAP_KEY, connection_id).await;
        let Some(raw) = self.track(raw)? else {
            return Ok(None);
        };
        let entry: ReverseEntry =
            serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let tenant_key = keys::tenant_presence_key(&entry.tenant_id);
        let member = keys::presence_member(&entry.user_id, connection_id);
        let mut pipe = redis::pipe();
        pipe.atomic()
            .srem(&tenant_key, &member)
            .ignore()
            .hdel(keys::REVERSE_MAP_KEY, connection_id)
            .ignore()
            .scard(&tenant_key);
        let result: Result<(u64,), _> = pipe.query_async(&mut conn).await;
        let (remaining,) = self.track(result)?;

        if remaining == 0 {
            let mut pipe = redis::pipe();
            pipe.atomic()
                .zrem(keys::RANKING_KEY, &entry.tenant_id)
                .ignore()
                .srem(keys::TENANT_INDEX_KEY, &entry.tenant_id)
                .ignore();
            let result: Result<(), _> = pipe.query_async(&mut conn).await;
            self.track(result)?;
        } else {
            let result: Result<(), _> = conn
                .zadd(keys::RANKING_KEY, &entry.tenant_id, remaining as i64)
                .await;
            self.track(result)?;
        }

        Ok(Some(RemovedPresence {
            user_id: entry.user_id,
            tenant_id: entry.tenant_id,
            remaining,
        }))
    }

    async fn presence_count(&self, tenant_id: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let result: Result<u64, _> = conn.scard(keys::tenant_presence_key(tenant_id)).await;
        self.track(result)
    }

    async fn presence_members(&self, tenant_id: &str) -> StoreResult<Vec<(String, String)>> {
        let mut conn = self.conn.clone();
        let result: Result<Vec<String>, _> =
            conn.smembers(keys::tenant_presence_key(tenant_id)).await;
        let members = self.track(result)?;
        Ok(members
            .iter()
            .filter_map(|m| {
                let split = keys::split_presence_member(m);
                if split.is_none() {
                    tracing::warn!(member = %m, "skipping malformed presence member");
                }
                split.map(|(user, conn)| (user.to_string(), conn.to_string()))
            })
            .collect())
    }

    async fn active_tenants(&self) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let result: Result<Vec<String>, _> = conn.smembers(keys::TENANT_INDEX_KEY).await;
        self.track(result)
    }

    async fn ranking(&self, limit: usize) -> StoreResult<Vec<(String, u64)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let result: Result<Vec<(String, f64)>, _> = conn
            .zrevrange_withscores(keys::RANKING_KEY, 0, limit as isize - 1)
            .await;
        let entries = self.track(result)?;
        Ok(entries
            .into_iter()
            .map(|(tenant, score)| (tenant, score.max(0.0) as u64))
            .collect())
    }

    async fn reverse_entries(&self) -> StoreResult<Vec<(String, ReverseEntry)>> {
        let mut conn = self.conn.clone();
        let result: Result<std::collections::HashMap<String, String>, _> =
            conn.hgetall(keys::REVERSE_MAP_KEY).await;
        let raw = self.track(result)?;
        Ok(raw
            .into_iter()
            .filter_map(|(connection_id, value)| match serde_json::from_str(&value) {
                Ok(entry) => Some((connection_id, entry)),
                Err(err) => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        error = %err,
                        "skipping malformed reverse entry"
                    );
                    None
                }
            })
            .collect())
    }

    async fn remove_reverse(&self, connection_id: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let result: Result<(), _> = conn.hdel(keys::REVERSE_MAP_KEY, connection_id).await;
        self.track(result)
    }

    async fn prune_tenant(&self, tenant_id: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let count: Result<u64, _> = conn.scard(keys::tenant_presence_key(tenant_id)).await;
        if self.track(count)? > 0 {
            return Ok(false);
        }
        let mut pipe = redis::pipe();
        pipe.atomic()
            .srem(keys::TENANT_INDEX_KEY, tenant_id)
            .zrem(keys::RANKING_KEY, tenant_id);
        let result: Result<(u64, u64), _> = pipe.query_async(&mut conn).await;
        let (from_index, from_ranking) = self.track(result)?;
        Ok(from_index + from_ranking > 0)
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        // PUBLISH returns the receiver count; zero subscribers is normal.
        let result: Result<i64, _> = conn.publish(channel, payload).await;
        self.track(result)?;
        Ok(())
    }

    async fn subscribe(&self, patterns: &[String]) -> StoreResult<mpsc::Receiver<StoreMessage>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBE_BUFFER);
        tokio::spawn(run_subscriber(
            self.client.clone(),
            self.health.clone(),
            patterns.to_vec(),
            tx,
        ));
        Ok(rx)
    }
}

/// Owns one pub/sub connection for the life of a subscription, forwarding
/// messages to the receiver and reconnecting on failure. Exits when the
/// receiver is dropped.
async fn run_subscriber(
    client: redis::Client,
    health: Arc<StoreHealth>,
    patterns: Vec<String>,
    tx: mpsc::Sender<StoreMessage>,
) {
    loop {
        let connect = || async {
            let mut pubsub = client.get_async_pubsub().await?;
            for pattern in &patterns {
                if pattern.ends_with('*') {
                    pubsub.psubscribe(pattern).await?;
                } else {
                    pubsub.subscribe(pattern).await?;
                }
            }
            Ok::<_, redis::RedisError>(pubsub)
        };

        let pubsub = connect
            .retry(reconnect_policy())
            .notify(|err: &redis::RedisError, delay: Duration| {
                tracing::warn!(error = %err, retry_in = ?delay, "pub/sub connect failed");
            })
            .await;

        let mut pubsub = match pubsub {
            Ok(pubsub) => pubsub,
            Err(err) => {
                health.mark(false);
                tracing::error!(
                    error = %err,
                    "pub/sub reconnect budget exhausted, probing again in {:?}",
                    REPROBE_INTERVAL
                );
                tokio::select! {
                    _ = tx.closed() => return,
                    _ = tokio::time::sleep(REPROBE_INTERVAL) => continue,
                }
            }
        };

        health.mark(true);
        tracing::info!(patterns = ?patterns, "pub/sub subscription established");

        let mut stream = pubsub.on_message();
        loop {
            tokio::select! {
                _ = tx.closed() => return,
                msg = stream.next() => {
                    let Some(msg) = msg else {
                        // Stream ended: the connection dropped.
                        break;
                    };
                    let channel = msg.get_channel_name().to_string();
                    let payload: Vec<u8> = match msg.get_payload() {
                        Ok(payload) => payload,
                        Err(err) => {
                            tracing::warn!(channel = %channel, error = %err, "undecodable pub/sub payload");
                            continue;
                        }
                    };
                    if tx.send(StoreMessage { channel, payload }).await.is_err() {
                        return;
                    }
                }
            }
        }

        health.mark(false);
        tracing::warn!("pub/sub stream ended, reconnecting");
    }
}
