//! Redis-backed event store.
//!
//! Every throttle key owns one sorted set scored by timestamp. Members are
//! `<timestamp>:<outcome>:<uuid>[:<action>]`; the uuid keeps same-millisecond
//! events distinct. Each append trims members older than the retention and
//! refreshes the key TTL. Weighted sums run inside a Lua script so a sum is
//! one atomic read on the server.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use super::{retention_cutoff, Event, EventStore};
use crate::error::{ThrottlerError, ThrottlerResult};
use crate::outcome::Outcome;

const SUM_SCRIPT: &str = r#"
local members = redis.call('ZRANGEBYSCORE', KEYS[1], ARGV[1], '+inf')
local weights = {
    success = tonumber(ARGV[2]),
    client_error = tonumber(ARGV[3]),
    server_error = tonumber(ARGV[4]),
}
local fallback = tonumber(ARGV[5])
local total = 0
for _, member in ipairs(members) do
    local outcome = string.match(member, '^[^:]*:([^:]*)')
    total = total + (weights[outcome] or fallback)
end
return total
"#;

#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Prefix prepended to every sorted-set key
    pub key_prefix: String,
    /// How long a key's history survives after its latest append
    pub retention: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "throttle:".to_string(),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

pub struct RedisEventStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
    sum_script: Script,
}

impl fmt::Debug for RedisEventStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisEventStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisEventStore {
    pub async fn connect(redis_url: &str, config: RedisStoreConfig) -> ThrottlerResult<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            ThrottlerError::Configuration(format!("Failed to create Redis client: {}", e))
        })?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| ThrottlerError::Storage(format!("Failed to connect to Redis: {}", e)))?;

        tracing::info!(
            key_prefix = %config.key_prefix,
            retention_secs = config.retention.as_secs(),
            "Connected Redis event store"
        );

        Ok(Self {
            connection,
            config,
            sum_script: Script::new(SUM_SCRIPT),
        })
    }

    fn events_key(&self, key: &str) -> String {
        events_key(&self.config.key_prefix, key)
    }
}

fn events_key(prefix: &str, key: &str) -> String {
    format!("{}events:{}", prefix, key)
}

/// Exclusive upper score bound for the retention trim.
fn trim_bound(timestamp_ms: i64, retention: Duration) -> String {
    format!("({}", retention_cutoff(timestamp_ms, retention))
}

fn encode_member(event: &Event, id: Uuid) -> String {
    match &event.action {
        Some(action) => format!(
            "{}:{}:{}:{}",
            event.timestamp_ms,
            event.outcome.as_str(),
            id.simple(),
            action
        ),
        None => format!(
            "{}:{}:{}",
            event.timestamp_ms,
            event.outcome.as_str(),
            id.simple()
        ),
    }
}

#[async_trait]
impl EventStore for RedisEventStore {
    async fn append(&self, event: &Event) -> ThrottlerResult<()> {
        let key = self.events_key(&event.key);
        let member = encode_member(event, Uuid::new_v4());
        let ttl = i64::try_from(self.config.retention.as_secs().max(1)).unwrap_or(i64::MAX);
        let mut conn = self.connection.clone();

        redis::pipe()
            .atomic()
            .zadd(&key, member, event.timestamp_ms)
            .ignore()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&key)
            .arg("-inf")
            .arg(trim_bound(event.timestamp_ms, self.config.retention))
            .ignore()
            .expire(&key, ttl)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| ThrottlerError::Storage(format!("Event append failed: {}", e)))
    }

    async fn sum_weighted_points(&self, key: &str, since_ms: i64) -> ThrottlerResult<u64> {
        let mut conn = self.connection.clone();

        let points: i64 = self
            .sum_script
            .key(self.events_key(key))
            .arg(since_ms)
            .arg(Outcome::Success.weight())
            .arg(Outcome::ClientError.weight())
            .arg(Outcome::ServerError.weight())
            .arg(Outcome::UnhandledFailure.weight())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| ThrottlerError::Storage(format!("Point query failed: {}", e)))?;

        Ok(points.max(0) as u64)
    }

    async fn ping(&self) -> ThrottlerResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| ThrottlerError::Storage(format!("Ping failed: {}", e)))
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
