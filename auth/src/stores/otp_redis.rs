//! Redis-based one-time token store.
//!
//! # Architecture
//!
//! - **Record**: `{prefix}:otp:{id}` → hash with the JSON record plus the
//!   fields the scripts filter on (`valid_until`, `used_at`, `identifier`,
//!   `has_identifier`, `created_at`; times in epoch milliseconds)
//! - **Lookup index**: `{prefix}:otp_lookup:{type}:{token_hash}` → set of ids
//! - **Rate index**: `{prefix}:otp_ip:{ip}` → sorted set of ids scored by creation time
//!
//! Several records may share a hash (short codes collide); lookups pick the
//! most recently issued match.
//!
//! # Security
//!
//! - **Single-use**: match and `used_at` write happen in one Lua script, so
//!   of any number of concurrent consumers exactly one gets the record
//! - **Indistinguishable misses**: unknown, used, expired and out-of-scope
//!   codes all come back as `None`

use crate::config::check_duration;
use crate::environment::{checked_earlier, checked_later};
use crate::error::{AuthError, Result};
use crate::models::{OneTimeToken, OneTimeTokenQuery};
use crate::providers::OneTimeTokenStore;
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::net::IpAddr;
use std::sync::LazyLock;

/// Count records in the rate index, optionally skipping consumed ones.
///
/// KEYS: ip sorted set
/// ARGV: since (ms), include used ("1"/"0"), record key prefix
static COUNT_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local ids = redis.call('ZRANGEBYSCORE', KEYS[1], ARGV[1], '+inf')
        if ARGV[2] == '1' then
            return #ids
        end
        local count = 0
        for _, id in ipairs(ids) do
            if redis.call('HGET', ARGV[3] .. id, 'used_at') == '' then
                count = count + 1
            end
        end
        return count
        ",
    )
});

/// Find the newest valid match, optionally marking it used.
///
/// KEYS: lookup set
/// ARGV: now (ms), identifier, has identifier ("1"/"0"), mark used ("1"/"0"), record key prefix
static FIND_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local ids = redis.call('SMEMBERS', KEYS[1])
        local best_id = nil
        local best_created = -1
        for _, id in ipairs(ids) do
            local f = redis.call('HMGET', ARGV[5] .. id,
                'used_at', 'valid_until', 'has_identifier', 'identifier', 'created_at')
            if f[1] == '' and tonumber(f[2]) > tonumber(ARGV[1]) then
                local scoped = f[3] == '0' or (ARGV[3] == '1' and f[4] == ARGV[2])
                if scoped and tonumber(f[5]) > best_created then
                    best_id = id
                    best_created = tonumber(f[5])
                end
            end
        end
        if not best_id then
            return false
        end
        local key = ARGV[5] .. best_id
        if ARGV[4] == '1' then
            redis.call('HSET', key, 'used_at', ARGV[1])
        end
        return redis.call('HGET', key, 'record')
        ",
    )
});

/// `Redis`-based one-time token store with atomic consumption.
///
/// # Thread Safety
///
/// This type is `Clone` and can be safely shared across threads.
/// Each clone shares the same `ConnectionManager` (connection pool).
#[derive(Clone)]
pub struct RedisOneTimeTokenStore {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,

    /// Namespace for every key written by this store.
    key_prefix: String,

    /// How long records and rate entries outlive `valid_until`.
    retention: Duration,
}

impl RedisOneTimeTokenStore {
    /// Create a new `Redis` one-time token store.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `Redis` URL is malformed
    /// - Connection to `Redis` server fails
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            AuthError::InternalError(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            AuthError::InternalError(format!("Failed to create Redis connection manager: {e}"))
        })?;

        tracing::info!("RedisOneTimeTokenStore initialized successfully");

        Ok(Self {
            conn_manager,
            key_prefix: "tokenwarden".to_string(),
            retention: Duration::days(1),
        })
    }

    /// Use a different key namespace (default `tokenwarden`).
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Keep records this long after `valid_until` (default 1 day).
    ///
    /// Must exceed the rate limit window, or expired codes stop counting early.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if `retention` is not positive or
    /// exceeds [`MAX_DURATION_SECS`](crate::config::MAX_DURATION_SECS).
    pub fn with_retention(mut self, retention: Duration) -> Result<Self> {
        self.retention = check_duration("one-time token retention", retention)?;
        Ok(self)
    }

    fn record_prefix(&self) -> String {
        format!("{}:otp:", self.key_prefix)
    }

    fn lookup_key(&self, token_type: &str, token_hash: &str) -> String {
        format!("{}:otp_lookup:{token_type}:{token_hash}", self.key_prefix)
    }

    fn ip_key(&self, ip: IpAddr) -> String {
        format!("{}:otp_ip:{ip}", self.key_prefix)
    }

    async fn run_find(
        &self,
        query: &OneTimeTokenQuery,
        now: DateTime<Utc>,
        mark_used: bool,
    ) -> Result<Option<OneTimeToken>> {
        let mut conn = self.conn_manager.clone();

        let json: Option<String> = FIND_SCRIPT
            .key(self.lookup_key(query.token_type.as_str(), query.token_hash.as_str()))
            .arg(now.timestamp_millis())
            .arg(query.identifier.as_deref().unwrap_or_default())
            .arg(if query.identifier.is_some() { "1" } else { "0" })
            .arg(if mark_used { "1" } else { "0" })
            .arg(self.record_prefix())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                AuthError::DatabaseError(format!("Failed to look up one-time token: {e}"))
            })?;

        let Some(json) = json else {
            return Ok(None);
        };

        let mut record: OneTimeToken =
            serde_json::from_str(&json).map_err(|e| AuthError::SerializationError(e.to_string()))?;
        if mark_used {
            record.used_at = Some(now);
        }
        Ok(Some(record))
    }
}

impl OneTimeTokenStore for RedisOneTimeTokenStore {
    async fn insert(&self, record: &OneTimeToken) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let json = serde_json::to_string(record)
            .map_err(|e| AuthError::SerializationError(e.to_string()))?;

        let record_key = format!("{}{}", self.record_prefix(), record.id.0);
        let lookup_key = self.lookup_key(record.token_type.as_str(), record.token_hash.as_str());
        let expire_at = checked_later(record.valid_until, self.retention)?.timestamp_millis();
        let created_at = record.created_at.timestamp_millis();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(
                &record_key,
                &[
                    ("record", json.as_str()),
                    ("used_at", ""),
                    ("identifier", record.identifier.as_deref().unwrap_or_default()),
                    (
                        "has_identifier",
                        if record.identifier.is_some() { "1" } else { "0" },
                    ),
                ],
            )
            .ignore()
            .hset(&record_key, "valid_until", record.valid_until.timestamp_millis())
            .ignore()
            .hset(&record_key, "created_at", created_at)
            .ignore()
            .pexpire_at(&record_key, expire_at)
            .ignore()
            .sadd(&lookup_key, record.id.0.to_string())
            .ignore()
            .pexpire_at(&lookup_key, expire_at)
            .ignore();

        if let Some(ip) = record.ip_address {
            let ip_key = self.ip_key(ip);
            let horizon = checked_earlier(record.created_at, self.retention)?.timestamp_millis();
            pipe.zadd(&ip_key, record.id.0.to_string(), created_at)
                .ignore()
                .zrembyscore(&ip_key, "-inf", horizon)
                .ignore()
                .pexpire_at(&ip_key, expire_at)
                .ignore();
        }

        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| AuthError::DatabaseError(format!("Failed to store one-time token: {e}")))?;

        tracing::debug!(
            token_type = %record.token_type,
            token = %record.token_hash.prefix(),
            "Stored one-time token in Redis"
        );
        Ok(())
    }

    async fn count_issued_since(
        &self,
        ip: IpAddr,
        since: DateTime<Utc>,
        include_used: bool,
    ) -> Result<u64> {
        let mut conn = self.conn_manager.clone();

        COUNT_SCRIPT
            .key(self.ip_key(ip))
            .arg(since.timestamp_millis())
            .arg(if include_used { "1" } else { "0" })
            .arg(self.record_prefix())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                AuthError::DatabaseError(format!("Failed to count one-time tokens: {e}"))
            })
    }

    async fn find(
        &self,
        query: &OneTimeTokenQuery,
        now: DateTime<Utc>,
    ) -> Result<Option<OneTimeToken>> {
        self.run_find(query, now, false).await
    }

    async fn consume(
        &self,
        query: &OneTimeTokenQuery,
        now: DateTime<Utc>,
    ) -> Result<Option<OneTimeToken>> {
        self.run_find(query, now, true).await
    }
}
