//! Redis-based session token store.
//!
//! # Architecture
//!
//! Records are stored in Redis with:
//! - **Primary key**: `{prefix}:session:{token_hash}` → hash with fields
//!   `id`, `version` and `record` (JSON-serialized [`SessionToken`])
//! - **Id index**: `{prefix}:session_id:{id}` → current token hash
//! - **Identity index**: `{prefix}:identity_sessions:{class}#{id}` → set of record ids
//! - **TTL**: `valid_until` plus a retention period, so invalidated records
//!   stay readable for forensics after they stop authenticating anyone
//!
//! # Atomicity
//!
//! Insert-if-absent and compare-and-swap replacement run as Lua scripts, so
//! two requests racing on the same record cannot both win. A rotation
//! deletes the old hash key in the same script: the old token stops working
//! the instant the new one is written.
//!
//! # Example
//!
//! ```no_run
//! use tokenwarden_auth::stores::RedisSessionTokenStore;
//! use tokenwarden_auth::session::SessionManager;
//! use tokenwarden_auth::config::SessionConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisSessionTokenStore::new("redis://127.0.0.1:6379").await?;
//! let sessions = SessionManager::new(store, SessionConfig::default());
//! # Ok(())
//! # }
//! ```

use crate::config::check_duration;
use crate::environment::checked_later;
use crate::error::{AuthError, Result};
use crate::identity::IdentityRef;
use crate::models::{Metadata, SessionToken, SessionTokenId, metadata_contains};
use crate::providers::SessionTokenStore;
use crate::token::TokenHash;
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::sync::LazyLock;

/// Insert a record unless its hash key already exists.
///
/// KEYS: session key, id key, identity set
/// ARGV: id, version, record JSON, token hash, expire-at (ms)
static INSERT_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if redis.call('EXISTS', KEYS[1]) == 1 then
            return 0
        end
        redis.call('HSET', KEYS[1], 'id', ARGV[1], 'version', ARGV[2], 'record', ARGV[3])
        redis.call('PEXPIREAT', KEYS[1], ARGV[5])
        redis.call('SET', KEYS[2], ARGV[4])
        redis.call('PEXPIREAT', KEYS[2], ARGV[5])
        redis.call('SADD', KEYS[3], ARGV[1])
        return 1
        ",
    )
});

/// Compare-and-swap a record, moving it to a new hash key when rotating.
///
/// KEYS: current session key, new session key, id key
/// ARGV: id, expected version, new version, record JSON, new token hash, expire-at (ms)
///
/// Returns 1 on success, 0 on conflict, -1 if the new hash is taken.
static REPLACE_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local current = redis.call('HMGET', KEYS[1], 'id', 'version')
        if current[1] ~= ARGV[1] or current[2] ~= ARGV[2] then
            return 0
        end
        if KEYS[1] ~= KEYS[2] then
            if redis.call('EXISTS', KEYS[2]) == 1 then
                return -1
            end
            redis.call('DEL', KEYS[1])
        end
        redis.call('HSET', KEYS[2], 'id', ARGV[1], 'version', ARGV[3], 'record', ARGV[4])
        redis.call('PEXPIREAT', KEYS[2], ARGV[6])
        redis.call('SET', KEYS[3], ARGV[5])
        redis.call('PEXPIREAT', KEYS[3], ARGV[6])
        return 1
        ",
    )
});

/// `Redis`-based session token store.
///
/// # Thread Safety
///
/// This type is `Clone` and can be safely shared across threads.
/// Each clone shares the same `ConnectionManager` (connection pool).
#[derive(Clone)]
pub struct RedisSessionTokenStore {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,

    /// Namespace for every key written by this store.
    key_prefix: String,

    /// How long records outlive `valid_until`.
    retention: Duration,
}

impl RedisSessionTokenStore {
    /// Create a new `Redis` session token store.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - `Redis` connection URL (e.g., "<redis://127.0.0.1:6379>")
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

        tracing::info!("RedisSessionTokenStore initialized successfully");

        Ok(Self {
            conn_manager,
            key_prefix: "tokenwarden".to_string(),
            retention: Duration::days(30),
        })
    }

    /// Use a different key namespace (default `tokenwarden`).
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Keep records this long after `valid_until` (default 30 days).
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if `retention` is not positive or
    /// exceeds [`MAX_DURATION_SECS`](crate::config::MAX_DURATION_SECS).
    pub fn with_retention(mut self, retention: Duration) -> Result<Self> {
        self.retention = check_duration("session retention", retention)?;
        Ok(self)
    }

    fn session_key(&self, token_hash: &TokenHash) -> String {
        format!("{}:session:{}", self.key_prefix, token_hash.as_str())
    }

    fn id_key(&self, id: SessionTokenId) -> String {
        format!("{}:session_id:{id}", self.key_prefix)
    }

    fn identity_key(&self, identity: &IdentityRef) -> String {
        identity_index_key(&self.key_prefix, identity)
    }

    fn expire_at_ms(&self, record: &SessionToken) -> Result<i64> {
        Ok(checked_later(record.valid_until, self.retention)?.timestamp_millis())
    }

    async fn load(&self, token_hash: &TokenHash) -> Result<Option<SessionToken>> {
        let mut conn = self.conn_manager.clone();
        let json: Option<String> = conn
            .hget(self.session_key(token_hash), "record")
            .await
            .map_err(|e| AuthError::DatabaseError(format!("Failed to read session: {e}")))?;

        json.map(|json| {
            serde_json::from_str(&json).map_err(|e| AuthError::SerializationError(e.to_string()))
        })
        .transpose()
    }
}

/// Key of the per-identity session set.
///
/// The class is length-prefixed so that no two distinct references share a
/// key, whatever characters they contain.
fn identity_index_key(prefix: &str, identity: &IdentityRef) -> String {
    format!(
        "{prefix}:identity_sessions:{}:{}:{}",
        identity.object_class.len(),
        identity.object_class,
        identity.object_id
    )
}

impl SessionTokenStore for RedisSessionTokenStore {
    async fn insert(&self, record: &SessionToken) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let json = serde_json::to_string(record)
            .map_err(|e| AuthError::SerializationError(e.to_string()))?;

        let inserted: i64 = INSERT_SCRIPT
            .key(self.session_key(&record.token_hash))
            .key(self.id_key(record.id))
            .key(self.identity_key(&record.identity))
            .arg(record.id.to_string())
            .arg(record.version)
            .arg(json)
            .arg(record.token_hash.as_str())
            .arg(self.expire_at_ms(record)?)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AuthError::DatabaseError(format!("Failed to insert session: {e}")))?;

        if inserted == 0 {
            return Err(AuthError::TokenCollision);
        }

        tracing::debug!(
            session_id = %record.id,
            token = %record.token_hash.prefix(),
            "Stored session in Redis"
        );
        Ok(())
    }

    async fn find_active(
        &self,
        token_hash: &TokenHash,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionToken>> {
        // Expiry is enforced here, not by the key TTL (which includes retention)
        Ok(self
            .load(token_hash)
            .await?
            .filter(|record| record.is_active(now)))
    }

    async fn find_by_id(&self, id: SessionTokenId) -> Result<Option<SessionToken>> {
        let mut conn = self.conn_manager.clone();
        let token_hash: Option<String> = conn
            .get(self.id_key(id))
            .await
            .map_err(|e| AuthError::DatabaseError(format!("Failed to read session index: {e}")))?;

        match token_hash {
            Some(hex) => self.load(&TokenHash::from_hex(hex)).await,
            None => Ok(None),
        }
    }

    async fn find_active_by_identity(
        &self,
        identity: &IdentityRef,
        metadata_filter: &Metadata,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionToken>> {
        let mut conn = self.conn_manager.clone();
        let identity_key = self.identity_key(identity);

        let ids: Vec<String> = conn
            .smembers(&identity_key)
            .await
            .map_err(|e| AuthError::DatabaseError(format!("Failed to read identity index: {e}")))?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let token_hash: Option<String> = conn
                .get(format!("{}:session_id:{id}", self.key_prefix))
                .await
                .map_err(|e| {
                    AuthError::DatabaseError(format!("Failed to read session index: {e}"))
                })?;

            let Some(hex) = token_hash else {
                // Record aged out of retention; drop the stale index entry
                let _: () = conn.srem(&identity_key, &id).await.map_err(|e| {
                    AuthError::DatabaseError(format!("Failed to prune identity index: {e}"))
                })?;
                continue;
            };

            if let Some(record) = self.load(&TokenHash::from_hex(hex)).await? {
                if record.identity == *identity
                    && record.is_active(now)
                    && metadata_contains(&record.metadata, metadata_filter)
                {
                    records.push(record);
                }
            }
        }

        records.sort_by_key(|record| record.created_at);
        Ok(records)
    }

    async fn replace(
        &self,
        expected_hash: &TokenHash,
        expected_version: u64,
        record: &SessionToken,
    ) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let json = serde_json::to_string(record)
            .map_err(|e| AuthError::SerializationError(e.to_string()))?;

        let outcome: i64 = REPLACE_SCRIPT
            .key(self.session_key(expected_hash))
            .key(self.session_key(&record.token_hash))
            .key(self.id_key(record.id))
            .arg(record.id.to_string())
            .arg(expected_version)
            .arg(record.version)
            .arg(json)
            .arg(record.token_hash.as_str())
            .arg(self.expire_at_ms(record)?)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AuthError::DatabaseError(format!("Failed to replace session: {e}")))?;

        match outcome {
            1 => Ok(()),
            -1 => Err(AuthError::TokenCollision),
            _ => Err(AuthError::Conflict),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::fraud::Fingerprint;
    use std::net::{IpAddr, Ipv4Addr};

    async fn store() -> RedisSessionTokenStore {
        RedisSessionTokenStore::new("redis://127.0.0.1:6379")
            .await
            .expect("Failed to create store")
            .with_key_prefix(format!("tokenwarden-test-{}", uuid::Uuid::new_v4()))
    }

    fn record(raw: &str) -> SessionToken {
        let now = Utc::now();
        SessionToken {
            id: SessionTokenId::new(),
            identity: IdentityRef::new("user", "redis-test"),
            token_hash: TokenHash::of(raw),
            context: None,
            metadata: Metadata::new(),
            fingerprint: Fingerprint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), "test"),
            created_at: now,
            valid_until: now + Duration::hours(1),
            regenerated_at: None,
            fraud_data: None,
            version: 0,
        }
    }

    #[test]
    fn test_identity_keys_do_not_collide() {
        let a = IdentityRef::new("user#a", "b");
        let b = IdentityRef::new("user", "a#b");
        let c = IdentityRef::new("user:1", "2");
        let d = IdentityRef::new("user", "1:2");

        assert_eq!(a.to_string(), b.to_string());
        assert_ne!(identity_index_key("tw", &a), identity_index_key("tw", &b));
        assert_ne!(identity_index_key("tw", &c), identity_index_key("tw", &d));
        assert_eq!(
            identity_index_key("tw", &IdentityRef::new("user", "7")),
            "tw:identity_sessions:4:user:7"
        );
    }

    #[tokio::test]
    #[ignore] // Requires Redis running at localhost:6379
    async fn test_insert_and_collision() {
        let store = store().await;
        let first = record("redis-token-one");

        store.insert(&first).await.unwrap();
        let found = store
            .find_active(&first.token_hash, Utc::now())
            .await
            .unwrap();
        assert_eq!(found, Some(first.clone()));

        let mut duplicate = record("redis-token-one");
        duplicate.id = SessionTokenId::new();
        assert_eq!(
            store.insert(&duplicate).await.unwrap_err(),
            AuthError::TokenCollision
        );
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_rotation_moves_hash_key() {
        let store = store().await;
        let original = record("redis-token-rotate");
        store.insert(&original).await.unwrap();

        let mut rotated = original.clone();
        rotated.token_hash = TokenHash::of("redis-token-rotated");
        rotated.version = 1;
        store
            .replace(&original.token_hash, 0, &rotated)
            .await
            .unwrap();

        let now = Utc::now();
        assert!(store.find_active(&original.token_hash, now).await.unwrap().is_none());
        assert_eq!(
            store.find_by_id(original.id).await.unwrap(),
            Some(rotated.clone())
        );

        // Stale version loses
        assert_eq!(
            store
                .replace(&rotated.token_hash, 0, &rotated)
                .await
                .unwrap_err(),
            AuthError::Conflict
        );
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_concurrent_replace_single_winner() {
        let store = store().await;
        let original = record("redis-token-race");
        store.insert(&original).await.unwrap();

        let mut a = original.clone();
        a.version = 1;
        a.token_hash = TokenHash::of("redis-token-race-a");
        let mut b = original.clone();
        b.version = 1;
        b.token_hash = TokenHash::of("redis-token-race-b");

        let (ra, rb) = tokio::join!(
            store.replace(&original.token_hash, 0, &a),
            store.replace(&original.token_hash, 0, &b),
        );
        assert_eq!(usize::from(ra.is_ok()) + usize::from(rb.is_ok()), 1);
    }
}
