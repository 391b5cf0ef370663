//! PostgreSQL session token store.
//!
//! # Example
//!
//! ```no_run
//! use tokenwarden_auth::stores::postgres::{migrate, PostgresSessionTokenStore};
//! use sqlx::PgPool;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = PgPool::connect("postgresql://localhost/auth").await?;
//! migrate(&pool).await?;
//! let store = PostgresSessionTokenStore::new(pool);
//! # Ok(())
//! # }
//! ```

use super::write_error;
use crate::error::{AuthError, Result};
use crate::fraud::Fingerprint;
use crate::identity::IdentityRef;
use crate::models::{Metadata, SessionToken, SessionTokenId};
use crate::providers::SessionTokenStore;
use crate::token::TokenHash;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

const COLUMNS: &str = "id, object_class, object_id, token_hash, context, metadata, \
                       fingerprint, created_at, valid_until, regenerated_at, fraud_data, version";

/// `PostgreSQL` session token store.
#[derive(Clone)]
pub struct PostgresSessionTokenStore {
    /// `PostgreSQL` connection pool.
    pool: PgPool,
}

impl PostgresSessionTokenStore {
    /// Create a new store over `pool`. Run [`super::migrate`] first.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn version_to_db(version: u64) -> Result<i64> {
    i64::try_from(version)
        .map_err(|_| AuthError::InternalError(format!("Version {version} out of range")))
}

fn from_row(row: &PgRow) -> Result<SessionToken> {
    let read = |e: sqlx::Error| AuthError::DatabaseError(format!("Failed to decode session: {e}"));

    let version: i64 = row.try_get("version").map_err(read)?;
    let Json(metadata): Json<Metadata> = row.try_get("metadata").map_err(read)?;
    let Json(fingerprint): Json<Fingerprint> = row.try_get("fingerprint").map_err(read)?;
    let fraud_data: Option<Json<Fingerprint>> = row.try_get("fraud_data").map_err(read)?;

    Ok(SessionToken {
        id: SessionTokenId(row.try_get("id").map_err(read)?),
        identity: IdentityRef::new(
            row.try_get::<String, _>("object_class").map_err(read)?,
            row.try_get::<String, _>("object_id").map_err(read)?,
        ),
        token_hash: TokenHash::from_hex(row.try_get("token_hash").map_err(read)?),
        context: row.try_get("context").map_err(read)?,
        metadata,
        fingerprint,
        created_at: row.try_get("created_at").map_err(read)?,
        valid_until: row.try_get("valid_until").map_err(read)?,
        regenerated_at: row.try_get("regenerated_at").map_err(read)?,
        fraud_data: fraud_data.map(|Json(fp)| fp),
        version: u64::try_from(version)
            .map_err(|_| AuthError::DatabaseError(format!("Negative version {version}")))?,
    })
}

impl SessionTokenStore for PostgresSessionTokenStore {
    async fn insert(&self, record: &SessionToken) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO session_tokens
                (id, object_class, object_id, token_hash, context, metadata,
                 fingerprint, created_at, valid_until, regenerated_at, fraud_data, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ",
        )
        .bind(record.id.0)
        .bind(&record.identity.object_class)
        .bind(&record.identity.object_id)
        .bind(record.token_hash.as_str())
        .bind(record.context.as_deref())
        .bind(Json(&record.metadata))
        .bind(Json(&record.fingerprint))
        .bind(record.created_at)
        .bind(record.valid_until)
        .bind(record.regenerated_at)
        .bind(record.fraud_data.as_ref().map(Json))
        .bind(version_to_db(record.version)?)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(&e, AuthError::TokenCollision, "insert session"))?;

        Ok(())
    }

    async fn find_active(
        &self,
        token_hash: &TokenHash,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionToken>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM session_tokens WHERE token_hash = $1 AND valid_until > $2"
        ))
        .bind(token_hash.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuthError::DatabaseError(format!("Failed to find session: {e}")))?;

        row.as_ref().map(from_row).transpose()
    }

    async fn find_by_id(&self, id: SessionTokenId) -> Result<Option<SessionToken>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM session_tokens WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AuthError::DatabaseError(format!("Failed to find session: {e}")))?;

        row.as_ref().map(from_row).transpose()
    }

    async fn find_active_by_identity(
        &self,
        identity: &IdentityRef,
        metadata_filter: &Metadata,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionToken>> {
        // JSONB containment: an empty filter object matches every row.
        let rows = sqlx::query(&format!(
            r"
            SELECT {COLUMNS} FROM session_tokens
            WHERE object_class = $1 AND object_id = $2
              AND valid_until > $3
              AND metadata @> $4
            ORDER BY created_at
            "
        ))
        .bind(&identity.object_class)
        .bind(&identity.object_id)
        .bind(now)
        .bind(Json(metadata_filter))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AuthError::DatabaseError(format!("Failed to list sessions: {e}")))?;

        rows.iter().map(from_row).collect()
    }

    async fn replace(
        &self,
        expected_hash: &TokenHash,
        expected_version: u64,
        record: &SessionToken,
    ) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE session_tokens SET
                token_hash = $4, context = $5, metadata = $6, fingerprint = $7,
                valid_until = $8, regenerated_at = $9, fraud_data = $10, version = $11
            WHERE id = $1 AND token_hash = $2 AND version = $3
            ",
        )
        .bind(record.id.0)
        .bind(expected_hash.as_str())
        .bind(version_to_db(expected_version)?)
        .bind(record.token_hash.as_str())
        .bind(record.context.as_deref())
        .bind(Json(&record.metadata))
        .bind(Json(&record.fingerprint))
        .bind(record.valid_until)
        .bind(record.regenerated_at)
        .bind(record.fraud_data.as_ref().map(Json))
        .bind(version_to_db(record.version)?)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(&e, AuthError::TokenCollision, "replace session"))?;

        if result.rows_affected() == 0 {
            tracing::debug!(
                session_id = %record.id,
                "Conditional session write lost a race"
            );
            return Err(AuthError::Conflict);
        }
        Ok(())
    }
}
