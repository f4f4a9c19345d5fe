//! Refresh token storage for validation and revocation.
//!
//! Only SHA-256 hashes of refresh tokens are stored. Access tokens are
//! stateless and never written here.

use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePool;

/// A stored refresh token record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredRefreshToken {
    pub id: i64,
    pub token_hash: String,
    pub user_id: String,
    pub expires_at: i64,
    pub created_at: String,
}

/// Hex-encoded SHA-256 of a raw refresh token.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Store for managing refresh tokens.
pub struct RefreshTokenStore {
    pool: SqlitePool,
}

impl RefreshTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a refresh token hash inside an open transaction.
    pub async fn insert_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        user_id: &str,
        token_hash: &str,
        expires_at: u64,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO refresh_tokens (token_hash, user_id, expires_at) VALUES (?, ?, ?)",
        )
        .bind(token_hash)
        .bind(user_id)
        .bind(expires_at as i64)
        .execute(&mut **tx)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Find a stored token by hash that has not expired at `now`.
    pub async fn find_active(
        &self,
        token_hash: &str,
        now: u64,
    ) -> Result<Option<StoredRefreshToken>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, token_hash, user_id, expires_at, created_at FROM refresh_tokens
             WHERE token_hash = ? AND expires_at > ?",
        )
        .bind(token_hash)
        .bind(now as i64)
        .fetch_optional(&self.pool)
        .await
    }

    /// Delete a token by hash (revoke).
    pub async fn delete_by_hash(&self, token_hash: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = ?")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete all tokens that expired before `now`.
    pub async fn delete_expired(&self, now: u64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= ?")
            .bind(now as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Count stored tokens for a user.
    pub async fn count_by_user(&self, user_id: &str) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM refresh_tokens WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}
