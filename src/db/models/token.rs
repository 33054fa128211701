//! Revoked token identifiers.

use sqlx::SqlitePool;

/// Revoke a token by its `jti`. Revoking twice is a no-op.
pub async fn blacklist_token(db: &SqlitePool, jti: &str) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO blacklisted_tokens (jti, created_at) VALUES (?, ?)")
        .bind(jti)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(db)
        .await?;
    Ok(())
}

pub async fn is_token_revoked(db: &SqlitePool, jti: &str) -> Result<bool, sqlx::Error> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM blacklisted_tokens WHERE jti = ?")
        .bind(jti)
        .fetch_optional(db)
        .await?;
    Ok(found.is_some())
}

/// Delete revocation rows created before `cutoff` (RFC3339). Tokens that old
/// have expired and can no longer validate.
pub async fn prune_blacklisted_tokens(db: &SqlitePool, cutoff: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM blacklisted_tokens WHERE created_at < ?")
        .bind(cutoff)
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}
