//! Bootstrap data: the role vocabulary and the first administrator.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::info;

use super::models::{Role, User};
use crate::config::AuthConfig;
use crate::identity::hash_password;

/// Make sure every known role has a row (runs on every startup)
pub async fn ensure_roles(pool: &SqlitePool) -> Result<()> {
    for role in Role::ALL {
        sqlx::query("INSERT OR IGNORE INTO roles (name) VALUES (?)")
            .bind(role.as_str())
            .execute(pool)
            .await?;
    }
    Ok(())
}

/// Create the configured default admin if it does not exist yet.
///
/// Returns `false` when nothing was created, either because the user exists
/// or no default password is configured.
pub async fn ensure_default_admin(pool: &SqlitePool, auth: &AuthConfig) -> Result<bool> {
    let Some(password) = auth.default_admin_password.as_deref() else {
        info!("No default admin password configured, skipping admin seed");
        return Ok(false);
    };

    if User::find_by_username(pool, &auth.default_admin_username)
        .await?
        .is_some()
    {
        return Ok(false);
    }

    create_admin(pool, &auth.default_admin_username, password).await?;
    Ok(true)
}

/// Create an admin, or promote and reset the password of an existing user
pub async fn create_admin(pool: &SqlitePool, username: &str, password: &str) -> Result<User> {
    let password_hash = hash_password(password).context("Failed to hash admin password")?;

    if let Some(existing) = User::find_by_username(pool, username).await? {
        let mut roles = existing.role_set(pool).await?.roles().to_vec();
        roles.push(Role::Admin);
        User::replace_roles(pool, existing.id, &roles).await?;
        User::set_password_hash(pool, existing.id, &password_hash).await?;
        info!(username = %username, "Promoted existing user to admin");
        return User::find_by_id(pool, existing.id)
            .await?
            .context("User disappeared while being promoted");
    }

    let user = User::create(pool, username, &password_hash, &[Role::Admin], true).await?;
    info!(username = %username, user_id = user.id, "Created admin user");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::identity::verify_password;

    #[tokio::test]
    async fn test_default_admin_seeded_once() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::init(dir.path(), &DatabaseConfig::default()).await.unwrap();

        let auth = AuthConfig {
            default_admin_password: Some("changeme-now".to_string()),
            ..AuthConfig::default()
        };
        assert!(ensure_default_admin(&pool, &auth).await.unwrap());
        assert!(!ensure_default_admin(&pool, &auth).await.unwrap());

        let admin = User::find_by_username(&pool, "admin").await.unwrap().unwrap();
        assert!(admin.is_admin);
        assert!(admin.role_set(&pool).await.unwrap().has(Role::Admin));
    }

    #[tokio::test]
    async fn test_no_password_no_admin() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::init(dir.path(), &DatabaseConfig::default()).await.unwrap();
        assert!(!ensure_default_admin(&pool, &AuthConfig::default()).await.unwrap());
        assert_eq!(User::count(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_admin_promotes_existing_user() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::init(dir.path(), &DatabaseConfig::default()).await.unwrap();
        let staff = User::create(&pool, "erin", "x", &[Role::Staff], false).await.unwrap();

        let promoted = create_admin(&pool, "erin", "new-password").await.unwrap();
        assert_eq!(promoted.id, staff.id);
        assert!(promoted.is_admin);
        assert!(verify_password("new-password", &promoted.password_hash));

        let roles = promoted.role_set(&pool).await.unwrap();
        assert!(roles.has(Role::Staff));
        assert!(roles.has(Role::Admin));
    }
}
