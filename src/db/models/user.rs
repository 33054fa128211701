//! User accounts and role assignments.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::role::{Role, RoleSet};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_admin: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
    pub roles: Vec<String>,
    pub created_at: String,
}

impl UserResponse {
    pub fn new(user: User, roles: &RoleSet) -> Self {
        Self {
            id: user.id,
            username: user.username,
            is_admin: user.is_admin,
            roles: roles.names(),
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: String,
    pub user: UserResponse,
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRolesRequest {
    pub roles: Vec<String>,
}

impl User {
    pub async fn find_by_id(db: &SqlitePool, id: i64) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn find_by_username(
        db: &SqlitePool,
        username: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(db)
            .await
    }

    pub async fn list(db: &SqlitePool) -> Result<Vec<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id")
            .fetch_all(db)
            .await
    }

    pub async fn count(db: &SqlitePool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(db)
            .await
    }

    /// Resolve the role set for a user (roles table plus the admin flag)
    pub async fn role_set(&self, db: &SqlitePool) -> Result<RoleSet, sqlx::Error> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT r.name FROM roles r
            INNER JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = ?
            ORDER BY r.name
            "#,
        )
        .bind(self.id)
        .fetch_all(db)
        .await?;

        Ok(RoleSet::from_names(names, self.is_admin))
    }

    /// Insert a user together with its role assignments in one transaction.
    pub async fn create(
        db: &SqlitePool,
        username: &str,
        password_hash: &str,
        roles: &[Role],
        is_admin: bool,
    ) -> Result<User, sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();
        let is_admin = is_admin || roles.contains(&Role::Admin);

        let mut tx = db.begin().await?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO users (username, password_hash, is_admin, created_at) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(username)
        .bind(password_hash)
        .bind(is_admin)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;

        let mut roles = roles.to_vec();
        if is_admin && !roles.contains(&Role::Admin) {
            roles.push(Role::Admin);
        }
        for role in &roles {
            assign_role(&mut tx, id, *role).await?;
        }

        tx.commit().await?;

        Ok(User {
            id,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            is_admin,
            created_at: now,
        })
    }

    /// Replace all role assignments; `is_admin` follows the admin role.
    pub async fn replace_roles(db: &SqlitePool, id: i64, roles: &[Role]) -> Result<(), sqlx::Error> {
        let mut tx = db.begin().await?;

        sqlx::query("DELETE FROM user_roles WHERE user_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        for role in roles {
            assign_role(&mut tx, id, *role).await?;
        }

        sqlx::query("UPDATE users SET is_admin = ? WHERE id = ?")
            .bind(roles.contains(&Role::Admin))
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await
    }

    pub async fn set_password_hash(
        db: &SqlitePool,
        id: i64,
        password_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn invoice_count(db: &SqlitePool, id: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM invoices WHERE user_id = ?")
            .bind(id)
            .fetch_one(db)
            .await
    }

    /// Delete a user; cart rows and role assignments cascade.
    pub async fn delete(db: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

async fn assign_role(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_id: i64,
    role: Role,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT OR IGNORE INTO user_roles (user_id, role_id) SELECT ?, id FROM roles WHERE name = ?",
    )
    .bind(user_id)
    .bind(role.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(())
}
