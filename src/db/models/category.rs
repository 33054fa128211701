use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_by: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCategoryRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl Category {
    pub async fn list(db: &SqlitePool) -> Result<Vec<Category>, sqlx::Error> {
        sqlx::query_as::<_, Category>("SELECT * FROM categories ORDER BY name")
            .fetch_all(db)
            .await
    }

    pub async fn find(db: &SqlitePool, id: i64) -> Result<Option<Category>, sqlx::Error> {
        sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn create(
        db: &SqlitePool,
        req: &CreateCategoryRequest,
        created_by: i64,
    ) -> Result<Category, sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query_as::<_, Category>(
            r#"
            INSERT INTO categories (name, description, created_by, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(req.name.trim())
        .bind(&req.description)
        .bind(created_by)
        .bind(&now)
        .fetch_one(db)
        .await
    }

    pub async fn update(
        db: &SqlitePool,
        id: i64,
        req: &UpdateCategoryRequest,
    ) -> Result<Option<Category>, sqlx::Error> {
        sqlx::query_as::<_, Category>(
            r#"
            UPDATE categories SET
                name = COALESCE(?, name),
                description = COALESCE(?, description)
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(req.name.as_deref().map(str::trim))
        .bind(&req.description)
        .bind(id)
        .fetch_optional(db)
        .await
    }

    /// Delete a category; its products become uncategorized.
    pub async fn delete(db: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
