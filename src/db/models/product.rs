//! Catalog products and direct stock adjustment.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::money::Money;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub category_id: Option<i64>,
    #[sqlx(rename = "price_cents")]
    pub price: Money,
    pub stock_quantity: i64,
    pub description: Option<String>,
    pub abv: Option<f64>,
    pub bottle_size_ml: Option<i64>,
    pub vintage: Option<i64>,
    pub varietal: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub image_url: Option<String>,
    pub added_by: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Product joined with its category name for list and detail views
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProductWithCategory {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub product: Product,
    pub category_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub price: Money,
    #[serde(default)]
    pub stock_quantity: i64,
    pub category_id: Option<i64>,
    pub description: Option<String>,
    pub abv: Option<f64>,
    pub bottle_size_ml: Option<i64>,
    pub vintage: Option<i64>,
    pub varietal: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub price: Option<Money>,
    pub stock_quantity: Option<i64>,
    pub category_id: Option<i64>,
    pub description: Option<String>,
    pub abv: Option<f64>,
    pub bottle_size_ml: Option<i64>,
    pub vintage: Option<i64>,
    pub varietal: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub image_url: Option<String>,
}

/// Largest stock level a product may hold
pub const MAX_STOCK: i64 = 1_000_000_000;

/// Outcome of [`Product::adjust_stock`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockChange {
    Applied { previous: i64, new: i64 },
    /// The change would take the stock below zero
    BelowZero { available: i64 },
    /// The change would take the stock above [`MAX_STOCK`]
    AboveMax { current: i64 },
}

/// Either an absolute stock level or a relative change
#[derive(Debug, Deserialize)]
pub struct StockAdjustmentRequest {
    pub quantity: Option<i64>,
    pub delta: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct StockAdjustmentResponse {
    pub product_id: i64,
    pub previous_quantity: i64,
    pub new_quantity: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProductQuery {
    pub category_id: Option<i64>,
    /// Case-insensitive substring match on the name
    pub search: Option<String>,
    #[serde(default)]
    pub in_stock_only: bool,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ProductListResponse {
    pub items: Vec<ProductWithCategory>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

const PRODUCT_WITH_CATEGORY: &str = r#"
    SELECT p.*, c.name AS category_name
    FROM products p
    LEFT JOIN categories c ON c.id = p.category_id
"#;

impl Product {
    pub async fn find(db: &SqlitePool, id: i64) -> Result<Option<Product>, sqlx::Error> {
        sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn find_with_category(
        db: &SqlitePool,
        id: i64,
    ) -> Result<Option<ProductWithCategory>, sqlx::Error> {
        let sql = format!("{} WHERE p.id = ?", PRODUCT_WITH_CATEGORY);
        sqlx::query_as::<_, ProductWithCategory>(&sql)
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn list(
        db: &SqlitePool,
        query: &ProductQuery,
    ) -> Result<ProductListResponse, sqlx::Error> {
        let page = query.page.unwrap_or(1).max(1);
        let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1).saturating_mul(per_page);

        let mut conditions = Vec::new();
        if query.category_id.is_some() {
            conditions.push("p.category_id = ?");
        }
        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s.to_lowercase()));
        if search.is_some() {
            conditions.push("LOWER(p.name) LIKE ?");
        }
        if query.in_stock_only {
            conditions.push("p.stock_quantity > 0");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM products p {}", where_clause);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(category_id) = query.category_id {
            count_query = count_query.bind(category_id);
        }
        if let Some(search) = &search {
            count_query = count_query.bind(search);
        }
        let total = count_query.fetch_one(db).await?;

        let sql = format!(
            "{} {} ORDER BY p.name LIMIT ? OFFSET ?",
            PRODUCT_WITH_CATEGORY, where_clause
        );
        let mut list_query = sqlx::query_as::<_, ProductWithCategory>(&sql);
        if let Some(category_id) = query.category_id {
            list_query = list_query.bind(category_id);
        }
        if let Some(search) = &search {
            list_query = list_query.bind(search);
        }
        let items = list_query.bind(per_page).bind(offset).fetch_all(db).await?;

        Ok(ProductListResponse {
            items,
            total,
            page,
            per_page,
            total_pages: (total + per_page - 1) / per_page,
        })
    }

    pub async fn create(
        db: &SqlitePool,
        req: &CreateProductRequest,
        added_by: i64,
    ) -> Result<Product, sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query_as::<_, Product>(
            r#"
            INSERT INTO products (
                name, category_id, price_cents, stock_quantity, description, abv,
                bottle_size_ml, vintage, varietal, region, country, image_url,
                added_by, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(req.name.trim())
        .bind(req.category_id)
        .bind(req.price)
        .bind(req.stock_quantity)
        .bind(&req.description)
        .bind(req.abv)
        .bind(req.bottle_size_ml)
        .bind(req.vintage)
        .bind(&req.varietal)
        .bind(&req.region)
        .bind(&req.country)
        .bind(&req.image_url)
        .bind(added_by)
        .bind(&now)
        .bind(&now)
        .fetch_one(db)
        .await
    }

    pub async fn update(
        db: &SqlitePool,
        id: i64,
        req: &UpdateProductRequest,
    ) -> Result<Option<Product>, sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query_as::<_, Product>(
            r#"
            UPDATE products SET
                name = COALESCE(?, name),
                price_cents = COALESCE(?, price_cents),
                stock_quantity = COALESCE(?, stock_quantity),
                category_id = COALESCE(?, category_id),
                description = COALESCE(?, description),
                abv = COALESCE(?, abv),
                bottle_size_ml = COALESCE(?, bottle_size_ml),
                vintage = COALESCE(?, vintage),
                varietal = COALESCE(?, varietal),
                region = COALESCE(?, region),
                country = COALESCE(?, country),
                image_url = COALESCE(?, image_url),
                updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(req.name.as_deref().map(str::trim))
        .bind(req.price)
        .bind(req.stock_quantity)
        .bind(req.category_id)
        .bind(&req.description)
        .bind(req.abv)
        .bind(req.bottle_size_ml)
        .bind(req.vintage)
        .bind(&req.varietal)
        .bind(&req.region)
        .bind(&req.country)
        .bind(&req.image_url)
        .bind(&now)
        .bind(id)
        .fetch_optional(db)
        .await
    }

    pub async fn has_sales(db: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invoice_items WHERE product_id = ?")
            .bind(id)
            .fetch_one(db)
            .await?;
        Ok(count > 0)
    }

    pub async fn delete(db: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set the stock level. Returns `(previous, new)` or `None` if the product is missing.
    pub async fn set_stock(
        db: &SqlitePool,
        id: i64,
        quantity: i64,
    ) -> Result<Option<(i64, i64)>, sqlx::Error> {
        // IMMEDIATE so a checkout committing between the read and the write
        // makes us wait instead of failing with a stale snapshot
        let mut tx = db.begin_with("BEGIN IMMEDIATE").await?;
        let previous: Option<i64> =
            sqlx::query_scalar("SELECT stock_quantity FROM products WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(previous) = previous else {
            return Ok(None);
        };

        sqlx::query("UPDATE products SET stock_quantity = ?, updated_at = ? WHERE id = ?")
            .bind(quantity)
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some((previous, quantity)))
    }

    /// Apply a relative stock change. Returns `None` if the product is missing.
    ///
    /// The new level is computed in Rust and must stay within `0..=MAX_STOCK`.
    pub async fn adjust_stock(
        db: &SqlitePool,
        id: i64,
        delta: i64,
    ) -> Result<Option<StockChange>, sqlx::Error> {
        let mut tx = db.begin_with("BEGIN IMMEDIATE").await?;
        let current: Option<i64> =
            sqlx::query_scalar("SELECT stock_quantity FROM products WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(current) = current else {
            return Ok(None);
        };

        let new_quantity = match current.checked_add(delta) {
            Some(n) if n < 0 => return Ok(Some(StockChange::BelowZero { available: current })),
            Some(n) if n <= MAX_STOCK => n,
            _ => return Ok(Some(StockChange::AboveMax { current })),
        };

        sqlx::query("UPDATE products SET stock_quantity = ?, updated_at = ? WHERE id = ?")
            .bind(new_quantity)
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(StockChange::Applied {
            previous: current,
            new: new_quantity,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::{self, Role, User};

    async fn setup() -> (tempfile::TempDir, SqlitePool, i64) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::init(dir.path(), &DatabaseConfig::default()).await.unwrap();
        let user = User::create(&pool, "keeper", "unused-hash", &[Role::Staff], false)
            .await
            .unwrap();
        (dir, pool, user.id)
    }

    async fn product(pool: &SqlitePool, added_by: i64, name: &str, stock: i64) -> i64 {
        let req = CreateProductRequest {
            name: name.to_string(),
            price: Money::from_cents(1999).unwrap(),
            stock_quantity: stock,
            category_id: None,
            description: None,
            abv: None,
            bottle_size_ml: None,
            vintage: None,
            varietal: None,
            region: None,
            country: None,
            image_url: None,
        };
        Product::create(pool, &req, added_by).await.unwrap().id
    }

    #[tokio::test]
    async fn test_adjust_stock_never_goes_below_zero() {
        let (_dir, pool, user) = setup().await;
        let id = product(&pool, user, "Fino Sherry", 4).await;

        let change = Product::adjust_stock(&pool, id, -5).await.unwrap();
        assert_eq!(change, Some(StockChange::BelowZero { available: 4 }));
        assert_eq!(Product::find(&pool, id).await.unwrap().unwrap().stock_quantity, 4);

        let change = Product::adjust_stock(&pool, id, -4).await.unwrap();
        assert_eq!(change, Some(StockChange::Applied { previous: 4, new: 0 }));
    }

    #[tokio::test]
    async fn test_adjust_stock_rejects_overflow() {
        let (_dir, pool, user) = setup().await;
        let id = product(&pool, user, "Amontillado", 10).await;

        let change = Product::adjust_stock(&pool, id, i64::MAX).await.unwrap();
        assert_eq!(change, Some(StockChange::AboveMax { current: 10 }));

        // The column must still hold an integer the model can decode
        let stored = Product::find(&pool, id).await.unwrap().unwrap();
        assert_eq!(stored.stock_quantity, 10);
        let column_type: String =
            sqlx::query_scalar("SELECT typeof(stock_quantity) FROM products WHERE id = ?")
                .bind(id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(column_type, "integer");

        let change = Product::adjust_stock(&pool, id, MAX_STOCK - 10).await.unwrap();
        assert_eq!(
            change,
            Some(StockChange::Applied {
                previous: 10,
                new: MAX_STOCK
            })
        );
        let change = Product::adjust_stock(&pool, id, 1).await.unwrap();
        assert_eq!(change, Some(StockChange::AboveMax { current: MAX_STOCK }));
    }

    #[tokio::test]
    async fn test_stock_changes_on_missing_product() {
        let (_dir, pool, _) = setup().await;
        assert_eq!(Product::adjust_stock(&pool, 999, 1).await.unwrap(), None);
        assert_eq!(Product::set_stock(&pool, 999, 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_stock_reports_previous_level() {
        let (_dir, pool, user) = setup().await;
        let id = product(&pool, user, "Manzanilla", 7).await;

        assert_eq!(Product::set_stock(&pool, id, 12).await.unwrap(), Some((7, 12)));
        assert_eq!(Product::set_stock(&pool, id, 0).await.unwrap(), Some((12, 0)));
        assert_eq!(Product::find(&pool, id).await.unwrap().unwrap().stock_quantity, 0);
    }

    #[tokio::test]
    async fn test_list_filters_and_far_pages() {
        let (_dir, pool, user) = setup().await;
        product(&pool, user, "Oloroso", 3).await;
        product(&pool, user, "Palo Cortado", 0).await;

        let query = ProductQuery {
            in_stock_only: true,
            ..ProductQuery::default()
        };
        let listed = Product::list(&pool, &query).await.unwrap();
        assert_eq!(listed.total, 1);
        assert_eq!(listed.items[0].product.name, "Oloroso");

        let query = ProductQuery {
            search: Some("CORTADO".to_string()),
            ..ProductQuery::default()
        };
        assert_eq!(Product::list(&pool, &query).await.unwrap().total, 1);

        let query = ProductQuery {
            page: Some(i64::MAX),
            per_page: Some(100),
            ..ProductQuery::default()
        };
        let listed = Product::list(&pool, &query).await.unwrap();
        assert!(listed.items.is_empty());
        assert_eq!(listed.total, 2);
        assert_eq!(listed.page, i64::MAX);
    }
}
