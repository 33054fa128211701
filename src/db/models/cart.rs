use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::money::Money;

/// Largest quantity of one product a cart may hold
pub const MAX_CART_QUANTITY: i64 = 10_000;

/// A cart row joined with the product's current name and price
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CartLine {
    pub product_id: i64,
    pub product_name: String,
    pub category_name: Option<String>,
    pub quantity: i64,
    #[sqlx(rename = "price_cents")]
    pub unit_price: Money,
    pub added_at: String,
}

#[derive(Debug, Serialize)]
pub struct CartLineResponse {
    #[serde(flatten)]
    pub line: CartLine,
    pub subtotal: Money,
}

/// Cart contents. Prices here are informational; checkout re-reads them.
#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub items: Vec<CartLineResponse>,
    pub item_count: i64,
    pub subtotal: Money,
}

#[derive(Debug, Deserialize)]
pub struct AddCartItemRequest {
    pub product_id: i64,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct UpdateCartItemRequest {
    pub quantity: i64,
}

pub struct Cart;

impl Cart {
    pub async fn lines(db: &SqlitePool, user_id: i64) -> Result<Vec<CartLine>, sqlx::Error> {
        sqlx::query_as::<_, CartLine>(
            r#"
            SELECT ci.product_id, p.name AS product_name, c.name AS category_name,
                   ci.quantity, p.price_cents, ci.added_at
            FROM cart_items ci
            INNER JOIN products p ON p.id = ci.product_id
            LEFT JOIN categories c ON c.id = p.category_id
            WHERE ci.user_id = ?
            ORDER BY ci.id
            "#,
        )
        .bind(user_id)
        .fetch_all(db)
        .await
    }

    /// Cart contents with line and cart subtotals.
    ///
    /// Subtotals saturate at `i64::MAX` cents rather than failing; they are
    /// display values only.
    pub async fn get(db: &SqlitePool, user_id: i64) -> Result<CartResponse, sqlx::Error> {
        let lines = Self::lines(db, user_id).await?;

        let mut subtotal = Money::ZERO;
        let mut item_count = 0;
        let items = lines
            .into_iter()
            .map(|line| {
                let line_total = line
                    .unit_price
                    .checked_times(line.quantity)
                    .unwrap_or(Money::MAX);
                subtotal = subtotal.checked_add(line_total).unwrap_or(Money::MAX);
                item_count += line.quantity;
                CartLineResponse {
                    line,
                    subtotal: line_total,
                }
            })
            .collect();

        Ok(CartResponse {
            items,
            item_count,
            subtotal,
        })
    }

    /// Add to the existing quantity, or create the row. Returns the new quantity
    /// and whether the row already existed, or `None` if the sum would pass
    /// `MAX_CART_QUANTITY`.
    pub async fn add(
        db: &SqlitePool,
        user_id: i64,
        product_id: i64,
        quantity: i64,
    ) -> Result<Option<(i64, bool)>, sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut tx = db.begin_with("BEGIN IMMEDIATE").await?;

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT quantity FROM cart_items WHERE user_id = ? AND product_id = ?",
        )
        .bind(user_id)
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?;

        let new_quantity = match existing.unwrap_or(0).checked_add(quantity) {
            Some(q) if q <= MAX_CART_QUANTITY => q,
            _ => return Ok(None),
        };

        if existing.is_some() {
            sqlx::query("UPDATE cart_items SET quantity = ? WHERE user_id = ? AND product_id = ?")
                .bind(new_quantity)
                .bind(user_id)
                .bind(product_id)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query(
                "INSERT INTO cart_items (user_id, product_id, quantity, added_at) VALUES (?, ?, ?, ?)",
            )
            .bind(user_id)
            .bind(product_id)
            .bind(new_quantity)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Some((new_quantity, existing.is_some())))
    }

    /// Set the quantity of an existing row. Returns false if there is none.
    pub async fn update(
        db: &SqlitePool,
        user_id: i64,
        product_id: i64,
        quantity: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE cart_items SET quantity = ? WHERE user_id = ? AND product_id = ?",
        )
        .bind(quantity)
        .bind(user_id)
        .bind(product_id)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove(db: &SqlitePool, user_id: i64, product_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = ? AND product_id = ?")
            .bind(user_id)
            .bind(product_id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove every row; returns how many were deleted
    pub async fn clear(db: &SqlitePool, user_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = ?")
            .bind(user_id)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::{self, CreateProductRequest, Product, Role, User};

    async fn setup() -> (tempfile::TempDir, SqlitePool, i64, i64) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::init(dir.path(), &DatabaseConfig::default()).await.unwrap();
        let user = User::create(&pool, "shopper", "unused-hash", &[Role::Staff], false)
            .await
            .unwrap();
        let req = CreateProductRequest {
            name: "Cava Brut".to_string(),
            price: Money::from_cents(1250).unwrap(),
            stock_quantity: 5,
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
        let product = Product::create(&pool, &req, user.id).await.unwrap();
        (dir, pool, user.id, product.id)
    }

    #[tokio::test]
    async fn test_add_sums_quantities() {
        let (_dir, pool, user, product) = setup().await;

        assert_eq!(Cart::add(&pool, user, product, 2).await.unwrap(), Some((2, false)));
        assert_eq!(Cart::add(&pool, user, product, 3).await.unwrap(), Some((5, true)));

        let cart = Cart::get(&pool, user).await.unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.item_count, 5);
        assert_eq!(cart.subtotal.to_string(), "62.50");
    }

    #[tokio::test]
    async fn test_add_respects_cart_cap() {
        let (_dir, pool, user, product) = setup().await;

        assert_eq!(
            Cart::add(&pool, user, product, MAX_CART_QUANTITY).await.unwrap(),
            Some((MAX_CART_QUANTITY, false))
        );
        assert_eq!(Cart::add(&pool, user, product, 1).await.unwrap(), None);
        assert_eq!(Cart::add(&pool, user, product, i64::MAX).await.unwrap(), None);

        let lines = Cart::lines(&pool, user).await.unwrap();
        assert_eq!(lines[0].quantity, MAX_CART_QUANTITY);
    }

    #[tokio::test]
    async fn test_update_remove_and_clear() {
        let (_dir, pool, user, product) = setup().await;

        assert!(!Cart::update(&pool, user, product, 4).await.unwrap());
        Cart::add(&pool, user, product, 1).await.unwrap();
        assert!(Cart::update(&pool, user, product, 4).await.unwrap());
        assert_eq!(Cart::lines(&pool, user).await.unwrap()[0].quantity, 4);

        assert!(Cart::remove(&pool, user, product).await.unwrap());
        assert!(!Cart::remove(&pool, user, product).await.unwrap());

        Cart::add(&pool, user, product, 1).await.unwrap();
        assert_eq!(Cart::clear(&pool, user).await.unwrap(), 1);
        assert!(Cart::get(&pool, user).await.unwrap().items.is_empty());
    }
}
