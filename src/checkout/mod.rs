//! Checkout: turn a cart or an explicit item list into an invoice.
//!
//! Everything happens inside one `BEGIN IMMEDIATE` transaction. SQLite hands
//! out its write lock at `BEGIN`, so two checkouts never interleave their
//! stock reads and writes; the second one waits (up to the busy timeout) and
//! then validates against the stock the first one left behind.
//!
//! Lines are validated in order. The first line that references a missing
//! product or asks for more than is in stock aborts the whole checkout, and
//! dropping the transaction rolls back any decrements already made.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info};

use crate::db::{generate_invoice_number, Invoice, Money, User, MAX_CART_QUANTITY};
use crate::identity::Actor;

/// Largest quantity accepted on a single line
pub const MAX_LINE_QUANTITY: i64 = MAX_CART_QUANTITY;
pub const MAX_NOTES_LEN: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRequest {
    pub product_id: i64,
    pub quantity: i64,
}

/// Where the lines come from
#[derive(Debug, Clone)]
pub enum CheckoutSource {
    /// The target user's persisted cart, cleared on success
    Cart,
    Items(Vec<LineRequest>),
}

#[derive(Debug, Clone, Default)]
pub struct CheckoutOptions {
    pub notes: Option<String>,
    /// Client-computed total; checkout fails if it disagrees
    pub expected_total: Option<Money>,
    /// Buy for another user (requires user-management rights)
    pub on_behalf_of: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceiptLine {
    pub product_id: i64,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub line_total: Money,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutReceipt {
    pub invoice_id: i64,
    pub invoice_number: String,
    pub user_id: i64,
    pub total: Money,
    pub lines: Vec<ReceiptLine>,
    pub created_at: String,
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("{field}: {message}")]
    Validation { field: String, message: String },
    #[error("product {0} not found")]
    ProductNotFound(i64),
    #[error("user {0} not found")]
    UserNotFound(i64),
    #[error("cart is empty")]
    EmptyCart,
    #[error("insufficient stock for {product_name}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: i64,
        product_name: String,
        requested: i64,
        available: i64,
    },
    #[error("total mismatch: expected {expected}, computed {actual}")]
    TotalMismatch { expected: Money, actual: Money },
    #[error("not allowed to check out on behalf of user {0}")]
    Unauthorized(i64),
    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl CheckoutError {
    fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        CheckoutError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Audit action recorded for this failure
    pub fn audit_action(&self) -> &'static str {
        use crate::db::actions;
        match self {
            CheckoutError::Validation { .. } => actions::CHECKOUT_INVALID,
            CheckoutError::ProductNotFound(_)
            | CheckoutError::UserNotFound(_)
            | CheckoutError::EmptyCart => actions::CHECKOUT_NOT_FOUND,
            CheckoutError::InsufficientStock { .. } => actions::CHECKOUT_INSUFFICIENT_STOCK,
            CheckoutError::TotalMismatch { .. } => actions::CHECKOUT_TOTAL_MISMATCH,
            CheckoutError::Unauthorized(_) => actions::CHECKOUT_UNAUTHORIZED,
            CheckoutError::Persistence(_) => actions::CHECKOUT_ERROR,
        }
    }
}

/// Checks that need no store access
fn validate(source: &CheckoutSource, options: &CheckoutOptions) -> Result<(), CheckoutError> {
    if let Some(notes) = &options.notes {
        if notes.chars().count() > MAX_NOTES_LEN {
            return Err(CheckoutError::validation(
                "notes",
                format!("must be at most {} characters", MAX_NOTES_LEN),
            ));
        }
    }

    if let CheckoutSource::Items(lines) = source {
        if lines.is_empty() {
            return Err(CheckoutError::validation("items", "at least one item is required"));
        }
        validate_lines(lines)?;
    }

    Ok(())
}

/// Bounds on each line, applied to explicit items and to cart rows alike
fn validate_lines(lines: &[LineRequest]) -> Result<(), CheckoutError> {
    for (i, line) in lines.iter().enumerate() {
        if line.product_id <= 0 {
            return Err(CheckoutError::validation(
                format!("items[{}].product_id", i),
                "must be a positive id",
            ));
        }
        if line.quantity <= 0 || line.quantity > MAX_LINE_QUANTITY {
            return Err(CheckoutError::validation(
                format!("items[{}].quantity", i),
                format!("must be between 1 and {}", MAX_LINE_QUANTITY),
            ));
        }
    }
    Ok(())
}

/// Run a checkout for `actor`. See the module docs for the guarantees.
pub async fn checkout(
    db: &SqlitePool,
    actor: &Actor,
    source: CheckoutSource,
    options: CheckoutOptions,
) -> Result<CheckoutReceipt, CheckoutError> {
    validate(&source, &options)?;

    let target_id = options.on_behalf_of.unwrap_or(actor.id);
    if target_id != actor.id {
        if !actor.roles.can_manage_users() {
            return Err(CheckoutError::Unauthorized(target_id));
        }
        if User::find_by_id(db, target_id).await?.is_none() {
            return Err(CheckoutError::UserNotFound(target_id));
        }
    }

    let from_cart = matches!(source, CheckoutSource::Cart);

    let mut tx = db.begin_with("BEGIN IMMEDIATE").await?;

    let lines = match source {
        CheckoutSource::Items(lines) => lines,
        CheckoutSource::Cart => {
            let rows: Vec<(i64, i64)> = sqlx::query_as(
                "SELECT product_id, quantity FROM cart_items WHERE user_id = ? ORDER BY id",
            )
            .bind(target_id)
            .fetch_all(&mut *tx)
            .await?;
            if rows.is_empty() {
                return Err(CheckoutError::EmptyCart);
            }
            let lines: Vec<LineRequest> = rows
                .into_iter()
                .map(|(product_id, quantity)| LineRequest {
                    product_id,
                    quantity,
                })
                .collect();
            // Rows written before the cart cap existed may still exceed it
            validate_lines(&lines)?;
            lines
        }
    };

    let now = chrono::Utc::now().to_rfc3339();
    let mut total = Money::ZERO;
    let mut priced = Vec::with_capacity(lines.len());

    for line in &lines {
        let product: Option<(String, Money, i64)> = sqlx::query_as(
            "SELECT name, price_cents, stock_quantity FROM products WHERE id = ?",
        )
        .bind(line.product_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (product_name, unit_price, available) =
            product.ok_or(CheckoutError::ProductNotFound(line.product_id))?;

        if line.quantity > available {
            return Err(CheckoutError::InsufficientStock {
                product_id: line.product_id,
                product_name,
                requested: line.quantity,
                available,
            });
        }

        let line_total = unit_price
            .checked_times(line.quantity)
            .ok_or_else(|| CheckoutError::validation("items", "line total is out of range"))?;
        total = total
            .checked_add(line_total)
            .ok_or_else(|| CheckoutError::validation("items", "invoice total is out of range"))?;

        // The guard makes a negative stock impossible even if the read above were stale
        let updated = sqlx::query(
            r#"
            UPDATE products SET stock_quantity = stock_quantity - ?, updated_at = ?
            WHERE id = ? AND stock_quantity >= ?
            "#,
        )
        .bind(line.quantity)
        .bind(&now)
        .bind(line.product_id)
        .bind(line.quantity)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(CheckoutError::InsufficientStock {
                product_id: line.product_id,
                product_name,
                requested: line.quantity,
                available,
            });
        }

        debug!(
            product_id = line.product_id,
            quantity = line.quantity,
            remaining = available - line.quantity,
            "Reserved stock"
        );

        priced.push(ReceiptLine {
            product_id: line.product_id,
            product_name,
            quantity: line.quantity,
            unit_price,
            line_total,
        });
    }

    if let Some(expected) = options.expected_total {
        if expected != total {
            return Err(CheckoutError::TotalMismatch {
                expected,
                actual: total,
            });
        }
    }

    let invoice_number = generate_invoice_number();
    let invoice = Invoice::insert(
        &mut *tx,
        &invoice_number,
        target_id,
        actor.id,
        total,
        options.notes.as_deref(),
    )
    .await?;

    for line in &priced {
        Invoice::insert_item(&mut *tx, invoice.id, line.product_id, line.quantity, line.unit_price)
            .await?;
    }

    if from_cart {
        sqlx::query("DELETE FROM cart_items WHERE user_id = ?")
            .bind(target_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    info!(
        invoice_id = invoice.id,
        invoice_number = %invoice.invoice_number,
        user_id = target_id,
        actor_id = actor.id,
        total = %total,
        lines = priced.len(),
        "Checkout completed"
    );

    Ok(CheckoutReceipt {
        invoice_id: invoice.id,
        invoice_number: invoice.invoice_number,
        user_id: target_id,
        total,
        lines: priced,
        created_at: invoice.created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::{self, Cart, CreateProductRequest, Product, Role, RoleSet, UpdateProductRequest};

    struct Fixture {
        _dir: tempfile::TempDir,
        pool: SqlitePool,
        staff: Actor,
        admin: Actor,
    }

    async fn actor(pool: &SqlitePool, username: &str, role: Role) -> Actor {
        let user = User::create(pool, username, "unused-hash", &[role], role == Role::Admin)
            .await
            .unwrap();
        Actor {
            id: user.id,
            username: user.username,
            roles: RoleSet::new(vec![role], role == Role::Admin),
            jti: String::new(),
        }
    }

    async fn setup() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::init(dir.path(), &DatabaseConfig::default()).await.unwrap();
        let staff = actor(&pool, "staff", Role::Staff).await;
        let admin = actor(&pool, "admin", Role::Admin).await;
        Fixture {
            _dir: dir,
            pool,
            staff,
            admin,
        }
    }

    async fn product(pool: &SqlitePool, name: &str, cents: i64, stock: i64) -> i64 {
        let req = CreateProductRequest {
            name: name.to_string(),
            price: Money::from_cents(cents).unwrap(),
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
        Product::create(pool, &req, 1).await.unwrap().id
    }

    async fn stock(pool: &SqlitePool, id: i64) -> i64 {
        Product::find(pool, id).await.unwrap().unwrap().stock_quantity
    }

    async fn invoice_count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM invoices")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    fn items(lines: &[(i64, i64)]) -> CheckoutSource {
        CheckoutSource::Items(
            lines
                .iter()
                .map(|&(product_id, quantity)| LineRequest {
                    product_id,
                    quantity,
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_checkout_decrements_stock_and_totals() {
        let f = setup().await;
        let p = product(&f.pool, "Rioja Reserva", 1000, 3).await;

        let receipt = checkout(&f.pool, &f.staff, items(&[(p, 2)]), CheckoutOptions::default())
            .await
            .unwrap();

        assert_eq!(receipt.total.to_string(), "20.00");
        assert_eq!(receipt.user_id, f.staff.id);
        assert_eq!(stock(&f.pool, p).await, 1);

        let invoice = Invoice::find(&f.pool, receipt.invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.total.cents(), 2000);
        assert_eq!(invoice.status, "completed");
        let lines = Invoice::items(&f.pool, invoice.id).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 2);
        assert_eq!(lines[0].price.cents(), 1000);
    }

    #[tokio::test]
    async fn test_total_reconciles_with_items() {
        let f = setup().await;
        let a = product(&f.pool, "Chablis", 2450, 10).await;
        let b = product(&f.pool, "Islay Malt", 6199, 10).await;

        let receipt = checkout(
            &f.pool,
            &f.staff,
            items(&[(a, 3), (b, 2)]),
            CheckoutOptions::default(),
        )
        .await
        .unwrap();

        let sum: i64 = Invoice::items(&f.pool, receipt.invoice_id)
            .await
            .unwrap()
            .iter()
            .map(|i| i.price.cents() * i.quantity)
            .sum();
        assert_eq!(sum, receipt.total.cents());
        assert_eq!(sum, 3 * 2450 + 2 * 6199);
    }

    #[tokio::test]
    async fn test_insufficient_stock_on_later_line_changes_nothing() {
        let f = setup().await;
        let p1 = product(&f.pool, "Prosecco", 1200, 5).await;
        let p2 = product(&f.pool, "Barolo", 5500, 1).await;

        let err = checkout(
            &f.pool,
            &f.staff,
            items(&[(p1, 2), (p2, 999)]),
            CheckoutOptions::default(),
        )
        .await
        .unwrap_err();

        match err {
            CheckoutError::InsufficientStock {
                product_id,
                requested,
                available,
                ..
            } => {
                assert_eq!(product_id, p2);
                assert_eq!(requested, 999);
                assert_eq!(available, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(stock(&f.pool, p1).await, 5);
        assert_eq!(stock(&f.pool, p2).await, 1);
        assert_eq!(invoice_count(&f.pool).await, 0);
    }

    #[tokio::test]
    async fn test_missing_product_rolls_back() {
        let f = setup().await;
        let p = product(&f.pool, "Cava", 900, 4).await;

        let err = checkout(&f.pool, &f.staff, items(&[(p, 1), (9999, 1)]), CheckoutOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::ProductNotFound(9999)));
        assert_eq!(stock(&f.pool, p).await, 4);
        assert_eq!(invoice_count(&f.pool).await, 0);
    }

    #[tokio::test]
    async fn test_repeated_product_sees_earlier_decrement() {
        let f = setup().await;
        let p = product(&f.pool, "Tawny Port", 3000, 3).await;

        let err = checkout(&f.pool, &f.staff, items(&[(p, 2), (p, 2)]), CheckoutOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::InsufficientStock { available: 1, .. }
        ));
        assert_eq!(stock(&f.pool, p).await, 3);
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_write() {
        let f = setup().await;
        let p = product(&f.pool, "Sancerre", 2000, 3).await;

        for source in [
            items(&[]),
            items(&[(p, 0)]),
            items(&[(-1, 1)]),
            items(&[(p, MAX_LINE_QUANTITY + 1)]),
        ] {
            let err = checkout(&f.pool, &f.staff, source, CheckoutOptions::default())
                .await
                .unwrap_err();
            assert!(matches!(err, CheckoutError::Validation { .. }));
        }

        let options = CheckoutOptions {
            notes: Some("x".repeat(MAX_NOTES_LEN + 1)),
            ..CheckoutOptions::default()
        };
        let err = checkout(&f.pool, &f.staff, items(&[(p, 1)]), options)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Validation { .. }));
        assert_eq!(stock(&f.pool, p).await, 3);
    }

    #[tokio::test]
    async fn test_prices_are_frozen_on_the_invoice() {
        let f = setup().await;
        let p = product(&f.pool, "Champagne", 4500, 5).await;

        let receipt = checkout(&f.pool, &f.staff, items(&[(p, 1)]), CheckoutOptions::default())
            .await
            .unwrap();

        let update = UpdateProductRequest {
            price: Some(Money::from_cents(9900).unwrap()),
            ..UpdateProductRequest::default()
        };
        Product::update(&f.pool, p, &update).await.unwrap();

        let invoice = Invoice::find(&f.pool, receipt.invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.total.cents(), 4500);
        let lines = Invoice::items(&f.pool, invoice.id).await.unwrap();
        assert_eq!(lines[0].price.cents(), 4500);
    }

    #[tokio::test]
    async fn test_cart_checkout_clears_cart_only_on_success() {
        let f = setup().await;
        let p1 = product(&f.pool, "Merlot", 1500, 10).await;
        let p2 = product(&f.pool, "Malbec", 1800, 1).await;

        Cart::add(&f.pool, f.staff.id, p1, 2).await.unwrap();
        Cart::add(&f.pool, f.staff.id, p2, 3).await.unwrap();

        let err = checkout(&f.pool, &f.staff, CheckoutSource::Cart, CheckoutOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::InsufficientStock { .. }));
        assert_eq!(Cart::lines(&f.pool, f.staff.id).await.unwrap().len(), 2);
        assert_eq!(stock(&f.pool, p1).await, 10);

        Cart::update(&f.pool, f.staff.id, p2, 1).await.unwrap();
        let receipt = checkout(&f.pool, &f.staff, CheckoutSource::Cart, CheckoutOptions::default())
            .await
            .unwrap();
        assert_eq!(receipt.total.cents(), 2 * 1500 + 1800);
        assert!(Cart::lines(&f.pool, f.staff.id).await.unwrap().is_empty());
        assert_eq!(stock(&f.pool, p1).await, 8);
        assert_eq!(stock(&f.pool, p2).await, 0);
    }

    #[tokio::test]
    async fn test_empty_cart() {
        let f = setup().await;
        let err = checkout(&f.pool, &f.staff, CheckoutSource::Cart, CheckoutOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::EmptyCart));
    }

    #[tokio::test]
    async fn test_cart_lines_are_bounded_like_items() {
        let f = setup().await;
        let p = product(&f.pool, "Tawny Port", 3000, 50_000).await;

        sqlx::query(
            "INSERT INTO cart_items (user_id, product_id, quantity, added_at) VALUES (?, ?, ?, ?)",
        )
        .bind(f.staff.id)
        .bind(p)
        .bind(MAX_LINE_QUANTITY + 1)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&f.pool)
        .await
        .unwrap();

        let err = checkout(&f.pool, &f.staff, CheckoutSource::Cart, CheckoutOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Validation { .. }));
        assert_eq!(stock(&f.pool, p).await, 50_000);
        assert_eq!(invoice_count(&f.pool).await, 0);
    }

    #[tokio::test]
    async fn test_expected_total_mismatch_commits_nothing() {
        let f = setup().await;
        let p = product(&f.pool, "Rosé", 1100, 5).await;

        let options = CheckoutOptions {
            expected_total: Some(Money::from_cents(1000).unwrap()),
            ..CheckoutOptions::default()
        };
        let err = checkout(&f.pool, &f.staff, items(&[(p, 1)]), options)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::TotalMismatch { .. }));
        assert_eq!(stock(&f.pool, p).await, 5);

        let options = CheckoutOptions {
            expected_total: Some(Money::from_cents(1100).unwrap()),
            ..CheckoutOptions::default()
        };
        assert!(checkout(&f.pool, &f.staff, items(&[(p, 1)]), options).await.is_ok());
    }

    #[tokio::test]
    async fn test_on_behalf_of_requires_user_management() {
        let f = setup().await;
        let p = product(&f.pool, "Vermouth", 1400, 5).await;

        let options = CheckoutOptions {
            on_behalf_of: Some(f.admin.id),
            ..CheckoutOptions::default()
        };
        let err = checkout(&f.pool, &f.staff, items(&[(p, 1)]), options)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Unauthorized(_)));

        let options = CheckoutOptions {
            on_behalf_of: Some(f.staff.id),
            ..CheckoutOptions::default()
        };
        let receipt = checkout(&f.pool, &f.admin, items(&[(p, 1)]), options)
            .await
            .unwrap();
        let invoice = Invoice::find(&f.pool, receipt.invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.user_id, f.staff.id);
        assert_eq!(invoice.created_by, f.admin.id);

        let options = CheckoutOptions {
            on_behalf_of: Some(4242),
            ..CheckoutOptions::default()
        };
        let err = checkout(&f.pool, &f.admin, items(&[(p, 1)]), options)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::UserNotFound(4242)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_buyers_of_last_bottle() {
        let f = setup().await;
        let p = product(&f.pool, "Last Bottle", 25000, 1).await;
        let other = actor(&f.pool, "other", Role::Staff).await;

        let (a, b) = tokio::join!(
            checkout(&f.pool, &f.staff, items(&[(p, 1)]), CheckoutOptions::default()),
            checkout(&f.pool, &other, items(&[(p, 1)]), CheckoutOptions::default()),
        );

        let results = [a, b];
        let successes = results.iter().filter(|r| r.is_ok()).count();
        let short = results
            .iter()
            .filter(|r| matches!(r, Err(CheckoutError::InsufficientStock { available: 0, .. })))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(short, 1);
        assert_eq!(stock(&f.pool, p).await, 0);
        assert_eq!(invoice_count(&f.pool).await, 1);
    }

    #[tokio::test]
    async fn test_deleting_invoice_cascades_only_its_items() {
        let f = setup().await;
        let p = product(&f.pool, "Gin", 3200, 10).await;

        let first = checkout(&f.pool, &f.staff, items(&[(p, 1)]), CheckoutOptions::default())
            .await
            .unwrap();
        let second = checkout(&f.pool, &f.staff, items(&[(p, 2)]), CheckoutOptions::default())
            .await
            .unwrap();

        assert!(Invoice::delete(&f.pool, first.invoice_id).await.unwrap());

        let orphans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invoice_items WHERE invoice_id = ?")
            .bind(first.invoice_id)
            .fetch_one(&f.pool)
            .await
            .unwrap();
        assert_eq!(orphans, 0);
        assert_eq!(Invoice::items(&f.pool, second.invoice_id).await.unwrap().len(), 1);
        // Deleting an invoice is not a return
        assert_eq!(stock(&f.pool, p).await, 7);
    }
}
