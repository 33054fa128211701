//! Read-only sales and inventory aggregations.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::money::Money;

/// Inclusive time window. Either end may be open.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    /// Build the `created_at` condition for `alias` plus its bindings.
    /// Timestamps are stored as UTC RFC3339 strings, which order lexically.
    fn clause(&self, alias: &str) -> (String, Vec<String>) {
        let mut conditions = Vec::new();
        let mut bindings = Vec::new();
        if let Some(start) = self.start {
            conditions.push(format!("{}.created_at >= ?", alias));
            bindings.push(start.to_rfc3339());
        }
        if let Some(end) = self.end {
            conditions.push(format!("{}.created_at <= ?", alias));
            bindings.push(end.to_rfc3339());
        }
        if conditions.is_empty() {
            (String::new(), bindings)
        } else {
            (format!("WHERE {}", conditions.join(" AND ")), bindings)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RevenueReport {
    #[serde(flatten)]
    pub range: DateRange,
    pub total_revenue: Money,
    pub invoice_count: i64,
}

#[derive(Debug, Serialize)]
pub struct RevenueComparison {
    pub first: RevenueReport,
    pub second: RevenueReport,
    pub difference: Decimal,
    /// `None` when the first period had no revenue
    pub percentage_change: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct TotalStock {
    pub total_stock: i64,
    pub product_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CategoryStock {
    pub category: String,
    pub product_count: i64,
    pub total_stock: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryValue {
    pub category: String,
    pub total_stock: i64,
    pub total_value: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TopSeller {
    pub product_id: i64,
    pub product_name: String,
    pub units_sold: i64,
    #[sqlx(rename = "revenue_cents")]
    pub revenue: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserSales {
    pub user_id: i64,
    pub invoice_count: i64,
    #[sqlx(rename = "total_cents")]
    pub total_sales: Money,
}

pub const UNCATEGORIZED: &str = "Uncategorized";

pub async fn revenue(db: &SqlitePool, range: DateRange) -> Result<RevenueReport, sqlx::Error> {
    let (where_clause, bindings) = range.clause("i");
    let sql = format!(
        "SELECT COALESCE(SUM(i.total_cents), 0), COUNT(*) FROM invoices i {}",
        where_clause
    );
    let mut query = sqlx::query_as::<_, (Money, i64)>(&sql);
    for binding in &bindings {
        query = query.bind(binding);
    }
    let (total_revenue, invoice_count) = query.fetch_one(db).await?;

    Ok(RevenueReport {
        range,
        total_revenue,
        invoice_count,
    })
}

pub async fn compare_revenue(
    db: &SqlitePool,
    first: DateRange,
    second: DateRange,
) -> Result<RevenueComparison, sqlx::Error> {
    let first = revenue(db, first).await?;
    let second = revenue(db, second).await?;
    let difference = second.total_revenue.to_decimal() - first.total_revenue.to_decimal();

    Ok(RevenueComparison {
        percentage_change: percentage_change(first.total_revenue, second.total_revenue),
        difference,
        first,
        second,
    })
}

/// Relative change from `base` to `current` in percent, two decimal places
pub fn percentage_change(base: Money, current: Money) -> Option<Decimal> {
    if base == Money::ZERO {
        return None;
    }
    let base = base.to_decimal();
    let change = (current.to_decimal() - base) / base * Decimal::ONE_HUNDRED;
    Some(change.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

pub async fn total_stock(db: &SqlitePool) -> Result<TotalStock, sqlx::Error> {
    let (total_stock, product_count): (i64, i64) =
        sqlx::query_as("SELECT COALESCE(SUM(stock_quantity), 0), COUNT(*) FROM products")
            .fetch_one(db)
            .await?;
    Ok(TotalStock {
        total_stock,
        product_count,
    })
}

pub async fn stock_by_category(db: &SqlitePool) -> Result<Vec<CategoryStock>, sqlx::Error> {
    sqlx::query_as::<_, CategoryStock>(
        r#"
        SELECT COALESCE(c.name, ?) AS category,
               COUNT(p.id) AS product_count,
               COALESCE(SUM(p.stock_quantity), 0) AS total_stock
        FROM products p
        LEFT JOIN categories c ON c.id = p.category_id
        GROUP BY COALESCE(c.name, ?)
        ORDER BY category
        "#,
    )
    .bind(UNCATEGORIZED)
    .bind(UNCATEGORIZED)
    .fetch_all(db)
    .await
}

/// Stock value (price x units) per category.
///
/// Summed in Rust with checked arithmetic: SQLite silently turns an
/// overflowing integer product into a REAL. Values saturate at `Money::MAX`.
pub async fn inventory_value_by_category(
    db: &SqlitePool,
) -> Result<Vec<CategoryValue>, sqlx::Error> {
    let rows: Vec<(String, Money, i64)> = sqlx::query_as(
        r#"
        SELECT COALESCE(c.name, ?) AS category, p.price_cents, p.stock_quantity
        FROM products p
        LEFT JOIN categories c ON c.id = p.category_id
        ORDER BY category, p.id
        "#,
    )
    .bind(UNCATEGORIZED)
    .fetch_all(db)
    .await?;

    let mut result: Vec<CategoryValue> = Vec::new();
    for (category, price, stock) in rows {
        let value = price.checked_times(stock).unwrap_or(Money::MAX);
        match result.last_mut() {
            Some(last) if last.category == category => {
                last.total_stock = last.total_stock.saturating_add(stock);
                last.total_value = last.total_value.checked_add(value).unwrap_or(Money::MAX);
            }
            _ => result.push(CategoryValue {
                category,
                total_stock: stock,
                total_value: value,
            }),
        }
    }
    Ok(result)
}

/// Best sellers by units sold, ties broken by revenue then product id
pub async fn top_sellers(
    db: &SqlitePool,
    limit: i64,
    range: DateRange,
) -> Result<Vec<TopSeller>, sqlx::Error> {
    let (where_clause, bindings) = range.clause("i");
    let sql = format!(
        r#"
        SELECT ii.product_id, p.name AS product_name,
               SUM(ii.quantity) AS units_sold,
               SUM(ii.quantity * ii.price_cents) AS revenue_cents
        FROM invoice_items ii
        INNER JOIN invoices i ON i.id = ii.invoice_id
        INNER JOIN products p ON p.id = ii.product_id
        {}
        GROUP BY ii.product_id, p.name
        ORDER BY units_sold DESC, revenue_cents DESC, ii.product_id
        LIMIT ?
        "#,
        where_clause
    );
    let mut query = sqlx::query_as::<_, TopSeller>(&sql);
    for binding in &bindings {
        query = query.bind(binding);
    }
    query.bind(limit).fetch_all(db).await
}

pub async fn user_sales(db: &SqlitePool, user_id: i64) -> Result<UserSales, sqlx::Error> {
    sqlx::query_as::<_, UserSales>(
        r#"
        SELECT ? AS user_id, COUNT(*) AS invoice_count,
               COALESCE(SUM(total_cents), 0) AS total_cents
        FROM invoices WHERE user_id = ?
        "#,
    )
    .bind(user_id)
    .bind(user_id)
    .fetch_one(db)
    .await
}
