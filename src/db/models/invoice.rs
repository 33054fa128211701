//! Invoices and their frozen-price line items.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

use super::money::Money;

pub const STATUS_COMPLETED: &str = "completed";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: i64,
    pub invoice_number: String,
    pub user_id: i64,
    pub created_by: i64,
    #[sqlx(rename = "total_cents")]
    pub total: Money,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: String,
}

/// An invoice line with the product details joined at read time.
/// `price` is the unit price captured at checkout.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceItem {
    pub id: i64,
    pub invoice_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub category_name: Option<String>,
    pub quantity: i64,
    #[sqlx(rename = "price_cents")]
    pub price: Money,
}

#[derive(Debug, Serialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct InvoiceQuery {
    /// Only honoured for callers allowed to see other users' invoices
    pub user_id: Option<i64>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct InvoiceListResponse {
    pub items: Vec<Invoice>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

/// Generate a new invoice number, `INV-YYYYMMDD-XXXXXXXXXXXX`
pub fn generate_invoice_number() -> String {
    let date = chrono::Utc::now().format("%Y%m%d");
    let suffix = uuid::Uuid::new_v4().simple().to_string()[..12].to_uppercase();
    format!("INV-{}-{}", date, suffix)
}

impl Invoice {
    /// List invoices newest first, optionally restricted to one user
    pub async fn list(
        db: &SqlitePool,
        user_id: Option<i64>,
        page: Option<i64>,
        per_page: Option<i64>,
    ) -> Result<InvoiceListResponse, sqlx::Error> {
        let page = page.unwrap_or(1).max(1);
        let per_page = per_page.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1).saturating_mul(per_page);

        let where_clause = if user_id.is_some() { "WHERE user_id = ?" } else { "" };

        let count_sql = format!("SELECT COUNT(*) FROM invoices {}", where_clause);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(user_id) = user_id {
            count_query = count_query.bind(user_id);
        }
        let total = count_query.fetch_one(db).await?;

        let sql = format!(
            "SELECT * FROM invoices {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            where_clause
        );
        let mut list_query = sqlx::query_as::<_, Invoice>(&sql);
        if let Some(user_id) = user_id {
            list_query = list_query.bind(user_id);
        }
        let items = list_query.bind(per_page).bind(offset).fetch_all(db).await?;

        Ok(InvoiceListResponse {
            items,
            total,
            page,
            per_page,
            total_pages: (total + per_page - 1) / per_page,
        })
    }

    pub async fn find(db: &SqlitePool, id: i64) -> Result<Option<Invoice>, sqlx::Error> {
        sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    /// Items in insertion order
    pub async fn items(db: &SqlitePool, invoice_id: i64) -> Result<Vec<InvoiceItem>, sqlx::Error> {
        sqlx::query_as::<_, InvoiceItem>(
            r#"
            SELECT ii.id, ii.invoice_id, ii.product_id, p.name AS product_name,
                   c.name AS category_name, ii.quantity, ii.price_cents
            FROM invoice_items ii
            INNER JOIN products p ON p.id = ii.product_id
            LEFT JOIN categories c ON c.id = p.category_id
            WHERE ii.invoice_id = ?
            ORDER BY ii.id
            "#,
        )
        .bind(invoice_id)
        .fetch_all(db)
        .await
    }

    /// Delete an invoice and, through the foreign key, its items.
    /// Stock is left as it is.
    pub async fn delete(db: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM invoices WHERE id = ?")
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Insert the invoice header on an open connection or transaction
    pub(crate) async fn insert(
        conn: &mut SqliteConnection,
        invoice_number: &str,
        user_id: i64,
        created_by: i64,
        total: Money,
        notes: Option<&str>,
    ) -> Result<Invoice, sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (invoice_number, user_id, created_by, total_cents, status, notes, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(invoice_number)
        .bind(user_id)
        .bind(created_by)
        .bind(total)
        .bind(STATUS_COMPLETED)
        .bind(notes)
        .bind(&now)
        .fetch_one(conn)
        .await
    }

    pub(crate) async fn insert_item(
        conn: &mut SqliteConnection,
        invoice_id: i64,
        product_id: i64,
        quantity: i64,
        price: Money,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO invoice_items (invoice_id, product_id, quantity, price_cents) VALUES (?, ?, ?, ?)",
        )
        .bind(invoice_id)
        .bind(product_id)
        .bind(quantity)
        .bind(price)
        .execute(conn)
        .await?;
        Ok(())
    }
}
