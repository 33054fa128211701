//! Append-only audit trail.
//!
//! Entries are inserted and read, never updated or deleted. The acting
//! username is snapshotted at write time so the trail stays readable after a
//! user is removed.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// Audit log entry as stored
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: i64,
    pub created_at: String,
    pub user_id: Option<i64>,
    pub acting_username: Option<String>,
    pub action: String,
    pub message: String,
    pub affected_name: Option<String>,
    pub severity: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub endpoint: Option<String>,
    pub method: Option<String>,
    pub status_code: Option<i64>,
    pub additional_data: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// Request metadata attached to an entry
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub endpoint: Option<String>,
    pub method: Option<String>,
}

/// An entry about to be recorded.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub user_id: Option<i64>,
    pub action: String,
    pub message: String,
    pub affected_name: Option<String>,
    pub severity: Severity,
    pub request: RequestInfo,
    pub status_code: Option<u16>,
    pub additional_data: Option<serde_json::Value>,
}

impl NewAuditEntry {
    pub fn new(action: &str, message: impl Into<String>) -> Self {
        Self {
            user_id: None,
            action: action.to_string(),
            message: message.into(),
            affected_name: None,
            severity: Severity::Info,
            request: RequestInfo::default(),
            status_code: None,
            additional_data: None,
        }
    }

    pub fn actor(mut self, user_id: Option<i64>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn affected(mut self, name: impl Into<String>) -> Self {
        self.affected_name = Some(name.into());
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn request(mut self, request: RequestInfo) -> Self {
        self.request = request;
        self
    }

    pub fn status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.additional_data = Some(data);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogListResponse {
    pub items: Vec<AuditLog>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

/// Query parameters for filtering audit logs
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuditLogQuery {
    /// Exact action code, e.g. "CHECKOUT_SUCCESS"
    pub action: Option<String>,
    pub user_id: Option<i64>,
    pub severity: Option<Severity>,
    /// RFC3339 lower bound, inclusive
    pub start: Option<String>,
    /// RFC3339 upper bound, inclusive
    pub end: Option<String>,
    /// 1-indexed, defaults to 1
    pub page: Option<i64>,
    /// Defaults to 50, max 100
    pub per_page: Option<i64>,
}

/// Action codes written by the handlers
pub mod actions {
    pub const LOGIN_SUCCESS: &str = "LOGIN_SUCCESS";
    pub const LOGIN_FAILURE: &str = "LOGIN_FAILURE";
    pub const LOGIN_ATTEMPT: &str = "LOGIN_ATTEMPT";
    pub const LOGOUT: &str = "LOGOUT";
    pub const SIGNUP_SUCCESS: &str = "SIGNUP_SUCCESS";
    pub const SIGNUP_FAILURE: &str = "SIGNUP_FAILURE";
    pub const AUTH_FAILURE: &str = "AUTH_FAILURE";

    pub const GET_USERS_SUCCESS: &str = "GET_USERS_SUCCESS";
    pub const CREATE_USER_SUCCESS: &str = "CREATE_USER_SUCCESS";
    pub const CREATE_USER_DUPLICATE: &str = "CREATE_USER_DUPLICATE";
    pub const CREATE_USER_UNAUTHORIZED: &str = "CREATE_USER_UNAUTHORIZED";
    pub const UPDATE_ROLES_SUCCESS: &str = "UPDATE_ROLES_SUCCESS";
    pub const DELETE_USER_SUCCESS: &str = "DELETE_USER_SUCCESS";
    pub const DELETE_USER_SELF: &str = "DELETE_USER_SELF";
    pub const DELETE_USER_CONFLICT: &str = "DELETE_USER_CONFLICT";
    pub const USER_ADMIN_UNAUTHORIZED: &str = "USER_ADMIN_UNAUTHORIZED";

    pub const CREATE_CATEGORY_SUCCESS: &str = "CREATE_CATEGORY_SUCCESS";
    pub const UPDATE_CATEGORY_SUCCESS: &str = "UPDATE_CATEGORY_SUCCESS";
    pub const DELETE_CATEGORY_SUCCESS: &str = "DELETE_CATEGORY_SUCCESS";
    pub const CATEGORY_UNAUTHORIZED: &str = "CATEGORY_UNAUTHORIZED";

    pub const CREATE_PRODUCT_SUCCESS: &str = "CREATE_PRODUCT_SUCCESS";
    pub const UPDATE_PRODUCT_SUCCESS: &str = "UPDATE_PRODUCT_SUCCESS";
    pub const DELETE_PRODUCT_SUCCESS: &str = "DELETE_PRODUCT_SUCCESS";
    pub const UPDATE_STOCK_SUCCESS: &str = "UPDATE_STOCK_SUCCESS";
    pub const UPDATE_STOCK_INVALID: &str = "UPDATE_STOCK_INVALID";
    pub const DELETE_PRODUCT_CONFLICT: &str = "DELETE_PRODUCT_CONFLICT";
    pub const PRODUCT_NOT_FOUND: &str = "PRODUCT_NOT_FOUND";
    pub const PRODUCT_UNAUTHORIZED: &str = "PRODUCT_UNAUTHORIZED";

    pub const ADD_CART_ITEM: &str = "ADD_CART_ITEM";
    pub const UPDATE_CART_ITEM: &str = "UPDATE_CART_ITEM";
    pub const REMOVE_CART_ITEM: &str = "REMOVE_CART_ITEM";
    pub const CLEAR_CART: &str = "CLEAR_CART";

    pub const CHECKOUT_SUCCESS: &str = "CHECKOUT_SUCCESS";
    pub const CHECKOUT_INVALID: &str = "CHECKOUT_INVALID";
    pub const CHECKOUT_NOT_FOUND: &str = "CHECKOUT_NOT_FOUND";
    pub const CHECKOUT_INSUFFICIENT_STOCK: &str = "CHECKOUT_INSUFFICIENT_STOCK";
    pub const CHECKOUT_TOTAL_MISMATCH: &str = "CHECKOUT_TOTAL_MISMATCH";
    pub const CHECKOUT_UNAUTHORIZED: &str = "CHECKOUT_UNAUTHORIZED";
    pub const CHECKOUT_ERROR: &str = "CHECKOUT_ERROR";

    pub const GET_INVOICES_SUCCESS: &str = "GET_INVOICES_SUCCESS";
    pub const GET_INVOICE_SUCCESS: &str = "GET_INVOICE_SUCCESS";
    pub const INVOICE_NOT_FOUND: &str = "INVOICE_NOT_FOUND";
    pub const INVOICE_UNAUTHORIZED: &str = "INVOICE_UNAUTHORIZED";
    pub const DELETE_INVOICE_SUCCESS: &str = "DELETE_INVOICE_SUCCESS";

    pub const REPORT_REVENUE: &str = "REPORT_REVENUE";
    pub const REPORT_REVENUE_COMPARE: &str = "REPORT_REVENUE_COMPARE";
    pub const REPORT_TOTAL_STOCK: &str = "REPORT_TOTAL_STOCK";
    pub const REPORT_STOCK_BY_CATEGORY: &str = "REPORT_STOCK_BY_CATEGORY";
    pub const REPORT_INVENTORY_VALUE: &str = "REPORT_INVENTORY_VALUE";
    pub const REPORT_TOP_SELLERS: &str = "REPORT_TOP_SELLERS";
    pub const REPORT_USER_SALES: &str = "REPORT_USER_SALES";
    pub const REPORT_UNAUTHORIZED: &str = "REPORT_UNAUTHORIZED";

    pub const GET_AUDIT_LOGS: &str = "GET_AUDIT_LOGS";
}

/// Insert an audit entry and return its id.
///
/// The acting username is looked up inside the same statement so the row
/// carries whatever the user was called at the time of the action.
pub async fn record_audit(db: &SqlitePool, entry: &NewAuditEntry) -> Result<i64, sqlx::Error> {
    let now = chrono::Utc::now().to_rfc3339();
    let additional_data = entry.additional_data.as_ref().map(|d| d.to_string());

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO audit_logs (
            created_at, user_id, acting_username, action, message, affected_name,
            severity, ip_address, user_agent, endpoint, method, status_code, additional_data
        )
        VALUES (?, ?, (SELECT username FROM users WHERE id = ?), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&now)
    .bind(entry.user_id)
    .bind(entry.user_id)
    .bind(&entry.action)
    .bind(&entry.message)
    .bind(&entry.affected_name)
    .bind(entry.severity.as_str())
    .bind(&entry.request.ip_address)
    .bind(&entry.request.user_agent)
    .bind(&entry.request.endpoint)
    .bind(&entry.request.method)
    .bind(entry.status_code.map(i64::from))
    .bind(&additional_data)
    .fetch_one(db)
    .await?;

    tracing::debug!(
        audit_id = id,
        action = %entry.action,
        user_id = ?entry.user_id,
        "Audit log recorded"
    );

    Ok(id)
}

/// List audit logs with filtering and pagination, newest first
pub async fn list_audit_logs(
    db: &SqlitePool,
    query: &AuditLogQuery,
) -> Result<AuditLogListResponse, sqlx::Error> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(50).clamp(1, 100);
    let offset = (page - 1).saturating_mul(per_page);

    let mut conditions = Vec::new();
    let mut bindings: Vec<String> = Vec::new();

    if let Some(action) = &query.action {
        conditions.push("action = ?");
        bindings.push(action.clone());
    }
    if let Some(severity) = &query.severity {
        conditions.push("severity = ?");
        bindings.push(severity.as_str().to_string());
    }
    if let Some(start) = &query.start {
        conditions.push("created_at >= ?");
        bindings.push(start.clone());
    }
    if let Some(end) = &query.end {
        conditions.push("created_at <= ?");
        bindings.push(end.clone());
    }
    // Bound last so the string bindings above keep their positions
    if query.user_id.is_some() {
        conditions.push("user_id = ?");
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM audit_logs {}", where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for binding in &bindings {
        count_query = count_query.bind(binding);
    }
    if let Some(user_id) = query.user_id {
        count_query = count_query.bind(user_id);
    }
    let total = count_query.fetch_one(db).await?;

    let sql = format!(
        "SELECT * FROM audit_logs {} ORDER BY id DESC LIMIT ? OFFSET ?",
        where_clause
    );
    let mut query_builder = sqlx::query_as::<_, AuditLog>(&sql);
    for binding in &bindings {
        query_builder = query_builder.bind(binding);
    }
    if let Some(user_id) = query.user_id {
        query_builder = query_builder.bind(user_id);
    }
    let items = query_builder.bind(per_page).bind(offset).fetch_all(db).await?;

    Ok(AuditLogListResponse {
        items,
        total,
        page,
        per_page,
        total_pages: (total + per_page - 1) / per_page,
    })
}

/// Distinct action codes present in the log
pub async fn list_audit_actions(db: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT DISTINCT action FROM audit_logs ORDER BY action")
        .fetch_all(db)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::{self, Role, User};

    async fn setup() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::init(dir.path(), &DatabaseConfig::default()).await.unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn test_username_snapshot_survives_user_deletion() {
        let (_dir, pool) = setup().await;
        let user = User::create(&pool, "sommelier", "unused-hash", &[Role::Staff], false)
            .await
            .unwrap();

        record_audit(
            &pool,
            &NewAuditEntry::new(actions::ADD_CART_ITEM, "Added 1 x Barolo to cart")
                .actor(Some(user.id)),
        )
        .await
        .unwrap();
        assert!(User::delete(&pool, user.id).await.unwrap());

        let logs = list_audit_logs(&pool, &AuditLogQuery::default()).await.unwrap();
        assert_eq!(logs.total, 1);
        assert_eq!(logs.items[0].acting_username.as_deref(), Some("sommelier"));
        assert_eq!(logs.items[0].user_id, Some(user.id));
    }

    #[tokio::test]
    async fn test_filters_and_newest_first() {
        let (_dir, pool) = setup().await;
        for (action, severity) in [
            (actions::LOGIN_FAILURE, Severity::Warning),
            (actions::LOGIN_SUCCESS, Severity::Info),
            (actions::LOGIN_FAILURE, Severity::Warning),
        ] {
            record_audit(&pool, &NewAuditEntry::new(action, "login").severity(severity))
                .await
                .unwrap();
        }

        let all = list_audit_logs(&pool, &AuditLogQuery::default()).await.unwrap();
        let ids: Vec<i64> = all.items.iter().map(|l| l.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(ids, sorted);

        let query = AuditLogQuery {
            action: Some(actions::LOGIN_FAILURE.to_string()),
            ..AuditLogQuery::default()
        };
        assert_eq!(list_audit_logs(&pool, &query).await.unwrap().total, 2);

        let query = AuditLogQuery {
            severity: Some(Severity::Info),
            ..AuditLogQuery::default()
        };
        assert_eq!(list_audit_logs(&pool, &query).await.unwrap().total, 1);

        let query = AuditLogQuery {
            page: Some(i64::MAX),
            ..AuditLogQuery::default()
        };
        let far = list_audit_logs(&pool, &query).await.unwrap();
        assert!(far.items.is_empty());
        assert_eq!(far.total, 3);

        assert_eq!(
            list_audit_actions(&pool).await.unwrap(),
            vec![actions::LOGIN_FAILURE, actions::LOGIN_SUCCESS]
        );
    }
}
