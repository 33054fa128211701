//! Audit log API endpoints and helpers.

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, MatchedPath, Query, State},
    http::{header::USER_AGENT, request::Parts, HeaderMap},
    Json,
};
use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use crate::db::{
    actions, list_audit_actions, list_audit_logs, record_audit, AuditLogListResponse,
    AuditLogQuery, NewAuditEntry, RequestInfo, Severity,
};
use crate::identity::Actor;
use crate::AppState;

use super::error::ApiError;

/// Extract client IP address from request headers or connection info.
/// Checks X-Forwarded-For, X-Real-IP headers first (for reverse proxy scenarios),
/// then falls back to the connection info.
pub fn extract_client_ip(headers: &HeaderMap, conn_info: Option<&SocketAddr>) -> Option<String> {
    // X-Forwarded-For is a comma-separated list, the first entry is the client
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        if let Some(first_ip) = forwarded.split(',').next() {
            let ip = first_ip.trim();
            if !ip.is_empty() {
                return Some(ip.to_string());
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|h| h.to_str().ok()) {
        let ip = real_ip.trim();
        if !ip.is_empty() {
            return Some(ip.to_string());
        }
    }

    conn_info.map(|addr| addr.ip().to_string())
}

/// Request metadata captured for audit entries
#[derive(Debug, Clone, Default)]
pub struct RequestMeta(pub RequestInfo);

impl RequestMeta {
    /// Start an audit entry pre-filled with this request's metadata
    pub fn entry(&self, action: &str, message: impl Into<String>) -> NewAuditEntry {
        NewAuditEntry::new(action, message).request(self.0.clone())
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequestMeta {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let conn_info = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let endpoint = parts
            .extensions
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());

        Ok(RequestMeta(RequestInfo {
            ip_address: extract_client_ip(&parts.headers, conn_info.as_ref()),
            user_agent: parts
                .headers
                .get(USER_AGENT)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string),
            endpoint: Some(endpoint),
            method: Some(parts.method.to_string()),
        }))
    }
}

/// Record an audit entry without ever failing the request.
///
/// The entry is mirrored to the operational log at its severity.
pub async fn audit_log(state: &AppState, entry: NewAuditEntry) {
    match entry.severity {
        Severity::Info => tracing::info!(
            action = %entry.action,
            user_id = ?entry.user_id,
            affected = ?entry.affected_name,
            status = ?entry.status_code,
            "{}", entry.message
        ),
        Severity::Warning => tracing::warn!(
            action = %entry.action,
            user_id = ?entry.user_id,
            affected = ?entry.affected_name,
            status = ?entry.status_code,
            "{}", entry.message
        ),
        Severity::Error => tracing::error!(
            action = %entry.action,
            user_id = ?entry.user_id,
            affected = ?entry.affected_name,
            status = ?entry.status_code,
            "{}", entry.message
        ),
    }

    if let Err(e) = record_audit(&state.db, &entry).await {
        tracing::warn!(
            action = %entry.action,
            error = %e,
            "Failed to create audit log entry"
        );
    }
}

/// Record a failure entry derived from the error being returned, then hand
/// the error back.
pub async fn audit_error(
    state: &AppState,
    meta: &RequestMeta,
    actor_id: Option<i64>,
    action: &str,
    affected: Option<String>,
    err: ApiError,
) -> ApiError {
    let severity = if err.status().is_server_error() {
        Severity::Error
    } else {
        Severity::Warning
    };
    let mut entry = meta
        .entry(action, err.message().to_string())
        .actor(actor_id)
        .severity(severity)
        .status(err.status().as_u16());
    if let Some(affected) = affected {
        entry = entry.affected(affected);
    }
    audit_log(state, entry).await;
    err
}

/// Check a capability, auditing and rejecting with 403 when it is missing
pub async fn require(
    state: &AppState,
    meta: &RequestMeta,
    actor: &Actor,
    allowed: bool,
    action: &str,
) -> Result<(), ApiError> {
    if allowed {
        return Ok(());
    }
    Err(audit_error(
        state,
        meta,
        Some(actor.id),
        action,
        None,
        ApiError::forbidden("You do not have permission to perform this action"),
    )
    .await)
}

/// List audit logs with filtering and pagination
///
/// Query parameters:
/// - action: exact action code (e.g. "CHECKOUT_SUCCESS")
/// - user_id: acting user
/// - severity: info, warning or error
/// - start / end: RFC3339 bounds, inclusive
/// - page: 1-indexed, defaults to 1
/// - per_page: defaults to 50, max 100
pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<AuditLogListResponse>, ApiError> {
    require(
        &state,
        &meta,
        &actor,
        actor.roles.can_view_audit_log(),
        actions::GET_AUDIT_LOGS,
    )
    .await?;

    let query = AuditLogQuery {
        start: normalize_bound(query.start.as_deref(), "start")?,
        end: normalize_bound(query.end.as_deref(), "end")?,
        ..query
    };

    let result = list_audit_logs(&state.db, &query).await?;
    Ok(Json(result))
}

/// Distinct action codes, for filter pickers
pub async fn list_action_types(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
) -> Result<Json<Vec<String>>, ApiError> {
    require(
        &state,
        &meta,
        &actor,
        actor.roles.can_view_audit_log(),
        actions::GET_AUDIT_LOGS,
    )
    .await?;

    Ok(Json(list_audit_actions(&state.db).await?))
}

/// Parse an RFC3339 bound and re-render it in the stored UTC form
fn normalize_bound(value: Option<&str>, field: &str) -> Result<Option<String>, ApiError> {
    value
        .map(|v| {
            chrono::DateTime::parse_from_rfc3339(v)
                .map(|dt| dt.with_timezone(&chrono::Utc).to_rfc3339())
                .map_err(|_| ApiError::validation_field(field, "Must be an RFC3339 timestamp"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_prefers_forwarded_headers() {
        let peer: SocketAddr = "10.0.0.9:5000".parse().unwrap();

        let mut headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers, Some(&peer)).as_deref(), Some("10.0.0.9"));

        headers.insert("x-real-ip", "192.168.1.4".parse().unwrap());
        assert_eq!(extract_client_ip(&headers, Some(&peer)).as_deref(), Some("192.168.1.4"));

        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(extract_client_ip(&headers, Some(&peer)).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn test_normalize_bound() {
        assert_eq!(normalize_bound(None, "start").unwrap(), None);
        assert_eq!(
            normalize_bound(Some("2024-03-01T12:00:00+02:00"), "start").unwrap(),
            Some("2024-03-01T10:00:00+00:00".to_string())
        );
        assert!(normalize_bound(Some("yesterday"), "start").is_err());
    }
}
