//! Sales and inventory reports for admins and super users.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

use crate::db::{
    actions, report, CategoryStock, CategoryValue, DateRange, RevenueComparison, RevenueReport,
    TopSeller, TotalStock, UserSales,
};
use crate::identity::Actor;
use crate::AppState;

use super::audit::{audit_log, require, RequestMeta};
use super::error::ApiError;

pub const DEFAULT_TOP_SELLERS: i64 = 10;
pub const MAX_TOP_SELLERS: i64 = 50;

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompareQuery {
    pub first_start: Option<String>,
    pub first_end: Option<String>,
    pub second_start: Option<String>,
    pub second_end: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TopSellersQuery {
    pub limit: Option<i64>,
    pub start: Option<String>,
    pub end: Option<String>,
}

fn parse_instant(value: Option<&str>, field: &str) -> Result<Option<DateTime<Utc>>, ApiError> {
    value
        .map(|v| {
            DateTime::parse_from_rfc3339(v)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| ApiError::validation_field(field, "Must be an RFC3339 timestamp"))
        })
        .transpose()
}

fn parse_range(
    start: Option<&str>,
    end: Option<&str>,
    start_field: &str,
    end_field: &str,
) -> Result<DateRange, ApiError> {
    let range = DateRange {
        start: parse_instant(start, start_field)?,
        end: parse_instant(end, end_field)?,
    };
    if let (Some(start), Some(end)) = (range.start, range.end) {
        if start > end {
            return Err(ApiError::validation_field(
                start_field,
                format!("Must not be after {}", end_field),
            ));
        }
    }
    Ok(range)
}

async fn require_reports(
    state: &AppState,
    meta: &RequestMeta,
    actor: &Actor,
) -> Result<(), ApiError> {
    require(
        state,
        meta,
        actor,
        actor.roles.can_view_reports(),
        actions::REPORT_UNAUTHORIZED,
    )
    .await
}

async fn record(state: &AppState, meta: &RequestMeta, actor: &Actor, action: &str, message: &str) {
    audit_log(
        state,
        meta.entry(action, message).actor(Some(actor.id)).status(200),
    )
    .await;
}

pub async fn revenue(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
    Query(query): Query<RangeQuery>,
) -> Result<Json<RevenueReport>, ApiError> {
    require_reports(&state, &meta, &actor).await?;
    let range = parse_range(query.start.as_deref(), query.end.as_deref(), "start", "end")?;

    let result = report::revenue(&state.db, range).await?;
    record(&state, &meta, &actor, actions::REPORT_REVENUE, "Calculated revenue").await;
    Ok(Json(result))
}

/// Revenue of two periods and the relative change from the first to the second
pub async fn compare_revenue(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
    Query(query): Query<CompareQuery>,
) -> Result<Json<RevenueComparison>, ApiError> {
    require_reports(&state, &meta, &actor).await?;
    let first = parse_range(
        query.first_start.as_deref(),
        query.first_end.as_deref(),
        "first_start",
        "first_end",
    )?;
    let second = parse_range(
        query.second_start.as_deref(),
        query.second_end.as_deref(),
        "second_start",
        "second_end",
    )?;

    let result = report::compare_revenue(&state.db, first, second).await?;
    record(
        &state,
        &meta,
        &actor,
        actions::REPORT_REVENUE_COMPARE,
        "Compared revenue periods",
    )
    .await;
    Ok(Json(result))
}

pub async fn total_stock(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
) -> Result<Json<TotalStock>, ApiError> {
    require_reports(&state, &meta, &actor).await?;
    let result = report::total_stock(&state.db).await?;
    record(&state, &meta, &actor, actions::REPORT_TOTAL_STOCK, "Calculated total stock").await;
    Ok(Json(result))
}

pub async fn stock_by_category(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
) -> Result<Json<Vec<CategoryStock>>, ApiError> {
    require_reports(&state, &meta, &actor).await?;
    let result = report::stock_by_category(&state.db).await?;
    record(
        &state,
        &meta,
        &actor,
        actions::REPORT_STOCK_BY_CATEGORY,
        "Calculated stock by category",
    )
    .await;
    Ok(Json(result))
}

pub async fn inventory_value(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
) -> Result<Json<Vec<CategoryValue>>, ApiError> {
    require_reports(&state, &meta, &actor).await?;
    let result = report::inventory_value_by_category(&state.db).await?;
    record(
        &state,
        &meta,
        &actor,
        actions::REPORT_INVENTORY_VALUE,
        "Calculated inventory value by category",
    )
    .await;
    Ok(Json(result))
}

pub async fn top_sellers(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
    Query(query): Query<TopSellersQuery>,
) -> Result<Json<Vec<TopSeller>>, ApiError> {
    require_reports(&state, &meta, &actor).await?;

    let limit = query.limit.unwrap_or(DEFAULT_TOP_SELLERS);
    if !(1..=MAX_TOP_SELLERS).contains(&limit) {
        return Err(ApiError::validation_field(
            "limit",
            format!("Must be between 1 and {}", MAX_TOP_SELLERS),
        ));
    }
    let range = parse_range(query.start.as_deref(), query.end.as_deref(), "start", "end")?;

    let result = report::top_sellers(&state.db, limit, range).await?;
    record(&state, &meta, &actor, actions::REPORT_TOP_SELLERS, "Listed top sellers").await;
    Ok(Json(result))
}

/// A user's sales total. Users may always see their own.
pub async fn user_sales(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<UserSales>, ApiError> {
    if id != actor.id {
        require_reports(&state, &meta, &actor).await?;
    }

    let result = report::user_sales(&state.db, id).await?;
    audit_log(
        &state,
        meta.entry(actions::REPORT_USER_SALES, "Calculated user sales")
            .actor(Some(actor.id))
            .affected(format!("User ID {}", id))
            .status(200),
    )
    .await;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        let open = parse_range(None, None, "start", "end").unwrap();
        assert!(open.start.is_none() && open.end.is_none());

        let range = parse_range(
            Some("2024-01-01T00:00:00Z"),
            Some("2024-01-31T23:59:59+01:00"),
            "start",
            "end",
        )
        .unwrap();
        assert_eq!(range.end.unwrap().to_rfc3339(), "2024-01-31T22:59:59+00:00");

        assert!(parse_range(Some("2024-02-01T00:00:00Z"), Some("2024-01-01T00:00:00Z"), "start", "end").is_err());
        assert!(parse_range(Some("last week"), None, "start", "end").is_err());
    }
}
