//! Checkout and invoice endpoints.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::checkout::{
    self, CheckoutError, CheckoutOptions, CheckoutReceipt, CheckoutSource, LineRequest,
};
use crate::db::{
    actions, Invoice, InvoiceDetail, InvoiceItem, InvoiceListResponse, InvoiceQuery, Money,
    Severity,
};
use crate::identity::Actor;
use crate::AppState;

use super::audit::{audit_error, audit_log, require, RequestMeta};
use super::auth::AuthAttempt;
use super::error::ApiError;

/// Checkout request body. Every field is optional; an absent `items` list
/// means "check out the cart".
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckoutBody {
    pub items: Option<Vec<LineRequest>>,
    pub notes: Option<String>,
    pub expected_total: Option<Money>,
    pub on_behalf_of: Option<i64>,
}

/// An empty body is accepted and means no options
fn parse_body(body: &Bytes) -> Result<CheckoutBody, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CheckoutBody::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid checkout request: {}", e)))
}

/// Check out the caller's (or the `on_behalf_of` user's) cart
pub async fn checkout_cart(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    auth: AuthAttempt,
    body: Bytes,
) -> Result<(StatusCode, Json<CheckoutReceipt>), ApiError> {
    run_checkout(&state, &meta, auth, &body, true).await
}

/// Check out an explicit list of lines, or the cart when `items` is absent
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    auth: AuthAttempt,
    body: Bytes,
) -> Result<(StatusCode, Json<CheckoutReceipt>), ApiError> {
    run_checkout(&state, &meta, auth, &body, false).await
}

/// Writes exactly one `CHECKOUT_*` audit entry whatever the outcome
async fn run_checkout(
    state: &AppState,
    meta: &RequestMeta,
    auth: AuthAttempt,
    body: &Bytes,
    cart_only: bool,
) -> Result<(StatusCode, Json<CheckoutReceipt>), ApiError> {
    let actor = match auth.0 {
        Ok(actor) => actor,
        Err(e) => {
            let err = ApiError::from(e);
            let action = if err.status() == StatusCode::UNAUTHORIZED {
                actions::CHECKOUT_UNAUTHORIZED
            } else {
                actions::CHECKOUT_ERROR
            };
            return Err(audit_error(state, meta, None, action, None, err).await);
        }
    };

    let body = match parse_body(body) {
        Ok(body) => body,
        Err(err) => {
            return Err(audit_error(
                state,
                meta,
                Some(actor.id),
                actions::CHECKOUT_INVALID,
                None,
                err,
            )
            .await)
        }
    };

    let source = match body.items {
        Some(items) if !cart_only => CheckoutSource::Items(items),
        _ => CheckoutSource::Cart,
    };
    let options = CheckoutOptions {
        notes: body.notes,
        expected_total: body.expected_total,
        on_behalf_of: body.on_behalf_of,
    };

    match checkout::checkout(&state.db, &actor, source, options).await {
        Ok(receipt) => {
            audit_log(
                state,
                meta.entry(
                    actions::CHECKOUT_SUCCESS,
                    format!(
                        "Checkout completed for {} with {} lines",
                        receipt.total,
                        receipt.lines.len()
                    ),
                )
                .actor(Some(actor.id))
                .affected(format!("Invoice {}", receipt.invoice_number))
                .severity(Severity::Info)
                .status(201)
                .data(serde_json::json!({
                    "invoice_id": receipt.invoice_id,
                    "user_id": receipt.user_id,
                    "total": receipt.total,
                    "lines": receipt.lines,
                })),
            )
            .await;
            Ok((StatusCode::CREATED, Json(receipt)))
        }
        Err(e) => {
            let action = e.audit_action();
            let affected = match &e {
                CheckoutError::InsufficientStock { product_name, .. } => {
                    Some(format!("Product {}", product_name))
                }
                CheckoutError::ProductNotFound(id) => Some(format!("Product ID {}", id)),
                CheckoutError::UserNotFound(id) | CheckoutError::Unauthorized(id) => {
                    Some(format!("User ID {}", id))
                }
                _ => None,
            };
            Err(audit_error(state, meta, Some(actor.id), action, affected, e.into()).await)
        }
    }
}

/// Load an invoice the actor may see, auditing 404 and 403
async fn visible_invoice(
    state: &AppState,
    meta: &RequestMeta,
    actor: &Actor,
    id: i64,
) -> Result<Invoice, ApiError> {
    let invoice = match Invoice::find(&state.db, id).await? {
        Some(invoice) => invoice,
        None => {
            return Err(audit_error(
                state,
                meta,
                Some(actor.id),
                actions::INVOICE_NOT_FOUND,
                Some(format!("Invoice ID {}", id)),
                ApiError::not_found("Invoice not found"),
            )
            .await)
        }
    };

    if invoice.user_id != actor.id && !actor.roles.is_admin() {
        return Err(audit_error(
            state,
            meta,
            Some(actor.id),
            actions::INVOICE_UNAUTHORIZED,
            Some(format!("Invoice {}", invoice.invoice_number)),
            ApiError::forbidden("You do not have access to this invoice"),
        )
        .await);
    }

    Ok(invoice)
}

/// Own invoices; admins may filter by `user_id` or see everyone's
pub async fn list_invoices(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
    Query(query): Query<InvoiceQuery>,
) -> Result<Json<InvoiceListResponse>, ApiError> {
    let user_id = if actor.roles.is_admin() {
        query.user_id
    } else {
        match query.user_id {
            Some(id) if id != actor.id => {
                return Err(audit_error(
                    &state,
                    &meta,
                    Some(actor.id),
                    actions::INVOICE_UNAUTHORIZED,
                    Some(format!("User ID {}", id)),
                    ApiError::forbidden("You may only list your own invoices"),
                )
                .await)
            }
            _ => Some(actor.id),
        }
    };

    let result = Invoice::list(&state.db, user_id, query.page, query.per_page).await?;

    audit_log(
        &state,
        meta.entry(
            actions::GET_INVOICES_SUCCESS,
            format!("Retrieved {} invoices", result.items.len()),
        )
        .actor(Some(actor.id))
        .status(200),
    )
    .await;

    Ok(Json(result))
}

pub async fn get_invoice(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<InvoiceDetail>, ApiError> {
    let invoice = visible_invoice(&state, &meta, &actor, id).await?;
    let items = Invoice::items(&state.db, invoice.id).await?;

    audit_log(
        &state,
        meta.entry(actions::GET_INVOICE_SUCCESS, "Retrieved invoice")
            .actor(Some(actor.id))
            .affected(format!("Invoice {}", invoice.invoice_number))
            .status(200),
    )
    .await;

    Ok(Json(InvoiceDetail { invoice, items }))
}

pub async fn get_invoice_items(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<Vec<InvoiceItem>>, ApiError> {
    let invoice = visible_invoice(&state, &meta, &actor, id).await?;
    let items = Invoice::items(&state.db, invoice.id).await?;

    audit_log(
        &state,
        meta.entry(actions::GET_INVOICE_SUCCESS, "Retrieved invoice items")
            .actor(Some(actor.id))
            .affected(format!("Invoice {}", invoice.invoice_number))
            .status(200),
    )
    .await;

    Ok(Json(items))
}

/// Remove an invoice and its items. Stock is not restored.
pub async fn delete_invoice(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    require(
        &state,
        &meta,
        &actor,
        actor.roles.is_admin(),
        actions::INVOICE_UNAUTHORIZED,
    )
    .await?;

    let invoice = match Invoice::find(&state.db, id).await? {
        Some(invoice) => invoice,
        None => {
            return Err(audit_error(
                &state,
                &meta,
                Some(actor.id),
                actions::INVOICE_NOT_FOUND,
                Some(format!("Invoice ID {}", id)),
                ApiError::not_found("Invoice not found"),
            )
            .await)
        }
    };

    Invoice::delete(&state.db, id).await?;

    audit_log(
        &state,
        meta.entry(
            actions::DELETE_INVOICE_SUCCESS,
            format!("Deleted invoice {}", invoice.invoice_number),
        )
        .actor(Some(actor.id))
        .affected(format!("Invoice {}", invoice.invoice_number))
        .severity(Severity::Warning)
        .status(204),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_body() {
        let empty = parse_body(&Bytes::from_static(b"")).unwrap();
        assert!(empty.items.is_none());

        let body = parse_body(&Bytes::from_static(
            br#"{"items":[{"product_id":1,"quantity":2}],"expected_total":"20.00"}"#,
        ))
        .unwrap();
        assert_eq!(body.items.unwrap().len(), 1);
        assert_eq!(body.expected_total, Some(Money::from_cents(2000).unwrap()));

        assert!(parse_body(&Bytes::from_static(b"{not json")).is_err());
        assert!(parse_body(&Bytes::from_static(br#"{"total_amount":1}"#)).is_err());
    }
}
