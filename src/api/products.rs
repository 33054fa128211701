//! Catalog endpoints and direct stock adjustment.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::db::{
    actions, Category, CreateProductRequest, Product, ProductListResponse, ProductQuery,
    ProductWithCategory, Severity, StockAdjustmentRequest, StockAdjustmentResponse, StockChange,
    UpdateProductRequest, MAX_STOCK,
};
use crate::identity::Actor;
use crate::AppState;

use super::audit::{audit_error, audit_log, require, RequestMeta};
use super::error::ApiError;
use super::validation::{validate_create_product, validate_stock, validate_update_product};

fn map_duplicate(e: sqlx::Error) -> ApiError {
    let err = ApiError::from(e);
    if err.status() == StatusCode::CONFLICT {
        ApiError::conflict("A product with this name already exists")
    } else {
        err
    }
}

/// Audit a rejected request against a product and hand the error back
async fn product_error(
    state: &AppState,
    meta: &RequestMeta,
    actor: &Actor,
    action: &str,
    id: i64,
    err: ApiError,
) -> ApiError {
    audit_error(
        state,
        meta,
        Some(actor.id),
        action,
        Some(format!("Product ID {}", id)),
        err,
    )
    .await
}

async fn ensure_category(state: &AppState, category_id: Option<i64>) -> Result<(), ApiError> {
    if let Some(id) = category_id {
        if Category::find(&state.db, id).await?.is_none() {
            return Err(ApiError::validation_field("category_id", "Category does not exist"));
        }
    }
    Ok(())
}

pub async fn list_products(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Query(query): Query<ProductQuery>,
) -> Result<Json<ProductListResponse>, ApiError> {
    Ok(Json(Product::list(&state.db, &query).await?))
}

pub async fn get_product(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<ProductWithCategory>, ApiError> {
    let product = Product::find_with_category(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Product not found"))?;
    Ok(Json(product))
}

pub async fn create_product(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
    Json(req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    require(
        &state,
        &meta,
        &actor,
        actor.roles.can_manage_inventory(),
        actions::PRODUCT_UNAUTHORIZED,
    )
    .await?;
    validate_create_product(&req)?;
    ensure_category(&state, req.category_id).await?;

    let product = Product::create(&state.db, &req, actor.id)
        .await
        .map_err(map_duplicate)?;

    audit_log(
        &state,
        meta.entry(
            actions::CREATE_PRODUCT_SUCCESS,
            format!("Added product {}", product.name),
        )
        .actor(Some(actor.id))
        .affected(format!("Product {}", product.name))
        .status(201)
        .data(serde_json::json!({
            "product_id": product.id,
            "price": product.price,
            "stock_quantity": product.stock_quantity,
        })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn update_product(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
    Path(id): Path<i64>,
    Json(req): Json<UpdateProductRequest>,
) -> Result<Json<Product>, ApiError> {
    require(
        &state,
        &meta,
        &actor,
        actor.roles.can_manage_inventory(),
        actions::PRODUCT_UNAUTHORIZED,
    )
    .await?;
    validate_update_product(&req)?;
    ensure_category(&state, req.category_id).await?;

    let Some(product) = Product::update(&state.db, id, &req)
        .await
        .map_err(map_duplicate)?
    else {
        let err = ApiError::not_found("Product not found");
        return Err(
            product_error(&state, &meta, &actor, actions::PRODUCT_NOT_FOUND, id, err).await,
        );
    };

    audit_log(
        &state,
        meta.entry(
            actions::UPDATE_PRODUCT_SUCCESS,
            format!("Updated product {}", product.name),
        )
        .actor(Some(actor.id))
        .affected(format!("Product {}", product.name))
        .status(200),
    )
    .await;

    Ok(Json(product))
}

/// Delete a product. Products that appear on invoices cannot be deleted.
pub async fn delete_product(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    require(
        &state,
        &meta,
        &actor,
        actor.roles.can_manage_inventory(),
        actions::PRODUCT_UNAUTHORIZED,
    )
    .await?;

    let Some(product) = Product::find(&state.db, id).await? else {
        let err = ApiError::not_found("Product not found");
        return Err(
            product_error(&state, &meta, &actor, actions::PRODUCT_NOT_FOUND, id, err).await,
        );
    };

    if Product::has_sales(&state.db, id).await? {
        let err = ApiError::conflict("Product appears on invoices and cannot be deleted");
        return Err(product_error(
            &state,
            &meta,
            &actor,
            actions::DELETE_PRODUCT_CONFLICT,
            id,
            err,
        )
        .await);
    }

    Product::delete(&state.db, id).await?;

    audit_log(
        &state,
        meta.entry(
            actions::DELETE_PRODUCT_SUCCESS,
            format!("Deleted product {}", product.name),
        )
        .actor(Some(actor.id))
        .affected(format!("Product {}", product.name))
        .status(204),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Set or shift a product's stock. Exactly one of `quantity` and `delta`.
pub async fn update_stock(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
    Path(id): Path<i64>,
    Json(req): Json<StockAdjustmentRequest>,
) -> Result<Json<StockAdjustmentResponse>, ApiError> {
    require(
        &state,
        &meta,
        &actor,
        actor.roles.can_manage_inventory(),
        actions::PRODUCT_UNAUTHORIZED,
    )
    .await?;

    let outcome = match (req.quantity, req.delta) {
        (Some(quantity), None) => {
            if let Err(e) = validate_stock(quantity) {
                let err = ApiError::validation_field("quantity", e);
                return Err(product_error(
                    &state,
                    &meta,
                    &actor,
                    actions::UPDATE_STOCK_INVALID,
                    id,
                    err,
                )
                .await);
            }
            Product::set_stock(&state.db, id, quantity)
                .await?
                .map(|(previous, new)| StockChange::Applied { previous, new })
        }
        (None, Some(delta)) if delta.checked_abs().is_some_and(|d| d <= MAX_STOCK) => {
            Product::adjust_stock(&state.db, id, delta).await?
        }
        (None, Some(_)) => {
            let err = ApiError::validation_field(
                "delta",
                format!("Delta must be between -{0} and {0}", MAX_STOCK),
            );
            return Err(product_error(
                &state,
                &meta,
                &actor,
                actions::UPDATE_STOCK_INVALID,
                id,
                err,
            )
            .await);
        }
        _ => {
            let err =
                ApiError::validation_field("quantity", "Provide exactly one of quantity or delta");
            return Err(product_error(
                &state,
                &meta,
                &actor,
                actions::UPDATE_STOCK_INVALID,
                id,
                err,
            )
            .await);
        }
    };

    let (previous, new) = match outcome {
        Some(StockChange::Applied { previous, new }) => (previous, new),
        Some(StockChange::BelowZero { available }) => {
            let err = ApiError::validation_field(
                "delta",
                format!("Stock cannot go below zero (available {})", available),
            );
            return Err(product_error(
                &state,
                &meta,
                &actor,
                actions::UPDATE_STOCK_INVALID,
                id,
                err,
            )
            .await);
        }
        Some(StockChange::AboveMax { current }) => {
            let err = ApiError::validation_field(
                "delta",
                format!("Stock cannot exceed {} (current {})", MAX_STOCK, current),
            );
            return Err(product_error(
                &state,
                &meta,
                &actor,
                actions::UPDATE_STOCK_INVALID,
                id,
                err,
            )
            .await);
        }
        None => {
            let err = ApiError::not_found("Product not found");
            return Err(product_error(
                &state,
                &meta,
                &actor,
                actions::PRODUCT_NOT_FOUND,
                id,
                err,
            )
            .await);
        }
    };

    audit_log(
        &state,
        meta.entry(
            actions::UPDATE_STOCK_SUCCESS,
            format!("Stock changed from {} to {}", previous, new),
        )
        .actor(Some(actor.id))
        .affected(format!("Product ID {}", id))
        .severity(Severity::Info)
        .status(200)
        .data(serde_json::json!({ "previous_quantity": previous, "new_quantity": new })),
    )
    .await;

    Ok(Json(StockAdjustmentResponse {
        product_id: id,
        previous_quantity: previous,
        new_quantity: new,
    }))
}
