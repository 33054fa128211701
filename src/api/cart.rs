//! Cart endpoints. Every route works on the caller's own cart.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::db::{
    actions, AddCartItemRequest, Cart, CartResponse, Product, UpdateCartItemRequest,
    MAX_CART_QUANTITY,
};
use crate::identity::Actor;
use crate::AppState;

use super::audit::{audit_log, RequestMeta};
use super::error::ApiError;
use super::validation::{validate_cart_quantity, validate_id};

pub async fn get_cart(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<Json<CartResponse>, ApiError> {
    Ok(Json(Cart::get(&state.db, actor.id).await?))
}

/// Add a product, summing with any quantity already in the cart
pub async fn add_item(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
    Json(req): Json<AddCartItemRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    validate_id(req.product_id, "product_id")?;
    validate_cart_quantity(req.quantity).map_err(|e| ApiError::validation_field("quantity", e))?;

    let product = Product::find(&state.db, req.product_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Product not found"))?;

    let Some((quantity, existed)) =
        Cart::add(&state.db, actor.id, product.id, req.quantity).await?
    else {
        return Err(ApiError::validation_field(
            "quantity",
            format!("A cart may hold at most {} of one product", MAX_CART_QUANTITY),
        ));
    };

    let (action, message) = if existed {
        (
            actions::UPDATE_CART_ITEM,
            format!("Cart quantity of {} is now {}", product.name, quantity),
        )
    } else {
        (
            actions::ADD_CART_ITEM,
            format!("Added {} x {} to cart", quantity, product.name),
        )
    };
    audit_log(
        &state,
        meta.entry(action, message)
            .actor(Some(actor.id))
            .affected(format!("Product {}", product.name))
            .status(200)
            .data(serde_json::json!({ "product_id": product.id, "quantity": quantity })),
    )
    .await;

    Ok(Json(Cart::get(&state.db, actor.id).await?))
}

pub async fn update_item(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
    Path(product_id): Path<i64>,
    Json(req): Json<UpdateCartItemRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    validate_cart_quantity(req.quantity).map_err(|e| ApiError::validation_field("quantity", e))?;

    if !Cart::update(&state.db, actor.id, product_id, req.quantity).await? {
        return Err(ApiError::not_found("Product is not in the cart"));
    }

    audit_log(
        &state,
        meta.entry(
            actions::UPDATE_CART_ITEM,
            format!("Cart quantity set to {}", req.quantity),
        )
        .actor(Some(actor.id))
        .affected(format!("Product ID {}", product_id))
        .status(200),
    )
    .await;

    Ok(Json(Cart::get(&state.db, actor.id).await?))
}

pub async fn remove_item(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
    Path(product_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if !Cart::remove(&state.db, actor.id, product_id).await? {
        return Err(ApiError::not_found("Product is not in the cart"));
    }

    audit_log(
        &state,
        meta.entry(actions::REMOVE_CART_ITEM, "Removed item from cart")
            .actor(Some(actor.id))
            .affected(format!("Product ID {}", product_id))
            .status(204),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_cart(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
) -> Result<StatusCode, ApiError> {
    let removed = Cart::clear(&state.db, actor.id).await?;

    audit_log(
        &state,
        meta.entry(actions::CLEAR_CART, format!("Cleared {} cart lines", removed))
            .actor(Some(actor.id))
            .status(204),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}
