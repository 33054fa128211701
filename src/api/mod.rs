pub mod audit;
pub mod auth;
mod cart;
mod categories;
pub mod error;
mod invoices;
mod products;
mod reports;
mod users;
pub mod validation;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Auth routes (login and signup are public, the rest need a token)
    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/signup", post(auth::signup))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    // Every handler below authenticates through the Actor extractor
    let api_routes = Router::new()
        // Users
        .route("/users", get(users::list_users).post(users::create_user))
        .route("/users/:id", get(users::get_user).delete(users::delete_user))
        .route("/users/:id/roles", put(users::update_roles))
        // Catalog
        .route(
            "/categories",
            get(categories::list_categories).post(categories::create_category),
        )
        .route(
            "/categories/:id",
            put(categories::update_category).delete(categories::delete_category),
        )
        .route(
            "/products",
            get(products::list_products).post(products::create_product),
        )
        .route(
            "/products/:id",
            get(products::get_product)
                .put(products::update_product)
                .delete(products::delete_product),
        )
        .route("/products/:id/stock", patch(products::update_stock))
        // Cart
        .route("/cart", get(cart::get_cart).delete(cart::clear_cart))
        .route("/cart/items", post(cart::add_item))
        .route(
            "/cart/items/:product_id",
            put(cart::update_item).delete(cart::remove_item),
        )
        // Checkout and invoices
        .route("/cart/checkout", post(invoices::checkout_cart))
        .route("/checkout", post(invoices::checkout))
        .route("/invoices", get(invoices::list_invoices))
        .route("/invoices/:id", get(invoices::get_invoice))
        .route("/invoices/:id", delete(invoices::delete_invoice))
        .route("/invoices/:id/items", get(invoices::get_invoice_items))
        // Reports
        .route("/reports/revenue", get(reports::revenue))
        .route("/reports/revenue/compare", get(reports::compare_revenue))
        .route("/reports/total-stock", get(reports::total_stock))
        .route("/reports/stock-by-category", get(reports::stock_by_category))
        .route("/reports/inventory-value", get(reports::inventory_value))
        .route("/reports/top-sellers", get(reports::top_sellers))
        .route("/reports/users/:id/sales", get(reports::user_sales))
        // Audit log
        .route("/audit-logs", get(audit::list_logs))
        .route("/audit-logs/actions", get(audit::list_action_types));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", auth_routes)
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") })),
        ),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}
