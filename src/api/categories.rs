//! Category endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::db::{actions, Category, CreateCategoryRequest, UpdateCategoryRequest};
use crate::identity::Actor;
use crate::AppState;

use super::audit::{audit_log, require, RequestMeta};
use super::error::ApiError;
use super::validation::{validate_create_category, validate_update_category};

fn map_duplicate(e: sqlx::Error) -> ApiError {
    let err = ApiError::from(e);
    if err.status() == StatusCode::CONFLICT {
        ApiError::conflict("A category with this name already exists")
    } else {
        err
    }
}

pub async fn list_categories(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
) -> Result<Json<Vec<Category>>, ApiError> {
    Ok(Json(Category::list(&state.db).await?))
}

pub async fn create_category(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
    Json(req): Json<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<Category>), ApiError> {
    require(
        &state,
        &meta,
        &actor,
        actor.roles.can_manage_categories(),
        actions::CATEGORY_UNAUTHORIZED,
    )
    .await?;
    validate_create_category(&req)?;

    let category = Category::create(&state.db, &req, actor.id)
        .await
        .map_err(map_duplicate)?;

    audit_log(
        &state,
        meta.entry(
            actions::CREATE_CATEGORY_SUCCESS,
            format!("Created category {}", category.name),
        )
        .actor(Some(actor.id))
        .affected(format!("Category {}", category.name))
        .status(201),
    )
    .await;

    Ok((StatusCode::CREATED, Json(category)))
}

pub async fn update_category(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
    Path(id): Path<i64>,
    Json(req): Json<UpdateCategoryRequest>,
) -> Result<Json<Category>, ApiError> {
    require(
        &state,
        &meta,
        &actor,
        actor.roles.can_manage_categories(),
        actions::CATEGORY_UNAUTHORIZED,
    )
    .await?;
    validate_update_category(&req)?;

    let category = Category::update(&state.db, id, &req)
        .await
        .map_err(map_duplicate)?
        .ok_or_else(|| ApiError::not_found("Category not found"))?;

    audit_log(
        &state,
        meta.entry(
            actions::UPDATE_CATEGORY_SUCCESS,
            format!("Updated category {}", category.name),
        )
        .actor(Some(actor.id))
        .affected(format!("Category {}", category.name))
        .status(200),
    )
    .await;

    Ok(Json(category))
}

/// Delete a category. Its products stay, uncategorized.
pub async fn delete_category(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    require(
        &state,
        &meta,
        &actor,
        actor.roles.can_manage_categories(),
        actions::CATEGORY_UNAUTHORIZED,
    )
    .await?;

    let category = Category::find(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Category not found"))?;
    Category::delete(&state.db, id).await?;

    audit_log(
        &state,
        meta.entry(
            actions::DELETE_CATEGORY_SUCCESS,
            format!("Deleted category {}", category.name),
        )
        .actor(Some(actor.id))
        .affected(format!("Category {}", category.name))
        .status(204),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}
