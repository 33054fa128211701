//! User administration (admin only).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::db::{actions, CreateUserRequest, Role, UpdateRolesRequest, User, UserResponse};
use crate::identity::{self, Actor};
use crate::AppState;

use super::audit::{audit_error, audit_log, require, RequestMeta};
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_id, validate_password, validate_username};

fn parse_roles(names: &[String]) -> Result<Vec<Role>, ApiError> {
    let mut roles = Vec::with_capacity(names.len());
    let mut errors = ValidationErrorBuilder::new();
    for name in names {
        match name.parse::<Role>() {
            Ok(role) => roles.push(role),
            Err(e) => {
                errors.add("roles", e);
            }
        }
    }
    errors.finish()?;
    Ok(roles)
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    require(
        &state,
        &meta,
        &actor,
        actor.roles.can_manage_users(),
        actions::USER_ADMIN_UNAUTHORIZED,
    )
    .await?;

    let users = User::list(&state.db).await?;
    let mut result = Vec::with_capacity(users.len());
    for user in users {
        let roles = user.role_set(&state.db).await?;
        result.push(UserResponse::new(user, &roles));
    }

    audit_log(
        &state,
        meta.entry(actions::GET_USERS_SUCCESS, "Retrieved all users")
            .actor(Some(actor.id))
            .status(200),
    )
    .await;

    Ok(Json(result))
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<UserResponse>, ApiError> {
    if id != actor.id {
        require(
            &state,
            &meta,
            &actor,
            actor.roles.can_manage_users(),
            actions::USER_ADMIN_UNAUTHORIZED,
        )
        .await?;
    }

    let user = User::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    let roles = user.role_set(&state.db).await?;
    Ok(Json(UserResponse::new(user, &roles)))
}

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    require(
        &state,
        &meta,
        &actor,
        actor.roles.can_manage_users(),
        actions::CREATE_USER_UNAUTHORIZED,
    )
    .await?;

    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_username(&req.username) {
        errors.add("username", e);
    }
    if let Err(e) = validate_password(&req.password) {
        errors.add("password", e);
    }
    errors.finish()?;

    let mut roles = parse_roles(&req.roles)?;
    if roles.is_empty() && !req.is_admin {
        roles.push(Role::Staff);
    }

    if User::find_by_username(&state.db, &req.username).await?.is_some() {
        return Err(audit_error(
            &state,
            &meta,
            Some(actor.id),
            actions::CREATE_USER_DUPLICATE,
            Some(format!("User {}", req.username)),
            ApiError::conflict("Username is already taken"),
        )
        .await);
    }

    let password_hash = identity::hash_password_blocking(req.password).await?;
    let user = User::create(&state.db, &req.username, &password_hash, &roles, req.is_admin).await?;
    let role_set = user.role_set(&state.db).await?;

    audit_log(
        &state,
        meta.entry(
            actions::CREATE_USER_SUCCESS,
            format!("Created user {}", user.username),
        )
        .actor(Some(actor.id))
        .affected(format!("User {}", user.username))
        .status(201)
        .data(serde_json::json!({ "user_id": user.id, "roles": role_set.names() })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(UserResponse::new(user, &role_set))))
}

/// Replace a user's roles. `is_admin` follows the admin role.
pub async fn update_roles(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
    Path(id): Path<i64>,
    Json(req): Json<UpdateRolesRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    require(
        &state,
        &meta,
        &actor,
        actor.roles.can_manage_users(),
        actions::USER_ADMIN_UNAUTHORIZED,
    )
    .await?;
    validate_id(id, "id")?;

    let roles = parse_roles(&req.roles)?;
    let user = User::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    User::replace_roles(&state.db, id, &roles).await?;

    let user = User::find_by_id(&state.db, user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    let role_set = user.role_set(&state.db).await?;

    audit_log(
        &state,
        meta.entry(
            actions::UPDATE_ROLES_SUCCESS,
            format!("Updated roles of {}", user.username),
        )
        .actor(Some(actor.id))
        .affected(format!("User {}", user.username))
        .status(200)
        .data(serde_json::json!({ "roles": role_set.names() })),
    )
    .await;

    Ok(Json(UserResponse::new(user, &role_set)))
}

pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    require(
        &state,
        &meta,
        &actor,
        actor.roles.can_manage_users(),
        actions::USER_ADMIN_UNAUTHORIZED,
    )
    .await?;

    if id == actor.id {
        return Err(audit_error(
            &state,
            &meta,
            Some(actor.id),
            actions::DELETE_USER_SELF,
            Some(format!("User {}", actor.username)),
            ApiError::bad_request("You cannot delete your own account"),
        )
        .await);
    }

    let user = User::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if User::invoice_count(&state.db, id).await? > 0 {
        return Err(audit_error(
            &state,
            &meta,
            Some(actor.id),
            actions::DELETE_USER_CONFLICT,
            Some(format!("User {}", user.username)),
            ApiError::conflict("User has invoices and cannot be deleted"),
        )
        .await);
    }

    User::delete(&state.db, id).await?;

    audit_log(
        &state,
        meta.entry(
            actions::DELETE_USER_SUCCESS,
            format!("Deleted user {}", user.username),
        )
        .actor(Some(actor.id))
        .affected(format!("User {}", user.username))
        .status(204),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}
