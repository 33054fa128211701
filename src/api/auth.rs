use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, State},
    http::{request::Parts, StatusCode},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::db::{
    actions, blacklist_token, LoginRequest, LoginResponse, Role, Severity, SignupRequest, User,
    UserResponse,
};
use crate::identity::{self, bearer_token, Actor, IdentityError};
use crate::AppState;

use super::audit::{audit_error, audit_log, RequestMeta};
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_password, validate_username};

/// Resolve the bearer token on a request
async fn resolve_parts(parts: &Parts, state: &AppState) -> Result<Actor, IdentityError> {
    let token = bearer_token(&parts.headers).ok_or(IdentityError::MissingToken)?;
    identity::resolve(&state.db, &state.keys, token).await
}

/// Extractor for the authenticated user. Rejects with 401 and records an
/// `AUTH_FAILURE` audit entry.
#[async_trait]
impl FromRequestParts<Arc<AppState>> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match resolve_parts(parts, state).await {
            Ok(actor) => Ok(actor),
            Err(e) => {
                let meta = RequestMeta::from_request_parts(parts, state)
                    .await
                    .unwrap_or_default();
                let err = ApiError::from(e);
                if err.status() == StatusCode::UNAUTHORIZED {
                    Err(audit_error(state, &meta, None, actions::AUTH_FAILURE, None, err).await)
                } else {
                    Err(err)
                }
            }
        }
    }
}

/// Like [`Actor`] but never rejects and never audits, for handlers that
/// record their own outcome.
pub struct AuthAttempt(pub Result<Actor, IdentityError>);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthAttempt {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(AuthAttempt(resolve_parts(parts, state).await))
    }
}

/// Login endpoint
pub async fn login(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let request = match body {
        Ok(Json(request)) if !request.username.is_empty() && !request.password.is_empty() => {
            request
        }
        _ => {
            let err = ApiError::bad_request("Username and password are required");
            return Err(audit_error(&state, &meta, None, actions::LOGIN_ATTEMPT, None, err).await);
        }
    };

    let user = match identity::authenticate(&state.db, &request.username, &request.password).await
    {
        Ok(user) => user,
        Err(e) => {
            let err = ApiError::from(e);
            audit_log(
                &state,
                meta.entry(actions::LOGIN_FAILURE, "Invalid login attempt")
                    .severity(Severity::Warning)
                    .status(err.status().as_u16())
                    .data(json!({ "username": request.username })),
            )
            .await;
            return Err(err);
        }
    };

    let roles = user.role_set(&state.db).await?;
    let issued = state.keys.issue(user.id, &user.username, &roles)?;

    audit_log(
        &state,
        meta.entry(actions::LOGIN_SUCCESS, format!("User {} logged in", user.username))
            .actor(Some(user.id))
            .affected(format!("User {}", user.username))
            .status(200),
    )
    .await;

    Ok(Json(LoginResponse {
        token: issued.token,
        expires_at: issued.expires_at.to_rfc3339(),
        user: UserResponse::new(user, &roles),
    }))
}

/// Self-service signup. New accounts get the staff role.
pub async fn signup(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    body: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<LoginResponse>), ApiError> {
    if !state.config.auth.allow_signup {
        let err = ApiError::forbidden("Signup is disabled");
        return Err(audit_error(&state, &meta, None, actions::SIGNUP_FAILURE, None, err).await);
    }

    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            let err = ApiError::bad_request(rejection.body_text());
            return Err(audit_error(&state, &meta, None, actions::SIGNUP_FAILURE, None, err).await);
        }
    };

    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_username(&request.username) {
        errors.add("username", e);
    }
    if let Err(e) = validate_password(&request.password) {
        errors.add("password", e);
    }
    if let Err(err) = errors.finish() {
        return Err(audit_error(&state, &meta, None, actions::SIGNUP_FAILURE, None, err).await);
    }

    if User::find_by_username(&state.db, &request.username).await?.is_some() {
        let err = ApiError::conflict("Username is already taken");
        return Err(audit_error(
            &state,
            &meta,
            None,
            actions::SIGNUP_FAILURE,
            Some(format!("User {}", request.username)),
            err,
        )
        .await);
    }

    let password_hash = identity::hash_password_blocking(request.password).await?;
    let user = User::create(&state.db, &request.username, &password_hash, &[Role::Staff], false)
        .await?;
    let roles = user.role_set(&state.db).await?;
    let issued = state.keys.issue(user.id, &user.username, &roles)?;

    audit_log(
        &state,
        meta.entry(actions::SIGNUP_SUCCESS, format!("User {} signed up", user.username))
            .actor(Some(user.id))
            .affected(format!("User {}", user.username))
            .status(201),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(LoginResponse {
            token: issued.token,
            expires_at: issued.expires_at.to_rfc3339(),
            user: UserResponse::new(user, &roles),
        }),
    ))
}

/// Revoke the presented token
pub async fn logout(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    actor: Actor,
) -> Result<StatusCode, ApiError> {
    blacklist_token(&state.db, &actor.jti).await?;

    audit_log(
        &state,
        meta.entry(actions::LOGOUT, format!("User {} logged out", actor.username))
            .actor(Some(actor.id))
            .affected(format!("User {}", actor.username))
            .status(204),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// The authenticated user with fresh roles
pub async fn me(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<Json<UserResponse>, ApiError> {
    let user = User::find_by_id(&state.db, actor.id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
    Ok(Json(UserResponse::new(user, &actor.roles)))
}
