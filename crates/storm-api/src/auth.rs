//! Bearer-token auth layer for the admin surface.
//!
//! Enabled only when an API secret is configured. Read verbs accept any
//! valid operator token; mutating verbs require the `admin` role.

use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use storm_auth::token;
use tracing::debug;

use crate::error::ApiError;
use crate::ApiState;

pub async fn require_bearer(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(secret) = &state.api_secret else {
        return next.run(request).await;
    };

    let bearer = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let Some(bearer) = bearer else {
        return ApiError::unauthorized("missing bearer token").into_response();
    };

    let claims = match token::verify(bearer, secret) {
        Ok(claims) => claims,
        Err(e) => {
            debug!(error = %e, "api token rejected");
            return ApiError::unauthorized("invalid bearer token").into_response();
        }
    };

    let mutating = matches!(
        *request.method(),
        Method::POST | Method::PATCH | Method::PUT | Method::DELETE
    );
    if mutating && !claims.has_role("admin") {
        return ApiError::forbidden(format!(
            "user {} lacks the admin role",
            claims.user
        ))
        .into_response();
    }

    next.run(request).await
}
