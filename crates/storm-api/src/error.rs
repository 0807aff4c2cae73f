//! API error mapping.
//!
//! Components return typed failures; this module maps them 1:1 onto status
//! codes and the `{ errorCode, message }` wire body. Codes are stable
//! identifiers; messages are diagnostic only.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use storm_registry::RegistryError;
use storm_router::RouterError;
use storm_scheduler::SchedulerError;

/// Wire shape of every error response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error_code: String,
    pub message: String,
}

/// An error ready to leave the HTTP surface.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION", message)
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error_code: self.code.to_string(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        let message = e.to_string();
        match e {
            RegistryError::AlreadyExists(_) => {
                Self::new(StatusCode::CONFLICT, "NODE_EXISTS", message)
            }
            RegistryError::NotRegistered(_) => Self::not_found("NOT_REGISTERED", message),
            RegistryError::NodeNotFound(_) => Self::not_found("NODE_NOT_FOUND", message),
            RegistryError::MatchNotFound(_) => Self::not_found("MATCH_NOT_FOUND", message),
            RegistryError::MatchExists(_) => {
                Self::new(StatusCode::CONFLICT, "MATCH_EXISTS", message)
            }
            RegistryError::InvalidTransition { .. } => {
                Self::new(StatusCode::CONFLICT, "INVALID_TRANSITION", message)
            }
            RegistryError::TerminalState(_) => {
                Self::new(StatusCode::CONFLICT, "MATCH_TERMINAL", message)
            }
            RegistryError::ModuleNotFound { .. } => Self::not_found("MODULE_NOT_FOUND", message),
            RegistryError::ModuleConflict { .. } => {
                Self::new(StatusCode::CONFLICT, "MODULE_CONFLICT", message)
            }
            RegistryError::CorruptArtifact { .. } => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
            }
            RegistryError::StoreUnavailable(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE", message)
            }
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::NoCapacity | SchedulerError::NoHealthyNodes => {
                Self::new(StatusCode::CONFLICT, "NO_CAPACITY", e.to_string())
            }
            SchedulerError::Registry(inner) => inner.into(),
        }
    }
}

impl From<storm_distributor::DistributorError> for ApiError {
    fn from(e: storm_distributor::DistributorError) -> Self {
        use storm_distributor::DistributorError::*;
        match e {
            ModuleNotFound { .. } => Self::not_found("MODULE_NOT_FOUND", e.to_string()),
            NodeNotFound(_) => Self::not_found("NODE_NOT_FOUND", e.to_string()),
            Registry(inner) => inner.into(),
            Engine(inner) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "ENGINE_UNAVAILABLE",
                inner.to_string(),
            ),
        }
    }
}

impl From<RouterError> for ApiError {
    fn from(e: RouterError) -> Self {
        let message = e.to_string();
        match e {
            RouterError::UnknownModule(_) => Self::validation(message),
            RouterError::NotFound(_) => Self::not_found("MATCH_NOT_FOUND", message),
            RouterError::Scheduler(inner) => inner.into(),
            RouterError::Registry(inner) => inner.into(),
            RouterError::Engine { .. } | RouterError::Distribution { .. } => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "ENGINE_UNAVAILABLE", message)
            }
            RouterError::Internal(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
            }
        }
    }
}
