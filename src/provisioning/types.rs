//! Request and response bodies for the provisioning API.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::error::StatusError;
use crate::pairing::frames::ErrorBody;
use crate::status::ConnectionStatus;

/// Query string shared by the authenticated endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    pub user_id: Option<String>,
}

/// Query string of `GET /v1/login`.
#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    pub user_id: Option<String>,
    pub phone_number: Option<String>,
    pub tz: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_pairings: u64,
}

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub whatsapp: ConnectionStatus,
    pub mxid: String,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
    pub status: String,
}

impl LogoutResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            status: "Logged out successfully".to_string(),
        }
    }
}

/// Body for a missing query parameter. Carries no `success` flag.
#[derive(Debug, Serialize)]
struct MissingParamBody {
    error: String,
    errcode: String,
}

/// Errors returned by the request/response endpoints.
#[derive(Debug)]
pub enum ApiError {
    MissingUserId,
    /// No linked session; the status code differs between endpoints.
    NotLoggedIn(StatusCode),
    ManagementRoom,
    Internal(String),
    Unauthorized,
}

impl ApiError {
    pub fn from_status(err: StatusError, not_logged_in: StatusCode) -> Self {
        match err {
            StatusError::NotLoggedIn(_) => Self::NotLoggedIn(not_logged_in),
            StatusError::ManagementRoom(e) => {
                tracing::error!("Failed to get management room: {}", e);
                Self::ManagementRoom
            }
            StatusError::Store(e) => {
                tracing::error!("Identity store failure: {}", e);
                Self::Internal("Failed to load logins".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::MissingUserId => (
                StatusCode::BAD_REQUEST,
                Json(MissingParamBody {
                    error: "Missing user_id".to_string(),
                    errcode: "missing user_id".to_string(),
                }),
            )
                .into_response(),
            Self::NotLoggedIn(status) => (
                status,
                Json(ErrorBody::new("You're not logged in", "not logged in")),
            )
                .into_response(),
            Self::ManagementRoom => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody::new(
                    "Error while fetching management room",
                    "failed to get management room",
                )),
            )
                .into_response(),
            Self::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody::new(message, "M_UNKNOWN")),
            )
                .into_response(),
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(ErrorBody::new("Invalid auth token", "M_UNKNOWN_TOKEN")),
            )
                .into_response(),
        }
    }
}

/// Reject missing or blank `user_id` values.
pub fn require_user_id(user_id: Option<String>) -> Result<String, ApiError> {
    user_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or(ApiError::MissingUserId)
}
