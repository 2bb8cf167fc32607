//! Unified API response models.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use fleetbridge_core::BridgeError;

/// Unified API response wrapper.
///
/// ```json
/// {
///   "success": true,
///   "data": { ... },
///   "error": null,
///   "meta": { "timestamp": "...", "request_id": "..." }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    pub meta: ResponseMeta,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: ResponseMeta::default(),
        }
    }
}

impl<T> IntoResponse for ApiResponse<T>
where
    T: Serialize,
{
    fn into_response(self) -> axum::response::Response {
        axum::Json(self).into_response()
    }
}

/// Response metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub timestamp: DateTime<Utc>,
    /// Unique request ID for tracing
    pub request_id: String,
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Standardized API error format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

/// Error with its HTTP status, ready to be returned from a handler.
#[derive(Debug)]
pub struct ErrorResponse {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", message)
    }
}

impl From<BridgeError> for ErrorResponse {
    fn from(err: BridgeError) -> Self {
        if err.is_invariant_violation() {
            error!(%err, "invariant violation surfaced at the API boundary");
        }
        match &err {
            BridgeError::InvalidRequest(_) => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_request", err.to_string())
            }
            BridgeError::DeviceUnknown(_) => {
                Self::new(StatusCode::NOT_FOUND, "device_unknown", err.to_string())
            }
            BridgeError::Timeout { .. } => {
                Self::new(StatusCode::GATEWAY_TIMEOUT, "timeout", err.to_string())
            }
            BridgeError::TransportUnavailable(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "transport_unavailable",
                err.to_string(),
            ),
            BridgeError::DuplicateResolution(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                err.to_string(),
            ),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ApiError {
                code: self.code.to_string(),
                message: self.message,
            }),
            meta: ResponseMeta::default(),
        };
        (self.status, axum::Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<ApiResponse<T>, ErrorResponse>;
