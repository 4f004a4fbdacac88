//! Error types for the HTTP service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use leadgate_core::ingest::{GateRejection, IngestError};
use leadgate_core::ratelimit::RETRY_AFTER_SECONDS;
use tracing::{error, warn};

/// Ingestion handler errors with HTTP status code mapping
///
/// Gate rejections carry the stable machine-readable codes that API
/// producers branch on; server failures collapse to a generic 500 so that
/// internal details never leak to the caller (they are logged server-side
/// with the audit record id instead).
///
/// Status mapping:
///
/// - `400 Bad Request`: malformed input (UUID, JSON, signature/timestamp
///   format, missing phone)
/// - `401 Unauthorized`: missing or invalid credentials, HMAC failures,
///   replay detection
/// - `404 Not Found`: unknown webhook source
/// - `409 Conflict`: source deactivated
/// - `429 Too Many Requests`: rate limited, with `Retry-After` header
/// - `500 Internal Server Error`: datastore failure past the gate
#[derive(Debug, thiserror::Error)]
pub enum IngestHandlerError {
    /// Request stopped by the validation chain
    #[error("Request rejected: {}", .0.code())]
    Rejected(GateRejection),

    /// Server-side pipeline failure (already audited as `failed`)
    #[error("Ingestion failed: {0}")]
    Internal(#[from] IngestError),
}

/// HTTP status for a gate rejection
pub fn rejection_status(rejection: &GateRejection) -> StatusCode {
    match rejection {
        GateRejection::InvalidUuid
        | GateRejection::MalformedSignature
        | GateRejection::MalformedTimestamp
        | GateRejection::InvalidJson
        | GateRejection::MissingPhone => StatusCode::BAD_REQUEST,

        GateRejection::MissingApiKey
        | GateRejection::InvalidApiKey
        | GateRejection::MissingWebhookSecret
        | GateRejection::InvalidWebhookSecret
        | GateRejection::MissingSignature
        | GateRejection::MissingTimestamp
        | GateRejection::ReplayDetected
        | GateRejection::InvalidSignature => StatusCode::UNAUTHORIZED,

        GateRejection::SourceNotFound => StatusCode::NOT_FOUND,
        GateRejection::InactiveSource => StatusCode::CONFLICT,
        GateRejection::RateLimited => StatusCode::TOO_MANY_REQUESTS,
    }
}

impl IntoResponse for IngestHandlerError {
    fn into_response(self) -> Response {
        match self {
            Self::Rejected(rejection) => {
                let status = rejection_status(&rejection);
                warn!(
                    code = rejection.code(),
                    status = %status,
                    "Webhook request rejected"
                );

                let body = match rejection {
                    // The deactivated-source body leads with the code so
                    // integrators can distinguish "fix your request" from
                    // "this endpoint was turned off".
                    GateRejection::InactiveSource => serde_json::json!({
                        "error": rejection.code(),
                        "message": rejection.public_message(),
                    }),
                    GateRejection::RateLimited => serde_json::json!({
                        "error": rejection.public_message(),
                        "code": rejection.code(),
                        "retry_after": RETRY_AFTER_SECONDS,
                    }),
                    _ => serde_json::json!({
                        "error": rejection.public_message(),
                        "code": rejection.code(),
                    }),
                };

                let mut response = (status, Json(body)).into_response();
                if rejection == GateRejection::RateLimited {
                    if let Ok(header_value) = RETRY_AFTER_SECONDS.to_string().parse() {
                        response.headers_mut().insert("Retry-After", header_value);
                    }
                }
                response
            }
            Self::Internal(ref e) => {
                // Log detailed error server-side, return a generic message.
                error!(error = %e, "Ingestion pipeline failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({"error": "Internal server error"})),
                )
                    .into_response()
            }
        }
    }
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {0}")]
    Parsing(#[from] toml::de::Error),
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;
