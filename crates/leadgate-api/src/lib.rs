//! # Leadgate HTTP Service
//!
//! HTTP server for the Leadgate webhook ingestion endpoint and its
//! companion export endpoint.
//!
//! This service provides:
//! - `POST /webhook-ingest/{source_id}`: the authenticated, optionally
//!   HMAC-verified, rate-limited lead ingestion endpoint
//! - `POST /sheets-export`: the idempotent spreadsheet export entry point
//! - Health, readiness, and Prometheus metrics endpoints

pub mod errors;
pub mod responses;

pub use errors::{ConfigError, IngestHandlerError, ServiceError};
pub use responses::{ExportResponse, HealthResponse, IngestSuccessResponse, ReadinessResponse};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod lib_tests;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use leadgate_core::export::ExportPipeline;
use leadgate_core::ingest::{IngestOutcome, IngestProcessor, IngestRequest};
use leadgate_core::{LeadEventId, Timestamp};
use prometheus::{Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, net::SocketAddr, path::PathBuf, str::FromStr, sync::Arc};
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, instrument, warn};

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration for the service
    pub config: ServiceConfig,

    /// Ingestion pipeline handling webhook requests
    pub ingest: Arc<dyn IngestProcessor>,

    /// Export pipeline behind the /sheets-export endpoint
    pub export: Arc<ExportPipeline>,

    /// Metrics collector for observability
    pub metrics: Arc<ServiceMetrics>,
}

impl AppState {
    /// Create new application state
    pub fn new(
        config: ServiceConfig,
        ingest: Arc<dyn IngestProcessor>,
        export: Arc<ExportPipeline>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            config,
            ingest,
            export,
            metrics,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Webhook source seeding
    pub sources: SourcesConfig,

    /// Spreadsheet export settings
    pub export: ExportSettings,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Validate cross-field constraints before boot.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the export section is enabled without
    /// the credentials it needs, or when server settings are unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.is_empty() {
            return Err(ConfigError::Missing {
                key: "server.host".to_string(),
            });
        }
        if self.server.max_body_size == 0 {
            return Err(ConfigError::Invalid {
                message: "server.max_body_size must be positive".to_string(),
            });
        }

        if self.export.enabled {
            if self.export.spreadsheet_id.is_none() {
                return Err(ConfigError::Missing {
                    key: "export.spreadsheet_id".to_string(),
                });
            }
            let Some(google) = &self.export.google else {
                return Err(ConfigError::Missing {
                    key: "export.google".to_string(),
                });
            };
            if google.client_email.is_empty() {
                return Err(ConfigError::Missing {
                    key: "export.google.client_email".to_string(),
                });
            }
            if google.private_key_pem.is_none() && google.private_key_path.is_none() {
                return Err(ConfigError::Missing {
                    key: "export.google.private_key_pem".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,

    /// Maximum request size in bytes
    pub max_body_size: usize,

    /// Enable CORS
    pub enable_cors: bool,

    /// Enable compression
    pub enable_compression: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
            max_body_size: 1024 * 1024, // 1MB: lead payloads are small
            enable_cors: true,
            enable_compression: true,
        }
    }
}

/// Webhook source seeding configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// YAML file with webhook source rows loaded at boot
    pub seed_file: Option<PathBuf>,
}

/// Spreadsheet export settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Global export switch; when off, /sheets-export answers with a
    /// disabled error and the ingest trigger is a no-op
    pub enabled: bool,

    /// URL the fire-and-forget trigger POSTs to (normally this service's
    /// own /sheets-export)
    pub endpoint: Option<String>,

    /// Outbound trigger timeout in seconds
    pub trigger_timeout_seconds: u64,

    /// Target spreadsheet id
    pub spreadsheet_id: Option<String>,

    /// Service-account credentials for the Sheets API
    pub google: Option<GoogleServiceAccount>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            trigger_timeout_seconds: 5,
            spreadsheet_id: None,
            google: None,
        }
    }
}

/// Google service-account credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleServiceAccount {
    /// Service account email (JWT issuer)
    pub client_email: String,

    /// PEM-encoded RSA private key, inline
    pub private_key_pem: Option<String>,

    /// Path to a PEM file, as an alternative to the inline key
    pub private_key_path: Option<PathBuf>,

    /// OAuth token endpoint
    pub token_uri: String,
}

impl Default for GoogleServiceAccount {
    fn default() -> Self {
        Self {
            client_email: String::new(),
            private_key_pem: None,
            private_key_path: None,
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Prometheus metrics for the service.
///
/// Metrics register into their own [`Registry`] rather than the process
/// default so multiple states (one per test) never collide on registration.
pub struct ServiceMetrics {
    registry: Registry,
    pub requests_received: IntCounter,
    pub ingest_accepted: IntCounter,
    pub ingest_rejected: IntCounter,
    pub ingest_failed: IntCounter,
    pub export_requests: IntCounter,
    pub ingest_duration_seconds: Histogram,
}

impl ServiceMetrics {
    /// Create and register all metrics
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let requests_received = IntCounter::new(
            "leadgate_requests_received_total",
            "Webhook requests received",
        )?;
        let ingest_accepted = IntCounter::new(
            "leadgate_ingest_accepted_total",
            "Webhook requests that appended a lead event",
        )?;
        let ingest_rejected = IntCounter::new(
            "leadgate_ingest_rejected_total",
            "Webhook requests rejected by the validation chain",
        )?;
        let ingest_failed = IntCounter::new(
            "leadgate_ingest_failed_total",
            "Webhook requests that failed server-side",
        )?;
        let export_requests = IntCounter::new(
            "leadgate_export_requests_total",
            "Export endpoint invocations",
        )?;
        let ingest_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "leadgate_ingest_duration_seconds",
            "Webhook request processing duration",
        ))?;

        registry.register(Box::new(requests_received.clone()))?;
        registry.register(Box::new(ingest_accepted.clone()))?;
        registry.register(Box::new(ingest_rejected.clone()))?;
        registry.register(Box::new(ingest_failed.clone()))?;
        registry.register(Box::new(export_requests.clone()))?;
        registry.register(Box::new(ingest_duration_seconds.clone()))?;

        Ok(Arc::new(Self {
            registry,
            requests_received,
            ingest_accepted,
            ingest_rejected,
            ingest_failed,
            export_requests,
            ingest_duration_seconds,
        }))
    }

    /// Render all metrics in Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        encoder.encode_to_string(&self.registry.gather())
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let ingest_routes = Router::new()
        .route("/webhook-ingest/{source_id}", post(handle_ingest))
        .route("/sheets-export", post(handle_export));

    let health_routes = Router::new()
        .route("/health", get(handle_health_check))
        .route("/ready", get(handle_readiness_check));

    let observability_routes = Router::new().route("/metrics", get(metrics_endpoint));

    let router = Router::new()
        .merge(ingest_routes)
        .merge(health_routes)
        .merge(observability_routes);

    // Compression and CORS follow configuration; tracing and request
    // logging are always on.
    let router = if state.config.server.enable_compression {
        router.layer(CompressionLayer::new())
    } else {
        router
    };
    let router = if state.config.server.enable_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_logging_middleware))
                .into_inner(),
        )
        .layer(axum::extract::DefaultBodyLimit::max(
            state.config.server.max_body_size,
        ))
        .with_state(state)
}

/// Start HTTP server
pub async fn start_server(
    config: ServiceConfig,
    ingest: Arc<dyn IngestProcessor>,
    export: Arc<ExportPipeline>,
) -> Result<(), ServiceError> {
    let metrics = ServiceMetrics::new().map_err(|e| {
        ServiceError::Configuration(ConfigError::Invalid {
            message: format!("Failed to initialize metrics: {}", e),
        })
    })?;

    let state = AppState::new(config.clone(), ingest, export, metrics);
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener =
        tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServiceError::BindFailed {
                address: addr.to_string(),
                message: e.to_string(),
            })?;

    info!("Starting HTTP server on {}", addr);

    let shutdown_timeout = std::time::Duration::from_secs(config.server.shutdown_timeout_seconds);

    let shutdown_signal = async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C signal handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown with {}s timeout", shutdown_timeout.as_secs());
            },
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown with {}s timeout", shutdown_timeout.as_secs());
            },
        }
    };

    // In-flight requests complete before the listener closes; new
    // connections stop being accepted the moment the signal arrives.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| ServiceError::ServerFailed {
            message: e.to_string(),
        })?;

    info!("HTTP server shutdown complete");
    Ok(())
}

// ============================================================================
// Ingestion Handler
// ============================================================================

/// Handle an inbound webhook request.
///
/// The handler is a thin adapter: it lowers the HTTP request into an
/// [`IngestRequest`] and lets the pipeline run the validation chain. All
/// auditing happens inside the pipeline so rejected requests are recorded
/// no matter where the chain stopped.
#[instrument(skip(state, headers, body), fields(source_segment = %source_id))]
pub async fn handle_ingest(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestSuccessResponse>, IngestHandlerError> {
    state.metrics.requests_received.inc();
    let timer = state.metrics.ingest_duration_seconds.start_timer();

    let header_map: HashMap<String, String> = headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_lowercase(),
                v.to_str().unwrap_or("").to_string(),
            )
        })
        .collect();

    let request = IngestRequest {
        source_id_segment: source_id,
        headers: header_map,
        body,
    };

    let result = state.ingest.process(request).await;
    timer.observe_duration();

    match result {
        Ok(IngestOutcome::Accepted(receipt)) => {
            state.metrics.ingest_accepted.inc();
            info!(
                contact_id = %receipt.contact_id,
                lead_event_id = %receipt.lead_event_id,
                archived = receipt.archived,
                "Webhook ingested"
            );
            Ok(Json(IngestSuccessResponse::from(receipt)))
        }
        Ok(IngestOutcome::Rejected(rejection)) => {
            state.metrics.ingest_rejected.inc();
            Err(IngestHandlerError::Rejected(rejection))
        }
        Err(e) => {
            state.metrics.ingest_failed.inc();
            Err(IngestHandlerError::Internal(e))
        }
    }
}

// ============================================================================
// Export Handler
// ============================================================================

/// Export endpoint request body
#[derive(Debug, Deserialize)]
pub struct ExportRequestBody {
    pub lead_event_id: String,

    /// Bypass the claim check and re-export
    #[serde(default)]
    pub force: bool,
}

/// Handle an export request for one lead event
#[instrument(skip_all)]
pub async fn handle_export(
    State(state): State<AppState>,
    Json(request): Json<ExportRequestBody>,
) -> Response {
    use axum::response::IntoResponse;

    state.metrics.export_requests.inc();
    info!(
        lead_event_id = %request.lead_event_id,
        force = request.force,
        "Export requested"
    );

    let Ok(lead_event_id) = LeadEventId::from_str(&request.lead_event_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ExportResponse::failure("Invalid lead_event_id")),
        )
            .into_response();
    };

    match state.export.run(lead_event_id, request.force).await {
        Ok(outcome) => (StatusCode::OK, Json(ExportResponse::from_outcome(outcome))).into_response(),
        Err(e) => {
            error!(%lead_event_id, error = %e, "Export run failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ExportResponse::failure(e.to_string())),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Health & Observability Handlers
// ============================================================================

/// Basic health check endpoint
#[instrument(skip_all)]
async fn handle_health_check(State(_state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Timestamp::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check for orchestrators
#[instrument(skip_all)]
async fn handle_readiness_check(State(_state): State<AppState>) -> Json<ReadinessResponse> {
    Json(ReadinessResponse {
        ready: true,
        timestamp: Timestamp::now(),
    })
}

/// Prometheus metrics endpoint
#[instrument(skip_all)]
async fn metrics_endpoint(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics
        .encode()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// ============================================================================
// Middleware
// ============================================================================

/// Request logging middleware with correlation ID tracking
///
/// This middleware:
/// - Extracts or generates correlation IDs for request tracking
/// - Logs request start and completion with structured fields
/// - Propagates the correlation ID through response headers
#[instrument(skip(request, next), fields(
    method = %request.method(),
    uri = %request.uri(),
    correlation_id
))]
async fn request_logging_middleware(
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let correlation_id = request
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::Span::current().record("correlation_id", correlation_id.as_str());
    request.extensions_mut().insert(correlation_id.clone());

    let mut response = next.run(request).await;
    let duration = start.elapsed();

    if let Ok(header_value) = correlation_id.parse() {
        response
            .headers_mut()
            .insert("x-correlation-id", header_value);
    }

    let status = response.status();
    if status.is_server_error() {
        error!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        warn!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        info!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed successfully"
        );
    }

    response
}
