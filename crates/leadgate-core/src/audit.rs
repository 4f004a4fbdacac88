//! Per-request audit trail.
//!
//! Every HTTP request to the ingestion endpoint produces exactly one
//! [`IncomingRequest`] row, written as early as validation permits and
//! finalized exactly once. Requests rejected by the gate are recorded with
//! whatever context was known at the rejection point (an invalid-UUID
//! rejection has neither source nor brand; a bad API key has both). Requests
//! that clear the gate get a `pending` row before any side-effecting write,
//! later finalized to `success` or `failed`.

use crate::{BrandId, LeadEventId, RequestId, SourceId, StoreError, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Headers never persisted verbatim in the audit trail
const SENSITIVE_HEADERS: &[&str] = &[
    "x-api-key",
    "x-webhook-secret",
    "authorization",
    "proxy-authorization",
    "cookie",
];

/// Replacement value for filtered header entries
const REDACTED: &str = "<redacted>";

// ============================================================================
// Core Types
// ============================================================================

/// Terminal and non-terminal states of an audited request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Passed the gate, processing in flight
    Pending,
    /// Lead event appended
    Success,
    /// Stopped by a validation or policy check
    Rejected,
    /// Server-side failure after the gate
    Failed,
}

impl RequestStatus {
    /// Whether the status permits no further transition
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// One audit row per HTTP request to the ingestion endpoint.
///
/// `source_id` is null only when the path segment was not a UUID at all;
/// `brand_id` stays null until the source row has been resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingRequest {
    pub id: RequestId,
    pub source_id: Option<SourceId>,
    pub brand_id: Option<BrandId>,

    /// Parsed request body; `None` when the body was not valid JSON
    pub raw_body: Option<serde_json::Value>,

    /// Request headers with sensitive entries redacted
    pub headers: HashMap<String, String>,

    pub ip_address: Option<String>,
    pub user_agent: Option<String>,

    pub status: RequestStatus,

    /// Set once the request reaches a terminal state
    pub processed: bool,

    pub error_message: Option<String>,

    /// Lead event appended by this request, set on success only
    pub lead_event_id: Option<LeadEventId>,

    pub received_at: Timestamp,
    pub finalized_at: Option<Timestamp>,
}

impl IncomingRequest {
    /// Start a new audit row in the given status.
    ///
    /// Headers are filtered before they are stored; the caller passes the
    /// raw header map.
    pub fn new(
        status: RequestStatus,
        headers: &HashMap<String, String>,
        raw_body: Option<serde_json::Value>,
        received_at: Timestamp,
    ) -> Self {
        let user_agent = headers.get("user-agent").cloned();
        let ip_address = client_ip(headers);

        Self {
            id: RequestId::new(),
            source_id: None,
            brand_id: None,
            raw_body,
            headers: filter_headers(headers),
            ip_address,
            user_agent,
            status,
            processed: status.is_terminal(),
            error_message: None,
            lead_event_id: None,
            received_at,
            finalized_at: status.is_terminal().then(|| received_at),
        }
    }

    /// Attach the source context once the path segment has parsed
    pub fn with_source(mut self, source_id: SourceId) -> Self {
        self.source_id = Some(source_id);
        self
    }

    /// Attach the brand context once the source row has been resolved
    pub fn with_brand(mut self, brand_id: BrandId) -> Self {
        self.brand_id = Some(brand_id);
        self
    }

    /// Attach the rejection/failure reason
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// Redact sensitive headers, preserving the rest verbatim.
///
/// Header names are compared case-insensitively; the filtered map carries
/// lowercase names.
pub fn filter_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let lower = name.to_ascii_lowercase();
            if SENSITIVE_HEADERS.contains(&lower.as_str()) {
                (lower, REDACTED.to_string())
            } else {
                (lower, value.clone())
            }
        })
        .collect()
}

/// Best-effort client address from proxy headers.
///
/// The service runs behind a reverse proxy, so the peer address is the
/// proxy's; `X-Forwarded-For` (first hop) and `X-Real-IP` carry the caller.
pub fn client_ip(headers: &HashMap<String, String>) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        let first = forwarded.split(',').next().map(str::trim);
        if let Some(ip) = first.filter(|s| !s.is_empty()) {
            return Some(ip.to_string());
        }
    }
    headers.get("x-real-ip").map(|s| s.trim().to_string())
}

// ============================================================================
// Store Trait
// ============================================================================

/// Durable audit record storage.
///
/// The single-transition invariant lives here: `finalize` must refuse to
/// touch a row that is already terminal.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Insert a new audit row
    async fn insert(&self, record: IncomingRequest) -> Result<RequestId, StoreError>;

    /// Transition a pending row to a terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::OperationFailed`] when the row is already
    /// terminal (double finalization) and [`StoreError::NotFound`] when the
    /// row does not exist.
    async fn finalize(
        &self,
        id: RequestId,
        status: RequestStatus,
        error_message: Option<String>,
        lead_event_id: Option<LeadEventId>,
    ) -> Result<(), StoreError>;

    /// Fetch a row by id (operator diagnostics and tests)
    async fn get(&self, id: RequestId) -> Result<Option<IncomingRequest>, StoreError>;

    /// List rows for a source, most recent first
    async fn list_for_source(
        &self,
        source_id: SourceId,
        limit: usize,
    ) -> Result<Vec<IncomingRequest>, StoreError>;
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;
