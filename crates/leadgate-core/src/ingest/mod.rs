//! Inbound webhook ingestion pipeline.
//!
//! A request flows through an ordered validation chain, then through
//! normalization and the CRM write path:
//!
//! 1. Path segment is a UUID
//! 2. `X-API-Key` header present
//! 3. Source exists
//! 4. Source active
//! 5. API key hash matches (constant time)
//! 6. HMAC policy satisfied, when the source enables it (secret hash match,
//!    `sha256=<hex>` signature format, numeric timestamp, replay window,
//!    recomputed signature match, all comparisons constant time)
//! 7. Rate-limit token consumed atomically
//! 8. Body parses as JSON
//!
//! Every rejection point writes exactly one audit record carrying the
//! context known so far before returning. Once all eight checks pass, a
//! `pending` audit row is created ahead of any side-effecting write and
//! finalized to `success` or `failed`; a missing phone finalizes it to
//! `rejected` instead.
//!
//! The downstream export dispatch at the end is fire-and-forget: it can
//! never change the response or the audit status.

use crate::audit::{AuditStore, IncomingRequest, RequestStatus};
use crate::crm::{
    ContactStatus, ContactStore, DealStore, LeadEventStore, NewContact, NewLeadEvent,
};
use crate::export::ExportTrigger;
use crate::normalize::{self, NormalizationError};
use crate::ratelimit::{RateLimitDecision, RateLimiter};
use crate::source::{SourceStore, WebhookSource};
use crate::{
    security, BrandId, ContactId, DealId, LeadEventId, SourceId, StoreError, Timestamp,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

// ============================================================================
// Core Types
// ============================================================================

/// Raw material of one ingestion request, as captured by the HTTP layer.
///
/// Header names are lowercased by the caller; the body is kept as raw bytes
/// because the HMAC signature covers the exact wire form.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// The `{source_id}` path segment, unparsed
    pub source_id_segment: String,

    /// Request headers, lowercase names
    pub headers: HashMap<String, String>,

    /// Raw request body
    pub body: Bytes,
}

impl IngestRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Successful ingestion receipt returned to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReceipt {
    pub contact_id: ContactId,
    pub deal_id: Option<DealId>,
    pub lead_event_id: LeadEventId,
    /// `true` when the contact had opted out
    pub archived: bool,
    pub contact_status: ContactStatus,
}

/// Terminal rejection from the validation chain.
///
/// Each variant maps to a stable machine-readable error code; the HTTP
/// status mapping lives in the API layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    InvalidUuid,
    MissingApiKey,
    SourceNotFound,
    InactiveSource,
    InvalidApiKey,
    MissingWebhookSecret,
    InvalidWebhookSecret,
    MissingSignature,
    MalformedSignature,
    MissingTimestamp,
    MalformedTimestamp,
    ReplayDetected,
    InvalidSignature,
    RateLimited,
    InvalidJson,
    MissingPhone,
}

impl GateRejection {
    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidUuid => "invalid_uuid",
            Self::MissingApiKey => "missing_api_key",
            Self::SourceNotFound => "source_not_found",
            Self::InactiveSource => "inactive_source",
            Self::InvalidApiKey => "invalid_api_key",
            Self::MissingWebhookSecret => "missing_webhook_secret",
            Self::InvalidWebhookSecret => "invalid_webhook_secret",
            Self::MissingSignature => "missing_signature",
            Self::MalformedSignature => "malformed_signature",
            Self::MissingTimestamp => "missing_timestamp",
            Self::MalformedTimestamp => "malformed_timestamp",
            Self::ReplayDetected => "replay_detected",
            Self::InvalidSignature => "invalid_signature",
            Self::RateLimited => "rate_limited",
            Self::InvalidJson => "invalid_json",
            Self::MissingPhone => "missing_phone",
        }
    }

    /// Human-readable message suitable for API producers
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidUuid => "Valid source ID (UUID) required in URL path",
            Self::MissingApiKey => "Missing X-API-Key header",
            Self::SourceNotFound => "Unknown webhook source",
            Self::InactiveSource => "Webhook source is deactivated",
            Self::InvalidApiKey => "Invalid API key",
            Self::MissingWebhookSecret => "Missing X-Webhook-Secret header",
            Self::InvalidWebhookSecret => "Invalid webhook secret",
            Self::MissingSignature => "Missing X-Signature header",
            Self::MalformedSignature => "X-Signature must be in sha256=<hex> format",
            Self::MissingTimestamp => "Missing X-Timestamp header",
            Self::MalformedTimestamp => "X-Timestamp must be Unix seconds",
            Self::ReplayDetected => "Request timestamp is outside the replay window",
            Self::InvalidSignature => "Invalid request signature",
            Self::RateLimited => "Rate limit exceeded",
            Self::InvalidJson => "Invalid JSON body",
            Self::MissingPhone => "Phone number is required",
        }
    }
}

/// Outcome of one ingestion request
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Accepted(IngestReceipt),
    Rejected(GateRejection),
}

/// Server-side ingestion failure (audited as `failed`, surfaced as 500)
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Datastore failure during ingestion: {0}")]
    Store(#[from] StoreError),
}

/// Main interface of the ingestion pipeline
#[async_trait]
pub trait IngestProcessor: Send + Sync {
    /// Run one request through the validation chain and write path
    async fn process(&self, request: IngestRequest) -> Result<IngestOutcome, IngestError>;
}

// ============================================================================
// Pipeline Implementation
// ============================================================================

/// Ingestion pipeline with injected datastore collaborators.
///
/// Stateless between requests: all concurrency safety lives in the store
/// contracts (atomic find-or-create, atomic token consume).
pub struct IngestPipeline {
    sources: Arc<dyn SourceStore>,
    rate_limiter: Arc<dyn RateLimiter>,
    audit: Arc<dyn AuditStore>,
    contacts: Arc<dyn ContactStore>,
    deals: Arc<dyn DealStore>,
    lead_events: Arc<dyn LeadEventStore>,
    export_trigger: Arc<dyn ExportTrigger>,
}

impl IngestPipeline {
    /// Assemble a pipeline from its collaborators
    pub fn new(
        sources: Arc<dyn SourceStore>,
        rate_limiter: Arc<dyn RateLimiter>,
        audit: Arc<dyn AuditStore>,
        contacts: Arc<dyn ContactStore>,
        deals: Arc<dyn DealStore>,
        lead_events: Arc<dyn LeadEventStore>,
        export_trigger: Arc<dyn ExportTrigger>,
    ) -> Self {
        Self {
            sources,
            rate_limiter,
            audit,
            contacts,
            deals,
            lead_events,
            export_trigger,
        }
    }

    /// Write the audit record for a gate rejection.
    ///
    /// Audit failures are logged, never propagated: the client still gets
    /// the rejection that actually stopped the request.
    async fn audit_rejection(
        &self,
        rejection: GateRejection,
        request: &IngestRequest,
        body_json: Option<serde_json::Value>,
        source_id: Option<SourceId>,
        brand_id: Option<BrandId>,
        now: Timestamp,
    ) {
        let mut record = IncomingRequest::new(
            RequestStatus::Rejected,
            &request.headers,
            body_json,
            now,
        )
        .with_error(rejection.code());

        if let Some(source_id) = source_id {
            record = record.with_source(source_id);
        }
        if let Some(brand_id) = brand_id {
            record = record.with_brand(brand_id);
        }

        if let Err(e) = self.audit.insert(record).await {
            error!(
                code = rejection.code(),
                error = %e,
                "Failed to write audit record for rejected request"
            );
        }
    }

    /// Run the HMAC checks for a source that requires signing.
    ///
    /// Returns the failing rejection, or `None` when the signature holds.
    fn check_hmac(
        &self,
        source: &WebhookSource,
        request: &IngestRequest,
        now: Timestamp,
    ) -> Option<GateRejection> {
        let Some(secret) = request.header("x-webhook-secret") else {
            return Some(GateRejection::MissingWebhookSecret);
        };
        if !source.verify_webhook_secret(secret) {
            return Some(GateRejection::InvalidWebhookSecret);
        }

        let Some(signature) = request.header("x-signature") else {
            return Some(GateRejection::MissingSignature);
        };

        let Some(timestamp_raw) = request.header("x-timestamp") else {
            return Some(GateRejection::MissingTimestamp);
        };
        let Ok(timestamp) = timestamp_raw.trim().parse::<i64>() else {
            return Some(GateRejection::MalformedTimestamp);
        };

        // Replay check before the signature: a mathematically valid
        // signature with a stale timestamp is still a replay.
        let skew = (now.unix_seconds() - timestamp).abs();
        if skew > source.replay_window_seconds {
            return Some(GateRejection::ReplayDetected);
        }

        match security::verify_signature(secret, timestamp, &request.body, signature) {
            Ok(true) => None,
            Ok(false) => Some(GateRejection::InvalidSignature),
            Err(_) => Some(GateRejection::MalformedSignature),
        }
    }

    /// The post-gate write path: normalize, resolve, append, finalize.
    async fn ingest_lead(
        &self,
        source: &WebhookSource,
        body_json: serde_json::Value,
        audit_id: crate::RequestId,
        now: Timestamp,
    ) -> Result<IngestOutcome, StoreError> {
        let mapped = source.field_mapping.apply(&body_json);

        let lead = match normalize::extract_lead(&mapped) {
            Ok(lead) => lead,
            Err(NormalizationError::MissingPhone) => {
                self.audit
                    .finalize(
                        audit_id,
                        RequestStatus::Rejected,
                        Some(GateRejection::MissingPhone.code().to_string()),
                        None,
                    )
                    .await?;
                return Ok(IngestOutcome::Rejected(GateRejection::MissingPhone));
            }
        };

        let resolution = self
            .contacts
            .find_or_create(NewContact {
                brand_id: source.brand_id,
                normalized_phone: lead.phone.digits.clone(),
                country_code: lead.phone.country_code.clone(),
                first_name: lead.first_name.clone(),
                last_name: lead.last_name.clone(),
                email: lead.email.clone(),
                city: lead.city.clone(),
                cap: lead.cap.clone(),
            })
            .await?;

        let contact = resolution.contact;
        let opted_out = contact.status.is_opted_out();

        // Opted-out contacts still generate lead events (the history stays
        // complete) but no deal may be touched.
        let deal_id = if opted_out {
            None
        } else {
            Some(
                self.deals
                    .find_or_create_open(source.brand_id, contact.id)
                    .await?
                    .id,
            )
        };

        let event = self
            .lead_events
            .append(NewLeadEvent {
                brand_id: source.brand_id,
                contact_id: contact.id,
                deal_id,
                source_id: source.id,
                source_name: source.name.clone(),
                raw_payload: body_json,
                occurred_at: now,
                received_at: now,
                archived: opted_out,
            })
            .await?;

        self.audit
            .finalize(audit_id, RequestStatus::Success, None, Some(event.id))
            .await?;

        info!(
            source_id = %source.id,
            contact_id = %contact.id,
            lead_event_id = %event.id,
            contact_created = resolution.created,
            archived = opted_out,
            "Lead event appended"
        );

        self.export_trigger.trigger(event.id);

        Ok(IngestOutcome::Accepted(IngestReceipt {
            contact_id: contact.id,
            deal_id,
            lead_event_id: event.id,
            archived: opted_out,
            contact_status: contact.status,
        }))
    }
}

#[async_trait]
impl IngestProcessor for IngestPipeline {
    #[instrument(skip(self, request), fields(source_segment = %request.source_id_segment))]
    async fn process(&self, request: IngestRequest) -> Result<IngestOutcome, IngestError> {
        let now = Timestamp::now();

        // Tolerant body parse up front: even requests rejected before the
        // JSON check get their (parseable) body into the audit trail.
        let body_json: Option<serde_json::Value> =
            serde_json::from_slice(&request.body).ok();

        // 1. Path segment must be a UUID.
        if !is_uuid_like(&request.source_id_segment) {
            self.audit_rejection(GateRejection::InvalidUuid, &request, body_json, None, None, now)
                .await;
            return Ok(IngestOutcome::Rejected(GateRejection::InvalidUuid));
        }
        let source_id = match SourceId::from_str(&request.source_id_segment) {
            Ok(id) => id,
            Err(_) => {
                self.audit_rejection(
                    GateRejection::InvalidUuid,
                    &request,
                    body_json,
                    None,
                    None,
                    now,
                )
                .await;
                return Ok(IngestOutcome::Rejected(GateRejection::InvalidUuid));
            }
        };

        // 2. API key header must be present.
        let Some(api_key) = request.header("x-api-key").map(str::to_string) else {
            self.audit_rejection(
                GateRejection::MissingApiKey,
                &request,
                body_json,
                Some(source_id),
                None,
                now,
            )
            .await;
            return Ok(IngestOutcome::Rejected(GateRejection::MissingApiKey));
        };

        // 3. Source must exist.
        let Some(source) = self.sources.get(source_id).await? else {
            self.audit_rejection(
                GateRejection::SourceNotFound,
                &request,
                body_json,
                Some(source_id),
                None,
                now,
            )
            .await;
            return Ok(IngestOutcome::Rejected(GateRejection::SourceNotFound));
        };

        // 4. Source must be active.
        if !source.is_active {
            self.audit_rejection(
                GateRejection::InactiveSource,
                &request,
                body_json,
                Some(source_id),
                Some(source.brand_id),
                now,
            )
            .await;
            return Ok(IngestOutcome::Rejected(GateRejection::InactiveSource));
        }

        // 5. API key must match, constant time.
        if !source.verify_api_key(&api_key) {
            warn!(source_id = %source.id, "API key mismatch");
            self.audit_rejection(
                GateRejection::InvalidApiKey,
                &request,
                body_json,
                Some(source_id),
                Some(source.brand_id),
                now,
            )
            .await;
            return Ok(IngestOutcome::Rejected(GateRejection::InvalidApiKey));
        }

        // 6. HMAC policy, when enabled for the source.
        if source.hmac_enabled {
            if let Some(rejection) = self.check_hmac(&source, &request, now) {
                self.audit_rejection(
                    rejection,
                    &request,
                    body_json,
                    Some(source_id),
                    Some(source.brand_id),
                    now,
                )
                .await;
                return Ok(IngestOutcome::Rejected(rejection));
            }
        }

        // 7. Rate-limit token, consumed atomically in the datastore.
        match self
            .rate_limiter
            .try_consume(source.id, source.rate_limit_per_min)
            .await?
        {
            RateLimitDecision::Allowed => {}
            RateLimitDecision::Limited { .. } => {
                self.audit_rejection(
                    GateRejection::RateLimited,
                    &request,
                    body_json,
                    Some(source_id),
                    Some(source.brand_id),
                    now,
                )
                .await;
                return Ok(IngestOutcome::Rejected(GateRejection::RateLimited));
            }
        }

        // 8. Body must be JSON.
        let Some(body_json) = body_json else {
            self.audit_rejection(
                GateRejection::InvalidJson,
                &request,
                None,
                Some(source_id),
                Some(source.brand_id),
                now,
            )
            .await;
            return Ok(IngestOutcome::Rejected(GateRejection::InvalidJson));
        };

        // Gate cleared: open the pending audit row before any write.
        let pending = IncomingRequest::new(
            RequestStatus::Pending,
            &request.headers,
            Some(body_json.clone()),
            now,
        )
        .with_source(source.id)
        .with_brand(source.brand_id);
        let audit_id = self.audit.insert(pending).await?;

        match self.ingest_lead(&source, body_json, audit_id, now).await {
            Ok(outcome) => Ok(outcome),
            Err(store_error) => {
                // Known failure path: finalize the audit row so it never
                // lingers pending, then surface the server error.
                if let Err(finalize_error) = self
                    .audit
                    .finalize(
                        audit_id,
                        RequestStatus::Failed,
                        Some(store_error.to_string()),
                        None,
                    )
                    .await
                {
                    error!(
                        error = %finalize_error,
                        "Failed to finalize audit record after ingestion error"
                    );
                }
                Err(IngestError::Store(store_error))
            }
        }
    }
}

/// Check if a string looks like a UUID with the 8-4-4-4-12 hyphen pattern.
///
/// Validates by position: hyphens at 8, 13, 18, 23; hex digits everywhere
/// else; 36 characters total.
pub fn is_uuid_like(s: &str) -> bool {
    if s.len() != 36 {
        return false;
    }

    let chars: Vec<char> = s.chars().collect();

    if chars[8] != '-' || chars[13] != '-' || chars[18] != '-' || chars[23] != '-' {
        return false;
    }

    for (i, ch) in chars.iter().enumerate() {
        if i == 8 || i == 13 || i == 18 || i == 23 {
            continue;
        }
        if !ch.is_ascii_hexdigit() {
            return false;
        }
    }

    true
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
