//! Response body types for the HTTP service

use leadgate_core::export::ExportOutcome;
use leadgate_core::ingest::IngestReceipt;
use leadgate_core::{ContactId, DealId, LeadEventId, Timestamp};
use serde::Serialize;

/// Successful ingestion response
#[derive(Debug, Serialize)]
pub struct IngestSuccessResponse {
    pub success: bool,
    pub contact_id: ContactId,
    pub deal_id: Option<DealId>,
    pub lead_event_id: LeadEventId,
    pub archived: bool,
    pub contact_status: String,
}

impl From<IngestReceipt> for IngestSuccessResponse {
    fn from(receipt: IngestReceipt) -> Self {
        Self {
            success: true,
            contact_id: receipt.contact_id,
            deal_id: receipt.deal_id,
            lead_event_id: receipt.lead_event_id,
            archived: receipt.archived,
            contact_status: receipt.contact_status.as_str().to_string(),
        }
    }
}

/// Export endpoint response.
///
/// One shape covers the four outcomes; absent fields are omitted from the
/// JSON so callers see exactly the keys the outcome implies.
#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_raw_tab: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_raw_tab: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_view_tab: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExportResponse {
    /// Response for a completed export run
    pub fn from_outcome(outcome: ExportOutcome) -> Self {
        match outcome {
            ExportOutcome::Exported {
                all_raw_tab,
                source_raw_tab,
                source_view_tab,
            } => Self {
                success: true,
                skipped: None,
                reason: None,
                all_raw_tab: Some(all_raw_tab),
                source_raw_tab: Some(source_raw_tab),
                source_view_tab: Some(source_view_tab),
                error: None,
            },
            ExportOutcome::Skipped { reason } => Self {
                success: true,
                skipped: Some(true),
                reason: Some(reason.to_string()),
                all_raw_tab: None,
                source_raw_tab: None,
                source_view_tab: None,
                error: None,
            },
            ExportOutcome::Disabled => Self::failure("Sheets export is disabled"),
        }
    }

    /// Response for an errored export run
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            skipped: None,
            reason: None,
            all_raw_tab: None,
            source_raw_tab: None,
            source_view_tab: None,
            error: Some(message.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: Timestamp,
    pub version: String,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub timestamp: Timestamp,
}

#[cfg(test)]
#[path = "responses_tests.rs"]
mod tests;
