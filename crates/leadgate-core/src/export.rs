//! Idempotent spreadsheet export pipeline.
//!
//! Each lead event is exported at most once concurrently: the entry point
//! claims the event by inserting a `processing` row keyed uniquely by
//! lead_event_id. The unique constraint is the mutex: a second caller's
//! insert collides, reads the claim's status, and reports a skip instead of
//! double-appending. After the claim, the pipeline enriches the event,
//! ensures the aggregate and per-source tabs exist, appends rows, and
//! finalizes the claim to `success` or `failed`.
//!
//! Tab creation and header formatting happen only when a tab is first
//! created; subsequent appends never re-format, preserving any edits made in
//! the spreadsheet afterwards. Tab listings are memoized per export run in a
//! [`SheetInfoCache`] passed through the call chain, never a process-global
//! cache, which would go stale across concurrent runs.

use crate::crm::{Contact, ContactStore, LeadEvent, LeadEventStore};
use crate::{LeadEventId, StoreError, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Aggregate tab receiving every exported lead
pub const ALL_RAW_TAB: &str = "All Leads Raw";

/// One-time-formatted operator overview tab
pub const SUMMARY_TAB: &str = "Summary";

/// Header row for raw tabs
const RAW_HEADER: &[&str] = &[
    "Lead Event ID",
    "Received At",
    "Occurred At",
    "Source",
    "Contact ID",
    "Phone",
    "Country",
    "First Name",
    "Last Name",
    "Email",
    "City",
    "CAP",
    "Archived",
    "Payload",
];

/// Header row for per-source view tabs
const VIEW_HEADER: &[&str] = &[
    "Received At",
    "First Name",
    "Last Name",
    "Phone",
    "Email",
    "City",
    "Source",
];

/// Header row for the summary tab
const SUMMARY_HEADER: &[&str] = &["Metric", "Value"];

// ============================================================================
// Export Log
// ============================================================================

/// Claim lifecycle: `(none) -> processing -> {success | failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Processing,
    Success,
    Failed,
}

impl ExportStatus {
    /// Skip reason reported when a claim already exists
    pub fn as_skip_reason(&self) -> &'static str {
        match self {
            Self::Processing => "in_progress",
            Self::Success => "already_exported",
            Self::Failed => "failed",
        }
    }
}

/// One claim row per lead event submitted for export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetsExportLog {
    pub lead_event_id: LeadEventId,
    pub status: ExportStatus,
    pub error_message: Option<String>,
    pub claimed_at: Timestamp,
    pub finalized_at: Option<Timestamp>,
}

/// Result of a claim attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller owns the export
    Claimed,
    /// Another claim exists with the given status
    AlreadyExists(ExportStatus),
}

/// Claim row storage. The unique constraint on lead_event_id is the
/// at-most-one-concurrent-exporter guarantee.
#[async_trait]
pub trait ExportLogStore: Send + Sync {
    /// Attempt to insert a `processing` claim. A unique-constraint collision
    /// returns [`ClaimOutcome::AlreadyExists`] with the incumbent's status.
    async fn try_claim(&self, lead_event_id: LeadEventId) -> Result<ClaimOutcome, StoreError>;

    /// Forcibly (re-)claim the row back to `processing`, used by explicit
    /// re-export requests.
    async fn reclaim(&self, lead_event_id: LeadEventId) -> Result<(), StoreError>;

    /// Transition the claim to a terminal status
    async fn finalize(
        &self,
        lead_event_id: LeadEventId,
        status: ExportStatus,
        error_message: Option<String>,
    ) -> Result<(), StoreError>;

    /// Fetch a claim row
    async fn get(&self, lead_event_id: LeadEventId)
        -> Result<Option<SheetsExportLog>, StoreError>;
}

// ============================================================================
// Sheets Client Seam
// ============================================================================

/// Errors from the spreadsheet backend
#[derive(Debug, thiserror::Error)]
pub enum SheetsError {
    #[error("Sheets API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Sheets transport error: {message}")]
    Transport { message: String },

    #[error("Sheets authentication failed: {message}")]
    Auth { message: String },
}

/// Minimal spreadsheet operations the pipeline composes.
///
/// Implementations talk to one spreadsheet; the pipeline never sees a
/// spreadsheet id.
#[async_trait]
pub trait SheetsClient: Send + Sync {
    /// Tab title -> numeric sheet id for every existing tab
    async fn list_tabs(&self) -> Result<HashMap<String, i64>, SheetsError>;

    /// Create a tab, returning its numeric sheet id
    async fn add_tab(&self, title: &str) -> Result<i64, SheetsError>;

    /// Append one row of cell values to a tab
    async fn append_row(
        &self,
        tab: &str,
        row: Vec<serde_json::Value>,
    ) -> Result<(), SheetsError>;

    /// Apply the one-time header formatting (frozen header row, basic
    /// filter, bold header) to a freshly created tab
    async fn format_header(&self, sheet_id: i64) -> Result<(), SheetsError>;
}

/// Request-scoped memo of the spreadsheet's tab listing.
///
/// Constructed once per export run and threaded through the tab-ensure
/// calls, so one run performs at most one listing fetch regardless of how
/// many tabs it touches.
#[derive(Debug, Default)]
pub struct SheetInfoCache {
    tabs: HashMap<String, i64>,
    loaded: bool,
}

impl SheetInfoCache {
    /// Empty, unloaded cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the tab listing once; later calls are no-ops
    pub async fn ensure_loaded(&mut self, client: &dyn SheetsClient) -> Result<(), SheetsError> {
        if !self.loaded {
            self.tabs = client.list_tabs().await?;
            self.loaded = true;
        }
        Ok(())
    }

    /// Whether a tab with this title is known
    pub fn contains(&self, title: &str) -> bool {
        self.tabs.contains_key(title)
    }

    /// Record a tab created during this run
    pub fn insert(&mut self, title: String, sheet_id: i64) {
        self.tabs.insert(title, sheet_id);
    }
}

// ============================================================================
// Downstream Trigger Seam
// ============================================================================

/// Fire-and-forget dispatch of an export for a freshly appended lead event.
///
/// Implementations spawn detached work with a bounded timeout and swallow
/// every failure (logging it); the trigger must never affect the caller's
/// result.
pub trait ExportTrigger: Send + Sync {
    /// Dispatch an export attempt for the given lead event
    fn trigger(&self, lead_event_id: LeadEventId);
}

/// Trigger that does nothing. Used when exporting is disabled and in tests.
#[derive(Debug, Clone, Default)]
pub struct NoopExportTrigger;

impl ExportTrigger for NoopExportTrigger {
    fn trigger(&self, _lead_event_id: LeadEventId) {}
}

// ============================================================================
// Pipeline
// ============================================================================

/// Errors from an export run
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Lead event not found: {id}")]
    EventNotFound { id: LeadEventId },

    #[error("Contact not found for lead event {id}")]
    ContactNotFound { id: LeadEventId },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sheets(#[from] SheetsError),
}

/// Outcome of an export request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// Exporting is globally disabled by configuration
    Disabled,

    /// Another claim already covers this lead event
    Skipped { reason: &'static str },

    /// Rows appended; tab names reported back to the caller
    Exported {
        all_raw_tab: String,
        source_raw_tab: String,
        source_view_tab: String,
    },
}

/// The idempotent export pipeline.
///
/// Holds only trait objects; the Sheets backend and the datastore are
/// injected, so the pipeline's claim semantics are testable without any
/// network.
pub struct ExportPipeline {
    enabled: bool,
    export_log: Arc<dyn ExportLogStore>,
    lead_events: Arc<dyn LeadEventStore>,
    contacts: Arc<dyn ContactStore>,
    sheets: Arc<dyn SheetsClient>,
}

impl ExportPipeline {
    /// Assemble a pipeline from its collaborators
    pub fn new(
        enabled: bool,
        export_log: Arc<dyn ExportLogStore>,
        lead_events: Arc<dyn LeadEventStore>,
        contacts: Arc<dyn ContactStore>,
        sheets: Arc<dyn SheetsClient>,
    ) -> Self {
        Self {
            enabled,
            export_log,
            lead_events,
            contacts,
            sheets,
        }
    }

    /// Run the export for one lead event.
    ///
    /// Without `force`, an existing claim short-circuits to a skip. With
    /// `force`, the claim is reset to `processing` and the export re-runs.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError`] on enrichment or spreadsheet failures; the
    /// claim row is finalized to `failed` before the error propagates.
    pub async fn run(
        &self,
        lead_event_id: LeadEventId,
        force: bool,
    ) -> Result<ExportOutcome, ExportError> {
        if !self.enabled {
            return Ok(ExportOutcome::Disabled);
        }

        if force {
            self.export_log.reclaim(lead_event_id).await?;
            info!(%lead_event_id, "Forced re-export: claim reset to processing");
        } else {
            match self.export_log.try_claim(lead_event_id).await? {
                ClaimOutcome::Claimed => {}
                ClaimOutcome::AlreadyExists(status) => {
                    let reason = status.as_skip_reason();
                    info!(%lead_event_id, reason, "Export skipped: claim already exists");
                    return Ok(ExportOutcome::Skipped { reason });
                }
            }
        }

        match self.perform(lead_event_id).await {
            Ok(outcome) => {
                self.export_log
                    .finalize(lead_event_id, ExportStatus::Success, None)
                    .await?;
                info!(%lead_event_id, "Export completed");
                Ok(outcome)
            }
            Err(error) => {
                // Best-effort failure finalization: the original error is the
                // one worth surfacing even if the claim update also fails.
                if let Err(finalize_error) = self
                    .export_log
                    .finalize(
                        lead_event_id,
                        ExportStatus::Failed,
                        Some(error.to_string()),
                    )
                    .await
                {
                    warn!(
                        %lead_event_id,
                        error = %finalize_error,
                        "Failed to finalize export claim after error"
                    );
                }
                Err(error)
            }
        }
    }

    /// The claimed export body: enrich, ensure tabs, append.
    async fn perform(&self, lead_event_id: LeadEventId) -> Result<ExportOutcome, ExportError> {
        let event = self
            .lead_events
            .get(lead_event_id)
            .await?
            .ok_or(ExportError::EventNotFound { id: lead_event_id })?;

        let contact = self
            .contacts
            .get(event.contact_id)
            .await?
            .ok_or(ExportError::ContactNotFound { id: lead_event_id })?;

        let source_raw_tab = format!("{} Raw", event.source_name);
        let source_view_tab = format!("{} View", event.source_name);

        let mut cache = SheetInfoCache::new();

        self.ensure_tab(&mut cache, ALL_RAW_TAB, RAW_HEADER).await?;
        self.sheets
            .append_row(ALL_RAW_TAB, raw_row(&event, &contact))
            .await?;

        self.ensure_tab(&mut cache, &source_raw_tab, RAW_HEADER)
            .await?;
        self.sheets
            .append_row(&source_raw_tab, raw_row(&event, &contact))
            .await?;

        self.ensure_tab(&mut cache, &source_view_tab, VIEW_HEADER)
            .await?;
        self.sheets
            .append_row(&source_view_tab, view_row(&event, &contact))
            .await?;

        // The summary tab is ensured (and formatted) but never appended to;
        // its formulas live in the spreadsheet itself.
        self.ensure_tab(&mut cache, SUMMARY_TAB, SUMMARY_HEADER)
            .await?;

        Ok(ExportOutcome::Exported {
            all_raw_tab: ALL_RAW_TAB.to_string(),
            source_raw_tab,
            source_view_tab,
        })
    }

    /// Create a tab if the cached listing lacks it, writing the header row
    /// and applying the one-time formatting. Existing tabs are left exactly
    /// as they are.
    async fn ensure_tab(
        &self,
        cache: &mut SheetInfoCache,
        title: &str,
        header: &[&str],
    ) -> Result<(), SheetsError> {
        cache.ensure_loaded(self.sheets.as_ref()).await?;
        if cache.contains(title) {
            return Ok(());
        }

        let sheet_id = self.sheets.add_tab(title).await?;
        self.sheets
            .append_row(
                title,
                header
                    .iter()
                    .map(|h| serde_json::Value::String((*h).to_string()))
                    .collect(),
            )
            .await?;
        self.sheets.format_header(sheet_id).await?;
        cache.insert(title.to_string(), sheet_id);

        info!(tab = title, sheet_id, "Created and formatted spreadsheet tab");
        Ok(())
    }
}

/// Full row for raw tabs
fn raw_row(event: &LeadEvent, contact: &Contact) -> Vec<serde_json::Value> {
    use serde_json::Value;

    let cell = |value: &Option<String>| {
        Value::String(value.clone().unwrap_or_default())
    };

    vec![
        Value::String(event.id.to_string()),
        Value::String(event.received_at.to_string()),
        Value::String(event.occurred_at.to_string()),
        Value::String(event.source_name.clone()),
        Value::String(event.contact_id.to_string()),
        Value::String(contact.normalized_phone.clone()),
        Value::String(contact.country_code.clone()),
        cell(&contact.first_name),
        cell(&contact.last_name),
        cell(&contact.email),
        cell(&contact.city),
        cell(&contact.cap),
        Value::Bool(event.archived),
        Value::String(event.raw_payload.to_string()),
    ]
}

/// Trimmed row for per-source view tabs
fn view_row(event: &LeadEvent, contact: &Contact) -> Vec<serde_json::Value> {
    use serde_json::Value;

    let cell = |value: &Option<String>| {
        Value::String(value.clone().unwrap_or_default())
    };

    vec![
        Value::String(event.received_at.to_string()),
        cell(&contact.first_name),
        cell(&contact.last_name),
        Value::String(contact.normalized_phone.clone()),
        cell(&contact.email),
        cell(&contact.city),
        Value::String(event.source_name.clone()),
    ]
}

#[cfg(test)]
#[path = "export_tests.rs"]
mod tests;
