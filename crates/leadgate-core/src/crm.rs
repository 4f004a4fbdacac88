//! CRM records touched by ingestion: contacts, deals, and lead events.
//!
//! Ingestion owns three write paths, each with a precise contract:
//!
//! - Contacts are deduplicated by normalized phone within a brand via an
//!   atomic find-or-create. Ingestion never overwrites fields on an existing
//!   contact; admin surfaces own edits.
//! - Deals are found-or-created atomically per (brand, contact), targeting
//!   the contact's single open deal. Opted-out (archived) contacts get no
//!   deal operations at all.
//! - Lead events are append-only facts. A retried payload, byte-identical
//!   or not, always appends a new row.

use crate::{BrandId, ContactId, DealId, LeadEventId, SourceId, StoreError, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// Contact
// ============================================================================

/// Contact lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    New,
    Active,
    Qualified,
    Unqualified,
    /// Opted out: audit-visible lead events continue, automation stops
    Archived,
}

impl ContactStatus {
    /// Whether the contact has opted out of pipeline automation
    pub fn is_opted_out(&self) -> bool {
        matches!(self, Self::Archived)
    }

    /// Wire representation used in API responses
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Active => "active",
            Self::Qualified => "qualified",
            Self::Unqualified => "unqualified",
            Self::Archived => "archived",
        }
    }
}

/// Tenant-scoped person record keyed by normalized phone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub brand_id: BrandId,

    /// Dedup key: within a brand, one normalized phone maps to at most one
    /// contact
    pub normalized_phone: String,
    pub country_code: String,

    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub city: Option<String>,
    pub cap: Option<String>,

    pub status: ContactStatus,
    pub created_at: Timestamp,
}

/// Field values supplied when a contact might need to be created.
///
/// Only consulted on first creation; an existing contact's fields are left
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub brand_id: BrandId,
    pub normalized_phone: String,
    pub country_code: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub city: Option<String>,
    pub cap: Option<String>,
}

/// Result of a contact find-or-create
#[derive(Debug, Clone)]
pub struct ContactResolution {
    pub contact: Contact,
    /// `true` when this call created the row
    pub created: bool,
}

// ============================================================================
// Deal
// ============================================================================

/// Deal lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    Open,
    Won,
    Lost,
}

/// Tenant-scoped opportunity attached to a contact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    pub brand_id: BrandId,
    pub contact_id: ContactId,
    pub status: DealStatus,
    pub created_at: Timestamp,
}

// ============================================================================
// Lead Event
// ============================================================================

/// Append-only fact recording one ingestion occurrence.
///
/// Never updated after creation; only the audit record referencing it is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadEvent {
    pub id: LeadEventId,
    pub brand_id: BrandId,
    pub contact_id: ContactId,

    /// Absent when the contact had opted out at ingestion time
    pub deal_id: Option<DealId>,

    pub source_id: SourceId,
    pub source_name: String,

    /// Payload exactly as received (post body-parse, pre mapping)
    pub raw_payload: serde_json::Value,

    pub occurred_at: Timestamp,
    pub received_at: Timestamp,

    /// `true` when the contact was opted out at ingestion time
    pub archived: bool,
}

/// Fields for appending a lead event
#[derive(Debug, Clone)]
pub struct NewLeadEvent {
    pub brand_id: BrandId,
    pub contact_id: ContactId,
    pub deal_id: Option<DealId>,
    pub source_id: SourceId,
    pub source_name: String,
    pub raw_payload: serde_json::Value,
    pub occurred_at: Timestamp,
    pub received_at: Timestamp,
    pub archived: bool,
}

// ============================================================================
// Store Traits
// ============================================================================

/// Atomic contact resolution scoped to (brand, normalized phone).
///
/// Concurrent calls with the same key must resolve to the same contact id;
/// the datastore's uniqueness guarantee, not an in-process lock, carries
/// that contract.
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Find the contact for (brand, phone) or create it with the supplied
    /// fields. Existing contacts are returned as-is, fields untouched.
    async fn find_or_create(&self, new: NewContact) -> Result<ContactResolution, StoreError>;

    /// Fetch a contact by id
    async fn get(&self, id: ContactId) -> Result<Option<Contact>, StoreError>;
}

/// Atomic deal resolution scoped to (brand, contact)
#[async_trait]
pub trait DealStore: Send + Sync {
    /// Return the contact's open deal, creating one if none exists
    async fn find_or_create_open(
        &self,
        brand_id: BrandId,
        contact_id: ContactId,
    ) -> Result<Deal, StoreError>;

    /// Count deals for a contact (tests and diagnostics)
    async fn count_for_contact(&self, contact_id: ContactId) -> Result<usize, StoreError>;
}

/// Append-only lead event storage
#[async_trait]
pub trait LeadEventStore: Send + Sync {
    /// Append a new event row. There is deliberately no update operation.
    async fn append(&self, event: NewLeadEvent) -> Result<LeadEvent, StoreError>;

    /// Fetch an event by id
    async fn get(&self, id: LeadEventId) -> Result<Option<LeadEvent>, StoreError>;

    /// List events for a contact, oldest first
    async fn list_for_contact(&self, contact_id: ContactId) -> Result<Vec<LeadEvent>, StoreError>;
}
