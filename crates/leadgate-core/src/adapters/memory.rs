//! # In-Memory Datastore
//!
//! Thread-safe in-memory implementation of every store trait, used by the
//! service binary and by tests.
//!
//! A single mutex guards all tables, which makes each store operation
//! naturally atomic: find-or-create, token consume, and export claim each
//! run as one read-modify-write under the lock. That is exactly the contract
//! a database adapter provides through unique constraints and atomic
//! UPDATE...RETURNING statements.

use crate::audit::{AuditStore, IncomingRequest, RequestStatus};
use crate::crm::{
    Contact, ContactResolution, ContactStatus, ContactStore, Deal, DealStatus, DealStore,
    LeadEvent, LeadEventStore, NewContact, NewLeadEvent,
};
use crate::export::{ClaimOutcome, ExportLogStore, ExportStatus, SheetsExportLog};
use crate::ratelimit::{
    RateLimitBucket, RateLimitDecision, RateLimiter, RETRY_AFTER_SECONDS,
};
use crate::source::{SourceStore, WebhookSource};
use crate::{
    BrandId, ContactId, DealId, LeadEventId, RequestId, SourceId, StoreError, Timestamp,
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// All tables behind one lock
#[derive(Default)]
struct Inner {
    sources: HashMap<SourceId, WebhookSource>,
    buckets: HashMap<SourceId, RateLimitBucket>,

    requests: HashMap<RequestId, IncomingRequest>,
    request_order: Vec<RequestId>,

    contacts: HashMap<ContactId, Contact>,
    /// Uniqueness index: (brand, normalized phone) -> contact
    contacts_by_phone: HashMap<(BrandId, String), ContactId>,

    deals: HashMap<DealId, Deal>,

    lead_events: HashMap<LeadEventId, LeadEvent>,
    lead_event_order: Vec<LeadEventId>,

    export_logs: HashMap<LeadEventId, SheetsExportLog>,
}

/// Thread-safe in-memory datastore implementing every store trait
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Number of lead events stored (diagnostics and tests)
    pub fn lead_event_count(&self) -> usize {
        self.lock().lead_events.len()
    }

    /// Number of audit rows stored (diagnostics and tests)
    pub fn audit_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// Snapshot of every audit row in insertion order (diagnostics and tests)
    pub fn audit_records(&self) -> Vec<IncomingRequest> {
        let inner = self.lock();
        inner
            .request_order
            .iter()
            .filter_map(|id| inner.requests.get(id))
            .cloned()
            .collect()
    }

    /// Replace a contact row directly, bypassing find-or-create.
    ///
    /// Test and seed helper for preparing existing contacts (for example an
    /// archived, opted-out contact).
    pub fn put_contact(&self, contact: Contact) {
        let mut inner = self.lock();
        inner.contacts_by_phone.insert(
            (contact.brand_id, contact.normalized_phone.clone()),
            contact.id,
        );
        inner.contacts.insert(contact.id, contact);
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MemoryStore")
            .field("sources", &inner.sources.len())
            .field("contacts", &inner.contacts.len())
            .field("lead_events", &inner.lead_events.len())
            .field("requests", &inner.requests.len())
            .finish()
    }
}

// ============================================================================
// SourceStore
// ============================================================================

#[async_trait]
impl SourceStore for MemoryStore {
    async fn get(&self, id: SourceId) -> Result<Option<WebhookSource>, StoreError> {
        Ok(self.lock().sources.get(&id).cloned())
    }

    async fn upsert(&self, source: WebhookSource) -> Result<(), StoreError> {
        self.lock().sources.insert(source.id, source);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<WebhookSource>, StoreError> {
        let mut sources: Vec<WebhookSource> = self.lock().sources.values().cloned().collect();
        sources.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sources)
    }
}

// ============================================================================
// RateLimiter
// ============================================================================

#[async_trait]
impl RateLimiter for MemoryStore {
    async fn try_consume(
        &self,
        source_id: SourceId,
        rate_limit_per_min: u32,
    ) -> Result<RateLimitDecision, StoreError> {
        let now = Timestamp::now();
        let mut inner = self.lock();

        let bucket = inner
            .buckets
            .entry(source_id)
            .or_insert_with(|| RateLimitBucket::full(source_id, rate_limit_per_min, now));

        if bucket.try_consume(now) {
            Ok(RateLimitDecision::Allowed)
        } else {
            Ok(RateLimitDecision::Limited {
                retry_after_seconds: RETRY_AFTER_SECONDS,
            })
        }
    }
}

// ============================================================================
// AuditStore
// ============================================================================

#[async_trait]
impl AuditStore for MemoryStore {
    async fn insert(&self, record: IncomingRequest) -> Result<RequestId, StoreError> {
        let id = record.id;
        let mut inner = self.lock();
        inner.requests.insert(id, record);
        inner.request_order.push(id);
        Ok(id)
    }

    async fn finalize(
        &self,
        id: RequestId,
        status: RequestStatus,
        error_message: Option<String>,
        lead_event_id: Option<LeadEventId>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let record = inner
            .requests
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "incoming_request".to_string(),
                id: id.to_string(),
            })?;

        if record.status.is_terminal() {
            return Err(StoreError::OperationFailed {
                message: format!("audit record {id} already finalized"),
            });
        }

        record.status = status;
        record.processed = true;
        record.error_message = error_message;
        record.lead_event_id = lead_event_id;
        record.finalized_at = Some(Timestamp::now());
        Ok(())
    }

    async fn get(&self, id: RequestId) -> Result<Option<IncomingRequest>, StoreError> {
        Ok(self.lock().requests.get(&id).cloned())
    }

    async fn list_for_source(
        &self,
        source_id: SourceId,
        limit: usize,
    ) -> Result<Vec<IncomingRequest>, StoreError> {
        let inner = self.lock();
        let records = inner
            .request_order
            .iter()
            .rev()
            .filter_map(|id| inner.requests.get(id))
            .filter(|r| r.source_id == Some(source_id))
            .take(limit)
            .cloned()
            .collect();
        Ok(records)
    }
}

// ============================================================================
// ContactStore
// ============================================================================

#[async_trait]
impl ContactStore for MemoryStore {
    async fn find_or_create(&self, new: NewContact) -> Result<ContactResolution, StoreError> {
        let mut inner = self.lock();
        let key = (new.brand_id, new.normalized_phone.clone());

        if let Some(existing_id) = inner.contacts_by_phone.get(&key) {
            let contact = inner
                .contacts
                .get(existing_id)
                .cloned()
                .ok_or_else(|| StoreError::OperationFailed {
                    message: format!("contact index points at missing row {existing_id}"),
                })?;
            return Ok(ContactResolution {
                contact,
                created: false,
            });
        }

        let contact = Contact {
            id: ContactId::new(),
            brand_id: new.brand_id,
            normalized_phone: new.normalized_phone,
            country_code: new.country_code,
            first_name: new.first_name,
            last_name: new.last_name,
            email: new.email,
            city: new.city,
            cap: new.cap,
            status: ContactStatus::New,
            created_at: Timestamp::now(),
        };

        inner.contacts_by_phone.insert(key, contact.id);
        inner.contacts.insert(contact.id, contact.clone());

        Ok(ContactResolution {
            contact,
            created: true,
        })
    }

    async fn get(&self, id: ContactId) -> Result<Option<Contact>, StoreError> {
        Ok(self.lock().contacts.get(&id).cloned())
    }
}

// ============================================================================
// DealStore
// ============================================================================

#[async_trait]
impl DealStore for MemoryStore {
    async fn find_or_create_open(
        &self,
        brand_id: BrandId,
        contact_id: ContactId,
    ) -> Result<Deal, StoreError> {
        let mut inner = self.lock();

        if let Some(existing) = inner
            .deals
            .values()
            .find(|d| d.contact_id == contact_id && d.status == DealStatus::Open)
        {
            return Ok(existing.clone());
        }

        let deal = Deal {
            id: DealId::new(),
            brand_id,
            contact_id,
            status: DealStatus::Open,
            created_at: Timestamp::now(),
        };
        inner.deals.insert(deal.id, deal.clone());
        Ok(deal)
    }

    async fn count_for_contact(&self, contact_id: ContactId) -> Result<usize, StoreError> {
        Ok(self
            .lock()
            .deals
            .values()
            .filter(|d| d.contact_id == contact_id)
            .count())
    }
}

// ============================================================================
// LeadEventStore
// ============================================================================

#[async_trait]
impl LeadEventStore for MemoryStore {
    async fn append(&self, event: NewLeadEvent) -> Result<LeadEvent, StoreError> {
        let row = LeadEvent {
            id: LeadEventId::new(),
            brand_id: event.brand_id,
            contact_id: event.contact_id,
            deal_id: event.deal_id,
            source_id: event.source_id,
            source_name: event.source_name,
            raw_payload: event.raw_payload,
            occurred_at: event.occurred_at,
            received_at: event.received_at,
            archived: event.archived,
        };

        let mut inner = self.lock();
        inner.lead_events.insert(row.id, row.clone());
        inner.lead_event_order.push(row.id);
        Ok(row)
    }

    async fn get(&self, id: LeadEventId) -> Result<Option<LeadEvent>, StoreError> {
        Ok(self.lock().lead_events.get(&id).cloned())
    }

    async fn list_for_contact(
        &self,
        contact_id: ContactId,
    ) -> Result<Vec<LeadEvent>, StoreError> {
        let inner = self.lock();
        let events = inner
            .lead_event_order
            .iter()
            .filter_map(|id| inner.lead_events.get(id))
            .filter(|e| e.contact_id == contact_id)
            .cloned()
            .collect();
        Ok(events)
    }
}

// ============================================================================
// ExportLogStore
// ============================================================================

#[async_trait]
impl ExportLogStore for MemoryStore {
    async fn try_claim(&self, lead_event_id: LeadEventId) -> Result<ClaimOutcome, StoreError> {
        let mut inner = self.lock();

        // Single check-and-insert under the lock, mirroring a
        // unique-constraint INSERT: the second caller sees the incumbent.
        if let Some(existing) = inner.export_logs.get(&lead_event_id) {
            return Ok(ClaimOutcome::AlreadyExists(existing.status));
        }

        inner.export_logs.insert(
            lead_event_id,
            SheetsExportLog {
                lead_event_id,
                status: ExportStatus::Processing,
                error_message: None,
                claimed_at: Timestamp::now(),
                finalized_at: None,
            },
        );
        Ok(ClaimOutcome::Claimed)
    }

    async fn reclaim(&self, lead_event_id: LeadEventId) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.export_logs.insert(
            lead_event_id,
            SheetsExportLog {
                lead_event_id,
                status: ExportStatus::Processing,
                error_message: None,
                claimed_at: Timestamp::now(),
                finalized_at: None,
            },
        );
        Ok(())
    }

    async fn finalize(
        &self,
        lead_event_id: LeadEventId,
        status: ExportStatus,
        error_message: Option<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let log = inner
            .export_logs
            .get_mut(&lead_event_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "sheets_export_log".to_string(),
                id: lead_event_id.to_string(),
            })?;

        if log.status != ExportStatus::Processing {
            return Err(StoreError::OperationFailed {
                message: format!("export claim for {lead_event_id} already finalized"),
            });
        }

        log.status = status;
        log.error_message = error_message;
        log.finalized_at = Some(Timestamp::now());
        Ok(())
    }

    async fn get(
        &self,
        lead_event_id: LeadEventId,
    ) -> Result<Option<SheetsExportLog>, StoreError> {
        Ok(self.lock().export_logs.get(&lead_event_id).cloned())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
