//! # Leadgate Core
//!
//! Core business logic for the Leadgate CRM lead-ingestion service.
//!
//! This crate contains the domain logic for authenticating inbound webhook
//! requests, normalizing lead payloads, resolving contacts and deals,
//! appending immutable lead events, and driving the idempotent spreadsheet
//! export pipeline.
//!
//! ## Architecture
//!
//! The core follows clean architecture principles:
//! - Business logic depends only on trait abstractions
//! - Datastore implementations are injected at runtime
//! - Concurrency safety lives in the datastore contracts (atomic
//!   find-or-create, atomic token consume, unique-claim insert), never in
//!   in-process locks shared between requests
//!
//! ## Usage
//!
//! ```rust
//! use leadgate_core::{LeadEventId, SourceId};
//!
//! // Core types are available for use across the system
//! let event_id = LeadEventId::new();
//! let source_id = SourceId::new();
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Re-export commonly used types
pub use ulid::Ulid;
pub use uuid::Uuid;

pub mod adapters;
pub mod audit;
pub mod crm;
pub mod export;
pub mod ingest;
pub mod normalize;
pub mod ratelimit;
pub mod security;
pub mod source;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Unique identifier for a webhook source.
///
/// This is the public path segment of the ingestion endpoint
/// (`POST /webhook-ingest/{source_id}`), so it is a UUID rather than a
/// sequential id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(Uuid);

impl SourceId {
    /// Generate a new random source ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SourceId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = Uuid::parse_str(s).map_err(|_| ParseError::InvalidFormat {
            expected: "UUID".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(id))
    }
}

/// Tenant identifier. Every source, contact, deal, and lead event is scoped
/// to exactly one brand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrandId(Uuid);

impl BrandId {
    /// Generate a new random brand ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for BrandId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BrandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BrandId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = Uuid::parse_str(s).map_err(|_| ParseError::InvalidFormat {
            expected: "UUID".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(id))
    }
}

/// Unique identifier for a contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactId(Uuid);

impl ContactId {
    /// Generate a new random contact ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ContactId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a deal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DealId(Uuid);

impl DealId {
    /// Generate a new random deal ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for DealId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DealId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an appended lead event.
///
/// Uses ULID for lexicographic sorting: lead events form an append-only
/// history per contact, and sortable ids keep that history cheap to scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeadEventId(Ulid);

impl LeadEventId {
    /// Generate a new unique lead event ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Get string representation of the ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for LeadEventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeadEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LeadEventId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
            expected: "ULID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(ulid))
    }
}

/// Unique identifier for an audited incoming request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Ulid);

impl RequestId {
    /// Generate a new unique request ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Get string representation of the ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
            expected: "ULID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(ulid))
    }
}

// ============================================================================
// Timestamp
// ============================================================================

/// UTC timestamp wrapper used throughout the system
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Construct from Unix seconds
    pub fn from_unix_seconds(secs: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp(secs, 0).map(Self)
    }

    /// Unix seconds since the epoch
    pub fn unix_seconds(&self) -> i64 {
        self.0.timestamp()
    }

    /// Timestamp advanced by the given number of seconds
    pub fn add_seconds(&self, secs: i64) -> Self {
        Self(self.0 + chrono::Duration::seconds(secs))
    }

    /// Whole seconds elapsed since `earlier`. Negative when `earlier` is in
    /// the future relative to `self`.
    pub fn seconds_since(&self, earlier: Timestamp) -> i64 {
        (self.0 - earlier.0).num_seconds()
    }

    /// Underlying chrono value
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

// ============================================================================
// Shared Error Types
// ============================================================================

/// Validation errors for field-level input checking
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field {field} exceeds maximum length of {max_length}")]
    TooLong { field: String, max_length: usize },
}

/// Errors from parsing identifier strings
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got {actual}")]
    InvalidFormat { expected: String, actual: String },
}

/// Errors raised by datastore operations.
///
/// Store implementations map their backend failures onto these variants so
/// the pipeline can distinguish transient outages from permanent faults.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Datastore operation failed: {message}")]
    OperationFailed { message: String },

    #[error("Datastore not available: {message}")]
    Unavailable { message: String },

    #[error("Record not found: {entity} {id}")]
    NotFound { entity: String, id: String },
}

impl StoreError {
    /// Check if the error is transient and the operation may be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::OperationFailed { .. } => true,
            Self::Unavailable { .. } => true,
            Self::NotFound { .. } => false,
        }
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
