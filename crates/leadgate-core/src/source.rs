//! Webhook source configuration.
//!
//! A [`WebhookSource`] is a tenant-scoped inbound endpoint: one row per
//! integration (e.g. "Meta Ads", "Generic Form") carrying the hashed
//! credentials, the per-source rate limit, the payload field mapping, and the
//! HMAC policy. Sources are created with random credentials shown once,
//! rotated by replacing the hash, and deactivated logically, never deleted
//! while audit history references them.

use crate::{security, BrandId, SourceId, StoreError, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default replay window for HMAC-signed requests, in seconds
pub const DEFAULT_REPLAY_WINDOW_SECONDS: i64 = 300;

// ============================================================================
// Core Types
// ============================================================================

/// Mapping from target field names to source payload keys.
///
/// Applied as a pure function over the inbound payload: for every
/// `target -> source_key` pair whose source key exists in the payload, the
/// value is copied under the target key. Keys not named as a mapping source
/// pass through unchanged: mapping augments the payload, it never strips it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMapping(pub HashMap<String, String>);

impl FieldMapping {
    /// Empty mapping (payload passes through untouched)
    pub fn empty() -> Self {
        Self(HashMap::new())
    }

    /// Apply the mapping to a payload object, producing a new object.
    ///
    /// Non-object payloads are returned unchanged; the gate has already
    /// guaranteed a JSON object by the time mapping runs, but the function
    /// stays total.
    pub fn apply(&self, payload: &serde_json::Value) -> serde_json::Value {
        let Some(object) = payload.as_object() else {
            return payload.clone();
        };

        let mut mapped = object.clone();
        for (target, source_key) in &self.0 {
            if let Some(value) = object.get(source_key) {
                mapped.insert(target.clone(), value.clone());
            }
        }

        serde_json::Value::Object(mapped)
    }
}

/// Tenant-scoped inbound webhook endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSource {
    /// Public endpoint identifier (URL path segment)
    pub id: SourceId,

    /// Owning tenant
    pub brand_id: BrandId,

    /// Human-readable integration name (e.g. "Meta Ads")
    pub name: String,

    /// SHA-256 hex digest of the API key. Plaintext is never stored.
    pub api_key_hash: String,

    /// Logical activation flag; deactivation replaces deletion
    pub is_active: bool,

    /// Requests per minute allowed through the token bucket
    pub rate_limit_per_min: u32,

    /// Payload field mapping applied before normalization
    #[serde(default)]
    pub field_mapping: FieldMapping,

    /// Whether requests must carry an HMAC signature
    #[serde(default)]
    pub hmac_enabled: bool,

    /// SHA-256 hex digest of the webhook secret (distinct from the API key)
    #[serde(default)]
    pub hmac_secret_hash: Option<String>,

    /// Maximum allowed skew between X-Timestamp and server time
    #[serde(default = "default_replay_window")]
    pub replay_window_seconds: i64,

    /// Creation time
    pub created_at: Timestamp,

    /// Last credential rotation, if any
    #[serde(default)]
    pub rotated_at: Option<Timestamp>,
}

fn default_replay_window() -> i64 {
    DEFAULT_REPLAY_WINDOW_SECONDS
}

impl WebhookSource {
    /// Verify a presented API key against the stored hash in constant time
    pub fn verify_api_key(&self, presented: &str) -> bool {
        security::verify_against_hash(presented, &self.api_key_hash)
    }

    /// Verify a presented webhook secret against the stored hash in constant
    /// time. Returns `false` when the source has no secret configured.
    pub fn verify_webhook_secret(&self, presented: &str) -> bool {
        match &self.hmac_secret_hash {
            Some(stored) => security::verify_against_hash(presented, stored),
            None => false,
        }
    }

    /// Rotate the API key hash. The old key stops working immediately.
    pub fn rotate_api_key(&mut self, new_hash: String, now: Timestamp) {
        self.api_key_hash = new_hash;
        self.rotated_at = Some(now);
    }

    /// Logically deactivate the source
    pub fn deactivate(&mut self) {
        self.is_active = false;
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Read/write access to webhook source configuration rows.
///
/// Source rows are owned by the admin surface; the ingestion pipeline only
/// reads them. The CLI and the seed loader insert them.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Look up a source by its public id
    async fn get(&self, id: SourceId) -> Result<Option<WebhookSource>, StoreError>;

    /// Insert or replace a source row
    async fn upsert(&self, source: WebhookSource) -> Result<(), StoreError>;

    /// List all configured sources
    async fn list(&self) -> Result<Vec<WebhookSource>, StoreError>;
}

#[cfg(test)]
#[path = "source_tests.rs"]
mod tests;
