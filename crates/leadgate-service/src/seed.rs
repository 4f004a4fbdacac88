//! Webhook source seeding.
//!
//! Source rows are owned by the admin surface in production; this service
//! loads them from a YAML seed file at boot. Credentials in the seed file
//! are already SHA-256 hashes (the CLI generates entries in this shape), so
//! the file never contains a usable secret.

use leadgate_core::source::{
    FieldMapping, SourceStore, WebhookSource, DEFAULT_REPLAY_WINDOW_SECONDS,
};
use leadgate_core::{BrandId, SourceId, StoreError, Timestamp};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Errors from seed file loading
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("Failed to read seed file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse seed file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid seed entry '{name}': {message}")]
    Invalid { name: String, message: String },

    #[error("Failed to store seeded source: {0}")]
    Store(#[from] StoreError),
}

/// Top-level seed file structure
#[derive(Debug, Deserialize)]
pub struct SeedFile {
    pub sources: Vec<SeedSource>,
}

/// One webhook source entry in the seed file
#[derive(Debug, Deserialize)]
pub struct SeedSource {
    pub id: Uuid,
    pub brand_id: Uuid,
    pub name: String,

    /// SHA-256 hex digest of the API key
    pub api_key_hash: String,

    #[serde(default = "default_active")]
    pub is_active: bool,

    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_min: u32,

    #[serde(default)]
    pub field_mapping: HashMap<String, String>,

    #[serde(default)]
    pub hmac_enabled: bool,

    /// SHA-256 hex digest of the webhook secret
    #[serde(default)]
    pub hmac_secret_hash: Option<String>,

    #[serde(default = "default_replay_window")]
    pub replay_window_seconds: i64,
}

fn default_active() -> bool {
    true
}

fn default_rate_limit() -> u32 {
    60
}

fn default_replay_window() -> i64 {
    DEFAULT_REPLAY_WINDOW_SECONDS
}

impl SeedSource {
    /// Validate and convert into a domain source row.
    ///
    /// # Errors
    ///
    /// Returns [`SeedError::Invalid`] when a hash is not 64 hex characters
    /// or when HMAC is enabled without a secret hash.
    fn into_source(self) -> Result<WebhookSource, SeedError> {
        if !is_sha256_hex(&self.api_key_hash) {
            return Err(SeedError::Invalid {
                name: self.name,
                message: "api_key_hash must be a 64-character SHA-256 hex digest".to_string(),
            });
        }

        if self.hmac_enabled {
            match &self.hmac_secret_hash {
                Some(hash) if is_sha256_hex(hash) => {}
                Some(_) => {
                    return Err(SeedError::Invalid {
                        name: self.name,
                        message: "hmac_secret_hash must be a 64-character SHA-256 hex digest"
                            .to_string(),
                    });
                }
                None => {
                    return Err(SeedError::Invalid {
                        name: self.name,
                        message: "hmac_enabled requires hmac_secret_hash".to_string(),
                    });
                }
            }
        }

        Ok(WebhookSource {
            id: SourceId::from_uuid(self.id),
            brand_id: BrandId::from_uuid(self.brand_id),
            name: self.name,
            api_key_hash: self.api_key_hash,
            is_active: self.is_active,
            rate_limit_per_min: self.rate_limit_per_min,
            field_mapping: FieldMapping(self.field_mapping),
            hmac_enabled: self.hmac_enabled,
            hmac_secret_hash: self.hmac_secret_hash,
            replay_window_seconds: self.replay_window_seconds,
            created_at: Timestamp::now(),
            rotated_at: None,
        })
    }
}

fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Parse a seed file into domain source rows
pub fn load_seed_file(path: &Path) -> Result<Vec<WebhookSource>, SeedError> {
    let raw = std::fs::read_to_string(path)?;
    let file: SeedFile = serde_yaml::from_str(&raw)?;

    file.sources
        .into_iter()
        .map(SeedSource::into_source)
        .collect()
}

/// Load seeded sources into the store
pub async fn apply_seed(
    store: &dyn SourceStore,
    sources: Vec<WebhookSource>,
) -> Result<usize, SeedError> {
    let count = sources.len();
    for source in sources {
        info!(source_id = %source.id, name = %source.name, "Seeding webhook source");
        store.upsert(source).await?;
    }
    Ok(count)
}

#[cfg(test)]
#[path = "seed_tests.rs"]
mod tests;
