//! Common test utilities for leadgate-api integration tests
//!
//! This module provides:
//! - A harness wiring the real router over the in-memory datastore
//! - A recording Sheets backend for export assertions
//! - Request builders and response helpers

// Each integration test binary compiles its own copy of this module and
// uses a different subset of it.
#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use leadgate_api::{AppState, ServiceConfig, ServiceMetrics};
use leadgate_core::adapters::MemoryStore;
use leadgate_core::export::{ExportPipeline, NoopExportTrigger, SheetsClient, SheetsError};
use leadgate_core::ingest::IngestPipeline;
use leadgate_core::security::sha256_hex;
use leadgate_core::source::{FieldMapping, SourceStore, WebhookSource};
use leadgate_core::{BrandId, SourceId, Timestamp};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Plaintext API key every seeded test source accepts
pub const TEST_API_KEY: &str = "test-api-key";

/// Plaintext webhook secret for HMAC-enabled test sources
pub const TEST_WEBHOOK_SECRET: &str = "test-webhook-secret";

// ============================================================================
// Recording Sheets backend
// ============================================================================

/// Sheets backend that records every call and succeeds
#[derive(Default)]
pub struct RecordingSheets {
    pub state: Mutex<RecordingSheetsState>,
}

#[derive(Default)]
pub struct RecordingSheetsState {
    pub tabs: HashMap<String, i64>,
    pub next_id: i64,
    pub appended: Vec<(String, Vec<serde_json::Value>)>,
    pub formatted: Vec<i64>,
}

#[async_trait::async_trait]
impl SheetsClient for RecordingSheets {
    async fn list_tabs(&self) -> Result<HashMap<String, i64>, SheetsError> {
        Ok(self.state.lock().unwrap().tabs.clone())
    }

    async fn add_tab(&self, title: &str) -> Result<i64, SheetsError> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.tabs.insert(title.to_string(), id);
        Ok(id)
    }

    async fn append_row(
        &self,
        tab: &str,
        row: Vec<serde_json::Value>,
    ) -> Result<(), SheetsError> {
        self.state
            .lock()
            .unwrap()
            .appended
            .push((tab.to_string(), row));
        Ok(())
    }

    async fn format_header(&self, sheet_id: i64) -> Result<(), SheetsError> {
        self.state.lock().unwrap().formatted.push(sheet_id);
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Router + datastore + seeded sources for one test
pub struct Harness {
    pub router: Router,
    pub store: MemoryStore,
    pub sheets: Arc<RecordingSheets>,
    /// Plain source: API key auth only
    pub source: WebhookSource,
    /// HMAC-enabled source sharing the same brand
    pub hmac_source: WebhookSource,
}

/// Build a harness with export enabled or disabled
pub async fn harness_with_export(export_enabled: bool) -> Harness {
    let store = MemoryStore::new();
    let brand_id = BrandId::new();

    let source = WebhookSource {
        id: SourceId::new(),
        brand_id,
        name: "Meta Ads".to_string(),
        api_key_hash: sha256_hex(TEST_API_KEY),
        is_active: true,
        rate_limit_per_min: 1000,
        field_mapping: FieldMapping::empty(),
        hmac_enabled: false,
        hmac_secret_hash: None,
        replay_window_seconds: 300,
        created_at: Timestamp::now(),
        rotated_at: None,
    };
    let hmac_source = WebhookSource {
        id: SourceId::new(),
        brand_id,
        name: "Signed Form".to_string(),
        api_key_hash: sha256_hex(TEST_API_KEY),
        is_active: true,
        rate_limit_per_min: 1000,
        field_mapping: FieldMapping::empty(),
        hmac_enabled: true,
        hmac_secret_hash: Some(sha256_hex(TEST_WEBHOOK_SECRET)),
        replay_window_seconds: 300,
        created_at: Timestamp::now(),
        rotated_at: None,
    };
    store.upsert(source.clone()).await.unwrap();
    store.upsert(hmac_source.clone()).await.unwrap();

    let ingest = Arc::new(IngestPipeline::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(NoopExportTrigger),
    ));

    let sheets = Arc::new(RecordingSheets::default());
    let export = Arc::new(ExportPipeline::new(
        export_enabled,
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        sheets.clone(),
    ));

    let state = AppState::new(
        ServiceConfig::default(),
        ingest,
        export,
        ServiceMetrics::new().unwrap(),
    );

    Harness {
        router: leadgate_api::create_router(state),
        store,
        sheets,
        source,
        hmac_source,
    }
}

/// Harness with export enabled
pub async fn harness() -> Harness {
    harness_with_export(true).await
}

// ============================================================================
// Request builders & helpers
// ============================================================================

/// POST an ingestion request to the given source path segment
pub fn ingest_request(
    source_segment: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/webhook-ingest/{source_segment}"))
        .header("content-type", "application/json")
        .header("user-agent", "leadgate-tests/0.1")
        .header("x-forwarded-for", "203.0.113.7");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// POST an export request for a lead event id
pub fn export_request(lead_event_id: &str, force: bool) -> Request<Body> {
    let body = if force {
        format!(r#"{{"lead_event_id":"{lead_event_id}","force":true}}"#)
    } else {
        format!(r#"{{"lead_event_id":"{lead_event_id}"}}"#)
    };
    Request::builder()
        .method("POST")
        .uri("/sheets-export")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

/// Collect a response body as JSON
pub async fn json_body(response: Response<axum::body::Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
}

/// A well-formed Italian-language lead payload
pub fn italian_lead_body() -> &'static str {
    r#"{"telefono":"+393331234567","nome":"Mario","cognome":"Rossi"}"#
}
