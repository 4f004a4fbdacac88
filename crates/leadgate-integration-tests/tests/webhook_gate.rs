//! Validation-chain and audit-completeness tests.
//!
//! Every gate-failure scenario must produce exactly one audit row with a
//! matching status and a non-null error message; the bare invalid-UUID case
//! is the only one recorded without source or brand context.

mod common;

use axum::http::StatusCode;
use common::*;
use leadgate_core::audit::RequestStatus;
use leadgate_core::security::compute_signature;
use leadgate_core::source::SourceStore;
use leadgate_core::{SourceId, Timestamp};
use tower::util::ServiceExt;

struct GateScenario {
    name: &'static str,
    /// Path segment; `None` means "use the seeded plain source id"
    segment: Option<&'static str>,
    headers: Vec<(String, String)>,
    body: &'static str,
    expected_status: StatusCode,
    expected_code: &'static str,
}

fn auth_header() -> (String, String) {
    ("x-api-key".to_string(), TEST_API_KEY.to_string())
}

#[tokio::test]
async fn every_gate_failure_is_audited_exactly_once() {
    let scenarios = vec![
        GateScenario {
            name: "invalid uuid",
            segment: Some("not-a-uuid"),
            headers: vec![auth_header()],
            body: r#"{"telefono":"333"}"#,
            expected_status: StatusCode::BAD_REQUEST,
            expected_code: "invalid_uuid",
        },
        GateScenario {
            name: "missing api key",
            segment: None,
            headers: vec![],
            body: r#"{"telefono":"333"}"#,
            expected_status: StatusCode::UNAUTHORIZED,
            expected_code: "missing_api_key",
        },
        GateScenario {
            name: "wrong api key",
            segment: None,
            headers: vec![("x-api-key".to_string(), "wrong".to_string())],
            body: r#"{"telefono":"333"}"#,
            expected_status: StatusCode::UNAUTHORIZED,
            expected_code: "invalid_api_key",
        },
        GateScenario {
            name: "invalid json",
            segment: None,
            headers: vec![auth_header()],
            body: "{definitely not json",
            expected_status: StatusCode::BAD_REQUEST,
            expected_code: "invalid_json",
        },
        GateScenario {
            name: "missing phone",
            segment: None,
            headers: vec![auth_header()],
            body: r#"{"nome":"Mario"}"#,
            expected_status: StatusCode::BAD_REQUEST,
            expected_code: "missing_phone",
        },
    ];

    for scenario in scenarios {
        let h = harness().await;
        let segment = scenario
            .segment
            .map(str::to_string)
            .unwrap_or_else(|| h.source.id.to_string());

        let headers: Vec<(&str, &str)> = scenario
            .headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let response = h
            .router
            .oneshot(ingest_request(&segment, &headers, scenario.body))
            .await
            .unwrap();
        assert_eq!(
            response.status(),
            scenario.expected_status,
            "status for scenario '{}'",
            scenario.name
        );

        let records = h.store.audit_records();
        assert_eq!(
            records.len(),
            1,
            "exactly one audit row for scenario '{}'",
            scenario.name
        );
        assert_eq!(
            records[0].status,
            RequestStatus::Rejected,
            "audit status for scenario '{}'",
            scenario.name
        );
        assert_eq!(
            records[0].error_message.as_deref(),
            Some(scenario.expected_code),
            "audit error for scenario '{}'",
            scenario.name
        );
    }
}

#[tokio::test]
async fn invalid_uuid_audit_row_has_no_source_or_brand() {
    let h = harness().await;
    let response = h
        .router
        .oneshot(ingest_request(
            "not-a-uuid",
            &[("x-api-key", TEST_API_KEY)],
            "{}",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let records = h.store.audit_records();
    assert!(records[0].source_id.is_none());
    assert!(records[0].brand_id.is_none());
}

#[tokio::test]
async fn unknown_source_is_404_and_audited_with_source_id() {
    let h = harness().await;
    let unknown = SourceId::new();
    let response = h
        .router
        .oneshot(ingest_request(
            &unknown.to_string(),
            &[("x-api-key", TEST_API_KEY)],
            "{}",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = json_body(response).await;
    assert_eq!(body["error"], "Unknown webhook source");

    let records = h.store.audit_records();
    assert_eq!(records[0].source_id, Some(unknown));
    assert!(records[0].brand_id.is_none());
}

#[tokio::test]
async fn deactivated_source_is_409() {
    let h = harness().await;
    let mut deactivated = h.source.clone();
    deactivated.deactivate();
    h.store.upsert(deactivated.clone()).await.unwrap();

    let response = h
        .router
        .oneshot(ingest_request(
            &deactivated.id.to_string(),
            &[("x-api-key", TEST_API_KEY)],
            italian_lead_body(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let body = json_body(response).await;
    assert_eq!(body["error"], "inactive_source");
}

#[tokio::test]
async fn rate_limited_request_gets_retry_after() {
    let h = harness().await;
    let mut throttled = h.source.clone();
    throttled.rate_limit_per_min = 1;
    h.store.upsert(throttled.clone()).await.unwrap();
    let segment = throttled.id.to_string();

    let first = h
        .router
        .clone()
        .oneshot(ingest_request(
            &segment,
            &[("x-api-key", TEST_API_KEY)],
            italian_lead_body(),
        ))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = h
        .router
        .oneshot(ingest_request(
            &segment,
            &[("x-api-key", TEST_API_KEY)],
            italian_lead_body(),
        ))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        second
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok()),
        Some("60")
    );

    let body = json_body(second).await;
    assert_eq!(body["error"], "Rate limit exceeded");
    assert_eq!(body["retry_after"], 60);
}

// ============================================================================
// HMAC over HTTP
// ============================================================================

fn signed_headers(timestamp: i64, body: &str) -> Vec<(String, String)> {
    let signature = compute_signature(TEST_WEBHOOK_SECRET, timestamp, body.as_bytes());
    vec![
        ("x-api-key".to_string(), TEST_API_KEY.to_string()),
        (
            "x-webhook-secret".to_string(),
            TEST_WEBHOOK_SECRET.to_string(),
        ),
        ("x-signature".to_string(), signature),
        ("x-timestamp".to_string(), timestamp.to_string()),
    ]
}

#[tokio::test]
async fn signed_request_is_accepted() {
    let h = harness().await;
    let body = italian_lead_body();
    let headers = signed_headers(Timestamp::now().unix_seconds(), body);
    let headers: Vec<(&str, &str)> =
        headers.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

    let response = h
        .router
        .oneshot(ingest_request(&h.hmac_source.id.to_string(), &headers, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unsigned_request_to_hmac_source_is_401() {
    let h = harness().await;
    let response = h
        .router
        .oneshot(ingest_request(
            &h.hmac_source.id.to_string(),
            &[("x-api-key", TEST_API_KEY)],
            italian_lead_body(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = json_body(response).await;
    assert_eq!(body["code"], "missing_webhook_secret");
}

#[tokio::test]
async fn stale_signature_is_replay_rejected() {
    let h = harness().await;
    let body = italian_lead_body();
    let stale = Timestamp::now().unix_seconds() - 301 - 5;
    let headers = signed_headers(stale, body);
    let headers: Vec<(&str, &str)> =
        headers.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

    let response = h
        .router
        .oneshot(ingest_request(&h.hmac_source.id.to_string(), &headers, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = json_body(response).await;
    assert_eq!(json["code"], "replay_detected");

    let records = h.store.audit_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].error_message.as_deref(), Some("replay_detected"));
}

#[tokio::test]
async fn tampered_body_is_rejected_with_invalid_signature() {
    let h = harness().await;
    let headers = signed_headers(Timestamp::now().unix_seconds(), italian_lead_body());
    let headers: Vec<(&str, &str)> =
        headers.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

    let response = h
        .router
        .oneshot(ingest_request(
            &h.hmac_source.id.to_string(),
            &headers,
            r#"{"telefono":"+390000000000"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = json_body(response).await;
    assert_eq!(json["code"], "invalid_signature");
}

#[tokio::test]
async fn audit_rows_filter_sensitive_headers() {
    let h = harness().await;
    h.router
        .oneshot(ingest_request(
            &h.source.id.to_string(),
            &[("x-api-key", TEST_API_KEY)],
            italian_lead_body(),
        ))
        .await
        .unwrap();

    let records = h.store.audit_records();
    assert_eq!(records[0].headers.get("x-api-key").map(String::as_str), Some("<redacted>"));
    assert_eq!(
        records[0].ip_address.as_deref(),
        Some("203.0.113.7"),
        "client ip comes from x-forwarded-for"
    );
    assert_eq!(
        records[0].user_agent.as_deref(),
        Some("leadgate-tests/0.1")
    );
}
