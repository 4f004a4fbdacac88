//! Tests for the fire-and-forget export trigger.

use super::*;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn trigger_posts_the_lead_event_id() {
    let server = MockServer::start().await;
    let lead_event_id = LeadEventId::new();

    Mock::given(method("POST"))
        .and(path("/sheets-export"))
        .and(body_string_contains(lead_event_id.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let trigger = HttpExportTrigger::new(
        format!("{}/sheets-export", server.uri()),
        Duration::from_secs(5),
    );
    trigger.trigger(lead_event_id);

    // The dispatch is detached; give it a moment before the mock verifies
    // expectations on drop.
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn downstream_failure_is_swallowed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/sheets-export"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let trigger = HttpExportTrigger::new(
        format!("{}/sheets-export", server.uri()),
        Duration::from_secs(5),
    );

    // A failing downstream must not panic the task or the caller.
    trigger.trigger(LeadEventId::new());
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn unreachable_endpoint_is_swallowed() {
    // Port 9 (discard) refuses connections in test environments; the
    // trigger must log and move on without surfacing anything.
    let trigger = HttpExportTrigger::new(
        "http://127.0.0.1:9/sheets-export".to_string(),
        Duration::from_millis(500),
    );
    trigger.trigger(LeadEventId::new());
    tokio::time::sleep(Duration::from_millis(600)).await;
}

#[tokio::test]
async fn slow_downstream_times_out_without_blocking_caller() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/sheets-export"))
        .respond_with(
            ResponseTemplate::new(200).set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let trigger = HttpExportTrigger::new(
        format!("{}/sheets-export", server.uri()),
        Duration::from_millis(100),
    );

    let started = std::time::Instant::now();
    trigger.trigger(LeadEventId::new());
    // trigger() itself returns immediately; only the detached task waits.
    assert!(started.elapsed() < Duration::from_millis(50));

    tokio::time::sleep(Duration::from_millis(300)).await;
}
