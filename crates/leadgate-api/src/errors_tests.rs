//! Tests for error-to-HTTP mapping.

use super::*;
use http_body_util::BodyExt;

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[test]
fn rejection_status_mapping_matches_contract() {
    use GateRejection::*;

    let table = [
        (InvalidUuid, StatusCode::BAD_REQUEST),
        (MissingApiKey, StatusCode::UNAUTHORIZED),
        (SourceNotFound, StatusCode::NOT_FOUND),
        (InactiveSource, StatusCode::CONFLICT),
        (InvalidApiKey, StatusCode::UNAUTHORIZED),
        (MissingWebhookSecret, StatusCode::UNAUTHORIZED),
        (InvalidWebhookSecret, StatusCode::UNAUTHORIZED),
        (MissingSignature, StatusCode::UNAUTHORIZED),
        (MalformedSignature, StatusCode::BAD_REQUEST),
        (MissingTimestamp, StatusCode::UNAUTHORIZED),
        (MalformedTimestamp, StatusCode::BAD_REQUEST),
        (ReplayDetected, StatusCode::UNAUTHORIZED),
        (InvalidSignature, StatusCode::UNAUTHORIZED),
        (RateLimited, StatusCode::TOO_MANY_REQUESTS),
        (InvalidJson, StatusCode::BAD_REQUEST),
        (MissingPhone, StatusCode::BAD_REQUEST),
    ];

    for (rejection, expected) in table {
        assert_eq!(rejection_status(&rejection), expected, "{rejection:?}");
    }
}

#[tokio::test]
async fn invalid_api_key_body_carries_message_and_code() {
    let response = IngestHandlerError::Rejected(GateRejection::InvalidApiKey).into_response();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = body_json(response).await;
    assert_eq!(body["error"], "Invalid API key");
    assert_eq!(body["code"], "invalid_api_key");
}

#[tokio::test]
async fn rate_limited_response_has_retry_after_header_and_field() {
    let response = IngestHandlerError::Rejected(GateRejection::RateLimited).into_response();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response.headers().get("Retry-After").unwrap().to_str().unwrap(),
        "60"
    );

    let body = body_json(response).await;
    assert_eq!(body["error"], "Rate limit exceeded");
    assert_eq!(body["retry_after"], 60);
}

#[tokio::test]
async fn inactive_source_body_leads_with_code() {
    let response = IngestHandlerError::Rejected(GateRejection::InactiveSource).into_response();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let body = body_json(response).await;
    assert_eq!(body["error"], "inactive_source");
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn internal_errors_return_generic_500() {
    let error = IngestError::Store(leadgate_core::StoreError::Unavailable {
        message: "connection pool exhausted".to_string(),
    });
    let response = IngestHandlerError::Internal(error).into_response();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = body_json(response).await;
    assert_eq!(body["error"], "Internal server error");
    // Backend details stay server-side.
    assert!(!body.to_string().contains("connection pool"));
}
