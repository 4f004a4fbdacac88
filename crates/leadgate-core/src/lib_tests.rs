//! Tests for shared domain types.

use super::*;

#[test]
fn source_id_round_trips_through_string() {
    let id = SourceId::new();
    let parsed: SourceId = id.to_string().parse().unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn source_id_rejects_non_uuid_input() {
    let result = "not-a-uuid".parse::<SourceId>();
    assert!(matches!(result, Err(ParseError::InvalidFormat { .. })));
}

#[test]
fn lead_event_ids_sort_by_creation_order() {
    let first = LeadEventId::new();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let second = LeadEventId::new();
    assert!(second.as_str() > first.as_str());
}

#[test]
fn timestamp_seconds_since_is_signed() {
    let now = Timestamp::now();
    let later = now.add_seconds(90);
    assert_eq!(later.seconds_since(now), 90);
    assert_eq!(now.seconds_since(later), -90);
}

#[test]
fn timestamp_unix_round_trip() {
    let ts = Timestamp::from_unix_seconds(1_700_000_000).unwrap();
    assert_eq!(ts.unix_seconds(), 1_700_000_000);
}

#[test]
fn store_error_transience_classification() {
    assert!(StoreError::Unavailable {
        message: "down".to_string()
    }
    .is_transient());
    assert!(!StoreError::NotFound {
        entity: "contact".to_string(),
        id: "x".to_string()
    }
    .is_transient());
}
