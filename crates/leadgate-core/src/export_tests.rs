//! Tests for the idempotent export pipeline.

use super::*;
use crate::adapters::MemoryStore;
use crate::crm::{ContactStore, NewContact, NewLeadEvent};
use crate::{BrandId, SourceId};
use std::sync::Mutex;

// ============================================================================
// Fake Sheets backend
// ============================================================================

#[derive(Default)]
struct FakeSheetsState {
    tabs: HashMap<String, i64>,
    next_id: i64,
    list_calls: usize,
    added: Vec<String>,
    appended: Vec<(String, Vec<serde_json::Value>)>,
    formatted: Vec<i64>,
    fail_appends: bool,
}

#[derive(Default)]
struct FakeSheets {
    state: Mutex<FakeSheetsState>,
}

impl FakeSheets {
    fn with_tabs(titles: &[&str]) -> Self {
        let fake = Self::default();
        {
            let mut state = fake.state.lock().unwrap();
            for (i, title) in titles.iter().enumerate() {
                state.tabs.insert((*title).to_string(), i as i64);
            }
            state.next_id = titles.len() as i64;
        }
        fake
    }
}

#[async_trait]
impl SheetsClient for FakeSheets {
    async fn list_tabs(&self) -> Result<HashMap<String, i64>, SheetsError> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        Ok(state.tabs.clone())
    }

    async fn add_tab(&self, title: &str) -> Result<i64, SheetsError> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.tabs.insert(title.to_string(), id);
        state.added.push(title.to_string());
        Ok(id)
    }

    async fn append_row(
        &self,
        tab: &str,
        row: Vec<serde_json::Value>,
    ) -> Result<(), SheetsError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_appends {
            return Err(SheetsError::Api {
                status: 503,
                message: "backend unavailable".to_string(),
            });
        }
        state.appended.push((tab.to_string(), row));
        Ok(())
    }

    async fn format_header(&self, sheet_id: i64) -> Result<(), SheetsError> {
        self.state.lock().unwrap().formatted.push(sheet_id);
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

struct Fixture {
    store: MemoryStore,
    sheets: Arc<FakeSheets>,
    pipeline: ExportPipeline,
    lead_event_id: LeadEventId,
}

async fn fixture_with_sheets(sheets: FakeSheets) -> Fixture {
    let store = MemoryStore::new();
    let brand = BrandId::new();
    let source_id = SourceId::new();

    let contact = store
        .find_or_create(NewContact {
            brand_id: brand,
            normalized_phone: "3331234567".to_string(),
            country_code: "IT".to_string(),
            first_name: Some("Mario".to_string()),
            last_name: Some("Rossi".to_string()),
            email: Some("mario@example.com".to_string()),
            city: Some("Milano".to_string()),
            cap: Some("20121".to_string()),
        })
        .await
        .unwrap()
        .contact;

    let event = LeadEventStore::append(
        &store,
        NewLeadEvent {
            brand_id: brand,
            contact_id: contact.id,
            deal_id: None,
            source_id,
            source_name: "Meta Ads".to_string(),
            raw_payload: serde_json::json!({"telefono": "3331234567"}),
            occurred_at: Timestamp::now(),
            received_at: Timestamp::now(),
            archived: false,
        },
    )
    .await
    .unwrap();

    let sheets = Arc::new(sheets);
    let pipeline = ExportPipeline::new(
        true,
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        sheets.clone(),
    );

    Fixture {
        store,
        sheets,
        pipeline,
        lead_event_id: event.id,
    }
}

async fn fixture() -> Fixture {
    fixture_with_sheets(FakeSheets::default()).await
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn fresh_export_creates_tabs_and_appends() {
    let f = fixture().await;

    let outcome = f.pipeline.run(f.lead_event_id, false).await.unwrap();
    let ExportOutcome::Exported {
        all_raw_tab,
        source_raw_tab,
        source_view_tab,
    } = outcome
    else {
        panic!("expected export");
    };

    assert_eq!(all_raw_tab, ALL_RAW_TAB);
    assert_eq!(source_raw_tab, "Meta Ads Raw");
    assert_eq!(source_view_tab, "Meta Ads View");

    let state = f.sheets.state.lock().unwrap();
    // One listing fetch for the whole run: the cache is request-scoped.
    assert_eq!(state.list_calls, 1);
    assert_eq!(
        state.added,
        vec![ALL_RAW_TAB, "Meta Ads Raw", "Meta Ads View", SUMMARY_TAB]
    );
    // Each created tab is formatted exactly once.
    assert_eq!(state.formatted.len(), 4);

    // Header row + data row in each raw tab, header + data in the view tab,
    // header only in the summary tab.
    let appends_to = |tab: &str| state.appended.iter().filter(|(t, _)| t == tab).count();
    assert_eq!(appends_to(ALL_RAW_TAB), 2);
    assert_eq!(appends_to("Meta Ads Raw"), 2);
    assert_eq!(appends_to("Meta Ads View"), 2);
    assert_eq!(appends_to(SUMMARY_TAB), 1);

    drop(state);

    let log = ExportLogStore::get(&f.store, f.lead_event_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(log.status, ExportStatus::Success);
}

#[tokio::test]
async fn existing_tabs_are_never_recreated_or_reformatted() {
    let f = fixture_with_sheets(FakeSheets::with_tabs(&[
        ALL_RAW_TAB,
        "Meta Ads Raw",
        "Meta Ads View",
        SUMMARY_TAB,
    ]))
    .await;

    f.pipeline.run(f.lead_event_id, false).await.unwrap();

    let state = f.sheets.state.lock().unwrap();
    assert!(state.added.is_empty());
    assert!(state.formatted.is_empty());
    // Only data rows this time; no header writes.
    assert_eq!(state.appended.len(), 3);
}

#[tokio::test]
async fn second_export_is_skipped_as_already_exported() {
    let f = fixture().await;

    f.pipeline.run(f.lead_event_id, false).await.unwrap();
    let before = f.sheets.state.lock().unwrap().appended.len();

    let outcome = f.pipeline.run(f.lead_event_id, false).await.unwrap();
    assert_eq!(
        outcome,
        ExportOutcome::Skipped {
            reason: "already_exported"
        }
    );

    // No further spreadsheet writes happened.
    assert_eq!(f.sheets.state.lock().unwrap().appended.len(), before);
}

#[tokio::test]
async fn concurrent_exports_admit_exactly_one() {
    let f = fixture().await;

    let (a, b) = tokio::join!(
        f.pipeline.run(f.lead_event_id, false),
        f.pipeline.run(f.lead_event_id, false),
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    let exported = outcomes
        .iter()
        .filter(|o| matches!(o, ExportOutcome::Exported { .. }))
        .count();
    let skipped = outcomes
        .iter()
        .filter(|o| {
            matches!(
                o,
                ExportOutcome::Skipped {
                    reason: "in_progress" | "already_exported"
                }
            )
        })
        .count();

    assert_eq!(exported, 1);
    assert_eq!(skipped, 1);

    // Exactly one header + one data row landed in the aggregate tab.
    let state = f.sheets.state.lock().unwrap();
    let all_raw_appends = state
        .appended
        .iter()
        .filter(|(tab, _)| tab == ALL_RAW_TAB)
        .count();
    assert_eq!(all_raw_appends, 2);
}

#[tokio::test]
async fn force_re_exports_a_completed_event() {
    let f = fixture().await;

    f.pipeline.run(f.lead_event_id, false).await.unwrap();
    let outcome = f.pipeline.run(f.lead_event_id, true).await.unwrap();
    assert!(matches!(outcome, ExportOutcome::Exported { .. }));

    let log = ExportLogStore::get(&f.store, f.lead_event_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(log.status, ExportStatus::Success);
}

#[tokio::test]
async fn failed_export_finalizes_claim_and_reports_failed_on_retry() {
    let f = fixture().await;
    f.sheets.state.lock().unwrap().fail_appends = true;

    let error = f.pipeline.run(f.lead_event_id, false).await.unwrap_err();
    assert!(matches!(error, ExportError::Sheets(_)));

    let log = ExportLogStore::get(&f.store, f.lead_event_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(log.status, ExportStatus::Failed);
    assert!(log.error_message.is_some());

    // A later attempt without force reports the prior terminal status.
    let outcome = f.pipeline.run(f.lead_event_id, false).await.unwrap();
    assert_eq!(outcome, ExportOutcome::Skipped { reason: "failed" });
}

#[tokio::test]
async fn disabled_pipeline_exports_nothing() {
    let f = fixture().await;
    let disabled = ExportPipeline::new(
        false,
        Arc::new(f.store.clone()),
        Arc::new(f.store.clone()),
        Arc::new(f.store.clone()),
        f.sheets.clone(),
    );

    let outcome = disabled.run(f.lead_event_id, false).await.unwrap();
    assert_eq!(outcome, ExportOutcome::Disabled);
    assert!(f.sheets.state.lock().unwrap().appended.is_empty());
    assert!(ExportLogStore::get(&f.store, f.lead_event_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn unknown_lead_event_fails_and_finalizes_claim() {
    let f = fixture().await;
    let missing = LeadEventId::new();

    let error = f.pipeline.run(missing, false).await.unwrap_err();
    assert!(matches!(error, ExportError::EventNotFound { .. }));

    let log = ExportLogStore::get(&f.store, missing).await.unwrap().unwrap();
    assert_eq!(log.status, ExportStatus::Failed);
}
