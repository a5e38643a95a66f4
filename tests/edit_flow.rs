//! End-to-end edit-session flows over the public API: begin, mutate,
//! save-or-cancel, with the store behind the narrow patch seam.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;

use kancelaria::db::{CaseRecord, CaseStatus, CaseStore, CreateCaseParams};
use kancelaria::edit::{CaseField, CasePatch, ColumnValue, EditSessions, FieldInput, SaveOutcome};
use kancelaria::error::DatabaseError;

fn john_doe() -> CaseRecord {
    CaseRecord {
        id: 1,
        public_case_id: "KP-J2DQ7M".to_string(),
        user_id: Some(11),
        client_name: "John Doe".to_string(),
        case_type: Some("Karta Pobytu".to_string()),
        status: CaseStatus::InReview,
        decision_due: NaiveDate::from_ymd_opt(2025, 3, 15),
        payment_amount: Some(dec!(1500)),
        payment_received: false,
        notes: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[derive(Default)]
struct RecordingStore {
    record: Mutex<Option<CaseRecord>>,
    patches: Mutex<Vec<Vec<String>>>,
    apply_calls: AtomicUsize,
}

impl RecordingStore {
    fn holding(record: CaseRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
            ..Self::default()
        }
    }
}

#[async_trait]
impl CaseStore for RecordingStore {
    async fn list_cases(
        &self,
        _status: Option<CaseStatus>,
    ) -> Result<Vec<CaseRecord>, DatabaseError> {
        unimplemented!("not used by edit flows")
    }

    async fn get_case(&self, case_id: i64) -> Result<Option<CaseRecord>, DatabaseError> {
        Ok(self.record.lock().unwrap().clone().filter(|r| r.id == case_id))
    }

    async fn create_case(&self, _input: &CreateCaseParams) -> Result<CaseRecord, DatabaseError> {
        unimplemented!("not used by edit flows")
    }

    async fn apply_case_patch(
        &self,
        case_id: i64,
        patch: &CasePatch,
    ) -> Result<bool, DatabaseError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        self.patches
            .lock()
            .unwrap()
            .push(patch.iter().map(|(column, _)| column.to_string()).collect());

        let mut guard = self.record.lock().unwrap();
        let Some(record) = guard.as_mut().filter(|r| r.id == case_id) else {
            return Ok(false);
        };
        for (column, value) in patch.iter() {
            match (column, value) {
                ("client_name", ColumnValue::Text(v)) => record.client_name = v.clone(),
                ("case_type", ColumnValue::NullableText(v)) => record.case_type = v.clone(),
                ("status", ColumnValue::Status(v)) => record.status = *v,
                ("decision_due", ColumnValue::Date(v)) => record.decision_due = *v,
                ("payment_amount", ColumnValue::Amount(v)) => record.payment_amount = *v,
                ("payment_received", ColumnValue::Flag(v)) => record.payment_received = *v,
                ("notes", ColumnValue::NullableText(v)) => record.notes = v.clone(),
                other => panic!("patch touched an unexpected column: {other:?}"),
            }
        }
        Ok(true)
    }

    async fn delete_case(&self, _id: i64) -> Result<bool, DatabaseError> {
        unimplemented!("not used by edit flows")
    }

    async fn case_status_counts(&self) -> Result<Vec<(CaseStatus, i64)>, DatabaseError> {
        unimplemented!("not used by edit flows")
    }
}

#[tokio::test]
async fn decision_change_saves_exactly_one_column() {
    let store = RecordingStore::holding(john_doe());
    let sessions = EditSessions::new();
    sessions.begin(&john_doe()).unwrap();

    sessions
        .set_field(1, CaseField::Status, FieldInput::Text("approved".to_string()))
        .unwrap();

    let outcome = sessions.save(&store, 1).await.unwrap();
    let SaveOutcome::Updated { fields, record } = outcome else {
        panic!("expected Updated, got {outcome:?}");
    };
    assert_eq!(fields, 1);
    assert_eq!(record.status, CaseStatus::Approved);

    let patches = store.patches.lock().unwrap();
    assert_eq!(patches.as_slice(), [vec!["status".to_string()]]);
}

#[tokio::test]
async fn identical_copy_saves_with_zero_store_calls() {
    let store = RecordingStore::holding(john_doe());
    let sessions = EditSessions::new();
    sessions.begin(&john_doe()).unwrap();

    // Retyping the amount in an equivalent format is not a change.
    sessions
        .set_field(1, CaseField::PaymentAmount, FieldInput::Text("1500PLN".to_string()))
        .unwrap();

    let outcome = sessions.save(&store, 1).await.unwrap();
    assert!(matches!(outcome, SaveOutcome::NoChanges));
    assert_eq!(store.apply_calls.load(Ordering::SeqCst), 0);
    assert!(!sessions.is_active(1), "no-op save still ends the session");
}

#[tokio::test]
async fn multi_field_edit_round_trips_through_the_store() {
    let store = RecordingStore::holding(john_doe());
    let sessions = EditSessions::new();
    sessions.begin(&john_doe()).unwrap();

    sessions
        .set_field(1, CaseField::ClientName, FieldInput::Text("Jan Kowalski".to_string()))
        .unwrap();
    sessions
        .set_field(1, CaseField::PaymentAmount, FieldInput::Text("1600 PLN".to_string()))
        .unwrap();
    sessions
        .set_field(1, CaseField::PaymentReceived, FieldInput::Flag(true))
        .unwrap();
    sessions
        .set_field(1, CaseField::DecisionDue, FieldInput::Text("2025-06-30".to_string()))
        .unwrap();

    let SaveOutcome::Updated { fields, record } = sessions.save(&store, 1).await.unwrap() else {
        panic!("expected Updated");
    };
    assert_eq!(fields, 4);
    assert_eq!(record.client_name, "Jan Kowalski");
    assert_eq!(record.payment_amount, Some(dec!(1600)));
    assert!(record.payment_received);
    assert_eq!(record.decision_due, NaiveDate::from_ymd_opt(2025, 6, 30));

    // A fresh session over the resynced row diffs empty against itself.
    let follow_up = EditSessions::new();
    let draft = follow_up.begin(&record).unwrap();
    assert_eq!(draft.payment_amount, "1600 PLN");
}

#[tokio::test]
async fn cancel_discards_everything_and_frees_the_case() {
    let store = RecordingStore::holding(john_doe());
    let sessions = EditSessions::new();
    let original = sessions.begin(&john_doe()).unwrap();

    sessions
        .set_field(1, CaseField::Notes, FieldInput::Text("draft note".to_string()))
        .unwrap();
    let restored = sessions.cancel(1).unwrap();
    assert_eq!(restored, original);
    assert_eq!(store.apply_calls.load(Ordering::SeqCst), 0);

    // The case is free for a new session now.
    sessions.begin(&john_doe()).unwrap();
}

#[tokio::test]
async fn diffs_are_against_the_baseline_across_sequential_sessions() {
    let store = RecordingStore::holding(john_doe());

    // First session raises the fee.
    let sessions = EditSessions::new();
    sessions.begin(&john_doe()).unwrap();
    sessions
        .set_field(1, CaseField::PaymentAmount, FieldInput::Text("1600 PLN".to_string()))
        .unwrap();
    let SaveOutcome::Updated { record, .. } = sessions.save(&store, 1).await.unwrap() else {
        panic!("expected Updated");
    };

    // Second session edits a different field; the patch must not replay
    // the earlier fee change.
    sessions.begin(&record).unwrap();
    sessions
        .set_field(1, CaseField::Status, FieldInput::Text("awaiting_docs".to_string()))
        .unwrap();
    sessions.save(&store, 1).await.unwrap();

    let patches = store.patches.lock().unwrap();
    assert_eq!(
        patches.as_slice(),
        [
            vec!["payment_amount".to_string()],
            vec!["status".to_string()],
        ]
    );
}
