//! Edit-session lifecycle and the per-case session registry.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::db::{CaseRecord, CaseStore};
use crate::edit::fields::{CaseDraft, CaseField, CasePatch, FieldInput, diff_drafts};
use crate::error::{DatabaseError, EditError};

/// The narrow store seam a save needs: one partial update and one full
/// re-fetch. Any `CaseStore` satisfies it.
#[async_trait]
pub trait CasePatchTarget: Send + Sync {
    async fn apply_case_patch(
        &self,
        case_id: i64,
        patch: &CasePatch,
    ) -> Result<bool, DatabaseError>;
    async fn fetch_case(&self, case_id: i64) -> Result<Option<CaseRecord>, DatabaseError>;
}

#[async_trait]
impl<T: CaseStore + ?Sized> CasePatchTarget for T {
    async fn apply_case_patch(
        &self,
        case_id: i64,
        patch: &CasePatch,
    ) -> Result<bool, DatabaseError> {
        CaseStore::apply_case_patch(self, case_id, patch).await
    }

    async fn fetch_case(&self, case_id: i64) -> Result<Option<CaseRecord>, DatabaseError> {
        self.get_case(case_id).await
    }
}

/// What a completed save amounted to.
#[derive(Debug, Clone)]
pub enum SaveOutcome {
    /// Every field was equal under its equality rule; the store was never
    /// called.
    NoChanges,
    /// The patch was applied and the authoritative row re-fetched.
    Updated { fields: usize, record: CaseRecord },
    /// The write succeeded but resynchronization failed; the caller must
    /// not present the working copy as a confirmed baseline.
    SavedButStale { fields: usize, reason: String },
}

/// One active edit of one case: the immutable baseline captured at
/// `begin`, used as the diff comparison point until the session ends.
#[derive(Debug, Clone)]
pub struct EditSession {
    case_id: i64,
    baseline: CaseDraft,
}

impl EditSession {
    /// Capture the baseline and hand back the working copy. No store
    /// side effect.
    pub fn begin(record: &CaseRecord) -> (Self, CaseDraft) {
        let baseline = CaseDraft::from_record(record);
        (
            Self {
                case_id: record.id,
                baseline: baseline.clone(),
            },
            baseline,
        )
    }

    pub fn case_id(&self) -> i64 {
        self.case_id
    }

    pub fn baseline(&self) -> &CaseDraft {
        &self.baseline
    }

    /// Minimal diff of the working copy against the baseline.
    pub fn compute_diff(&self, working: &CaseDraft) -> Result<CasePatch, EditError> {
        diff_drafts(&self.baseline, working)
    }

    /// Persist the working copy as a partial update.
    ///
    /// An empty diff short-circuits with [`SaveOutcome::NoChanges`] and
    /// zero store calls. A write failure leaves the session usable (the
    /// caller keeps both this session and the working copy) and no
    /// resynchronization is attempted.
    pub async fn save<S: CasePatchTarget + ?Sized>(
        &self,
        store: &S,
        working: &CaseDraft,
    ) -> Result<SaveOutcome, EditError> {
        let patch = self.compute_diff(working)?;
        if patch.is_empty() {
            return Ok(SaveOutcome::NoChanges);
        }

        let fields = patch.len();
        let matched = store
            .apply_case_patch(self.case_id, &patch)
            .await
            .map_err(|source| EditError::WriteFailed {
                case_id: self.case_id,
                source,
            })?;
        if !matched {
            return Err(EditError::CaseGone {
                case_id: self.case_id,
            });
        }

        match store.fetch_case(self.case_id).await {
            Ok(Some(record)) => Ok(SaveOutcome::Updated { fields, record }),
            Ok(None) => Ok(SaveOutcome::SavedButStale {
                fields,
                reason: "case row vanished after the update".to_string(),
            }),
            Err(err) => {
                tracing::warn!(case_id = self.case_id, error = %err, "saved but resync failed");
                Ok(SaveOutcome::SavedButStale {
                    fields,
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Restore the working copy from the baseline. No store effect.
    pub fn cancel(&self, working: &mut CaseDraft) {
        *working = self.baseline.clone();
    }
}

enum Slot {
    Editing(Box<ActiveEdit>),
    /// Placeholder while a save is in flight, so the case keeps its
    /// soft-exclusive ownership without holding a lock across the await.
    Saving,
}

struct ActiveEdit {
    session: EditSession,
    working: CaseDraft,
}

/// Registry of active edit sessions, one at most per case.
///
/// This is the process-local session state the dashboard used to keep in
/// component scope, with an explicit lifecycle: independent cases can be
/// edited concurrently, but a second `begin` on the same case is
/// rejected rather than silently re-baselining a dirty copy.
#[derive(Default)]
pub struct EditSessions {
    slots: Mutex<HashMap<i64, Slot>>,
}

impl EditSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start editing a case. Fails with `AlreadyEditing` while a session
    /// (or an in-flight save) exists for the same case.
    pub fn begin(&self, record: &CaseRecord) -> Result<CaseDraft, EditError> {
        let mut slots = self.lock();
        if slots.contains_key(&record.id) {
            return Err(EditError::AlreadyEditing { case_id: record.id });
        }
        let (session, working) = EditSession::begin(record);
        slots.insert(
            record.id,
            Slot::Editing(Box::new(ActiveEdit {
                session,
                working: working.clone(),
            })),
        );
        Ok(working)
    }

    /// Mutate one field of a case's working copy; returns the updated
    /// copy for display.
    pub fn set_field(
        &self,
        case_id: i64,
        field: CaseField,
        input: FieldInput,
    ) -> Result<CaseDraft, EditError> {
        let mut slots = self.lock();
        match slots.get_mut(&case_id) {
            Some(Slot::Editing(edit)) => {
                edit.working.set_field(field, input)?;
                Ok(edit.working.clone())
            }
            Some(Slot::Saving) => Err(EditError::SaveInFlight { case_id }),
            None => Err(EditError::NoActiveSession { case_id }),
        }
    }

    /// Current working copy of an active session.
    pub fn working(&self, case_id: i64) -> Result<CaseDraft, EditError> {
        match self.lock().get(&case_id) {
            Some(Slot::Editing(edit)) => Ok(edit.working.clone()),
            Some(Slot::Saving) => Err(EditError::SaveInFlight { case_id }),
            None => Err(EditError::NoActiveSession { case_id }),
        }
    }

    /// End the session without saving; returns the restored baseline.
    pub fn cancel(&self, case_id: i64) -> Result<CaseDraft, EditError> {
        let mut slots = self.lock();
        match slots.remove(&case_id) {
            Some(Slot::Editing(edit)) => {
                let ActiveEdit {
                    session,
                    mut working,
                } = *edit;
                session.cancel(&mut working);
                Ok(working)
            }
            Some(Slot::Saving) => {
                slots.insert(case_id, Slot::Saving);
                Err(EditError::SaveInFlight { case_id })
            }
            None => Err(EditError::NoActiveSession { case_id }),
        }
    }

    /// Save the working copy. On success (including no-op and
    /// saved-but-stale) the session ends; on write failure it stays
    /// active with the working copy untouched so the user can retry.
    pub async fn save<S: CasePatchTarget + ?Sized>(
        &self,
        store: &S,
        case_id: i64,
    ) -> Result<SaveOutcome, EditError> {
        // Swap in a Saving marker so the case stays owned while the
        // update is awaited, without holding the registry lock.
        let edit = {
            let mut slots = self.lock();
            match slots.remove(&case_id) {
                Some(Slot::Editing(edit)) => {
                    slots.insert(case_id, Slot::Saving);
                    edit
                }
                Some(Slot::Saving) => {
                    slots.insert(case_id, Slot::Saving);
                    return Err(EditError::SaveInFlight { case_id });
                }
                None => return Err(EditError::NoActiveSession { case_id }),
            }
        };

        let result = edit.session.save(store, &edit.working).await;

        let mut slots = self.lock();
        match result {
            Ok(outcome) => {
                slots.remove(&case_id);
                Ok(outcome)
            }
            Err(err) => {
                slots.insert(case_id, Slot::Editing(edit));
                Err(err)
            }
        }
    }

    /// Whether a case is under edit (or mid-save). The background list
    /// refresh uses this to leave such rows untouched.
    pub fn is_active(&self, case_id: i64) -> bool {
        self.lock().contains_key(&case_id)
    }

    pub fn active_case_ids(&self) -> Vec<i64> {
        self.lock().keys().copied().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, Slot>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::{EditSession, EditSessions, SaveOutcome};
    use crate::db::{CaseRecord, CaseStatus, CaseStore, CreateCaseParams};
    use crate::edit::fields::{CaseField, CasePatch, ColumnValue, FieldInput};
    use crate::error::{DatabaseError, EditError};

    fn case() -> CaseRecord {
        CaseRecord {
            id: 7,
            public_case_id: "KP-7X2MQK".to_string(),
            user_id: Some(3),
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

    /// In-memory stand-in for the store: counts calls, optionally fails
    /// writes or reads, and applies patches to a held record.
    #[derive(Default)]
    struct MockStore {
        record: StdMutex<Option<CaseRecord>>,
        apply_calls: AtomicUsize,
        fetch_calls: AtomicUsize,
        fail_write: bool,
        fail_fetch: bool,
    }

    impl MockStore {
        fn holding(record: CaseRecord) -> Self {
            Self {
                record: StdMutex::new(Some(record)),
                ..Self::default()
            }
        }

        fn apply_count(&self) -> usize {
            self.apply_calls.load(Ordering::SeqCst)
        }

        fn fetch_count(&self) -> usize {
            self.fetch_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CaseStore for MockStore {
        async fn list_cases(
            &self,
            _status: Option<CaseStatus>,
        ) -> Result<Vec<CaseRecord>, DatabaseError> {
            unimplemented!("not used by edit-session tests")
        }

        async fn get_case(&self, case_id: i64) -> Result<Option<CaseRecord>, DatabaseError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_fetch {
                return Err(DatabaseError::Query("read timeout".to_string()));
            }
            Ok(self
                .record
                .lock()
                .unwrap()
                .clone()
                .filter(|r| r.id == case_id))
        }

        async fn create_case(
            &self,
            _input: &CreateCaseParams,
        ) -> Result<CaseRecord, DatabaseError> {
            unimplemented!("not used by edit-session tests")
        }

        async fn apply_case_patch(
            &self,
            case_id: i64,
            patch: &CasePatch,
        ) -> Result<bool, DatabaseError> {
            self.apply_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_write {
                return Err(DatabaseError::Query("connection reset".to_string()));
            }
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
                    other => panic!("unexpected patch entry {other:?}"),
                }
            }
            Ok(true)
        }

        async fn delete_case(&self, _id: i64) -> Result<bool, DatabaseError> {
            unimplemented!("not used by edit-session tests")
        }

        async fn case_status_counts(&self) -> Result<Vec<(CaseStatus, i64)>, DatabaseError> {
            unimplemented!("not used by edit-session tests")
        }
    }

    #[tokio::test]
    async fn untouched_working_copy_saves_without_store_calls() {
        let store = MockStore::holding(case());
        let (session, working) = EditSession::begin(&case());
        let outcome = session.save(&store, &working).await.unwrap();
        assert!(matches!(outcome, SaveOutcome::NoChanges));
        assert_eq!(store.apply_count(), 0);
        assert_eq!(store.fetch_count(), 0);
    }

    #[tokio::test]
    async fn one_changed_field_saves_a_one_column_patch() {
        let store = MockStore::holding(case());
        let (session, mut working) = EditSession::begin(&case());
        working
            .set_field(CaseField::Status, FieldInput::Text("approved".to_string()))
            .unwrap();

        let outcome = session.save(&store, &working).await.unwrap();
        let SaveOutcome::Updated { fields, record } = outcome else {
            panic!("expected Updated, got {outcome:?}");
        };
        assert_eq!(fields, 1);
        assert_eq!(record.status, CaseStatus::Approved);
        assert_eq!(record.payment_amount, Some(dec!(1500)), "untouched column");
        assert_eq!(store.apply_count(), 1);
    }

    #[tokio::test]
    async fn saved_record_rediffs_to_empty_against_the_working_copy() {
        let store = MockStore::holding(case());
        let (session, mut working) = EditSession::begin(&case());
        working
            .set_field(CaseField::PaymentAmount, FieldInput::Text("1600 PLN".to_string()))
            .unwrap();
        working
            .set_field(CaseField::Notes, FieldInput::Text("fee renegotiated".to_string()))
            .unwrap();

        let SaveOutcome::Updated { record, .. } = session.save(&store, &working).await.unwrap()
        else {
            panic!("expected Updated");
        };

        // The store persisted exactly what was sent: a fresh session over
        // the re-fetched row sees no difference from the saved copy.
        let (resynced, _) = EditSession::begin(&record);
        assert!(resynced.compute_diff(&working).unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_failure_keeps_the_session_editing_and_skips_resync() {
        let sessions = EditSessions::new();
        let record = case();
        sessions.begin(&record).unwrap();
        sessions
            .set_field(record.id, CaseField::Status, FieldInput::Text("rejected".to_string()))
            .unwrap();

        let store = MockStore {
            fail_write: true,
            ..MockStore::holding(case())
        };
        let err = sessions.save(&store, record.id).await.unwrap_err();
        assert!(matches!(err, EditError::WriteFailed { .. }));
        assert_eq!(store.fetch_count(), 0, "no resync after a failed write");

        // Session is still there, working copy untouched, so a retry can
        // succeed without re-entering data.
        assert!(sessions.is_active(record.id));
        assert_eq!(
            sessions.working(record.id).unwrap().status,
            CaseStatus::Rejected
        );

        let healthy = MockStore::holding(case());
        let outcome = sessions.save(&healthy, record.id).await.unwrap();
        assert!(matches!(outcome, SaveOutcome::Updated { fields: 1, .. }));
        assert!(!sessions.is_active(record.id));
    }

    #[tokio::test]
    async fn resync_failure_reports_saved_but_stale() {
        let store = MockStore {
            fail_fetch: true,
            ..MockStore::holding(case())
        };
        let (session, mut working) = EditSession::begin(&case());
        working
            .set_field(CaseField::PaymentReceived, FieldInput::Flag(true))
            .unwrap();

        let outcome = session.save(&store, &working).await.unwrap();
        let SaveOutcome::SavedButStale { fields, reason } = outcome else {
            panic!("expected SavedButStale, got {outcome:?}");
        };
        assert_eq!(fields, 1);
        assert!(reason.contains("read timeout"));
    }

    #[tokio::test]
    async fn vanished_row_fails_the_save_and_keeps_the_session() {
        let sessions = EditSessions::new();
        let record = case();
        sessions.begin(&record).unwrap();
        sessions
            .set_field(record.id, CaseField::Notes, FieldInput::Text("x".to_string()))
            .unwrap();

        let store = MockStore::default(); // holds no record
        let err = sessions.save(&store, record.id).await.unwrap_err();
        assert!(matches!(err, EditError::CaseGone { case_id: 7 }));
        assert!(sessions.is_active(record.id));
    }

    #[test]
    fn cancel_restores_every_mapped_field() {
        let sessions = EditSessions::new();
        let record = case();
        let original = sessions.begin(&record).unwrap();

        for (field, input) in [
            (CaseField::ClientName, FieldInput::Text("Jan Kowalski".to_string())),
            (CaseField::Status, FieldInput::Text("archived".to_string())),
            (CaseField::PaymentAmount, FieldInput::Text("9999 PLN".to_string())),
            (CaseField::PaymentReceived, FieldInput::Flag(true)),
            (CaseField::DecisionDue, FieldInput::Text("2026-01-01".to_string())),
        ] {
            sessions.set_field(record.id, field, input).unwrap();
        }

        let restored = sessions.cancel(record.id).unwrap();
        assert_eq!(restored, original);
        assert!(!sessions.is_active(record.id));
    }

    #[test]
    fn reentrant_begin_is_rejected_until_the_session_ends() {
        let sessions = EditSessions::new();
        let record = case();
        sessions.begin(&record).unwrap();

        let err = sessions.begin(&record).unwrap_err();
        assert!(matches!(err, EditError::AlreadyEditing { case_id: 7 }));

        sessions.cancel(record.id).unwrap();
        sessions.begin(&record).unwrap();
    }

    #[test]
    fn independent_cases_edit_concurrently() {
        let sessions = EditSessions::new();
        let mut other = case();
        other.id = 8;
        other.client_name = "Anna Kowalska".to_string();

        sessions.begin(&case()).unwrap();
        sessions.begin(&other).unwrap();
        assert_eq!(
            {
                let mut ids = sessions.active_case_ids();
                ids.sort_unstable();
                ids
            },
            vec![7, 8]
        );
    }
}
