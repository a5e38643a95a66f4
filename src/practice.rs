//! Practice-level operations behind the dashboard pages.
//!
//! Each operation validates, writes through the store, records an audit
//! event, and publishes a change event. Validation failures surface as
//! plain strings for the gateway to relay.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::channels::telegram::TelegramBot;
use crate::db::{
    AuditStore, CaseRecord, CaseStatus, CaseStore, CreateCaseParams, CreateFaqParams,
    CreateMessageParams, Database, DocumentStatus, FaqRecord, FaqStore, MessageStore, MessageType,
    QuestionRecord, QuestionStatus, QuestionStore, RecordAuditEventParams, ReviewSubmissionParams,
    SubmissionRecord, SubmissionStore, generate_public_case_id,
};
use crate::edit::{EditSessions, SaveOutcome};
use crate::error::{DatabaseError, EditError};
use crate::notify::{ChangeFeed, StoreEvent, StoreOp, StoreTable};

/// Counts shown on the dashboard landing page.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DashboardStats {
    pub total_cases: i64,
    pub cases_by_status: Vec<(CaseStatus, i64)>,
    pub pending_submissions: usize,
    pub open_questions: i64,
}

pub async fn dashboard_stats(db: &dyn Database) -> Result<DashboardStats, DatabaseError> {
    let cases_by_status = db.case_status_counts().await?;
    let total_cases = cases_by_status.iter().map(|(_, count)| count).sum();

    let pending_submissions = db
        .list_submissions(None)
        .await?
        .iter()
        .filter(|s| s.status == DocumentStatus::Pending)
        .count();

    let open_questions = db
        .question_status_counts()
        .await?
        .into_iter()
        .filter(|(status, _)| {
            matches!(status, QuestionStatus::New | QuestionStatus::Assigned)
        })
        .map(|(_, count)| count)
        .sum();

    Ok(DashboardStats {
        total_cases,
        cases_by_status,
        pending_submissions,
        open_questions,
    })
}

/// Best-effort audit append; a failed audit write never fails the
/// operation it describes.
async fn audit(db: &dyn Database, actor: &str, case_id: Option<i64>, event: &str, data: serde_json::Value) {
    let params = RecordAuditEventParams {
        actor: actor.to_string(),
        case_id,
        event: event.to_string(),
        data,
    };
    if let Err(err) = db.record_audit_event(&params).await {
        tracing::warn!(event, error = %err, "audit event lost");
    }
}

// ==================== Cases ====================

#[derive(Debug, Clone)]
pub struct NewCaseInput {
    pub client_name: String,
    pub case_type: Option<String>,
    pub user_id: Option<i64>,
}

pub async fn open_case(
    db: &dyn Database,
    feed: &ChangeFeed,
    directory: &CaseDirectory,
    actor: &str,
    input: NewCaseInput,
) -> Result<CaseRecord, String> {
    if input.client_name.trim().is_empty() {
        return Err("Client name is required".to_string());
    }

    let params = CreateCaseParams {
        public_case_id: generate_public_case_id(&mut rand::thread_rng()),
        user_id: input.user_id,
        client_name: input.client_name.trim().to_string(),
        case_type: input.case_type.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
        status: CaseStatus::New,
        decision_due: None,
        payment_amount: None,
        payment_received: false,
        notes: None,
    };
    let record = db.create_case(&params).await.map_err(|e| e.to_string())?;

    directory.upsert(record.clone());
    audit(
        db,
        actor,
        Some(record.id),
        "case.opened",
        serde_json::json!({ "public_case_id": record.public_case_id }),
    )
    .await;
    feed.publish(StoreEvent {
        table: StoreTable::Cases,
        op: StoreOp::Insert,
        row_id: record.id,
        case_id: Some(record.id),
        summary: format!("Case {} opened for {}", record.public_case_id, record.client_name),
    });
    Ok(record)
}

/// Save an active edit session: minimal diff, partial update, resync.
///
/// Audit and feed publication happen only when a write actually occurred;
/// a no-op save leaves no trace anywhere.
pub async fn save_case_edit(
    db: &dyn Database,
    sessions: &EditSessions,
    feed: &ChangeFeed,
    directory: &CaseDirectory,
    actor: &str,
    case_id: i64,
) -> Result<SaveOutcome, EditError> {
    let outcome = sessions.save(db, case_id).await?;

    match &outcome {
        SaveOutcome::NoChanges => {}
        SaveOutcome::Updated { fields, record } => {
            directory.upsert(record.clone());
            audit(
                db,
                actor,
                Some(case_id),
                "case.updated",
                serde_json::json!({ "fields_changed": fields }),
            )
            .await;
            feed.publish(StoreEvent {
                table: StoreTable::Cases,
                op: StoreOp::Update,
                row_id: case_id,
                case_id: Some(case_id),
                summary: format!("Case updated ({fields} field(s))"),
            });
        }
        SaveOutcome::SavedButStale { fields, reason } => {
            // The row changed but we could not confirm what the store now
            // holds; drop the cached entry rather than show stale data.
            directory.remove(case_id);
            audit(
                db,
                actor,
                Some(case_id),
                "case.updated",
                serde_json::json!({ "fields_changed": fields, "resync_failed": reason }),
            )
            .await;
            feed.publish(StoreEvent {
                table: StoreTable::Cases,
                op: StoreOp::Update,
                row_id: case_id,
                case_id: Some(case_id),
                summary: format!("Case updated ({fields} field(s)), refresh failed"),
            });
        }
    }
    Ok(outcome)
}

/// Delete a case after explicit confirmation. Refused while the case is
/// under edit; the session holds ownership until it ends.
pub async fn delete_case(
    db: &dyn Database,
    sessions: &EditSessions,
    feed: &ChangeFeed,
    directory: &CaseDirectory,
    actor: &str,
    case_id: i64,
) -> Result<(), String> {
    if sessions.is_active(case_id) {
        return Err("Case is being edited; save or cancel first".to_string());
    }
    let deleted = db.delete_case(case_id).await.map_err(|e| e.to_string())?;
    if !deleted {
        return Err("Case not found".to_string());
    }

    directory.remove(case_id);
    audit(db, actor, None, "case.deleted", serde_json::json!({ "case_id": case_id })).await;
    feed.publish(StoreEvent {
        table: StoreTable::Cases,
        op: StoreOp::Delete,
        row_id: case_id,
        case_id: Some(case_id),
        summary: "Case deleted".to_string(),
    });
    Ok(())
}

// ==================== Document review ====================

#[derive(Debug, Clone)]
pub enum ReviewDecision {
    Approve,
    Reject { reason: String },
}

/// Translate a review decision into update params, enforcing that a
/// rejection always carries a reason for the client.
pub fn review_params(decision: &ReviewDecision, reviewer: &str) -> Result<ReviewSubmissionParams, String> {
    let reviewer = reviewer.trim();
    if reviewer.is_empty() {
        return Err("Reviewer name is required".to_string());
    }
    match decision {
        ReviewDecision::Approve => Ok(ReviewSubmissionParams {
            status: DocumentStatus::Approved,
            comments: None,
            reviewer: reviewer.to_string(),
        }),
        ReviewDecision::Reject { reason } => {
            let reason = reason.trim();
            if reason.is_empty() {
                return Err("A reason is required to reject a document".to_string());
            }
            Ok(ReviewSubmissionParams {
                status: DocumentStatus::Rejected,
                comments: Some(reason.to_string()),
                reviewer: reviewer.to_string(),
            })
        }
    }
}

pub async fn review_submission(
    db: &dyn Database,
    feed: &ChangeFeed,
    reviewer: &str,
    submission_id: i64,
    decision: ReviewDecision,
) -> Result<SubmissionRecord, String> {
    let params = review_params(&decision, reviewer)?;
    let Some(existing) = db.get_submission(submission_id).await.map_err(|e| e.to_string())?
    else {
        return Err("Submission not found".to_string());
    };
    if existing.status != DocumentStatus::Pending {
        return Err(format!(
            "Only pending documents can be reviewed (current status: {})",
            existing.status.as_str()
        ));
    }

    let updated = db
        .review_submission(submission_id, &params)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "Submission not found".to_string())?;

    audit(
        db,
        reviewer,
        Some(updated.case_id),
        "document.reviewed",
        serde_json::json!({
            "submission_id": submission_id,
            "status": updated.status.as_str(),
            "comments": updated.comments,
        }),
    )
    .await;
    feed.publish(StoreEvent {
        table: StoreTable::Documents,
        op: StoreOp::Update,
        row_id: submission_id,
        case_id: Some(updated.case_id),
        summary: format!("Document {}", updated.status.as_str()),
    });
    Ok(updated)
}

// ==================== Questions ====================

/// Answer a client question and deliver the answer over Telegram when the
/// bot is configured. Delivery is best effort: the answer is stored
/// either way, and a failed send is reported in the message log.
pub async fn answer_question(
    db: &dyn Database,
    bot: Option<&TelegramBot>,
    feed: &ChangeFeed,
    lawyer: &str,
    question_id: i64,
    answer: &str,
) -> Result<QuestionRecord, String> {
    let answer = answer.trim();
    if answer.is_empty() {
        return Err("Answer cannot be empty".to_string());
    }
    let Some(question) = db.get_question(question_id).await.map_err(|e| e.to_string())? else {
        return Err("Question not found".to_string());
    };
    if question.status == QuestionStatus::Closed {
        return Err("Question is closed".to_string());
    }

    let updated = db
        .answer_question(question_id, answer, lawyer)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "Question not found".to_string())?;

    let delivered = match bot {
        Some(bot) => match bot.send_message(updated.telegram_id, answer).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(question_id, error = %err, "answer not delivered to telegram");
                false
            }
        },
        None => false,
    };

    let log_entry = CreateMessageParams {
        case_id: updated.case_id,
        sender_id: None,
        recipient_id: updated.user_id,
        content: answer.to_string(),
        message_type: if delivered {
            MessageType::Text
        } else {
            MessageType::System
        },
        language: Some(updated.lang.clone()),
        parent_message_id: None,
    };
    if let Err(err) = db.insert_message(&log_entry).await {
        tracing::warn!(question_id, error = %err, "answer not recorded in message log");
    }

    audit(
        db,
        lawyer,
        updated.case_id,
        "question.answered",
        serde_json::json!({ "question_id": question_id, "delivered": delivered }),
    )
    .await;
    feed.publish(StoreEvent {
        table: StoreTable::Questions,
        op: StoreOp::Update,
        row_id: question_id,
        case_id: updated.case_id,
        summary: "Question answered".to_string(),
    });
    Ok(updated)
}

// ==================== FAQ ====================

pub async fn create_faq_entry(
    db: &dyn Database,
    actor: &str,
    question: &str,
    answer: &str,
    category: Option<String>,
    language: Option<String>,
) -> Result<FaqRecord, String> {
    let question = question.trim();
    let answer = answer.trim();
    if question.is_empty() || answer.is_empty() {
        return Err("FAQ entries need both a question and an answer".to_string());
    }

    let record = db
        .create_faq(&CreateFaqParams {
            question: question.to_string(),
            answer: answer.to_string(),
            category: category.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
            language: language.unwrap_or_else(|| "en".to_string()),
            is_published: false,
        })
        .await
        .map_err(|e| e.to_string())?;

    audit(db, actor, None, "faq.created", serde_json::json!({ "faq_id": record.id })).await;
    Ok(record)
}

// ==================== Case directory ====================

/// In-memory snapshot of the case list the dashboard serves.
///
/// The background refresh task re-fetches the full list periodically, but
/// rows with an active edit session keep their cached entry: the session
/// holds soft-exclusive ownership of its case until it ends, so a refresh
/// never clobbers what the editor is looking at.
#[derive(Default)]
pub struct CaseDirectory {
    cases: RwLock<HashMap<i64, CaseRecord>>,
}

impl CaseDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot with fresh rows, preserving entries for cases
    /// under edit. Returns how many rows were refreshed.
    pub async fn refresh<S: CaseStore + ?Sized>(
        &self,
        store: &S,
        sessions: &EditSessions,
    ) -> Result<usize, DatabaseError> {
        let fresh = store.list_cases(None).await?;
        let mut cases = self.write();

        let mut next: HashMap<i64, CaseRecord> = HashMap::with_capacity(fresh.len());
        // Cases under edit keep their cached row even if the store has
        // newer (or no) data for them.
        for id in sessions.active_case_ids() {
            if let Some(existing) = cases.remove(&id) {
                next.insert(id, existing);
            }
        }
        let mut refreshed = 0usize;
        for record in fresh {
            if next.contains_key(&record.id) {
                continue;
            }
            refreshed += 1;
            next.insert(record.id, record);
        }
        *cases = next;
        Ok(refreshed)
    }

    pub fn list(&self) -> Vec<CaseRecord> {
        let mut cases: Vec<CaseRecord> = self.read().values().cloned().collect();
        cases.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        cases
    }

    pub fn get(&self, id: i64) -> Option<CaseRecord> {
        self.read().get(&id).cloned()
    }

    pub fn upsert(&self, record: CaseRecord) {
        self.write().insert(record.id, record);
    }

    pub fn remove(&self, id: i64) {
        self.write().remove(&id);
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<i64, CaseRecord>> {
        self.cases.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<i64, CaseRecord>> {
        self.cases.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Periodic full-list refresh. Interval 0 disables the loop.
pub fn spawn_refresh_loop(
    db: Arc<dyn Database>,
    sessions: Arc<EditSessions>,
    directory: Arc<CaseDirectory>,
    interval_secs: u64,
) -> Option<tokio::task::JoinHandle<()>> {
    if interval_secs == 0 {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match directory.refresh(db.as_ref(), &sessions).await {
                Ok(refreshed) => tracing::debug!(refreshed, "case directory refreshed"),
                Err(err) => tracing::warn!(error = %err, "case directory refresh failed"),
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use super::{CaseDirectory, ReviewDecision, review_params};
    use crate::db::{
        CaseRecord, CaseStatus, CaseStore, CreateCaseParams, DocumentStatus,
    };
    use crate::edit::{CasePatch, EditSessions};
    use crate::error::DatabaseError;

    fn case(id: i64, client: &str) -> CaseRecord {
        CaseRecord {
            id,
            public_case_id: format!("KP-TEST{id}A"),
            user_id: None,
            client_name: client.to_string(),
            case_type: None,
            status: CaseStatus::New,
            decision_due: None,
            payment_amount: None,
            payment_received: false,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    struct FixedCases(Vec<CaseRecord>);

    #[async_trait]
    impl CaseStore for FixedCases {
        async fn list_cases(
            &self,
            _status: Option<CaseStatus>,
        ) -> Result<Vec<CaseRecord>, DatabaseError> {
            Ok(self.0.clone())
        }

        async fn get_case(&self, id: i64) -> Result<Option<CaseRecord>, DatabaseError> {
            Ok(self.0.iter().find(|c| c.id == id).cloned())
        }

        async fn create_case(
            &self,
            _input: &CreateCaseParams,
        ) -> Result<CaseRecord, DatabaseError> {
            unimplemented!("not used by directory tests")
        }

        async fn apply_case_patch(
            &self,
            _case_id: i64,
            _patch: &CasePatch,
        ) -> Result<bool, DatabaseError> {
            unimplemented!("not used by directory tests")
        }

        async fn delete_case(&self, _id: i64) -> Result<bool, DatabaseError> {
            unimplemented!("not used by directory tests")
        }

        async fn case_status_counts(&self) -> Result<Vec<(CaseStatus, i64)>, DatabaseError> {
            unimplemented!("not used by directory tests")
        }
    }

    #[test]
    fn rejection_requires_a_reason() {
        assert!(review_params(&ReviewDecision::Reject { reason: "  ".to_string() }, "Ewa").is_err());
        let params = review_params(
            &ReviewDecision::Reject {
                reason: "Scan is not legible".to_string(),
            },
            "Ewa",
        )
        .unwrap();
        assert_eq!(params.status, DocumentStatus::Rejected);
        assert_eq!(params.comments.as_deref(), Some("Scan is not legible"));

        let approved = review_params(&ReviewDecision::Approve, "Ewa").unwrap();
        assert_eq!(approved.status, DocumentStatus::Approved);
        assert_eq!(approved.comments, None);
    }

    #[tokio::test]
    async fn refresh_keeps_rows_under_edit() {
        let sessions = EditSessions::new();
        let directory = CaseDirectory::new();

        // First load: two cases land in the directory.
        let store = FixedCases(vec![case(1, "John Doe"), case(2, "Anna Kowalska")]);
        directory.refresh(&store, &sessions).await.unwrap();
        assert_eq!(directory.list().len(), 2);

        // Case 1 goes under edit; the store then serves a renamed row.
        sessions.begin(&directory.get(1).unwrap()).unwrap();
        let store = FixedCases(vec![case(1, "Johnny Doe"), case(2, "Anna Kowalska")]);
        directory.refresh(&store, &sessions).await.unwrap();
        assert_eq!(
            directory.get(1).unwrap().client_name,
            "John Doe",
            "row under edit must not be clobbered"
        );

        // After the session ends, the next refresh picks up the store row.
        sessions.cancel(1).unwrap();
        directory.refresh(&store, &sessions).await.unwrap();
        assert_eq!(directory.get(1).unwrap().client_name, "Johnny Doe");
    }
}
