//! Request and response DTOs for the web gateway API.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{CaseRecord, CaseStatus, QuestionRecord, QuestionStatus};
use crate::edit::{CaseDraft, FieldInput, format_amount};
use crate::notify::{Notification, NotificationKind};
use crate::practice::DashboardStats;

// --- Cases ---

#[derive(Debug, Serialize)]
pub struct CaseInfo {
    pub id: i64,
    pub public_case_id: String,
    pub user_id: Option<i64>,
    pub client_name: String,
    pub case_type: Option<String>,
    pub status: CaseStatus,
    pub decision_due: Option<NaiveDate>,
    pub payment_amount: Option<Decimal>,
    /// Presentation form, e.g. "1500 PLN" or "N/A".
    pub payment_amount_display: String,
    pub payment_received: bool,
    pub notes: Option<String>,
    /// Whether an edit session currently owns this case.
    pub editing: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CaseInfo {
    pub fn from_record(record: &CaseRecord, editing: bool) -> Self {
        Self {
            id: record.id,
            public_case_id: record.public_case_id.clone(),
            user_id: record.user_id,
            client_name: record.client_name.clone(),
            case_type: record.case_type.clone(),
            status: record.status,
            decision_due: record.decision_due,
            payment_amount: record.payment_amount,
            payment_amount_display: format_amount(record.payment_amount),
            payment_received: record.payment_received,
            notes: record.notes.clone(),
            editing,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCaseRequest {
    pub client_name: String,
    pub case_type: Option<String>,
    pub user_id: Option<i64>,
    pub actor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub actor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusCount {
    pub status: CaseStatus,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct DashboardStatsResponse {
    pub total_cases: i64,
    pub by_status: Vec<StatusCount>,
    pub pending_submissions: usize,
    pub open_questions: i64,
}

impl From<DashboardStats> for DashboardStatsResponse {
    fn from(stats: DashboardStats) -> Self {
        Self {
            total_cases: stats.total_cases,
            by_status: stats
                .cases_by_status
                .into_iter()
                .map(|(status, count)| StatusCount { status, count })
                .collect(),
            pending_submissions: stats.pending_submissions,
            open_questions: stats.open_questions,
        }
    }
}

// --- Edit sessions ---

#[derive(Debug, Serialize)]
pub struct DraftResponse {
    pub case_id: i64,
    pub draft: CaseDraft,
}

#[derive(Debug, Deserialize)]
pub struct SetFieldRequest {
    /// Logical field name, e.g. "paymentAmount".
    pub field: String,
    pub value: FieldInput,
}

#[derive(Debug, Serialize)]
pub struct SaveResponse {
    /// "no_changes", "updated", or "saved_but_stale".
    pub outcome: &'static str,
    pub fields_changed: usize,
    /// One-line confirmation the dashboard can toast.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case: Option<CaseInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

// --- Submissions ---

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    /// "approve" or "reject".
    pub decision: String,
    pub reason: Option<String>,
    pub reviewer: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmissionsQuery {
    pub case_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SignedUrlResponse {
    pub url: String,
    pub expires_in_secs: u64,
}

// --- Questions ---

#[derive(Debug, Serialize)]
pub struct QuestionInfo {
    pub id: i64,
    pub client_name: String,
    pub text: String,
    pub lang: String,
    pub status: QuestionStatus,
    pub answer: Option<String>,
    pub answered_by: Option<String>,
    pub answered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl QuestionInfo {
    pub fn from_record(record: &QuestionRecord, client_name: String) -> Self {
        Self {
            id: record.id,
            client_name,
            text: record.text.clone(),
            lang: record.lang.clone(),
            status: record.status,
            answer: record.answer.clone(),
            answered_by: record.answered_by.clone(),
            answered_at: record.answered_at,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QuestionsQuery {
    pub status: Option<QuestionStatus>,
}

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub answer: String,
    pub lawyer: Option<String>,
}

// --- FAQ ---

#[derive(Debug, Deserialize)]
pub struct FaqCreateRequest {
    pub question: String,
    pub answer: String,
    pub category: Option<String>,
    pub language: Option<String>,
    pub actor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FaqUpdateRequest {
    pub question: Option<String>,
    pub answer: Option<String>,
    /// Present-and-null clears the category.
    #[serde(default, with = "double_option")]
    pub category: Option<Option<String>>,
    pub language: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FaqPublishRequest {
    pub published: bool,
}

#[derive(Debug, Deserialize)]
pub struct FaqQuery {
    #[serde(default)]
    pub published: bool,
}

/// Distinguish "absent" from "present but null" for PATCH-style fields.
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

// --- Notifications ---

#[derive(Debug, Serialize)]
pub struct NotificationInfo {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

impl From<Notification> for NotificationInfo {
    fn from(notification: Notification) -> Self {
        Self {
            id: notification.id,
            kind: notification.kind,
            title: notification.title,
            description: notification.description,
            timestamp: notification.timestamp,
            read: notification.read,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NotificationsResponse {
    pub notifications: Vec<NotificationInfo>,
    pub unread_count: usize,
}

// --- Webhook ---

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
}

// --- Health ---

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}
