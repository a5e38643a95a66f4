//! Database abstraction layer.
//!
//! Provides a backend-agnostic `Database` trait that unifies all
//! persistence operations behind per-domain sub-traits. The only
//! implementation is the PostgreSQL backend in [`postgres`]; the
//! dashboard targets the hosted store, so there is no embedded fallback.

pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::edit::CasePatch;
use crate::error::DatabaseError;

/// Create the database backend from configuration, run migrations, and
/// return it as a trait object.
pub async fn connect_from_config(
    config: &crate::config::DatabaseConfig,
) -> Result<Arc<dyn Database>, DatabaseError> {
    let backend = postgres::PgBackend::new(config).await?;
    backend.run_migrations().await?;
    Ok(Arc::new(backend))
}

/// Case lifecycle state, mirroring the immigration office workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    New,
    AwaitingDocs,
    InReview,
    SubmittedToOffice,
    Approved,
    Rejected,
    NeedsMoreInfo,
    Archived,
}

impl CaseStatus {
    pub const ALL: [CaseStatus; 8] = [
        Self::New,
        Self::AwaitingDocs,
        Self::InReview,
        Self::SubmittedToOffice,
        Self::Approved,
        Self::Rejected,
        Self::NeedsMoreInfo,
        Self::Archived,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::AwaitingDocs => "awaiting_docs",
            Self::InReview => "in_review",
            Self::SubmittedToOffice => "submitted_to_office",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::NeedsMoreInfo => "needs_more_info",
            Self::Archived => "archived",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "awaiting_docs" => Some(Self::AwaitingDocs),
            "in_review" => Some(Self::InReview),
            "submitted_to_office" => Some(Self::SubmittedToOffice),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "needs_more_info" => Some(Self::NeedsMoreInfo),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// Review state of one submitted document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Approved,
    Rejected,
    Missing,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Missing => "missing",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "missing" => Some(Self::Missing),
            _ => None,
        }
    }
}

/// Client question lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionStatus {
    New,
    Assigned,
    Answered,
    Closed,
}

impl QuestionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Assigned => "assigned",
            Self::Answered => "answered",
            Self::Closed => "closed",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "assigned" => Some(Self::Assigned),
            "answered" => Some(Self::Answered),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Document,
    System,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Document => "document",
            Self::System => "system",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "text" => Some(Self::Text),
            "document" => Some(Self::Document),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Lawyer,
    Assistant,
    Client,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lawyer => "lawyer",
            Self::Assistant => "assistant",
            Self::Client => "client",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "lawyer" => Some(Self::Lawyer),
            "assistant" => Some(Self::Assistant),
            "client" => Some(Self::Client),
            _ => None,
        }
    }
}

/// A client reached through the Telegram bot (or registered manually).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientUserRecord {
    pub id: i64,
    pub telegram_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub preferred_lang: Option<String>,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ClientUserRecord {
    /// Presentation name: "First Last", falling back to the username and
    /// then a generic placeholder.
    pub fn display_name(&self) -> String {
        let full = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or_default(),
            self.last_name.as_deref().unwrap_or_default()
        );
        let full = full.trim();
        if !full.is_empty() {
            return full.to_string();
        }
        self.username
            .clone()
            .unwrap_or_else(|| "Unknown Client".to_string())
    }
}

/// Identity fields taken from an inbound Telegram message.
#[derive(Debug, Clone)]
pub struct TelegramProfile {
    pub telegram_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

/// One immigration case (e.g. a Karta Pobytu application).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: i64,
    pub public_case_id: String,
    pub user_id: Option<i64>,
    pub client_name: String,
    pub case_type: Option<String>,
    pub status: CaseStatus,
    /// Expected decision date communicated by the immigration office.
    pub decision_due: Option<NaiveDate>,
    /// Agreed fee, in PLN. Null until a fee is agreed.
    pub payment_amount: Option<Decimal>,
    pub payment_received: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateCaseParams {
    pub public_case_id: String,
    pub user_id: Option<i64>,
    pub client_name: String,
    pub case_type: Option<String>,
    pub status: CaseStatus,
    pub decision_due: Option<NaiveDate>,
    pub payment_amount: Option<Decimal>,
    pub payment_received: bool,
    pub notes: Option<String>,
}

/// A file held in blob storage, usually received through the bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFileRecord {
    pub id: i64,
    pub case_id: Option<i64>,
    pub storage_key: String,
    pub original_name: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub telegram_file_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateFileParams {
    pub case_id: Option<i64>,
    pub storage_key: String,
    pub original_name: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub telegram_file_id: Option<String>,
}

/// Review row linking a stored file to a case checklist slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: i64,
    pub case_id: i64,
    pub document_id: i64,
    pub is_required: bool,
    pub status: DocumentStatus,
    pub comments: Option<String>,
    pub reviewer: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Flattened submission row for dashboard tables: submission joined with
/// its file and case.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionListing {
    pub id: i64,
    pub case_id: i64,
    pub public_case_id: String,
    pub client_name: String,
    pub document_name: String,
    pub file_size_bytes: Option<i64>,
    pub status: DocumentStatus,
    pub comments: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ReviewSubmissionParams {
    pub status: DocumentStatus,
    pub comments: Option<String>,
    pub reviewer: String,
}

/// A question a client asked through the bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub id: i64,
    pub user_id: Option<i64>,
    pub case_id: Option<i64>,
    pub telegram_id: i64,
    pub text: String,
    pub lang: String,
    pub status: QuestionStatus,
    pub answer: Option<String>,
    pub answered_by: Option<String>,
    pub answered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateQuestionParams {
    pub user_id: Option<i64>,
    pub case_id: Option<i64>,
    pub telegram_id: i64,
    pub text: String,
    pub lang: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaqRecord {
    pub id: i64,
    pub question: String,
    pub answer: String,
    pub category: Option<String>,
    pub language: String,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateFaqParams {
    pub question: String,
    pub answer: String,
    pub category: Option<String>,
    pub language: String,
    pub is_published: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateFaqParams {
    pub question: Option<String>,
    pub answer: Option<String>,
    pub category: Option<Option<String>>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: i64,
    pub case_id: Option<i64>,
    pub sender_id: Option<i64>,
    pub recipient_id: Option<i64>,
    pub content: String,
    pub message_type: MessageType,
    pub language: Option<String>,
    pub is_read: bool,
    pub parent_message_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateMessageParams {
    pub case_id: Option<i64>,
    pub sender_id: Option<i64>,
    pub recipient_id: Option<i64>,
    pub content: String,
    pub message_type: MessageType,
    pub language: Option<String>,
    pub parent_message_id: Option<i64>,
}

/// Append-only audit event.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEventRecord {
    pub id: i64,
    pub actor: String,
    pub case_id: Option<i64>,
    pub event: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RecordAuditEventParams {
    pub actor: String,
    pub case_id: Option<i64>,
    pub event: String,
    pub data: serde_json::Value,
}

const PUBLIC_CASE_ID_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generate a human-shareable case id like `KP-7X2MQK`.
///
/// The alphabet skips 0/O/1/I to keep ids unambiguous over the phone.
pub fn generate_public_case_id<R: rand::Rng>(rng: &mut R) -> String {
    let suffix: String = (0..6)
        .map(|_| {
            let idx = rng.gen_range(0..PUBLIC_CASE_ID_ALPHABET.len());
            PUBLIC_CASE_ID_ALPHABET[idx] as char
        })
        .collect();
    format!("KP-{suffix}")
}

/// Whether a string is a well-formed public case id.
pub fn is_valid_public_case_id(raw: &str) -> bool {
    static PATTERN: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
        regex::Regex::new("^KP-[ABCDEFGHJKLMNPQRSTUVWXYZ23456789]{6}$")
            .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
    });
    PATTERN.is_match(raw)
}

// ==================== Sub-traits ====================
//
// Each sub-trait groups related persistence methods. The `Database`
// supertrait combines them all; leaf consumers can depend on a specific
// sub-trait instead.

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_telegram_id(
        &self,
        telegram_id: i64,
    ) -> Result<Option<ClientUserRecord>, DatabaseError>;
    /// Upsert keyed on telegram id; profile fields refresh on every
    /// contact so renamed accounts stay current.
    async fn find_or_create_telegram_user(
        &self,
        profile: &TelegramProfile,
    ) -> Result<ClientUserRecord, DatabaseError>;
    async fn get_user(&self, id: i64) -> Result<Option<ClientUserRecord>, DatabaseError>;
    async fn list_users(&self) -> Result<Vec<ClientUserRecord>, DatabaseError>;
}

#[async_trait]
pub trait CaseStore: Send + Sync {
    async fn list_cases(
        &self,
        status: Option<CaseStatus>,
    ) -> Result<Vec<CaseRecord>, DatabaseError>;
    async fn get_case(&self, id: i64) -> Result<Option<CaseRecord>, DatabaseError>;
    async fn create_case(&self, input: &CreateCaseParams) -> Result<CaseRecord, DatabaseError>;
    /// Partial update: touches exactly the columns named in `patch`,
    /// nothing else. Returns `false` when no row matched `case_id`.
    async fn apply_case_patch(
        &self,
        case_id: i64,
        patch: &CasePatch,
    ) -> Result<bool, DatabaseError>;
    async fn delete_case(&self, id: i64) -> Result<bool, DatabaseError>;
    async fn case_status_counts(&self) -> Result<Vec<(CaseStatus, i64)>, DatabaseError>;
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Submissions joined with file and case metadata; `case_id = None`
    /// lists across all cases.
    async fn list_submissions(
        &self,
        case_id: Option<i64>,
    ) -> Result<Vec<SubmissionListing>, DatabaseError>;
    async fn get_submission(&self, id: i64) -> Result<Option<SubmissionRecord>, DatabaseError>;
    async fn review_submission(
        &self,
        id: i64,
        input: &ReviewSubmissionParams,
    ) -> Result<Option<SubmissionRecord>, DatabaseError>;
    async fn record_uploaded_file(
        &self,
        input: &CreateFileParams,
    ) -> Result<StoredFileRecord, DatabaseError>;
    async fn attach_submission(
        &self,
        case_id: i64,
        document_id: i64,
        is_required: bool,
    ) -> Result<SubmissionRecord, DatabaseError>;
    /// File row backing a submission, for downloads.
    async fn get_submission_file(
        &self,
        submission_id: i64,
    ) -> Result<Option<StoredFileRecord>, DatabaseError>;
}

#[async_trait]
pub trait QuestionStore: Send + Sync {
    async fn insert_question(
        &self,
        input: &CreateQuestionParams,
    ) -> Result<QuestionRecord, DatabaseError>;
    async fn list_questions(
        &self,
        status: Option<QuestionStatus>,
    ) -> Result<Vec<QuestionRecord>, DatabaseError>;
    async fn get_question(&self, id: i64) -> Result<Option<QuestionRecord>, DatabaseError>;
    async fn answer_question(
        &self,
        id: i64,
        answer: &str,
        answered_by: &str,
    ) -> Result<Option<QuestionRecord>, DatabaseError>;
    async fn close_question(&self, id: i64) -> Result<bool, DatabaseError>;
    async fn question_status_counts(&self) -> Result<Vec<(QuestionStatus, i64)>, DatabaseError>;
}

#[async_trait]
pub trait FaqStore: Send + Sync {
    async fn list_faq(&self, published_only: bool) -> Result<Vec<FaqRecord>, DatabaseError>;
    async fn get_faq(&self, id: i64) -> Result<Option<FaqRecord>, DatabaseError>;
    async fn create_faq(&self, input: &CreateFaqParams) -> Result<FaqRecord, DatabaseError>;
    async fn update_faq(
        &self,
        id: i64,
        input: &UpdateFaqParams,
    ) -> Result<Option<FaqRecord>, DatabaseError>;
    async fn set_faq_published(
        &self,
        id: i64,
        published: bool,
    ) -> Result<Option<FaqRecord>, DatabaseError>;
    async fn delete_faq(&self, id: i64) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_message(
        &self,
        input: &CreateMessageParams,
    ) -> Result<MessageRecord, DatabaseError>;
    async fn list_case_messages(
        &self,
        case_id: i64,
    ) -> Result<Vec<MessageRecord>, DatabaseError>;
    async fn mark_message_read(&self, id: i64) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn record_audit_event(
        &self,
        input: &RecordAuditEventParams,
    ) -> Result<(), DatabaseError>;
    async fn list_case_audit_events(
        &self,
        case_id: i64,
        limit: i64,
    ) -> Result<Vec<AuditEventRecord>, DatabaseError>;
}

/// The unified persistence interface.
#[async_trait]
pub trait Database:
    UserStore + CaseStore + SubmissionStore + QuestionStore + FaqStore + MessageStore + AuditStore
{
    async fn run_migrations(&self) -> Result<(), DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::{CaseStatus, generate_public_case_id, is_valid_public_case_id};

    #[test]
    fn case_status_round_trips_through_db_values() {
        for status in CaseStatus::ALL {
            assert_eq!(CaseStatus::from_db_value(status.as_str()), Some(status));
        }
        assert_eq!(CaseStatus::from_db_value("granted"), None);
    }

    #[test]
    fn public_case_ids_are_well_formed() {
        let mut rng = rand::thread_rng();
        for _ in 0..32 {
            let id = generate_public_case_id(&mut rng);
            assert!(is_valid_public_case_id(&id), "generated bad id {id}");
        }
        assert!(!is_valid_public_case_id("KP-0OI1AB"));
        assert!(!is_valid_public_case_id("CASE-12"));
    }
}
