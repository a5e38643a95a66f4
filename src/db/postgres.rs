//! PostgreSQL backend for the Database trait.
//!
//! One `deadpool-postgres` pool; schema is managed by embedded refinery
//! migrations in `migrations/`.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;
use tokio_postgres::types::ToSql;

use crate::config::DatabaseConfig;
use crate::db::{
    AuditEventRecord, AuditStore, CaseRecord, CaseStatus, CaseStore, ClientUserRecord,
    CreateCaseParams, CreateFaqParams, CreateFileParams, CreateMessageParams,
    CreateQuestionParams, Database, DocumentStatus, FaqRecord, FaqStore, MessageRecord,
    MessageStore, MessageType, QuestionRecord, QuestionStatus, QuestionStore,
    RecordAuditEventParams, ReviewSubmissionParams, StoredFileRecord, SubmissionListing,
    SubmissionRecord, SubmissionStore, TelegramProfile, UpdateFaqParams, UserRole, UserStore,
};
use crate::edit::{CasePatch, ColumnValue};
use crate::error::DatabaseError;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// PostgreSQL database backend.
pub struct PgBackend {
    pool: Pool,
}

impl PgBackend {
    /// Create a new backend from configuration. Does not run migrations.
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let pg_config = tokio_postgres::Config::from_str(&config.url)
            .map_err(|e| DatabaseError::Pool(format!("invalid DATABASE_URL: {e}")))?;
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> Pool {
        self.pool.clone()
    }

    async fn conn(&self) -> Result<deadpool_postgres::Client, DatabaseError> {
        Ok(self.pool.get().await?)
    }
}

fn parse_case_status(raw: &str) -> Result<CaseStatus, DatabaseError> {
    CaseStatus::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid case status '{raw}'")))
}

fn parse_document_status(raw: &str) -> Result<DocumentStatus, DatabaseError> {
    DocumentStatus::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid document status '{raw}'")))
}

fn parse_question_status(raw: &str) -> Result<QuestionStatus, DatabaseError> {
    QuestionStatus::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid question status '{raw}'")))
}

fn parse_message_type(raw: &str) -> Result<MessageType, DatabaseError> {
    MessageType::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid message type '{raw}'")))
}

fn parse_user_role(raw: &str) -> Result<UserRole, DatabaseError> {
    UserRole::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid user role '{raw}'")))
}

fn row_to_user_record(row: &tokio_postgres::Row) -> Result<ClientUserRecord, DatabaseError> {
    let role_raw: String = row.get("role");
    Ok(ClientUserRecord {
        id: row.get("id"),
        telegram_id: row.get("telegram_id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        username: row.get("username"),
        email: row.get("email"),
        preferred_lang: row.get("preferred_lang"),
        role: parse_user_role(&role_raw)?,
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
    })
}

fn row_to_case_record(row: &tokio_postgres::Row) -> Result<CaseRecord, DatabaseError> {
    let status_raw: String = row.get("status");
    Ok(CaseRecord {
        id: row.get("id"),
        public_case_id: row.get("public_case_id"),
        user_id: row.get("user_id"),
        client_name: row.get("client_name"),
        case_type: row.get("case_type"),
        status: parse_case_status(&status_raw)?,
        decision_due: row.get("decision_due"),
        payment_amount: row.get("payment_amount"),
        payment_received: row.get("payment_received"),
        notes: row.get("notes"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_file_record(row: &tokio_postgres::Row) -> StoredFileRecord {
    StoredFileRecord {
        id: row.get("id"),
        case_id: row.get("case_id"),
        storage_key: row.get("storage_key"),
        original_name: row.get("original_name"),
        mime_type: row.get("mime_type"),
        size_bytes: row.get("size_bytes"),
        telegram_file_id: row.get("telegram_file_id"),
        created_at: row.get("created_at"),
    }
}

fn row_to_submission_record(row: &tokio_postgres::Row) -> Result<SubmissionRecord, DatabaseError> {
    let status_raw: String = row.get("status");
    Ok(SubmissionRecord {
        id: row.get("id"),
        case_id: row.get("case_id"),
        document_id: row.get("document_id"),
        is_required: row.get("is_required"),
        status: parse_document_status(&status_raw)?,
        comments: row.get("comments"),
        reviewer: row.get("reviewer"),
        reviewed_at: row.get("reviewed_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_question_record(row: &tokio_postgres::Row) -> Result<QuestionRecord, DatabaseError> {
    let status_raw: String = row.get("status");
    Ok(QuestionRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        case_id: row.get("case_id"),
        telegram_id: row.get("telegram_id"),
        text: row.get("text"),
        lang: row.get("lang"),
        status: parse_question_status(&status_raw)?,
        answer: row.get("answer"),
        answered_by: row.get("answered_by"),
        answered_at: row.get("answered_at"),
        created_at: row.get("created_at"),
    })
}

fn row_to_faq_record(row: &tokio_postgres::Row) -> FaqRecord {
    FaqRecord {
        id: row.get("id"),
        question: row.get("question"),
        answer: row.get("answer"),
        category: row.get("category"),
        language: row.get("language"),
        is_published: row.get("is_published"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_message_record(row: &tokio_postgres::Row) -> Result<MessageRecord, DatabaseError> {
    let type_raw: String = row.get("message_type");
    Ok(MessageRecord {
        id: row.get("id"),
        case_id: row.get("case_id"),
        sender_id: row.get("sender_id"),
        recipient_id: row.get("recipient_id"),
        content: row.get("content"),
        message_type: parse_message_type(&type_raw)?,
        language: row.get("language"),
        is_read: row.get("is_read"),
        parent_message_id: row.get("parent_message_id"),
        created_at: row.get("created_at"),
    })
}

/// Owned SQL parameter for a patched column.
fn patch_param(value: &ColumnValue) -> Box<dyn ToSql + Sync + Send> {
    match value {
        ColumnValue::Text(v) => Box::new(v.clone()),
        ColumnValue::NullableText(v) => Box::new(v.clone()),
        ColumnValue::Status(v) => Box::new(v.as_str().to_string()),
        ColumnValue::Date(v) => Box::new(*v),
        ColumnValue::Flag(v) => Box::new(*v),
        ColumnValue::Amount(v) => Box::new(*v),
    }
}

const CASE_COLUMNS: &str = "id, public_case_id, user_id, client_name, case_type, status, \
     decision_due, payment_amount, payment_received, notes, created_at, updated_at";

const USER_COLUMNS: &str = "id, telegram_id, first_name, last_name, username, email, \
     preferred_lang, role, is_active, created_at";

const SUBMISSION_COLUMNS: &str = "id, case_id, document_id, is_required, status, comments, \
     reviewer, reviewed_at, created_at, updated_at";

const FILE_COLUMNS: &str =
    "id, case_id, storage_key, original_name, mime_type, size_bytes, telegram_file_id, created_at";

const QUESTION_COLUMNS: &str = "id, user_id, case_id, telegram_id, text, lang, status, answer, \
     answered_by, answered_at, created_at";

const FAQ_COLUMNS: &str =
    "id, question, answer, category, language, is_published, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, case_id, sender_id, recipient_id, content, message_type, \
     language, is_read, parent_message_id, created_at";

#[async_trait]
impl Database for PgBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let mut conn = self.conn().await?;
        embedded::migrations::runner()
            .run_async(&mut **conn)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        Ok(())
    }
}

// ==================== UserStore ====================

#[async_trait]
impl UserStore for PgBackend {
    async fn find_user_by_telegram_id(
        &self,
        telegram_id: i64,
    ) -> Result<Option<ClientUserRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE telegram_id = $1"),
                &[&telegram_id],
            )
            .await?;
        row.as_ref().map(row_to_user_record).transpose()
    }

    async fn find_or_create_telegram_user(
        &self,
        profile: &TelegramProfile,
    ) -> Result<ClientUserRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO users (telegram_id, first_name, last_name, username, role) \
                     VALUES ($1, $2, $3, $4, 'client') \
                     ON CONFLICT (telegram_id) DO UPDATE SET \
                       first_name = EXCLUDED.first_name, \
                       last_name = EXCLUDED.last_name, \
                       username = EXCLUDED.username \
                     RETURNING {USER_COLUMNS}"
                ),
                &[
                    &profile.telegram_id,
                    &profile.first_name,
                    &profile.last_name,
                    &profile.username,
                ],
            )
            .await?;
        row_to_user_record(&row)
    }

    async fn get_user(&self, id: i64) -> Result<Option<ClientUserRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.as_ref().map(row_to_user_record).transpose()
    }

    async fn list_users(&self) -> Result<Vec<ClientUserRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC"),
                &[],
            )
            .await?;
        rows.iter().map(row_to_user_record).collect()
    }
}

// ==================== CaseStore ====================

#[async_trait]
impl CaseStore for PgBackend {
    async fn list_cases(
        &self,
        status: Option<CaseStatus>,
    ) -> Result<Vec<CaseRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = match status {
            Some(status) => {
                conn.query(
                    &format!(
                        "SELECT {CASE_COLUMNS} FROM cases WHERE status = $1 \
                         ORDER BY updated_at DESC"
                    ),
                    &[&status.as_str()],
                )
                .await?
            }
            None => {
                conn.query(
                    &format!("SELECT {CASE_COLUMNS} FROM cases ORDER BY updated_at DESC"),
                    &[],
                )
                .await?
            }
        };
        rows.iter().map(row_to_case_record).collect()
    }

    async fn get_case(&self, id: i64) -> Result<Option<CaseRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {CASE_COLUMNS} FROM cases WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.as_ref().map(row_to_case_record).transpose()
    }

    async fn create_case(&self, input: &CreateCaseParams) -> Result<CaseRecord, DatabaseError> {
        let client_name = input.client_name.trim();
        if client_name.is_empty() {
            return Err(DatabaseError::Serialization(
                "client name cannot be empty".to_string(),
            ));
        }
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO cases \
                     (public_case_id, user_id, client_name, case_type, status, decision_due, \
                      payment_amount, payment_received, notes) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                     RETURNING {CASE_COLUMNS}"
                ),
                &[
                    &input.public_case_id,
                    &input.user_id,
                    &client_name,
                    &input.case_type,
                    &input.status.as_str(),
                    &input.decision_due,
                    &input.payment_amount,
                    &input.payment_received,
                    &input.notes,
                ],
            )
            .await?;
        row_to_case_record(&row)
    }

    async fn apply_case_patch(
        &self,
        case_id: i64,
        patch: &CasePatch,
    ) -> Result<bool, DatabaseError> {
        if patch.is_empty() {
            // Callers short-circuit empty diffs; hitting this is a bug.
            return Err(DatabaseError::Query(
                "refusing to apply an empty case patch".to_string(),
            ));
        }

        let owned: Vec<Box<dyn ToSql + Sync + Send>> =
            patch.iter().map(|(_, value)| patch_param(value)).collect();
        let assignments: Vec<String> = patch
            .iter()
            .enumerate()
            .map(|(idx, (column, _))| format!("{column} = ${}", idx + 2))
            .collect();
        let sql = format!(
            "UPDATE cases SET {}, updated_at = NOW() WHERE id = $1",
            assignments.join(", ")
        );

        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(owned.len() + 1);
        params.push(&case_id);
        for value in &owned {
            params.push(value.as_ref());
        }

        let conn = self.conn().await?;
        let updated = conn.execute(&sql, &params).await?;
        Ok(updated > 0)
    }

    async fn delete_case(&self, id: i64) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let deleted = conn
            .execute("DELETE FROM cases WHERE id = $1", &[&id])
            .await?;
        Ok(deleted > 0)
    }

    async fn case_status_counts(&self) -> Result<Vec<(CaseStatus, i64)>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT status, COUNT(*) FROM cases GROUP BY status ORDER BY status",
                &[],
            )
            .await?;
        rows.iter()
            .map(|row| {
                let raw: String = row.get(0);
                Ok((parse_case_status(&raw)?, row.get::<_, i64>(1)))
            })
            .collect()
    }
}

// ==================== SubmissionStore ====================

#[async_trait]
impl SubmissionStore for PgBackend {
    async fn list_submissions(
        &self,
        case_id: Option<i64>,
    ) -> Result<Vec<SubmissionListing>, DatabaseError> {
        const BASE: &str = "SELECT ud.id, ud.case_id, c.public_case_id, c.client_name, \
             d.original_name, d.size_bytes, ud.status, ud.comments, ud.created_at \
             FROM user_documents ud \
             JOIN cases c ON c.id = ud.case_id \
             JOIN documents d ON d.id = ud.document_id";

        let conn = self.conn().await?;
        let rows = match case_id {
            Some(case_id) => {
                conn.query(
                    &format!("{BASE} WHERE ud.case_id = $1 ORDER BY ud.created_at DESC"),
                    &[&case_id],
                )
                .await?
            }
            None => {
                conn.query(&format!("{BASE} ORDER BY ud.created_at DESC"), &[])
                    .await?
            }
        };

        rows.iter()
            .map(|row| {
                let status_raw: String = row.get("status");
                Ok(SubmissionListing {
                    id: row.get("id"),
                    case_id: row.get("case_id"),
                    public_case_id: row.get("public_case_id"),
                    client_name: row.get("client_name"),
                    document_name: row
                        .get::<_, Option<String>>("original_name")
                        .unwrap_or_else(|| "Unknown Document".to_string()),
                    file_size_bytes: row.get("size_bytes"),
                    status: parse_document_status(&status_raw)?,
                    comments: row.get("comments"),
                    uploaded_at: row.get("created_at"),
                })
            })
            .collect()
    }

    async fn get_submission(&self, id: i64) -> Result<Option<SubmissionRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {SUBMISSION_COLUMNS} FROM user_documents WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.as_ref().map(row_to_submission_record).transpose()
    }

    async fn review_submission(
        &self,
        id: i64,
        input: &ReviewSubmissionParams,
    ) -> Result<Option<SubmissionRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE user_documents SET \
                       status = $2, comments = $3, reviewer = $4, \
                       reviewed_at = NOW(), updated_at = NOW() \
                     WHERE id = $1 \
                     RETURNING {SUBMISSION_COLUMNS}"
                ),
                &[
                    &id,
                    &input.status.as_str(),
                    &input.comments,
                    &input.reviewer,
                ],
            )
            .await?;
        row.as_ref().map(row_to_submission_record).transpose()
    }

    async fn record_uploaded_file(
        &self,
        input: &CreateFileParams,
    ) -> Result<StoredFileRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO documents \
                     (case_id, storage_key, original_name, mime_type, size_bytes, telegram_file_id) \
                     VALUES ($1, $2, $3, $4, $5, $6) \
                     RETURNING {FILE_COLUMNS}"
                ),
                &[
                    &input.case_id,
                    &input.storage_key,
                    &input.original_name,
                    &input.mime_type,
                    &input.size_bytes,
                    &input.telegram_file_id,
                ],
            )
            .await?;
        Ok(row_to_file_record(&row))
    }

    async fn attach_submission(
        &self,
        case_id: i64,
        document_id: i64,
        is_required: bool,
    ) -> Result<SubmissionRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO user_documents (case_id, document_id, is_required, status) \
                     VALUES ($1, $2, $3, 'pending') \
                     RETURNING {SUBMISSION_COLUMNS}"
                ),
                &[&case_id, &document_id, &is_required],
            )
            .await?;
        row_to_submission_record(&row)
    }

    async fn get_submission_file(
        &self,
        submission_id: i64,
    ) -> Result<Option<StoredFileRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT d.id, d.case_id, d.storage_key, d.original_name, d.mime_type, \
                            d.size_bytes, d.telegram_file_id, d.created_at \
                     FROM documents d \
                     JOIN user_documents ud ON ud.document_id = d.id \
                     WHERE ud.id = $1"
                ),
                &[&submission_id],
            )
            .await?;
        Ok(row.as_ref().map(row_to_file_record))
    }
}

// ==================== QuestionStore ====================

#[async_trait]
impl QuestionStore for PgBackend {
    async fn insert_question(
        &self,
        input: &CreateQuestionParams,
    ) -> Result<QuestionRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO questions (user_id, case_id, telegram_id, text, lang, status) \
                     VALUES ($1, $2, $3, $4, $5, 'new') \
                     RETURNING {QUESTION_COLUMNS}"
                ),
                &[
                    &input.user_id,
                    &input.case_id,
                    &input.telegram_id,
                    &input.text,
                    &input.lang,
                ],
            )
            .await?;
        row_to_question_record(&row)
    }

    async fn list_questions(
        &self,
        status: Option<QuestionStatus>,
    ) -> Result<Vec<QuestionRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = match status {
            Some(status) => {
                conn.query(
                    &format!(
                        "SELECT {QUESTION_COLUMNS} FROM questions WHERE status = $1 \
                         ORDER BY created_at DESC"
                    ),
                    &[&status.as_str()],
                )
                .await?
            }
            None => {
                conn.query(
                    &format!("SELECT {QUESTION_COLUMNS} FROM questions ORDER BY created_at DESC"),
                    &[],
                )
                .await?
            }
        };
        rows.iter().map(row_to_question_record).collect()
    }

    async fn get_question(&self, id: i64) -> Result<Option<QuestionRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.as_ref().map(row_to_question_record).transpose()
    }

    async fn answer_question(
        &self,
        id: i64,
        answer: &str,
        answered_by: &str,
    ) -> Result<Option<QuestionRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE questions SET \
                       answer = $2, answered_by = $3, status = 'answered', answered_at = NOW() \
                     WHERE id = $1 \
                     RETURNING {QUESTION_COLUMNS}"
                ),
                &[&id, &answer, &answered_by],
            )
            .await?;
        row.as_ref().map(row_to_question_record).transpose()
    }

    async fn close_question(&self, id: i64) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let updated = conn
            .execute(
                "UPDATE questions SET status = 'closed' WHERE id = $1",
                &[&id],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn question_status_counts(
        &self,
    ) -> Result<Vec<(QuestionStatus, i64)>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT status, COUNT(*) FROM questions GROUP BY status ORDER BY status",
                &[],
            )
            .await?;
        rows.iter()
            .map(|row| {
                let raw: String = row.get(0);
                Ok((parse_question_status(&raw)?, row.get::<_, i64>(1)))
            })
            .collect()
    }
}

// ==================== FaqStore ====================

#[async_trait]
impl FaqStore for PgBackend {
    async fn list_faq(&self, published_only: bool) -> Result<Vec<FaqRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = if published_only {
            conn.query(
                &format!(
                    "SELECT {FAQ_COLUMNS} FROM faq WHERE is_published ORDER BY created_at DESC"
                ),
                &[],
            )
            .await?
        } else {
            conn.query(
                &format!("SELECT {FAQ_COLUMNS} FROM faq ORDER BY created_at DESC"),
                &[],
            )
            .await?
        };
        Ok(rows.iter().map(row_to_faq_record).collect())
    }

    async fn get_faq(&self, id: i64) -> Result<Option<FaqRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {FAQ_COLUMNS} FROM faq WHERE id = $1"),
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(row_to_faq_record))
    }

    async fn create_faq(&self, input: &CreateFaqParams) -> Result<FaqRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO faq (question, answer, category, language, is_published) \
                     VALUES ($1, $2, $3, $4, $5) \
                     RETURNING {FAQ_COLUMNS}"
                ),
                &[
                    &input.question,
                    &input.answer,
                    &input.category,
                    &input.language,
                    &input.is_published,
                ],
            )
            .await?;
        Ok(row_to_faq_record(&row))
    }

    async fn update_faq(
        &self,
        id: i64,
        input: &UpdateFaqParams,
    ) -> Result<Option<FaqRecord>, DatabaseError> {
        let Some(existing) = self.get_faq(id).await? else {
            return Ok(None);
        };

        let question = input.question.clone().unwrap_or(existing.question);
        let answer = input.answer.clone().unwrap_or(existing.answer);
        let category = input.category.clone().unwrap_or(existing.category);
        let language = input.language.clone().unwrap_or(existing.language);

        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE faq SET \
                       question = $2, answer = $3, category = $4, language = $5, \
                       updated_at = NOW() \
                     WHERE id = $1 \
                     RETURNING {FAQ_COLUMNS}"
                ),
                &[&id, &question, &answer, &category, &language],
            )
            .await?;
        Ok(row.as_ref().map(row_to_faq_record))
    }

    async fn set_faq_published(
        &self,
        id: i64,
        published: bool,
    ) -> Result<Option<FaqRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE faq SET is_published = $2, updated_at = NOW() WHERE id = $1 \
                     RETURNING {FAQ_COLUMNS}"
                ),
                &[&id, &published],
            )
            .await?;
        Ok(row.as_ref().map(row_to_faq_record))
    }

    async fn delete_faq(&self, id: i64) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let deleted = conn.execute("DELETE FROM faq WHERE id = $1", &[&id]).await?;
        Ok(deleted > 0)
    }
}

// ==================== MessageStore ====================

#[async_trait]
impl MessageStore for PgBackend {
    async fn insert_message(
        &self,
        input: &CreateMessageParams,
    ) -> Result<MessageRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO messages \
                     (case_id, sender_id, recipient_id, content, message_type, language, \
                      parent_message_id) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7) \
                     RETURNING {MESSAGE_COLUMNS}"
                ),
                &[
                    &input.case_id,
                    &input.sender_id,
                    &input.recipient_id,
                    &input.content,
                    &input.message_type.as_str(),
                    &input.language,
                    &input.parent_message_id,
                ],
            )
            .await?;
        row_to_message_record(&row)
    }

    async fn list_case_messages(
        &self,
        case_id: i64,
    ) -> Result<Vec<MessageRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE case_id = $1 \
                     ORDER BY created_at ASC"
                ),
                &[&case_id],
            )
            .await?;
        rows.iter().map(row_to_message_record).collect()
    }

    async fn mark_message_read(&self, id: i64) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let updated = conn
            .execute("UPDATE messages SET is_read = TRUE WHERE id = $1", &[&id])
            .await?;
        Ok(updated > 0)
    }
}

// ==================== AuditStore ====================

#[async_trait]
impl AuditStore for PgBackend {
    async fn record_audit_event(
        &self,
        input: &RecordAuditEventParams,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO audit_log (actor, case_id, event, data) VALUES ($1, $2, $3, $4)",
            &[&input.actor, &input.case_id, &input.event, &input.data],
        )
        .await?;
        Ok(())
    }

    async fn list_case_audit_events(
        &self,
        case_id: i64,
        limit: i64,
    ) -> Result<Vec<AuditEventRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT id, actor, case_id, event, data, created_at FROM audit_log \
                 WHERE case_id = $1 ORDER BY created_at DESC LIMIT $2",
                &[&case_id, &limit],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| AuditEventRecord {
                id: row.get("id"),
                actor: row.get("actor"),
                case_id: row.get("case_id"),
                event: row.get("event"),
                data: row.get("data"),
                created_at: row.get::<_, DateTime<Utc>>("created_at"),
            })
            .collect())
    }
}
