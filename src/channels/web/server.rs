//! Axum HTTP server for the web gateway.
//!
//! Handles all API routes: cases and their edit sessions, document
//! submissions, client questions, FAQ, notifications, file downloads with
//! the signed-URL fallback, and the Telegram webhook.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post, put},
};
use futures::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::channels::telegram::{self, IngestOutcome, TelegramBot, TelegramUpdate};
use crate::channels::web::auth::{AuthState, auth_middleware};
use crate::channels::web::types::*;
use crate::config::{ServerConfig, TelegramConfig};
use crate::db::{
    AuditStore, CaseRecord, CaseStore, Database, FaqStore, MessageStore, QuestionStore,
    SubmissionStore, UserStore,
};
use crate::edit::{CaseField, EditSessions, SaveOutcome};
use crate::error::{ChannelError, EditError, StorageError};
use crate::notify::{ChangeFeed, NotificationCenter};
use crate::practice::{self, CaseDirectory, NewCaseInput, ReviewDecision};
use crate::storage::BlobStore;

const WEBHOOK_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Shared state for all gateway handlers.
pub struct GatewayState {
    pub db: Arc<dyn Database>,
    pub sessions: Arc<EditSessions>,
    pub directory: Arc<CaseDirectory>,
    pub feed: ChangeFeed,
    pub notifications: Arc<NotificationCenter>,
    pub storage: Arc<BlobStore>,
    pub bot: Option<TelegramBot>,
    pub telegram: TelegramConfig,
}

type HandlerError = (StatusCode, String);

/// Start the gateway HTTP server.
///
/// Returns the actual bound `SocketAddr` (useful when binding to port 0).
pub async fn start_server(
    config: &ServerConfig,
    state: Arc<GatewayState>,
) -> Result<SocketAddr, ChannelError> {
    let listener = tokio::net::TcpListener::bind(config.bind).await.map_err(|e| {
        ChannelError::StartupFailed {
            name: "gateway".to_string(),
            reason: format!("Failed to bind to {}: {}", config.bind, e),
        }
    })?;
    let bound_addr = listener
        .local_addr()
        .map_err(|e| ChannelError::StartupFailed {
            name: "gateway".to_string(),
            reason: format!("Failed to get local addr: {}", e),
        })?;

    // Public routes: health, the webhook (guarded by its own secret), and
    // signed-URL redemption (the token is the credential).
    let public = Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/telegram/webhook", post(telegram_webhook_handler))
        .route("/api/files/signed", get(signed_download_handler));

    // Protected routes (require the bearer token).
    let auth_state = AuthState {
        token: config.auth_token.clone(),
    };
    let protected = Router::new()
        // Dashboard
        .route("/api/stats", get(stats_handler))
        // Clients
        .route("/api/clients", get(clients_list_handler))
        // Cases
        .route("/api/cases", get(cases_list_handler).post(case_create_handler))
        .route("/api/cases/{id}", get(case_get_handler).delete(case_delete_handler))
        .route("/api/cases/{id}/audit", get(case_audit_handler))
        .route("/api/cases/{id}/messages", get(case_messages_handler))
        // Edit sessions
        .route(
            "/api/cases/{id}/edit",
            post(edit_begin_handler).get(edit_working_handler),
        )
        .route("/api/cases/{id}/edit/field", put(edit_set_field_handler))
        .route("/api/cases/{id}/edit/save", post(edit_save_handler))
        .route("/api/cases/{id}/edit/cancel", post(edit_cancel_handler))
        // Submissions
        .route("/api/submissions", get(submissions_list_handler))
        .route("/api/submissions/{id}/review", post(submission_review_handler))
        .route("/api/submissions/{id}/download", get(submission_download_handler))
        .route("/api/submissions/{id}/signed-url", get(submission_signed_url_handler))
        // Questions
        .route("/api/questions", get(questions_list_handler))
        .route("/api/questions/{id}", get(question_get_handler))
        .route("/api/questions/{id}/answer", post(question_answer_handler))
        .route("/api/questions/{id}/close", post(question_close_handler))
        // FAQ
        .route("/api/faq", get(faq_list_handler).post(faq_create_handler))
        .route("/api/faq/{id}", put(faq_update_handler).delete(faq_delete_handler))
        .route("/api/faq/{id}/publish", post(faq_publish_handler))
        // Notifications
        .route("/api/notifications", get(notifications_list_handler).delete(notifications_clear_handler))
        .route("/api/notifications/stream", get(notifications_stream_handler))
        .route("/api/notifications/read-all", post(notifications_read_all_handler))
        .route("/api/notifications/{id}/read", post(notification_read_handler))
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    let app = Router::new()
        .merge(public)
        .merge(protected)
        .layer(cors_layer(&config.cors_origin))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(error = %err, "gateway server exited");
        }
    });

    tracing::info!(addr = %bound_addr, "gateway listening");
    Ok(bound_addr)
}

fn cors_layer(origin: &str) -> CorsLayer {
    if origin == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origin = HeaderValue::from_str(origin)
            .unwrap_or_else(|_| HeaderValue::from_static("http://localhost:5173"));
        CorsLayer::new()
            .allow_origin(AllowOrigin::exact(origin))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

fn internal(err: impl std::fmt::Display) -> HandlerError {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn bad_request(message: impl Into<String>) -> HandlerError {
    (StatusCode::BAD_REQUEST, message.into())
}

fn not_found(message: impl Into<String>) -> HandlerError {
    (StatusCode::NOT_FOUND, message.into())
}

fn edit_error(err: EditError) -> HandlerError {
    let status = match &err {
        EditError::AlreadyEditing { .. } | EditError::SaveInFlight { .. } => StatusCode::CONFLICT,
        EditError::NoActiveSession { .. } => StatusCode::NOT_FOUND,
        EditError::UnknownField { .. } | EditError::InvalidValue { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        EditError::WriteFailed { .. } => StatusCode::BAD_GATEWAY,
        EditError::CaseGone { .. } => StatusCode::GONE,
    };
    (status, err.to_string())
}

fn actor_name(raw: Option<String>) -> String {
    raw.map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| "staff".to_string())
}

// ==================== Health ====================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ==================== Dashboard ====================

async fn stats_handler(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<DashboardStatsResponse>, HandlerError> {
    let stats = practice::dashboard_stats(state.db.as_ref())
        .await
        .map_err(internal)?;
    Ok(Json(stats.into()))
}

// ==================== Clients ====================

async fn clients_list_handler(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<serde_json::Value>, HandlerError> {
    let users = state.db.list_users().await.map_err(internal)?;
    let clients: Vec<serde_json::Value> = users
        .iter()
        .map(|user| {
            serde_json::json!({
                "id": user.id,
                "name": user.display_name(),
                "username": user.username,
                "telegram_id": user.telegram_id,
                "preferred_lang": user.preferred_lang,
                "is_active": user.is_active,
                "created_at": user.created_at,
            })
        })
        .collect();
    Ok(Json(serde_json::json!({ "clients": clients })))
}

// ==================== Cases ====================

async fn cases_list_handler(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<Vec<CaseInfo>>, HandlerError> {
    // The directory is the dashboard's view of the list; populate it on
    // first use, after which the background loop keeps it fresh.
    if state.directory.is_empty() {
        state
            .directory
            .refresh(state.db.as_ref(), &state.sessions)
            .await
            .map_err(internal)?;
    }
    let cases = state
        .directory
        .list()
        .iter()
        .map(|record| CaseInfo::from_record(record, state.sessions.is_active(record.id)))
        .collect();
    Ok(Json(cases))
}

async fn case_get_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<i64>,
) -> Result<Json<CaseInfo>, HandlerError> {
    let record = fetch_case(&state, id).await?;
    Ok(Json(CaseInfo::from_record(
        &record,
        state.sessions.is_active(id),
    )))
}

async fn case_create_handler(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<CreateCaseRequest>,
) -> Result<(StatusCode, Json<CaseInfo>), HandlerError> {
    let actor = actor_name(request.actor);
    let record = practice::open_case(
        state.db.as_ref(),
        &state.feed,
        &state.directory,
        &actor,
        NewCaseInput {
            client_name: request.client_name,
            case_type: request.case_type,
            user_id: request.user_id,
        },
    )
    .await
    .map_err(bad_request)?;
    Ok((
        StatusCode::CREATED,
        Json(CaseInfo::from_record(&record, false)),
    ))
}

async fn case_delete_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<i64>,
    Query(query): Query<ActorRequest>,
) -> Result<StatusCode, HandlerError> {
    practice::delete_case(
        state.db.as_ref(),
        &state.sessions,
        &state.feed,
        &state.directory,
        &actor_name(query.actor),
        id,
    )
    .await
    .map_err(|message| {
        if message.contains("not found") {
            not_found(message)
        } else {
            (StatusCode::CONFLICT, message)
        }
    })?;
    Ok(StatusCode::NO_CONTENT)
}

async fn case_audit_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, HandlerError> {
    let events = state
        .db
        .list_case_audit_events(id, 100)
        .await
        .map_err(internal)?;
    Ok(Json(serde_json::json!({ "events": events })))
}

async fn case_messages_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, HandlerError> {
    let messages = state.db.list_case_messages(id).await.map_err(internal)?;
    Ok(Json(serde_json::json!({ "messages": messages })))
}

async fn fetch_case(state: &GatewayState, id: i64) -> Result<CaseRecord, HandlerError> {
    state
        .db
        .get_case(id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("case {id} not found")))
}

// ==================== Edit sessions ====================

async fn edit_begin_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<i64>,
) -> Result<Json<DraftResponse>, HandlerError> {
    // Baseline comes from a fresh fetch, never from the cached list.
    let record = fetch_case(&state, id).await?;
    let draft = state.sessions.begin(&record).map_err(edit_error)?;
    Ok(Json(DraftResponse { case_id: id, draft }))
}

async fn edit_working_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<i64>,
) -> Result<Json<DraftResponse>, HandlerError> {
    let draft = state.sessions.working(id).map_err(edit_error)?;
    Ok(Json(DraftResponse { case_id: id, draft }))
}

async fn edit_set_field_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<i64>,
    Json(request): Json<SetFieldRequest>,
) -> Result<Json<DraftResponse>, HandlerError> {
    let field = CaseField::from_name(&request.field).ok_or_else(|| {
        edit_error(EditError::UnknownField {
            field: request.field.clone(),
        })
    })?;
    let draft = state
        .sessions
        .set_field(id, field, request.value)
        .map_err(edit_error)?;
    Ok(Json(DraftResponse { case_id: id, draft }))
}

async fn edit_save_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<i64>,
    Query(query): Query<ActorRequest>,
) -> Result<Json<SaveResponse>, HandlerError> {
    let actor = actor_name(query.actor);
    let outcome = practice::save_case_edit(
        state.db.as_ref(),
        &state.sessions,
        &state.feed,
        &state.directory,
        &actor,
        id,
    )
    .await
    .map_err(edit_error)?;

    let response = match outcome {
        SaveOutcome::NoChanges => SaveResponse {
            outcome: "no_changes",
            fields_changed: 0,
            message: "No changes to save".to_string(),
            case: None,
            warning: None,
        },
        SaveOutcome::Updated { fields, record } => SaveResponse {
            outcome: "updated",
            fields_changed: fields,
            message: if fields == 1 {
                "1 field updated".to_string()
            } else {
                format!("{fields} fields updated")
            },
            case: Some(CaseInfo::from_record(&record, false)),
            warning: None,
        },
        SaveOutcome::SavedButStale { fields, reason } => SaveResponse {
            outcome: "saved_but_stale",
            fields_changed: fields,
            message: if fields == 1 {
                "1 field updated".to_string()
            } else {
                format!("{fields} fields updated")
            },
            case: None,
            warning: Some(format!("Saved, but the refresh failed: {reason}")),
        },
    };
    Ok(Json(response))
}

async fn edit_cancel_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<i64>,
) -> Result<Json<DraftResponse>, HandlerError> {
    let draft = state.sessions.cancel(id).map_err(edit_error)?;
    Ok(Json(DraftResponse { case_id: id, draft }))
}

// ==================== Submissions ====================

async fn submissions_list_handler(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<SubmissionsQuery>,
) -> Result<Json<serde_json::Value>, HandlerError> {
    let submissions = state
        .db
        .list_submissions(query.case_id)
        .await
        .map_err(internal)?;
    Ok(Json(serde_json::json!({ "submissions": submissions })))
}

async fn submission_review_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<i64>,
    Json(request): Json<ReviewRequest>,
) -> Result<Json<serde_json::Value>, HandlerError> {
    let decision = match request.decision.as_str() {
        "approve" => ReviewDecision::Approve,
        "reject" => ReviewDecision::Reject {
            reason: request.reason.unwrap_or_default(),
        },
        other => return Err(bad_request(format!("unknown decision '{other}'"))),
    };
    let reviewer = actor_name(request.reviewer);
    let updated = practice::review_submission(state.db.as_ref(), &state.feed, &reviewer, id, decision)
        .await
        .map_err(bad_request)?;
    Ok(Json(serde_json::json!({ "submission": updated })))
}

async fn submission_download_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<i64>,
) -> Result<Response, HandlerError> {
    let file = state
        .db
        .get_submission_file(id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("submission has no stored file"))?;

    match state.storage.fetch(&file.storage_key).await {
        Ok(blob) => {
            let mime = file.mime_type.clone().unwrap_or(blob.mime);
            let filename = file
                .original_name
                .clone()
                .unwrap_or_else(|| "document".to_string());
            Ok(file_response(blob.bytes, &mime, &filename))
        }
        Err(StorageError::NotFound { key }) => {
            Err(not_found(format!("file '{key}' missing from storage")))
        }
        Err(err) => {
            // Direct read failed; the dashboard retries via the
            // signed-URL endpoint.
            tracing::warn!(submission_id = id, error = %err, "direct download failed");
            Err((
                StatusCode::BAD_GATEWAY,
                "download failed; request a signed URL".to_string(),
            ))
        }
    }
}

async fn submission_signed_url_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<i64>,
) -> Result<Json<SignedUrlResponse>, HandlerError> {
    let file = state
        .db
        .get_submission_file(id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("submission has no stored file"))?;
    let token = state
        .storage
        .issue_token(&file.storage_key)
        .map_err(internal)?;
    Ok(Json(SignedUrlResponse {
        url: format!("/api/files/signed?token={token}"),
        expires_in_secs: 3600,
    }))
}

#[derive(Debug, serde::Deserialize)]
struct SignedQuery {
    token: String,
}

async fn signed_download_handler(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<SignedQuery>,
) -> Result<Response, HandlerError> {
    let storage_key = match state.storage.redeem_token(&query.token) {
        Ok(key) => key,
        Err(StorageError::TokenExpired) => {
            return Err((StatusCode::GONE, "signed URL expired".to_string()));
        }
        Err(err) => return Err((StatusCode::FORBIDDEN, err.to_string())),
    };
    let blob = state.storage.fetch(&storage_key).await.map_err(|err| match err {
        StorageError::NotFound { key } => not_found(format!("file '{key}' missing from storage")),
        other => internal(other),
    })?;
    let filename = storage_key.rsplit('/').next().unwrap_or("document").to_string();
    let mime = blob.mime.clone();
    Ok(file_response(blob.bytes, &mime, &filename))
}

fn file_response(bytes: Vec<u8>, mime: &str, filename: &str) -> Response {
    let mut response = bytes.into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename.replace('"', "")))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

// ==================== Questions ====================

async fn questions_list_handler(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<QuestionsQuery>,
) -> Result<Json<Vec<QuestionInfo>>, HandlerError> {
    let questions = state
        .db
        .list_questions(query.status)
        .await
        .map_err(internal)?;
    let users = state.db.list_users().await.map_err(internal)?;
    let names: std::collections::HashMap<i64, String> = users
        .iter()
        .map(|user| (user.id, user.display_name()))
        .collect();

    Ok(Json(
        questions
            .iter()
            .map(|question| {
                let client_name = question
                    .user_id
                    .and_then(|user_id| names.get(&user_id).cloned())
                    .unwrap_or_else(|| "Unknown Client".to_string());
                QuestionInfo::from_record(question, client_name)
            })
            .collect(),
    ))
}

async fn question_get_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<i64>,
) -> Result<Json<QuestionInfo>, HandlerError> {
    let question = state
        .db
        .get_question(id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("question {id} not found")))?;
    let client_name = client_name_for(&state, question.user_id).await?;
    Ok(Json(QuestionInfo::from_record(&question, client_name)))
}

async fn client_name_for(
    state: &GatewayState,
    user_id: Option<i64>,
) -> Result<String, HandlerError> {
    let Some(user_id) = user_id else {
        return Ok("Unknown Client".to_string());
    };
    Ok(state
        .db
        .get_user(user_id)
        .await
        .map_err(internal)?
        .map(|user| user.display_name())
        .unwrap_or_else(|| "Unknown Client".to_string()))
}

async fn question_answer_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<i64>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<QuestionInfo>, HandlerError> {
    let lawyer = actor_name(request.lawyer);
    let updated = practice::answer_question(
        state.db.as_ref(),
        state.bot.as_ref(),
        &state.feed,
        &lawyer,
        id,
        &request.answer,
    )
    .await
    .map_err(bad_request)?;
    let client_name = client_name_for(&state, updated.user_id).await?;
    Ok(Json(QuestionInfo::from_record(&updated, client_name)))
}

async fn question_close_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, HandlerError> {
    let closed = state.db.close_question(id).await.map_err(internal)?;
    if !closed {
        return Err(not_found(format!("question {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ==================== FAQ ====================

async fn faq_list_handler(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<FaqQuery>,
) -> Result<Json<serde_json::Value>, HandlerError> {
    let entries = state.db.list_faq(query.published).await.map_err(internal)?;
    Ok(Json(serde_json::json!({ "faq": entries })))
}

async fn faq_create_handler(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<FaqCreateRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), HandlerError> {
    let actor = actor_name(request.actor);
    let record = practice::create_faq_entry(
        state.db.as_ref(),
        &actor,
        &request.question,
        &request.answer,
        request.category,
        request.language,
    )
    .await
    .map_err(bad_request)?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "faq": record }))))
}

async fn faq_update_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<i64>,
    Json(request): Json<FaqUpdateRequest>,
) -> Result<Json<serde_json::Value>, HandlerError> {
    let params = crate::db::UpdateFaqParams {
        question: request.question,
        answer: request.answer,
        category: request.category,
        language: request.language,
    };
    let updated = state
        .db
        .update_faq(id, &params)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("faq entry {id} not found")))?;
    Ok(Json(serde_json::json!({ "faq": updated })))
}

async fn faq_publish_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<i64>,
    Json(request): Json<FaqPublishRequest>,
) -> Result<Json<serde_json::Value>, HandlerError> {
    let updated = state
        .db
        .set_faq_published(id, request.published)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("faq entry {id} not found")))?;
    Ok(Json(serde_json::json!({ "faq": updated })))
}

async fn faq_delete_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, HandlerError> {
    let deleted = state.db.delete_faq(id).await.map_err(internal)?;
    if !deleted {
        return Err(not_found(format!("faq entry {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ==================== Notifications ====================

async fn notifications_list_handler(
    State(state): State<Arc<GatewayState>>,
) -> Json<NotificationsResponse> {
    let notifications = state.notifications.list();
    Json(NotificationsResponse {
        unread_count: notifications.iter().filter(|n| !n.read).count(),
        notifications: notifications.into_iter().map(Into::into).collect(),
    })
}

async fn notification_read_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, HandlerError> {
    if !state.notifications.mark_as_read(id) {
        return Err(not_found(format!("notification {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn notifications_read_all_handler(
    State(state): State<Arc<GatewayState>>,
) -> StatusCode {
    state.notifications.mark_all_read();
    StatusCode::NO_CONTENT
}

async fn notifications_clear_handler(State(state): State<Arc<GatewayState>>) -> StatusCode {
    state.notifications.clear();
    StatusCode::NO_CONTENT
}

async fn notifications_stream_handler(
    State(state): State<Arc<GatewayState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.feed.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => Event::default()
            .event("store")
            .json_data(&event)
            .ok()
            .map(Ok),
        // Lagged receivers just miss events; the next poll resyncs.
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ==================== Telegram webhook ====================

async fn telegram_webhook_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(update): Json<TelegramUpdate>,
) -> Result<Json<WebhookResponse>, HandlerError> {
    let provided = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    if !telegram::webhook_secret_matches(state.telegram.webhook_secret.as_ref(), provided) {
        return Err((StatusCode::UNAUTHORIZED, "bad webhook secret".to_string()));
    }

    let outcome = telegram::ingest_update(state.db.as_ref(), &state.feed, update)
        .await
        .map_err(internal)?;
    Ok(Json(WebhookResponse {
        status: match outcome {
            IngestOutcome::Stored { .. } => "ok",
            IngestOutcome::Ignored => "ignored",
        },
    }))
}
