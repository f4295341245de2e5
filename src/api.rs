use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use time::{Date, Duration, OffsetDateTime};

use recurd_core::models::{
    Account, Frequency, NewTemplate, RecurringTemplate, TemplateData, TemplateId, TemplateUpdate,
    TransactionType,
};
use recurd_core::schedule;
use recurd_core::{StorageBackend, StorageError};

use crate::audit::AuditLog;
use crate::auth::{auth_middleware, CallerIdentity};
use crate::config::AuthConfig;
use crate::scheduler::{RunSummary, Scheduler, TemplateFailure};

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn StorageBackend>,
    pub scheduler: Arc<Scheduler>,
    pub audit: Arc<dyn AuditLog>,
}

pub fn router(state: AppState, auth: Arc<AuthConfig>) -> Router {
    Router::new()
        .route("/process", post(process_due))
        .route("/templates", get(list_templates).post(create_template))
        .route(
            "/templates/:id",
            get(get_template).put(update_template).delete(delete_template),
        )
        .route("/accounts", get(list_accounts).post(create_account))
        .layer(middleware::from_fn(auth_middleware))
        .layer(Extension(auth))
        .route("/health", get(health))
        .with_state(state)
}

pub enum ApiError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (
            status,
            Json(ErrorBody {
                success: false,
                error,
            }),
        )
            .into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::TemplateNotFound(id) => {
                ApiError::NotFound(format!("template not found: {id}"))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

fn require_writer(caller: &CallerIdentity) -> Result<(), ApiError> {
    if caller.role.can_write() {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!(
            "caller {} lacks write access",
            caller.name
        )))
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Deserialize, Default)]
struct ProcessRequest {
    as_of: Option<Date>,
}

#[derive(Serialize)]
struct ProcessResponse {
    success: bool,
    message: String,
    processed: usize,
    skipped: usize,
    errors: Vec<TemplateFailure>,
}

/// Fires everything due. Per-template failures are reported in the body with
/// a 200; only a failed due-selection is a server error.
async fn process_due(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    body: Option<Json<ProcessRequest>>,
) -> Result<Json<ProcessResponse>, ApiError> {
    require_writer(&caller)?;
    let as_of = body
        .map(|Json(req)| req.as_of)
        .unwrap_or_default()
        .unwrap_or_else(today);
    let RunSummary {
        processed,
        skipped,
        errors,
    } = state.scheduler.process_due(as_of, &caller.name)?;

    Ok(Json(ProcessResponse {
        success: true,
        message: format!(
            "Processed {} recurring transactions, {} errors",
            processed,
            errors.len()
        ),
        processed,
        skipped,
        errors,
    }))
}

#[derive(Deserialize)]
struct CreateTemplateRequest {
    transaction_type: String,
    name: String,
    description: Option<String>,
    frequency: String,
    #[serde(default = "default_frequency_value")]
    frequency_value: u32,
    start_date: Date,
    end_date: Option<Date>,
    #[serde(default = "default_true")]
    is_active: bool,
    template_data: serde_json::Value,
}

fn default_frequency_value() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Serialize)]
struct TemplateResponse {
    id: TemplateId,
    name: String,
    description: Option<String>,
    transaction_type: TransactionType,
    frequency: Frequency,
    frequency_value: u32,
    start_date: Date,
    end_date: Option<Date>,
    next_run_date: Date,
    last_run_date: Option<Date>,
    is_active: bool,
    status_text: String,
    template_data: serde_json::Value,
    created_by: Option<String>,
}

impl TemplateResponse {
    fn from_template(template: RecurringTemplate, as_of: Date) -> Result<Self, ApiError> {
        let template_data = template
            .data
            .inner_value()
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(TemplateResponse {
            id: template.id,
            name: template.name,
            description: template.description,
            transaction_type: template.data.transaction_type(),
            frequency: template.frequency,
            frequency_value: template.frequency_value,
            start_date: template.start_date,
            end_date: template.end_date,
            next_run_date: template.next_run_date,
            last_run_date: template.last_run_date,
            is_active: template.is_active,
            status_text: status_text(template.is_active, template.next_run_date, as_of),
            template_data,
            created_by: template.created_by,
        })
    }
}

fn status_text(is_active: bool, next_run: Date, as_of: Date) -> String {
    if !is_active {
        "Inactive"
    } else if next_run < as_of {
        "Overdue"
    } else if next_run == as_of {
        "Due Today"
    } else if next_run <= as_of.saturating_add(Duration::days(7)) {
        "Due Soon"
    } else {
        "Scheduled"
    }
    .to_string()
}

async fn list_templates(
    State(state): State<AppState>,
) -> Result<Json<Vec<TemplateResponse>>, ApiError> {
    let as_of = today();
    state
        .storage
        .list_templates()?
        .into_iter()
        .map(|t| TemplateResponse::from_template(t, as_of))
        .collect::<Result<Vec<_>, _>>()
        .map(Json)
}

async fn create_template(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(req): Json<CreateTemplateRequest>,
) -> Result<(StatusCode, Json<TemplateResponse>), ApiError> {
    require_writer(&caller)?;
    let kind = req
        .transaction_type
        .parse::<TransactionType>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let frequency = req
        .frequency
        .parse::<Frequency>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if req.frequency_value == 0 {
        return Err(ApiError::BadRequest(
            "frequency_value must be positive".to_string(),
        ));
    }
    let data = TemplateData::from_value(kind, req.template_data)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let as_of = today();
    let next_run_date =
        schedule::next_run_date(req.start_date, frequency, req.frequency_value, as_of)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let id = state.storage.insert_template(&NewTemplate {
        name: req.name,
        description: req.description,
        frequency,
        frequency_value: req.frequency_value,
        start_date: req.start_date,
        end_date: req.end_date,
        next_run_date,
        is_active: req.is_active,
        data,
        created_by: Some(caller.name.clone()),
    })?;
    state.audit.record(&caller.name, "create", "template", &id.to_string());

    let template = state
        .storage
        .get_template(id)?
        .ok_or_else(|| ApiError::Internal("template vanished after insert".to_string()))?;
    Ok((
        StatusCode::CREATED,
        Json(TemplateResponse::from_template(template, as_of)?),
    ))
}

async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<TemplateId>,
) -> Result<Json<TemplateResponse>, ApiError> {
    let template = state
        .storage
        .get_template(id)?
        .ok_or_else(|| ApiError::NotFound(format!("template not found: {id}")))?;
    Ok(Json(TemplateResponse::from_template(template, today())?))
}

#[derive(Deserialize)]
struct UpdateTemplateRequest {
    name: Option<String>,
    description: Option<String>,
    frequency: Option<String>,
    frequency_value: Option<u32>,
    end_date: Option<Date>,
    is_active: Option<bool>,
    transaction_type: Option<String>,
    template_data: Option<serde_json::Value>,
}

async fn update_template(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<TemplateId>,
    Json(req): Json<UpdateTemplateRequest>,
) -> Result<Json<TemplateResponse>, ApiError> {
    require_writer(&caller)?;
    let existing = state
        .storage
        .get_template(id)?
        .ok_or_else(|| ApiError::NotFound(format!("template not found: {id}")))?;

    let frequency = req
        .frequency
        .as_deref()
        .map(|s| s.parse::<Frequency>())
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if req.frequency_value == Some(0) {
        return Err(ApiError::BadRequest(
            "frequency_value must be positive".to_string(),
        ));
    }

    let data = match req.template_data {
        Some(value) => {
            let kind = match req.transaction_type.as_deref() {
                Some(s) => s
                    .parse::<TransactionType>()
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?,
                None => existing.data.transaction_type(),
            };
            Some(
                TemplateData::from_value(kind, value)
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?,
            )
        }
        None => None,
    };

    // A cadence change reschedules from the original start date.
    let as_of = today();
    let next_run_date = if frequency.is_some() || req.frequency_value.is_some() {
        let new_frequency = frequency.unwrap_or(existing.frequency);
        let new_value = req.frequency_value.unwrap_or(existing.frequency_value);
        Some(
            schedule::next_run_date(existing.start_date, new_frequency, new_value, as_of)
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        )
    } else {
        None
    };

    let patch = TemplateUpdate {
        name: req.name,
        description: req.description,
        frequency,
        frequency_value: req.frequency_value,
        end_date: req.end_date,
        is_active: req.is_active,
        data,
        next_run_date,
    };
    if !state.storage.update_template(id, &patch)? {
        return Err(ApiError::NotFound(format!("template not found: {id}")));
    }
    state.audit.record(&caller.name, "update", "template", &id.to_string());

    let template = state
        .storage
        .get_template(id)?
        .ok_or_else(|| ApiError::Internal("template vanished after update".to_string()))?;
    Ok(Json(TemplateResponse::from_template(template, as_of)?))
}

async fn delete_template(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<TemplateId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_writer(&caller)?;
    if !state.storage.delete_template(id)? {
        return Err(ApiError::NotFound(format!("template not found: {id}")));
    }
    state.audit.record(&caller.name, "delete", "template", &id.to_string());
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn list_accounts(State(state): State<AppState>) -> Result<Json<Vec<Account>>, ApiError> {
    Ok(Json(state.storage.list_accounts()?))
}

async fn create_account(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(account): Json<Account>,
) -> Result<(StatusCode, Json<Account>), ApiError> {
    require_writer(&caller)?;
    state.storage.create_account(&account)?;
    state.audit.record(&caller.name, "create", "account", &account.id);
    Ok((StatusCode::CREATED, Json(account)))
}
