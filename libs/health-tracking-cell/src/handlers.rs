use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::Utc;
use headers::{Authorization, authorization::Bearer};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    CreateMedicationRequest, CreateReminderRequest, HealthError, MedicationQuery, MetricQuery,
    RecordMetricRequest, ReminderQuery, SummaryQuery, UpdateMedicationRequest,
    UpdateReminderRequest,
};
use crate::services::{MedicationService, MetricService, ReminderService};

fn map_health_error(e: HealthError) -> AppError {
    match e {
        HealthError::MedicationNotFound
        | HealthError::MetricNotFound
        | HealthError::ReminderNotFound => AppError::NotFound(e.to_string()),
        HealthError::AlreadyDiscontinued => AppError::Conflict(e.to_string()),
        HealthError::ValidationError(msg) => AppError::ValidationError(msg),
        HealthError::DatabaseError(msg) => AppError::Database(msg),
    }
}

/// Doctors and admins may read any patient's records.
fn require_read(user: &User, patient_id: Uuid) -> Result<(), AppError> {
    if user.is_self_or_admin(&patient_id.to_string()) || user.is_doctor() {
        return Ok(());
    }
    Err(AppError::Forbidden("Not authorized to view these health records".to_string()))
}

/// Only the patient (or an admin) changes their records.
fn require_manage(user: &User, patient_id: Uuid) -> Result<(), AppError> {
    if user.is_self_or_admin(&patient_id.to_string()) {
        return Ok(());
    }
    Err(AppError::Forbidden("Not authorized to change these health records".to_string()))
}

// ==============================================================================
// MEDICATIONS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_medications(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
    Query(query): Query<MedicationQuery>,
) -> Result<Json<Value>, AppError> {
    require_read(&user, patient_id)?;
    let service = MedicationService::new(&state);

    let medications = service.list_medications(patient_id, query.active_only.unwrap_or(false), auth.token())
        .await
        .map_err(map_health_error)?;

    Ok(Json(json!({
        "medications": medications,
        "total": medications.len()
    })))
}

#[axum::debug_handler]
pub async fn create_medication(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
    Json(request): Json<CreateMedicationRequest>,
) -> Result<Json<Value>, AppError> {
    require_manage(&user, patient_id)?;
    let service = MedicationService::new(&state);

    let medication = service.create_medication(patient_id, request, auth.token())
        .await
        .map_err(map_health_error)?;

    Ok(Json(json!(medication)))
}

#[axum::debug_handler]
pub async fn update_medication(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path((patient_id, medication_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateMedicationRequest>,
) -> Result<Json<Value>, AppError> {
    require_manage(&user, patient_id)?;
    let service = MedicationService::new(&state);

    let medication = service.update_medication(patient_id, medication_id, request, auth.token())
        .await
        .map_err(map_health_error)?;

    Ok(Json(json!(medication)))
}

#[axum::debug_handler]
pub async fn discontinue_medication(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path((patient_id, medication_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, AppError> {
    require_manage(&user, patient_id)?;
    let service = MedicationService::new(&state);

    let medication = service
        .discontinue_medication(patient_id, medication_id, Utc::now().date_naive(), auth.token())
        .await
        .map_err(map_health_error)?;

    Ok(Json(json!(medication)))
}

#[axum::debug_handler]
pub async fn delete_medication(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path((patient_id, medication_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, AppError> {
    require_manage(&user, patient_id)?;
    let service = MedicationService::new(&state);

    service.delete_medication(patient_id, medication_id, auth.token())
        .await
        .map_err(map_health_error)?;

    Ok(Json(json!({ "success": true })))
}

// ==============================================================================
// METRICS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_metrics(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
    Query(query): Query<MetricQuery>,
) -> Result<Json<Value>, AppError> {
    require_read(&user, patient_id)?;
    let service = MetricService::new(&state);

    let metrics = service.list_metrics(patient_id, query, auth.token())
        .await
        .map_err(map_health_error)?;

    Ok(Json(json!({
        "metrics": metrics,
        "total": metrics.len()
    })))
}

#[axum::debug_handler]
pub async fn record_metric(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
    Json(request): Json<RecordMetricRequest>,
) -> Result<Json<Value>, AppError> {
    require_manage(&user, patient_id)?;
    let service = MetricService::new(&state);

    let metric = service.record_metric(patient_id, request, auth.token())
        .await
        .map_err(map_health_error)?;

    Ok(Json(json!(metric)))
}

#[axum::debug_handler]
pub async fn summarize_metrics(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<Value>, AppError> {
    require_read(&user, patient_id)?;
    let service = MetricService::new(&state);

    let summary = service.summarize_metrics(patient_id, query, Utc::now(), auth.token())
        .await
        .map_err(map_health_error)?;

    Ok(Json(json!({ "summary": summary })))
}

// ==============================================================================
// REMINDERS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_reminders(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
    Query(query): Query<ReminderQuery>,
) -> Result<Json<Value>, AppError> {
    require_read(&user, patient_id)?;
    let service = ReminderService::new(&state);

    let reminders = service.list_reminders(patient_id, query.active_only.unwrap_or(false), auth.token())
        .await
        .map_err(map_health_error)?;

    Ok(Json(json!({
        "reminders": reminders,
        "total": reminders.len()
    })))
}

#[axum::debug_handler]
pub async fn create_reminder(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
    Json(request): Json<CreateReminderRequest>,
) -> Result<Json<Value>, AppError> {
    require_manage(&user, patient_id)?;
    let service = ReminderService::new(&state);

    let reminder = service.create_reminder(patient_id, request, auth.token())
        .await
        .map_err(map_health_error)?;

    Ok(Json(json!(reminder)))
}

#[axum::debug_handler]
pub async fn update_reminder(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path((patient_id, reminder_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateReminderRequest>,
) -> Result<Json<Value>, AppError> {
    require_manage(&user, patient_id)?;
    let service = ReminderService::new(&state);

    let reminder = service.update_reminder(patient_id, reminder_id, request, auth.token())
        .await
        .map_err(map_health_error)?;

    Ok(Json(json!(reminder)))
}

#[axum::debug_handler]
pub async fn delete_reminder(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path((patient_id, reminder_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, AppError> {
    require_manage(&user, patient_id)?;
    let service = ReminderService::new(&state);

    service.delete_reminder(patient_id, reminder_id, auth.token())
        .await
        .map_err(map_health_error)?;

    Ok(Json(json!({ "success": true })))
}
