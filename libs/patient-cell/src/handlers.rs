use std::sync::Arc;
use axum::{
    extract::{Path, Query, State, Extension},
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{CreatePatientRequest, UpdatePatientRequest, PatientSearchQuery, PatientError};
use crate::services::PatientService;

fn map_patient_error(e: PatientError) -> AppError {
    match e {
        PatientError::NotFound => AppError::NotFound("Patient not found".to_string()),
        PatientError::EmailAlreadyExists { .. } => AppError::Conflict(e.to_string()),
        PatientError::InvalidDateOfBirth => AppError::ValidationError(e.to_string()),
        PatientError::ValidationError(msg) => AppError::ValidationError(msg),
        PatientError::DatabaseError(msg) => AppError::Database(msg),
    }
}

fn user_uuid(user: &User) -> Result<Uuid, AppError> {
    Uuid::parse_str(&user.id)
        .map_err(|_| AppError::Auth("Token subject is not a valid user id".to_string()))
}

/// Patients see their own record; doctors and admins see any.
fn can_read(user: &User, patient_id: Uuid) -> bool {
    user.is_self_or_admin(&patient_id.to_string()) || user.is_doctor()
}

#[axum::debug_handler]
pub async fn create_patient(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreatePatientRequest>,
) -> Result<Json<Value>, AppError> {
    let patient_id = if user.is_admin() {
        request.user_id
            .ok_or_else(|| AppError::ValidationError("user_id is required".to_string()))?
    } else if user.is_patient() {
        let own_id = user_uuid(&user)?;
        if request.user_id.is_some_and(|id| id != own_id) {
            return Err(AppError::Forbidden("Patients can only create their own profile".to_string()));
        }
        own_id
    } else {
        return Err(AppError::Forbidden("Only patients or administrators can create patient profiles".to_string()));
    };

    let service = PatientService::new(&config);

    let patient = service.create_patient(patient_id, request, auth.token())
        .await
        .map_err(map_patient_error)?;

    Ok(Json(json!(patient)))
}

#[axum::debug_handler]
pub async fn get_own_profile(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let patient_id = user_uuid(&user)?;
    let service = PatientService::new(&config);

    let patient = service.get_patient(patient_id, auth.token())
        .await
        .map_err(map_patient_error)?;

    Ok(Json(json!(patient)))
}

#[axum::debug_handler]
pub async fn get_patient(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    if !can_read(&user, patient_id) {
        return Err(AppError::Forbidden("Not allowed to view this patient".to_string()));
    }
    let service = PatientService::new(&config);

    let patient = service.get_patient(patient_id, auth.token())
        .await
        .map_err(map_patient_error)?;

    Ok(Json(json!(patient)))
}

#[axum::debug_handler]
pub async fn update_patient(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
    Json(request): Json<UpdatePatientRequest>,
) -> Result<Json<Value>, AppError> {
    if !user.is_self_or_admin(&patient_id.to_string()) {
        return Err(AppError::Forbidden("Not allowed to update this patient".to_string()));
    }
    let service = PatientService::new(&config);

    let patient = service.update_patient(patient_id, request, auth.token())
        .await
        .map_err(map_patient_error)?;

    Ok(Json(json!(patient)))
}

#[axum::debug_handler]
pub async fn search_patients(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<PatientSearchQuery>,
) -> Result<Json<Value>, AppError> {
    if !(user.is_doctor() || user.is_admin()) {
        return Err(AppError::Forbidden("Only doctors or administrators can search patients".to_string()));
    }
    let service = PatientService::new(&config);

    let patients = service.search_patients(query, auth.token())
        .await
        .map_err(map_patient_error)?;

    Ok(Json(json!({
        "patients": patients,
        "total": patients.len()
    })))
}
