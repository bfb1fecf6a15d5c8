use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{ClinicError, ClinicSearchQuery, CreateClinicRequest, UpdateClinicRequest};
use crate::services::ClinicService;

pub(crate) fn map_clinic_error(e: ClinicError) -> AppError {
    match e {
        ClinicError::NotFound => AppError::NotFound("Clinic not found".to_string()),
        ClinicError::Inactive => AppError::BadRequest("Clinic is not active".to_string()),
        ClinicError::ValidationError(msg) => AppError::ValidationError(msg),
        ClinicError::DatabaseError(msg) => AppError::Database(msg),
    }
}

fn require_admin(user: &User) -> Result<(), AppError> {
    if !user.is_admin() {
        return Err(AppError::Forbidden("Only administrators can manage clinics".to_string()));
    }
    Ok(())
}

#[axum::debug_handler]
pub async fn search_clinics(
    State(state): State<Arc<AppConfig>>,
    Query(query): Query<ClinicSearchQuery>,
) -> Result<Json<Value>, AppError> {
    let service = ClinicService::new(&state);

    let clinics = service.search_clinics(query, None)
        .await
        .map_err(map_clinic_error)?;

    Ok(Json(json!({
        "clinics": clinics,
        "total": clinics.len()
    })))
}

#[axum::debug_handler]
pub async fn get_clinic(
    State(state): State<Arc<AppConfig>>,
    Path(clinic_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = ClinicService::new(&state);

    let clinic = service.get_clinic(clinic_id, None)
        .await
        .map_err(map_clinic_error)?;

    Ok(Json(json!(clinic)))
}

#[axum::debug_handler]
pub async fn create_clinic(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateClinicRequest>,
) -> Result<Json<Value>, AppError> {
    require_admin(&user)?;
    let service = ClinicService::new(&state);

    let clinic = service.create_clinic(request, auth.token())
        .await
        .map_err(map_clinic_error)?;

    Ok(Json(json!(clinic)))
}

#[axum::debug_handler]
pub async fn update_clinic(
    State(state): State<Arc<AppConfig>>,
    Path(clinic_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateClinicRequest>,
) -> Result<Json<Value>, AppError> {
    require_admin(&user)?;
    let service = ClinicService::new(&state);

    let clinic = service.update_clinic(clinic_id, request, auth.token())
        .await
        .map_err(map_clinic_error)?;

    Ok(Json(json!(clinic)))
}

#[axum::debug_handler]
pub async fn deactivate_clinic(
    State(state): State<Arc<AppConfig>>,
    Path(clinic_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_admin(&user)?;
    let service = ClinicService::new(&state);

    let clinic = service.deactivate_clinic(clinic_id, auth.token())
        .await
        .map_err(map_clinic_error)?;

    Ok(Json(json!({
        "message": "Clinic deactivated",
        "clinic": clinic
    })))
}
