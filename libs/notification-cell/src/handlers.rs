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

use crate::models::{NewNotification, NotificationError, NotificationQuery};
use crate::services::NotificationService;

fn user_uuid(user: &User) -> Result<Uuid, AppError> {
    Uuid::parse_str(&user.id)
        .map_err(|_| AppError::Auth("Token subject is not a valid user id".to_string()))
}

fn map_notification_error(e: NotificationError) -> AppError {
    match e {
        NotificationError::NotFound => AppError::NotFound("Notification not found".to_string()),
        NotificationError::ValidationError(msg) => AppError::ValidationError(msg),
        NotificationError::DatabaseError(msg) => AppError::Database(msg),
    }
}

#[axum::debug_handler]
pub async fn list_notifications(
    State(state): State<Arc<AppConfig>>,
    Query(query): Query<NotificationQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let user_id = user_uuid(&user)?;
    let service = NotificationService::new(&state);

    let notifications = service.list_for_user(user_id, query, auth.token())
        .await
        .map_err(map_notification_error)?;

    Ok(Json(json!({
        "notifications": notifications,
        "total": notifications.len()
    })))
}

#[axum::debug_handler]
pub async fn get_unread_count(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let user_id = user_uuid(&user)?;
    let service = NotificationService::new(&state);

    let count = service.unread_count(user_id, auth.token())
        .await
        .map_err(map_notification_error)?;

    Ok(Json(json!({ "unread": count })))
}

#[axum::debug_handler]
pub async fn mark_notification_read(
    State(state): State<Arc<AppConfig>>,
    Path(notification_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let user_id = user_uuid(&user)?;
    let service = NotificationService::new(&state);

    let notification = service.mark_read(notification_id, user_id, auth.token())
        .await
        .map_err(map_notification_error)?;

    Ok(Json(json!(notification)))
}

#[axum::debug_handler]
pub async fn mark_all_read(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let user_id = user_uuid(&user)?;
    let service = NotificationService::new(&state);

    let updated = service.mark_all_read(user_id, auth.token())
        .await
        .map_err(map_notification_error)?;

    Ok(Json(json!({ "updated": updated })))
}

#[axum::debug_handler]
pub async fn delete_notification(
    State(state): State<Arc<AppConfig>>,
    Path(notification_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let user_id = user_uuid(&user)?;
    let service = NotificationService::new(&state);

    service.delete(notification_id, user_id, auth.token())
        .await
        .map_err(map_notification_error)?;

    Ok(Json(json!({ "success": true })))
}

/// Admin broadcast of a notification to one user.
#[axum::debug_handler]
pub async fn create_notification(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<NewNotification>,
) -> Result<Json<Value>, AppError> {
    if !user.is_admin() {
        return Err(AppError::Forbidden("Only administrators can send notifications".to_string()));
    }

    let service = NotificationService::new(&state);
    let notification = service.send(request, auth.token())
        .await
        .map_err(map_notification_error)?;

    Ok(Json(json!(notification)))
}
