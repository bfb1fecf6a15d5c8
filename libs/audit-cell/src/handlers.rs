use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde::Deserialize;
use serde_json::{json, Value};

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::services::AuditService;

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i32>,
}

#[axum::debug_handler]
pub async fn get_entity_audit_trail(
    State(state): State<Arc<AppConfig>>,
    Path((entity_type, entity_id)): Path<(String, String)>,
    Query(query): Query<AuditQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    if !user.is_admin() {
        return Err(AppError::Forbidden("Only administrators can view audit trails".to_string()));
    }

    let service = AuditService::new(&state);
    let entries = service
        .list_for_entity(&entity_type, &entity_id, query.limit, auth.token())
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(Json(json!({
        "entries": entries,
        "total": entries.len()
    })))
}
