use std::sync::Arc;

use axum::{
    extract::{Extension, State},
    http::HeaderMap,
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::{TokenResponse, User};
use shared_models::error::AppError;
use shared_utils::jwt;

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let auth_value = headers
        .get("Authorization")
        .ok_or_else(|| AppError::Auth("Missing authorization header".to_string()))?
        .to_str()
        .map_err(|_| AppError::Auth("Invalid authorization header format".to_string()))?;

    auth_value
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Auth("Invalid authorization header format".to_string()))
}

pub async fn validate_token(
    State(config): State<Arc<AppConfig>>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, AppError> {
    debug!("Validating token");

    let token = extract_bearer_token(&headers)?;
    let user = jwt::validate_token(token, &config.supabase_jwt_secret).map_err(|err| {
        warn!("Token rejected: {}", err);
        AppError::Auth(err)
    })?;

    Ok(Json(TokenResponse {
        valid: true,
        user_id: user.id,
        email: user.email,
        role: user.role,
    }))
}

/// Reports validity without failing the request.
pub async fn verify_token(
    State(config): State<Arc<AppConfig>>,
    headers: HeaderMap,
) -> Json<Value> {
    let valid = extract_bearer_token(&headers)
        .ok()
        .is_some_and(|token| jwt::validate_token(token, &config.supabase_jwt_secret).is_ok());

    Json(json!({ "valid": valid }))
}

/// The caller plus their patient or doctor record, when one exists.
#[axum::debug_handler]
pub async fn get_me(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    debug!("Getting profile for user: {}", user.id);

    let table = if user.is_patient() {
        Some("patients")
    } else if user.is_doctor() {
        Some("doctors")
    } else {
        None
    };

    let profile = match table {
        Some(table) => {
            let client = SupabaseClient::new(&config);
            let path = format!("/rest/v1/{}?id=eq.{}", table, user.id);
            let rows: Vec<Value> = client.request(Method::GET, &path, Some(auth.token()), None)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
            rows.into_iter().next()
        }
        None => None,
    };

    Ok(Json(json!({
        "user": user,
        "profile": profile,
    })))
}
