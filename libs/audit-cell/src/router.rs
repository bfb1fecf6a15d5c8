use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn audit_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/{entity_type}/{entity_id}", get(handlers::get_entity_audit_trail))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}
