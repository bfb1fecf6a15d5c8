use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn health_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        // Medications
        .route(
            "/patients/{patient_id}/medications",
            get(handlers::list_medications).post(handlers::create_medication),
        )
        .route(
            "/patients/{patient_id}/medications/{medication_id}",
            put(handlers::update_medication).delete(handlers::delete_medication),
        )
        .route(
            "/patients/{patient_id}/medications/{medication_id}/discontinue",
            post(handlers::discontinue_medication),
        )
        // Metrics
        .route(
            "/patients/{patient_id}/metrics",
            get(handlers::list_metrics).post(handlers::record_metric),
        )
        .route("/patients/{patient_id}/metrics/summary", get(handlers::summarize_metrics))
        // Reminders
        .route(
            "/patients/{patient_id}/reminders",
            get(handlers::list_reminders).post(handlers::create_reminder),
        )
        .route(
            "/patients/{patient_id}/reminders/{reminder_id}",
            put(handlers::update_reminder).delete(handlers::delete_reminder),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
