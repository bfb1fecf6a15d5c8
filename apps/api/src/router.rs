use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use appointment_cell::appointment_routes;
use audit_cell::audit_routes;
use auth_cell::auth_routes;
use clinic_cell::clinic_routes;
use doctor_cell::doctor_routes;
use health_tracking_cell::health_routes;
use notification_cell::notification_routes;
use patient_cell::patient_routes;
use shared_config::AppConfig;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "MediBook API is running!" }))
        .nest("/auth", auth_routes(state.clone()))
        .nest("/clinics", clinic_routes(state.clone()))
        .nest("/doctors", doctor_routes(state.clone()))
        .nest("/patients", patient_routes(state.clone()))
        .nest("/appointments", appointment_routes(state.clone()))
        .nest("/notifications", notification_routes(state.clone()))
        .nest("/health", health_routes(state.clone()))
        .nest("/audit", audit_routes(state))
}
