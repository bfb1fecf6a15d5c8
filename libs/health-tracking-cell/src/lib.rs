pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{
    HealthError, HealthMetric, Medication, MetricSummary, MetricType, Recurrence, Reminder,
    ReminderType,
};
pub use router::health_routes;
pub use services::{MedicationService, MetricService, ReminderService};
