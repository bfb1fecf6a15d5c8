pub mod medication;
pub mod metrics;
pub mod reminder;

pub use medication::MedicationService;
pub use metrics::MetricService;
pub use reminder::ReminderService;
