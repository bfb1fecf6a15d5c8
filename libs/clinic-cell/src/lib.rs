pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{Clinic, ClinicError, OperatingHours};
pub use router::clinic_routes;
pub use services::ClinicService;
