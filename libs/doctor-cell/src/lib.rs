pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{
    AvailableSlot, CreateAvailabilityRequest, CreateDoctorRequest, Doctor, DoctorAvailability,
    DoctorError, DoctorSearchQuery, UpdateDoctorRequest,
};
pub use router::doctor_routes;
pub use services::{AvailabilityService, DoctorService};
