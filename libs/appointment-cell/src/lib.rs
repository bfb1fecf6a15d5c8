pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{
    Appointment, AppointmentError, AppointmentSearchQuery, AppointmentStats, AppointmentStatus,
    AppointmentType, BookAppointmentRequest, CancelAppointmentRequest, RescheduleAppointmentRequest,
};
pub use router::appointment_routes;
pub use services::{AppointmentBookingService, AppointmentLifecycleService};
