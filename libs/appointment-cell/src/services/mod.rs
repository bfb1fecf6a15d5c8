pub mod booking;
pub mod confirmation;
pub mod conflict;
pub mod events;
pub mod lifecycle;

pub use booking::{AppointmentBookingService, RescheduleOutcome};
pub use conflict::ConflictDetectionService;
pub use events::{AppointmentEvent, AppointmentEventPublisher};
pub use lifecycle::AppointmentLifecycleService;
