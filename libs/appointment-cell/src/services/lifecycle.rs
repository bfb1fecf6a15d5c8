// libs/appointment-cell/src/services/lifecycle.rs
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::models::{Appointment, AppointmentError, AppointmentStatus};

pub struct AppointmentLifecycleService {
    early_start_minutes: i64,
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self { early_start_minutes: 15 }
    }

    pub fn with_early_start(early_start_minutes: i64) -> Self {
        Self { early_start_minutes }
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if current_status == AppointmentStatus::Cancelled && new_status == AppointmentStatus::Cancelled {
            return Err(AppointmentError::AlreadyCancelled);
        }

        if !self.get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::InvalidStatusTransition {
                from: current_status,
                to: new_status,
            });
        }

        Ok(())
    }

    /// All statuses reachable in one step from `current_status`.
    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> &'static [AppointmentStatus] {
        match current_status {
            AppointmentStatus::Scheduled => &[
                AppointmentStatus::Confirmed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::Rescheduled,
                AppointmentStatus::Missed,
            ],
            AppointmentStatus::Confirmed => &[
                AppointmentStatus::InProgress,
                AppointmentStatus::Cancelled,
                AppointmentStatus::Rescheduled,
                AppointmentStatus::Missed,
            ],
            AppointmentStatus::InProgress => &[AppointmentStatus::Completed],
            AppointmentStatus::Missed => &[AppointmentStatus::Rescheduled],
            // Terminal states
            AppointmentStatus::Completed
            | AppointmentStatus::Cancelled
            | AppointmentStatus::Rescheduled => &[],
        }
    }

    /// A `scheduled` appointment whose end has passed without being
    /// confirmed counts as missed.
    pub fn should_mark_missed(&self, appointment: &Appointment, now: DateTime<Utc>) -> bool {
        appointment.status == AppointmentStatus::Scheduled && appointment.scheduled_end_time <= now
    }

    /// Confirmed appointments can start from `early_start_minutes` before the
    /// scheduled start until the scheduled end.
    pub fn can_start(&self, appointment: &Appointment, now: DateTime<Utc>) -> Result<(), AppointmentError> {
        self.validate_status_transition(appointment.status, AppointmentStatus::InProgress)?;

        let earliest_start = appointment.scheduled_start_time - Duration::minutes(self.early_start_minutes);
        if now < earliest_start {
            return Err(AppointmentError::InvalidTime(format!(
                "Appointment can start at most {} minutes early",
                self.early_start_minutes
            )));
        }
        if now >= appointment.scheduled_end_time {
            return Err(AppointmentError::InvalidTime("Appointment window has passed".to_string()));
        }
        Ok(())
    }

    /// Doctors may flag a no-show once the scheduled start has passed.
    pub fn can_mark_missed(&self, appointment: &Appointment, now: DateTime<Utc>) -> Result<(), AppointmentError> {
        self.validate_status_transition(appointment.status, AppointmentStatus::Missed)?;
        if now < appointment.scheduled_start_time {
            return Err(AppointmentError::InvalidTime(
                "Appointment has not started yet".to_string(),
            ));
        }
        Ok(())
    }
}
