// libs/appointment-cell/src/models.rs
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_utils::schedule::TimeRange;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub confirmation_number: String,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub clinic_id: Uuid,
    pub appointment_type: AppointmentType,
    pub reason: Option<String>,
    pub scheduled_start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub scheduled_end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub patient_notes: Option<String>,
    pub doctor_notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<Uuid>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub rescheduled_from: Option<Uuid>,
    pub rescheduled_to: Option<Uuid>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub actual_end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn time_range(&self) -> TimeRange {
        TimeRange {
            start: self.scheduled_start_time,
            end: self.scheduled_end_time,
        }
    }

    /// True when the user is the patient or the doctor.
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.patient_id.to_string() == user_id || self.doctor_id.to_string() == user_id
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    Rescheduled,
    Missed,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 7] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::Confirmed,
        AppointmentStatus::InProgress,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::Rescheduled,
        AppointmentStatus::Missed,
    ];

    /// Statuses that hold the doctor's time.
    pub const ACTIVE: [AppointmentStatus; 3] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::Confirmed,
        AppointmentStatus::InProgress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Rescheduled => "rescheduled",
            AppointmentStatus::Missed => "missed",
        }
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::Rescheduled
        )
    }

    /// `in.(...)` filter value listing the active statuses.
    pub fn active_filter() -> String {
        let names: Vec<&str> = Self::ACTIVE.iter().map(|s| s.as_str()).collect();
        format!("in.({})", names.join(","))
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentType {
    #[default]
    #[serde(alias = "general_consultation", alias = "general")]
    Consultation,
    #[serde(alias = "followup")]
    FollowUp,
    #[serde(alias = "checkup")]
    CheckUp,
    Procedure,
    #[serde(alias = "urgent")]
    Emergency,
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AppointmentType::Consultation => "consultation",
            AppointmentType::FollowUp => "follow_up",
            AppointmentType::CheckUp => "check_up",
            AppointmentType::Procedure => "procedure",
            AppointmentType::Emergency => "emergency",
        };
        write!(f, "{}", s)
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    /// Required when an admin books on a patient's behalf.
    pub patient_id: Option<Uuid>,
    pub doctor_id: Uuid,
    /// Defaults to the doctor's clinic.
    pub clinic_id: Option<Uuid>,
    pub appointment_type: Option<AppointmentType>,
    pub scheduled_start_time: DateTime<Utc>,
    /// Defaults to the doctor's consultation duration.
    pub duration_minutes: Option<i32>,
    pub reason: Option<String>,
    pub patient_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub new_start_time: DateTime<Utc>,
    pub new_duration_minutes: Option<i32>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompleteAppointmentRequest {
    pub doctor_notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentSearchQuery {
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub clinic_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpcomingQuery {
    pub limit: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckQuery {
    pub doctor_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub exclude_appointment_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckResponse {
    pub has_conflict: bool,
    pub conflicting_appointments: Vec<Appointment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsQuery {
    pub doctor_id: Option<Uuid>,
    pub clinic_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
}

// ==============================================================================
// STATISTICS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    /// Completed share of appointments that reached an outcome
    /// (completed, cancelled or missed).
    pub completion_rate: f64,
    pub cancellation_rate: f64,
    pub missed_rate: f64,
}

impl AppointmentStats {
    pub fn from_appointments(appointments: &[Appointment]) -> Self {
        let mut by_status: BTreeMap<String, usize> = AppointmentStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();

        for appointment in appointments {
            *by_status.entry(appointment.status.as_str().to_string()).or_insert(0) += 1;
        }

        let count = |status: AppointmentStatus| by_status.get(status.as_str()).copied().unwrap_or(0);
        let completed = count(AppointmentStatus::Completed);
        let cancelled = count(AppointmentStatus::Cancelled);
        let missed = count(AppointmentStatus::Missed);
        let concluded = completed + cancelled + missed;

        let rate = |n: usize| if concluded == 0 { 0.0 } else { n as f64 / concluded as f64 };

        Self {
            total: appointments.len(),
            completion_rate: rate(completed),
            cancellation_rate: rate(cancelled),
            missed_rate: rate(missed),
            by_status,
        }
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Clinic not found")]
    ClinicNotFound,

    #[error("Clinic is not active")]
    ClinicInactive,

    #[error("Clinic is closed during the requested time")]
    ClinicClosed,

    #[error("Doctor is not accepting patients")]
    DoctorNotAcceptingPatients,

    #[error("Doctor not available at requested time")]
    DoctorNotAvailable,

    #[error("Invalid appointment time: {0}")]
    InvalidTime(String),

    #[error("Cannot move appointment from {from} to {to}")]
    InvalidStatusTransition { from: AppointmentStatus, to: AppointmentStatus },

    #[error("Appointment is already cancelled")]
    AlreadyCancelled,

    #[error("Appointment conflicts with existing booking")]
    ConflictDetected,

    #[error("Patient already has an appointment at this time")]
    PatientConflict,

    #[error("Unauthorized access to appointment")]
    Unauthorized,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

// ==============================================================================
// VALIDATION RULES
// ==============================================================================

#[derive(Debug, Clone)]
pub struct AppointmentValidationRules {
    pub min_appointment_duration: i32,
    pub max_appointment_duration: i32,
    pub max_advance_booking_days: i64,
    pub early_start_minutes: i64,
    pub confirmation_attempts: usize,
}

impl Default for AppointmentValidationRules {
    fn default() -> Self {
        Self {
            min_appointment_duration: 15,
            max_appointment_duration: 120,
            max_advance_booking_days: 90,
            early_start_minutes: 15,
            confirmation_attempts: 3,
        }
    }
}

impl AppointmentValidationRules {
    /// Checks duration bounds and the booking horizon for a new range.
    pub fn validate_range(
        &self,
        start: DateTime<Utc>,
        duration_minutes: i32,
        now: DateTime<Utc>,
    ) -> Result<TimeRange, AppointmentError> {
        if duration_minutes < self.min_appointment_duration || duration_minutes > self.max_appointment_duration {
            return Err(AppointmentError::ValidationError(format!(
                "Duration must be between {} and {} minutes",
                self.min_appointment_duration, self.max_appointment_duration
            )));
        }
        if start <= now {
            return Err(AppointmentError::InvalidTime("Appointment must be in the future".to_string()));
        }
        if start > now + Duration::days(self.max_advance_booking_days) {
            return Err(AppointmentError::InvalidTime(format!(
                "Appointments can be booked at most {} days ahead",
                self.max_advance_booking_days
            )));
        }
        Ok(TimeRange::from_duration(start, duration_minutes))
    }
}
