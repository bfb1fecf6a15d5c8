use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use clinic_cell::Clinic;
use shared_utils::schedule::{self, TimeRange};

pub const MIN_CONSULTATION_MINUTES: i32 = 15;
pub const MAX_CONSULTATION_MINUTES: i32 = 120;
pub const DEFAULT_CONSULTATION_MINUTES: i32 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub specialty: String,
    pub clinic_id: Uuid,
    pub bio: Option<String>,
    pub license_number: String,
    pub years_experience: Option<i32>,
    pub consultation_duration_minutes: i32,
    pub is_accepting_patients: bool,
    pub rating: Option<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Doctor {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Recurring weekly window, in the local time of the doctor's clinic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorAvailability {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub day_of_week: i32, // 0 = Sunday, 1 = Monday, etc.
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailableSlot {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i32,
}

/// Start and end of an active appointment already holding the doctor.
#[derive(Debug, Clone, Deserialize)]
pub struct BookedInterval {
    pub scheduled_start_time: DateTime<Utc>,
    pub scheduled_end_time: DateTime<Utc>,
}

impl BookedInterval {
    pub fn range(&self) -> Option<TimeRange> {
        TimeRange::new(self.scheduled_start_time, self.scheduled_end_time)
    }
}

/// UTC windows the doctor works on a given clinic-local date.
pub fn availability_windows_on(
    availability: &[DoctorAvailability],
    clinic: &Clinic,
    date: NaiveDate,
) -> Vec<TimeRange> {
    let Some(offset) = schedule::clinic_offset(clinic.utc_offset_minutes) else {
        return Vec::new();
    };
    let day = schedule::day_of_week(date);

    availability
        .iter()
        .filter(|a| a.is_available && a.day_of_week == day)
        .filter_map(|a| schedule::local_window(date, a.start_time, a.end_time, offset))
        .collect()
}

/// True when one availability window on the start's local day covers the
/// whole range.
pub fn availability_covers(
    availability: &[DoctorAvailability],
    clinic: &Clinic,
    range: &TimeRange,
) -> bool {
    let Some(offset) = schedule::clinic_offset(clinic.utc_offset_minutes) else {
        return false;
    };
    let date = schedule::local_date(range.start, offset);
    availability_windows_on(availability, clinic, date)
        .iter()
        .any(|window| window.contains(range))
}

/// Walks every availability window of the day in steps of `duration_minutes`
/// and keeps the slots that are inside clinic hours, still in the future and
/// clear of booked appointments.
pub fn compute_available_slots(
    availability: &[DoctorAvailability],
    clinic: &Clinic,
    date: NaiveDate,
    duration_minutes: i32,
    booked: &[TimeRange],
    now: DateTime<Utc>,
) -> Vec<AvailableSlot> {
    if duration_minutes <= 0 {
        return Vec::new();
    }
    let step = Duration::minutes(duration_minutes as i64);
    let mut slots = Vec::new();

    let mut windows = availability_windows_on(availability, clinic, date);
    windows.sort_by_key(|w| w.start);

    for window in windows {
        let mut start = window.start;
        while start + step <= window.end {
            let slot = TimeRange::from_duration(start, duration_minutes);
            let free = !booked.iter().any(|b| b.overlaps(&slot));
            if slot.start > now && free && clinic.is_open_for(&slot) {
                slots.push(AvailableSlot {
                    start_time: slot.start,
                    end_time: slot.end,
                    duration_minutes,
                });
            }
            start += step;
        }
    }

    slots
}

pub fn validate_consultation_duration(minutes: i32) -> Result<(), DoctorError> {
    if !(MIN_CONSULTATION_MINUTES..=MAX_CONSULTATION_MINUTES).contains(&minutes) {
        return Err(DoctorError::ValidationError(format!(
            "Consultation duration must be between {} and {} minutes",
            MIN_CONSULTATION_MINUTES, MAX_CONSULTATION_MINUTES
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDoctorRequest {
    /// Auth user id the profile belongs to.
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub specialty: String,
    pub clinic_id: Uuid,
    pub bio: Option<String>,
    pub license_number: String,
    pub years_experience: Option<i32>,
    pub consultation_duration_minutes: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateDoctorRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub years_experience: Option<i32>,
    pub consultation_duration_minutes: Option<i32>,
    pub is_accepting_patients: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DoctorSearchQuery {
    pub specialty: Option<String>,
    pub clinic_id: Option<Uuid>,
    pub name: Option<String>,
    pub accepting_only: Option<bool>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAvailabilityRequest {
    pub day_of_week: i32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableSlotsQuery {
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum DoctorError {
    #[error("Doctor not found")]
    NotFound,

    #[error("Availability not found")]
    AvailabilityNotFound,

    #[error("Doctor is not accepting patients")]
    NotAcceptingPatients,

    #[error("A doctor with email {0} already exists")]
    DuplicateEmail(String),

    #[error("Clinic not found")]
    ClinicNotFound,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
