use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_utils::schedule::{self, TimeRange};

/// Opening window for one weekday, in clinic local time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperatingHours {
    pub day_of_week: i32, // 0 = Sunday
    pub open_time: NaiveTime,
    pub close_time: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clinic {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub city: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub specialties: Vec<String>,
    pub operating_hours: Vec<OperatingHours>,
    pub utc_offset_minutes: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Clinic {
    pub fn offers_specialty(&self, specialty: &str) -> bool {
        self.specialties.iter().any(|s| s.eq_ignore_ascii_case(specialty))
    }

    /// Opening windows on a local calendar date, as UTC ranges.
    pub fn open_windows_on(&self, date: NaiveDate) -> Vec<TimeRange> {
        let Some(offset) = schedule::clinic_offset(self.utc_offset_minutes) else {
            return Vec::new();
        };
        let day = schedule::day_of_week(date);

        self.operating_hours
            .iter()
            .filter(|hours| hours.day_of_week == day)
            .filter_map(|hours| schedule::local_window(date, hours.open_time, hours.close_time, offset))
            .collect()
    }

    /// True when the whole range falls inside one opening window of the
    /// local day on which it starts.
    pub fn is_open_for(&self, range: &TimeRange) -> bool {
        let Some(offset) = schedule::clinic_offset(self.utc_offset_minutes) else {
            return false;
        };
        let date = schedule::local_date(range.start, offset);
        self.open_windows_on(date).iter().any(|window| window.contains(range))
    }
}

pub fn validate_operating_hours(hours: &[OperatingHours]) -> Result<(), ClinicError> {
    for (i, entry) in hours.iter().enumerate() {
        if !(0..=6).contains(&entry.day_of_week) {
            return Err(ClinicError::ValidationError(
                "Day of week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
            ));
        }
        if entry.open_time >= entry.close_time {
            return Err(ClinicError::ValidationError(format!(
                "Opening time must be before closing time on day {}",
                entry.day_of_week
            )));
        }
        let overlapping = hours[i + 1..].iter().any(|other| {
            other.day_of_week == entry.day_of_week
                && schedule::local_windows_overlap(
                    (entry.open_time, entry.close_time),
                    (other.open_time, other.close_time),
                )
        });
        if overlapping {
            return Err(ClinicError::ValidationError(format!(
                "Operating hours overlap on day {}",
                entry.day_of_week
            )));
        }
    }
    Ok(())
}

pub fn validate_utc_offset(minutes: i32) -> Result<(), ClinicError> {
    if !(-14 * 60..=14 * 60).contains(&minutes) {
        return Err(ClinicError::ValidationError(
            "UTC offset must be within +/-14 hours".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClinicRequest {
    pub name: String,
    pub address: String,
    pub city: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub specialties: Vec<String>,
    pub operating_hours: Vec<OperatingHours>,
    pub utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateClinicRequest {
    pub name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub specialties: Option<Vec<String>>,
    pub operating_hours: Option<Vec<OperatingHours>>,
    pub utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClinicSearchQuery {
    pub city: Option<String>,
    pub specialty: Option<String>,
    pub include_inactive: Option<bool>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum ClinicError {
    #[error("Clinic not found")]
    NotFound,

    #[error("Clinic is not active")]
    Inactive,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
