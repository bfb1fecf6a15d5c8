use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc, NaiveDate};

use shared_utils::validation::{is_valid_email, is_valid_phone, require_non_empty};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub date_of_birth: NaiveDate,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn age_on(&self, today: NaiveDate) -> u32 {
        today.years_since(self.date_of_birth).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePatientRequest {
    /// Auth user the profile belongs to. Patients may omit it; admins
    /// creating a profile on someone's behalf must set it.
    pub user_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub date_of_birth: NaiveDate,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
}

impl CreatePatientRequest {
    pub fn validate(&self, today: NaiveDate) -> Result<(), PatientError> {
        require_non_empty("first_name", &self.first_name).map_err(PatientError::ValidationError)?;
        require_non_empty("last_name", &self.last_name).map_err(PatientError::ValidationError)?;
        if !is_valid_email(&self.email) {
            return Err(PatientError::ValidationError("Invalid email address".to_string()));
        }
        if self.date_of_birth > today {
            return Err(PatientError::InvalidDateOfBirth);
        }
        validate_phone("phone_number", self.phone_number.as_deref())?;
        validate_phone("emergency_contact_phone", self.emergency_contact_phone.as_deref())?;
        Ok(())
    }
}

fn validate_phone(field: &str, phone: Option<&str>) -> Result<(), PatientError> {
    match phone {
        Some(p) if !is_valid_phone(p) => Err(PatientError::ValidationError(format!("Invalid {}", field))),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePatientRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
}

impl UpdatePatientRequest {
    pub fn validate(&self) -> Result<(), PatientError> {
        if let Some(first_name) = &self.first_name {
            require_non_empty("first_name", first_name).map_err(PatientError::ValidationError)?;
        }
        if let Some(last_name) = &self.last_name {
            require_non_empty("last_name", last_name).map_err(PatientError::ValidationError)?;
        }
        validate_phone("phone_number", self.phone_number.as_deref())?;
        validate_phone("emergency_contact_phone", self.emergency_contact_phone.as_deref())?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientSearchQuery {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum PatientError {
    #[error("Patient not found")]
    NotFound,

    #[error("Patient with email {email} already exists")]
    EmailAlreadyExists { email: String },

    #[error("Date of birth cannot be in the future")]
    InvalidDateOfBirth,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
