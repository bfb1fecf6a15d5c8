use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use clinic_cell::{ClinicError, ClinicService};
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_utils::schedule::rfc3339;
use shared_utils::validation::{is_valid_email, require_non_empty};

use crate::models::{
    validate_consultation_duration, CreateDoctorRequest, Doctor, DoctorError, DoctorSearchQuery,
    UpdateDoctorRequest, DEFAULT_CONSULTATION_MINUTES,
};

pub struct DoctorService {
    supabase: SupabaseClient,
    clinic_service: ClinicService,
}

impl DoctorService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            clinic_service: ClinicService::new(config),
        }
    }

    /// Creates the profile of an existing auth user. The profile id is the
    /// auth user id.
    pub async fn create_doctor(
        &self,
        request: CreateDoctorRequest,
        auth_token: &str,
    ) -> Result<Doctor, DoctorError> {
        debug!("Creating doctor profile for: {}", request.email);

        require_non_empty("first_name", &request.first_name).map_err(DoctorError::ValidationError)?;
        require_non_empty("last_name", &request.last_name).map_err(DoctorError::ValidationError)?;
        require_non_empty("specialty", &request.specialty).map_err(DoctorError::ValidationError)?;
        require_non_empty("license_number", &request.license_number).map_err(DoctorError::ValidationError)?;
        if !is_valid_email(&request.email) {
            return Err(DoctorError::ValidationError("Invalid email address".to_string()));
        }
        let duration = request.consultation_duration_minutes.unwrap_or(DEFAULT_CONSULTATION_MINUTES);
        validate_consultation_duration(duration)?;

        let existing_path = format!(
            "/rest/v1/doctors?select=id&email=eq.{}",
            urlencoding::encode(&request.email)
        );
        let existing: Vec<Value> = self.supabase.request(
            Method::GET,
            &existing_path,
            Some(auth_token),
            None,
        ).await.map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        if !existing.is_empty() {
            warn!("Rejected doctor profile with duplicate email {}", request.email);
            return Err(DoctorError::DuplicateEmail(request.email));
        }

        let clinic = self.clinic_service.get_clinic(request.clinic_id, Some(auth_token))
            .await
            .map_err(|e| match e {
                ClinicError::NotFound => DoctorError::ClinicNotFound,
                other => DoctorError::DatabaseError(other.to_string()),
            })?;

        if !clinic.offers_specialty(&request.specialty) {
            return Err(DoctorError::ValidationError(format!(
                "Clinic {} does not offer {}",
                clinic.name, request.specialty
            )));
        }

        let now = rfc3339(Utc::now());
        let doctor_data = json!({
            "id": request.user_id,
            "first_name": request.first_name.trim(),
            "last_name": request.last_name.trim(),
            "email": request.email,
            "specialty": request.specialty,
            "clinic_id": request.clinic_id,
            "bio": request.bio,
            "license_number": request.license_number,
            "years_experience": request.years_experience,
            "consultation_duration_minutes": duration,
            "is_accepting_patients": true,
            "rating": null,
            "created_at": now,
            "updated_at": now,
        });

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/doctors",
            Some(auth_token),
            Some(doctor_data),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        let doctor = parse_single(result)?;
        info!("Doctor profile {} created", doctor.id);
        Ok(doctor)
    }

    pub async fn get_doctor(
        &self,
        doctor_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<Doctor, DoctorError> {
        debug!("Fetching doctor profile: {}", doctor_id);

        let path = format!("/rest/v1/doctors?id=eq.{}", doctor_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            auth_token,
            None,
        ).await.map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        parse_single(result)
    }

    pub async fn update_doctor(
        &self,
        doctor_id: Uuid,
        request: UpdateDoctorRequest,
        auth_token: &str,
    ) -> Result<Doctor, DoctorError> {
        debug!("Updating doctor profile: {}", doctor_id);

        let mut update_data = Map::new();

        if let Some(first_name) = request.first_name {
            require_non_empty("first_name", &first_name).map_err(DoctorError::ValidationError)?;
            update_data.insert("first_name".to_string(), json!(first_name.trim()));
        }
        if let Some(last_name) = request.last_name {
            require_non_empty("last_name", &last_name).map_err(DoctorError::ValidationError)?;
            update_data.insert("last_name".to_string(), json!(last_name.trim()));
        }
        if let Some(bio) = request.bio {
            update_data.insert("bio".to_string(), json!(bio));
        }
        if let Some(experience) = request.years_experience {
            if experience < 0 {
                return Err(DoctorError::ValidationError("Years of experience cannot be negative".to_string()));
            }
            update_data.insert("years_experience".to_string(), json!(experience));
        }
        if let Some(duration) = request.consultation_duration_minutes {
            validate_consultation_duration(duration)?;
            update_data.insert("consultation_duration_minutes".to_string(), json!(duration));
        }
        if let Some(accepting) = request.is_accepting_patients {
            update_data.insert("is_accepting_patients".to_string(), json!(accepting));
        }

        if update_data.is_empty() {
            return Err(DoctorError::ValidationError("No fields to update".to_string()));
        }
        update_data.insert("updated_at".to_string(), json!(rfc3339(Utc::now())));

        let path = format!("/rest/v1/doctors?id=eq.{}", doctor_id);
        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(Value::Object(update_data)),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        parse_single(result)
    }

    pub async fn search_doctors(
        &self,
        query: DoctorSearchQuery,
        auth_token: Option<&str>,
    ) -> Result<Vec<Doctor>, DoctorError> {
        let mut query_parts = Vec::new();

        if query.accepting_only.unwrap_or(true) {
            query_parts.push("is_accepting_patients=eq.true".to_string());
        }
        if let Some(specialty) = query.specialty.as_deref().filter(|s| !s.trim().is_empty()) {
            query_parts.push(format!("specialty=ilike.*{}*", urlencoding::encode(specialty.trim())));
        }
        if let Some(clinic_id) = query.clinic_id {
            query_parts.push(format!("clinic_id=eq.{}", clinic_id));
        }
        if let Some(name) = query.name.as_deref().filter(|n| !n.trim().is_empty()) {
            let pattern = urlencoding::encode(name.trim()).into_owned();
            query_parts.push(format!(
                "or=(first_name.ilike.*{p}*,last_name.ilike.*{p}*)",
                p = pattern
            ));
        }
        query_parts.push("order=last_name.asc,first_name.asc".to_string());
        query_parts.push(format!("limit={}", query.limit.unwrap_or(20).clamp(1, 100)));
        query_parts.push(format!("offset={}", query.offset.unwrap_or(0).max(0)));

        let path = format!("/rest/v1/doctors?{}", query_parts.join("&"));
        debug!("Searching doctors: {}", path);

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            auth_token,
            None,
        ).await.map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        result.into_iter()
            .map(|row| serde_json::from_value(row)
                .map_err(|e| DoctorError::DatabaseError(format!("Failed to parse doctor: {}", e))))
            .collect()
    }
}

fn parse_single(rows: Vec<Value>) -> Result<Doctor, DoctorError> {
    let row = rows.into_iter().next().ok_or(DoctorError::NotFound)?;
    serde_json::from_value(row)
        .map_err(|e| DoctorError::DatabaseError(format!("Failed to parse doctor: {}", e)))
}
