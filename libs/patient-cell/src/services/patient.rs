use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;
use chrono::Utc;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_utils::schedule::rfc3339;

use crate::models::{Patient, CreatePatientRequest, UpdatePatientRequest, PatientSearchQuery, PatientError};

pub struct PatientService {
    supabase: SupabaseClient,
}

impl PatientService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    /// Creates the profile for auth user `patient_id`.
    pub async fn create_patient(
        &self,
        patient_id: Uuid,
        request: CreatePatientRequest,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        debug!("Creating new patient profile for: {}", request.email);
        request.validate(Utc::now().date_naive())?;

        let existing_check_path = format!(
            "/rest/v1/patients?select=id&email=eq.{}",
            urlencoding::encode(request.email.trim())
        );
        let existing: Vec<Value> = self.supabase.request(
            Method::GET,
            &existing_check_path,
            Some(auth_token),
            None,
        ).await.map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        if !existing.is_empty() {
            warn!("Rejected patient profile with duplicate email {}", request.email);
            return Err(PatientError::EmailAlreadyExists { email: request.email });
        }

        let now = rfc3339(Utc::now());
        let patient_data = json!({
            "id": patient_id,
            "first_name": request.first_name.trim(),
            "last_name": request.last_name.trim(),
            "email": request.email.trim(),
            "phone_number": request.phone_number,
            "date_of_birth": request.date_of_birth.format("%Y-%m-%d").to_string(),
            "gender": request.gender,
            "address": request.address,
            "emergency_contact_name": request.emergency_contact_name,
            "emergency_contact_phone": request.emergency_contact_phone,
            "created_at": now,
            "updated_at": now,
        });

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/patients",
            Some(auth_token),
            Some(patient_data),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        let patient = parse_single(result)?;
        info!("Patient profile {} created", patient.id);
        Ok(patient)
    }

    pub async fn get_patient(
        &self,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        debug!("Fetching patient profile: {}", patient_id);

        let path = format!("/rest/v1/patients?id=eq.{}", patient_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        parse_single(result)
    }

    pub async fn update_patient(
        &self,
        patient_id: Uuid,
        request: UpdatePatientRequest,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        debug!("Updating patient profile: {}", patient_id);
        request.validate()?;

        let mut update_data = serde_json::Map::new();

        if let Some(first_name) = request.first_name {
            update_data.insert("first_name".to_string(), json!(first_name.trim()));
        }
        if let Some(last_name) = request.last_name {
            update_data.insert("last_name".to_string(), json!(last_name.trim()));
        }
        if let Some(phone_number) = request.phone_number {
            update_data.insert("phone_number".to_string(), json!(phone_number));
        }
        if let Some(gender) = request.gender {
            update_data.insert("gender".to_string(), json!(gender));
        }
        if let Some(address) = request.address {
            update_data.insert("address".to_string(), json!(address));
        }
        if let Some(name) = request.emergency_contact_name {
            update_data.insert("emergency_contact_name".to_string(), json!(name));
        }
        if let Some(phone) = request.emergency_contact_phone {
            update_data.insert("emergency_contact_phone".to_string(), json!(phone));
        }

        if update_data.is_empty() {
            return Err(PatientError::ValidationError("No fields to update".to_string()));
        }
        update_data.insert("updated_at".to_string(), json!(rfc3339(Utc::now())));

        let path = format!("/rest/v1/patients?id=eq.{}", patient_id);
        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(Value::Object(update_data)),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        parse_single(result)
    }

    pub async fn search_patients(
        &self,
        query: PatientSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Patient>, PatientError> {
        debug!("Searching patients with query: {:?}", query);

        let mut query_parts = vec![];

        if let Some(name) = query.name.as_deref().filter(|n| !n.trim().is_empty()) {
            let name = urlencoding::encode(name.trim()).into_owned();
            query_parts.push(format!("or=(first_name.ilike.*{n}*,last_name.ilike.*{n}*)", n = name));
        }
        if let Some(email) = query.email.as_deref().filter(|e| !e.trim().is_empty()) {
            query_parts.push(format!("email=ilike.*{}*", urlencoding::encode(email.trim())));
        }
        if let Some(phone) = query.phone.as_deref().filter(|p| !p.trim().is_empty()) {
            query_parts.push(format!("phone_number=ilike.*{}*", urlencoding::encode(phone.trim())));
        }
        query_parts.push("order=last_name.asc,first_name.asc".to_string());
        query_parts.push(format!("limit={}", query.limit.unwrap_or(50).clamp(1, 200)));
        query_parts.push(format!("offset={}", query.offset.unwrap_or(0).max(0)));

        let path = format!("/rest/v1/patients?{}", query_parts.join("&"));
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(|row| serde_json::from_value(row)
                .map_err(|e| PatientError::DatabaseError(format!("Failed to parse patient: {}", e))))
            .collect()
    }
}

fn parse_single(rows: Vec<Value>) -> Result<Patient, PatientError> {
    let row = rows.into_iter().next().ok_or(PatientError::NotFound)?;
    serde_json::from_value(row)
        .map_err(|e| PatientError::DatabaseError(format!("Failed to parse patient: {}", e)))
}
