use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_utils::schedule::rfc3339;
use shared_utils::validation::require_non_empty;

use crate::models::{
    validate_operating_hours, validate_utc_offset, Clinic, ClinicError, ClinicSearchQuery,
    CreateClinicRequest, UpdateClinicRequest,
};

pub struct ClinicService {
    supabase: SupabaseClient,
}

impl ClinicService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn create_clinic(
        &self,
        request: CreateClinicRequest,
        auth_token: &str,
    ) -> Result<Clinic, ClinicError> {
        require_non_empty("name", &request.name).map_err(ClinicError::ValidationError)?;
        require_non_empty("address", &request.address).map_err(ClinicError::ValidationError)?;
        require_non_empty("city", &request.city).map_err(ClinicError::ValidationError)?;
        let utc_offset_minutes = request.utc_offset_minutes.unwrap_or(0);
        validate_utc_offset(utc_offset_minutes)?;
        validate_operating_hours(&request.operating_hours)?;

        debug!("Creating clinic {} in {}", request.name, request.city);

        let now = rfc3339(Utc::now());
        let body = json!({
            "name": request.name.trim(),
            "address": request.address.trim(),
            "city": request.city.trim(),
            "phone": request.phone,
            "email": request.email,
            "specialties": request.specialties,
            "operating_hours": request.operating_hours,
            "utc_offset_minutes": utc_offset_minutes,
            "is_active": true,
            "created_at": now,
            "updated_at": now,
        });

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/clinics",
            Some(auth_token),
            Some(body),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| ClinicError::DatabaseError(e.to_string()))?;

        let clinic = parse_single(result)?;
        info!("Clinic {} created", clinic.id);
        Ok(clinic)
    }

    pub async fn get_clinic(&self, clinic_id: Uuid, auth_token: Option<&str>) -> Result<Clinic, ClinicError> {
        let path = format!("/rest/v1/clinics?id=eq.{}", clinic_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            auth_token,
            None,
        ).await.map_err(|e| ClinicError::DatabaseError(e.to_string()))?;

        parse_single(result)
    }

    /// Fetches a clinic that can currently take bookings.
    pub async fn get_active_clinic(&self, clinic_id: Uuid, auth_token: &str) -> Result<Clinic, ClinicError> {
        let clinic = self.get_clinic(clinic_id, Some(auth_token)).await?;
        if !clinic.is_active {
            warn!("Clinic {} is inactive", clinic_id);
            return Err(ClinicError::Inactive);
        }
        Ok(clinic)
    }

    pub async fn update_clinic(
        &self,
        clinic_id: Uuid,
        request: UpdateClinicRequest,
        auth_token: &str,
    ) -> Result<Clinic, ClinicError> {
        let mut update = Map::new();

        if let Some(name) = request.name {
            require_non_empty("name", &name).map_err(ClinicError::ValidationError)?;
            update.insert("name".to_string(), json!(name.trim()));
        }
        if let Some(address) = request.address {
            require_non_empty("address", &address).map_err(ClinicError::ValidationError)?;
            update.insert("address".to_string(), json!(address.trim()));
        }
        if let Some(city) = request.city {
            require_non_empty("city", &city).map_err(ClinicError::ValidationError)?;
            update.insert("city".to_string(), json!(city.trim()));
        }
        if let Some(phone) = request.phone {
            update.insert("phone".to_string(), json!(phone));
        }
        if let Some(email) = request.email {
            update.insert("email".to_string(), json!(email));
        }
        if let Some(specialties) = request.specialties {
            update.insert("specialties".to_string(), json!(specialties));
        }
        if let Some(hours) = request.operating_hours {
            validate_operating_hours(&hours)?;
            update.insert("operating_hours".to_string(), json!(hours));
        }
        if let Some(offset) = request.utc_offset_minutes {
            validate_utc_offset(offset)?;
            update.insert("utc_offset_minutes".to_string(), json!(offset));
        }

        if update.is_empty() {
            return Err(ClinicError::ValidationError("No fields to update".to_string()));
        }
        update.insert("updated_at".to_string(), json!(rfc3339(Utc::now())));

        self.patch(clinic_id, Value::Object(update), auth_token).await
    }

    pub async fn deactivate_clinic(&self, clinic_id: Uuid, auth_token: &str) -> Result<Clinic, ClinicError> {
        let body = json!({
            "is_active": false,
            "updated_at": rfc3339(Utc::now()),
        });
        let clinic = self.patch(clinic_id, body, auth_token).await?;
        info!("Clinic {} deactivated", clinic_id);
        Ok(clinic)
    }

    pub async fn search_clinics(
        &self,
        query: ClinicSearchQuery,
        auth_token: Option<&str>,
    ) -> Result<Vec<Clinic>, ClinicError> {
        let mut query_parts = Vec::new();

        if !query.include_inactive.unwrap_or(false) {
            query_parts.push("is_active=eq.true".to_string());
        }
        if let Some(city) = query.city.as_deref().filter(|c| !c.trim().is_empty()) {
            query_parts.push(format!("city=ilike.*{}*", urlencoding::encode(city.trim())));
        }
        if let Some(specialty) = query.specialty.as_deref().filter(|s| !s.trim().is_empty()) {
            query_parts.push(format!("specialties=cs.{{{}}}", urlencoding::encode(specialty.trim())));
        }
        query_parts.push("order=name.asc".to_string());
        query_parts.push(format!("limit={}", query.limit.unwrap_or(20).clamp(1, 100)));
        query_parts.push(format!("offset={}", query.offset.unwrap_or(0).max(0)));

        let path = format!("/rest/v1/clinics?{}", query_parts.join("&"));
        debug!("Searching clinics: {}", path);

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            auth_token,
            None,
        ).await.map_err(|e| ClinicError::DatabaseError(e.to_string()))?;

        result.into_iter()
            .map(|row| serde_json::from_value(row)
                .map_err(|e| ClinicError::DatabaseError(format!("Failed to parse clinic: {}", e))))
            .collect()
    }

    async fn patch(&self, clinic_id: Uuid, body: Value, auth_token: &str) -> Result<Clinic, ClinicError> {
        let path = format!("/rest/v1/clinics?id=eq.{}", clinic_id);
        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(body),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| ClinicError::DatabaseError(e.to_string()))?;

        parse_single(result)
    }
}

fn parse_single(rows: Vec<Value>) -> Result<Clinic, ClinicError> {
    let row = rows.into_iter().next().ok_or(ClinicError::NotFound)?;
    serde_json::from_value(row)
        .map_err(|e| ClinicError::DatabaseError(format!("Failed to parse clinic: {}", e)))
}
