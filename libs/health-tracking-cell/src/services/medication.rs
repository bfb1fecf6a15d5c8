use chrono::{NaiveDate, Utc};
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_utils::schedule::rfc3339;
use shared_utils::validation::require_non_empty;

use crate::models::{
    validate_medication_dates, CreateMedicationRequest, HealthError, Medication,
    UpdateMedicationRequest,
};

pub struct MedicationService {
    supabase: SupabaseClient,
}

impl MedicationService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn create_medication(
        &self,
        patient_id: Uuid,
        request: CreateMedicationRequest,
        auth_token: &str,
    ) -> Result<Medication, HealthError> {
        let now = Utc::now();
        let start_date = request.start_date.unwrap_or_else(|| now.date_naive());
        request.validate(start_date)?;

        let body = json!({
            "patient_id": patient_id,
            "name": request.name.trim(),
            "dosage": request.dosage.trim(),
            "frequency": request.frequency.trim(),
            "instructions": request.instructions,
            "prescribed_by": request.prescribed_by,
            "start_date": start_date,
            "end_date": request.end_date,
            "is_active": true,
            "created_at": rfc3339(now),
            "updated_at": rfc3339(now),
        });

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/medications",
            Some(auth_token),
            Some(body),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| HealthError::DatabaseError(e.to_string()))?;

        let medication = parse_single(result)?;
        info!("Medication {} added for patient {}", medication.id, patient_id);
        Ok(medication)
    }

    pub async fn list_medications(
        &self,
        patient_id: Uuid,
        active_only: bool,
        auth_token: &str,
    ) -> Result<Vec<Medication>, HealthError> {
        debug!("Listing medications for patient {} (active only: {})", patient_id, active_only);

        let mut query_parts = vec![format!("patient_id=eq.{}", patient_id)];
        if active_only {
            query_parts.push("is_active=eq.true".to_string());
        }
        query_parts.push("order=start_date.desc".to_string());

        let path = format!("/rest/v1/medications?{}", query_parts.join("&"));
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| HealthError::DatabaseError(e.to_string()))?;

        result.into_iter()
            .map(|row| serde_json::from_value(row)
                .map_err(|e| HealthError::DatabaseError(format!("Failed to parse medication: {}", e))))
            .collect()
    }

    pub async fn get_medication(
        &self,
        patient_id: Uuid,
        medication_id: Uuid,
        auth_token: &str,
    ) -> Result<Medication, HealthError> {
        let path = format!("/rest/v1/medications?id=eq.{}&patient_id=eq.{}", medication_id, patient_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| HealthError::DatabaseError(e.to_string()))?;

        parse_single(result)
    }

    pub async fn update_medication(
        &self,
        patient_id: Uuid,
        medication_id: Uuid,
        request: UpdateMedicationRequest,
        auth_token: &str,
    ) -> Result<Medication, HealthError> {
        let current = self.get_medication(patient_id, medication_id, auth_token).await?;

        let mut update_data = Map::new();
        if let Some(dosage) = request.dosage {
            require_non_empty("dosage", &dosage).map_err(HealthError::ValidationError)?;
            update_data.insert("dosage".to_string(), json!(dosage.trim()));
        }
        if let Some(frequency) = request.frequency {
            require_non_empty("frequency", &frequency).map_err(HealthError::ValidationError)?;
            update_data.insert("frequency".to_string(), json!(frequency.trim()));
        }
        if let Some(instructions) = request.instructions {
            update_data.insert("instructions".to_string(), json!(instructions));
        }
        if let Some(end_date) = request.end_date {
            validate_medication_dates(current.start_date, Some(end_date))?;
            update_data.insert("end_date".to_string(), json!(end_date));
        }

        if update_data.is_empty() {
            return Err(HealthError::ValidationError("No fields to update".to_string()));
        }

        self.patch(&current, update_data, auth_token).await
    }

    /// Ends the course today. A course that has not started yet ends on its
    /// start date.
    pub async fn discontinue_medication(
        &self,
        patient_id: Uuid,
        medication_id: Uuid,
        today: NaiveDate,
        auth_token: &str,
    ) -> Result<Medication, HealthError> {
        let current = self.get_medication(patient_id, medication_id, auth_token).await?;
        if !current.is_active {
            warn!("Medication {} already discontinued", medication_id);
            return Err(HealthError::AlreadyDiscontinued);
        }

        let mut update_data = Map::new();
        update_data.insert("is_active".to_string(), json!(false));
        update_data.insert("end_date".to_string(), json!(today.max(current.start_date)));

        let medication = self.patch(&current, update_data, auth_token).await?;
        info!("Medication {} discontinued for patient {}", medication.id, patient_id);
        Ok(medication)
    }

    pub async fn delete_medication(
        &self,
        patient_id: Uuid,
        medication_id: Uuid,
        auth_token: &str,
    ) -> Result<(), HealthError> {
        let path = format!("/rest/v1/medications?id=eq.{}&patient_id=eq.{}", medication_id, patient_id);
        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::DELETE,
            &path,
            Some(auth_token),
            None,
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| HealthError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(HealthError::MedicationNotFound);
        }
        info!("Medication {} deleted for patient {}", medication_id, patient_id);
        Ok(())
    }

    async fn patch(
        &self,
        current: &Medication,
        mut update_data: Map<String, Value>,
        auth_token: &str,
    ) -> Result<Medication, HealthError> {
        update_data.insert("updated_at".to_string(), json!(rfc3339(Utc::now())));

        let path = format!("/rest/v1/medications?id=eq.{}&patient_id=eq.{}", current.id, current.patient_id);
        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(Value::Object(update_data)),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| HealthError::DatabaseError(e.to_string()))?;

        parse_single(result)
    }
}

fn parse_single(rows: Vec<Value>) -> Result<Medication, HealthError> {
    let row = rows.into_iter().next().ok_or(HealthError::MedicationNotFound)?;
    serde_json::from_value(row)
        .map_err(|e| HealthError::DatabaseError(format!("Failed to parse medication: {}", e)))
}
