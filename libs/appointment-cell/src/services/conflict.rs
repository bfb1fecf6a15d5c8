use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;
use shared_utils::schedule::{rfc3339, TimeRange};

use crate::models::{Appointment, AppointmentError, AppointmentStatus, ConflictCheckResponse};

/// Active appointments overlapping `range`, ignoring `exclude`.
pub fn find_overlapping(
    range: &TimeRange,
    appointments: &[Appointment],
    exclude: Option<Uuid>,
) -> Vec<Appointment> {
    appointments
        .iter()
        .filter(|a| Some(a.id) != exclude)
        .filter(|a| a.status.is_active())
        .filter(|a| a.time_range().overlaps(range))
        .cloned()
        .collect()
}

pub struct ConflictDetectionService {
    supabase: Arc<SupabaseClient>,
}

impl ConflictDetectionService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Active appointments of the doctor that overlap `range`.
    pub async fn check_conflicts(
        &self,
        doctor_id: Uuid,
        range: &TimeRange,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<ConflictCheckResponse, AppointmentError> {
        debug!("Checking conflicts for doctor {} from {} to {}", doctor_id, range.start, range.end);

        let candidates = self
            .active_in_range("doctor_id", doctor_id, range, auth_token)
            .await?;
        let conflicting_appointments = find_overlapping(range, &candidates, exclude_appointment_id);

        if !conflicting_appointments.is_empty() {
            warn!("Conflict detected for doctor {} - {} conflicting appointments",
                  doctor_id, conflicting_appointments.len());
        }

        Ok(ConflictCheckResponse {
            has_conflict: !conflicting_appointments.is_empty(),
            conflicting_appointments,
        })
    }

    /// True when the patient already holds an active appointment overlapping
    /// `range`.
    pub async fn patient_has_conflict(
        &self,
        patient_id: Uuid,
        range: &TimeRange,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<bool, AppointmentError> {
        let candidates = self
            .active_in_range("patient_id", patient_id, range, auth_token)
            .await?;
        Ok(!find_overlapping(range, &candidates, exclude_appointment_id).is_empty())
    }

    async fn active_in_range(
        &self,
        column: &str,
        id: Uuid,
        range: &TimeRange,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?{}=eq.{}&status={}&scheduled_start_time=lt.{}&scheduled_end_time=gt.{}",
            column,
            id,
            AppointmentStatus::active_filter(),
            rfc3339(range.end),
            rfc3339(range.start),
        );

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        result.into_iter()
            .map(|row| serde_json::from_value(row)
                .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse appointment: {}", e))))
            .collect()
    }
}
