use chrono::{NaiveDate, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use clinic_cell::{Clinic, ClinicError, ClinicService};
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_utils::schedule::{self, local_windows_overlap, rfc3339, TimeRange};

use crate::models::{
    availability_covers, compute_available_slots, AvailableSlot, BookedInterval,
    CreateAvailabilityRequest, Doctor, DoctorAvailability, DoctorError,
};
use crate::services::doctor::DoctorService;

/// Appointment statuses that hold a doctor's time.
const HOLDING_STATUSES: &str = "scheduled,confirmed,in_progress";

pub struct AvailabilityService {
    supabase: SupabaseClient,
    doctor_service: DoctorService,
    clinic_service: ClinicService,
}

impl AvailabilityService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            doctor_service: DoctorService::new(config),
            clinic_service: ClinicService::new(config),
        }
    }

    pub async fn get_availability(
        &self,
        doctor_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<Vec<DoctorAvailability>, DoctorError> {
        debug!("Fetching availability for doctor: {}", doctor_id);

        let path = format!(
            "/rest/v1/doctor_availability?doctor_id=eq.{}&order=day_of_week.asc,start_time.asc",
            doctor_id
        );
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            auth_token,
            None,
        ).await.map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        result.into_iter()
            .map(|row| serde_json::from_value(row)
                .map_err(|e| DoctorError::DatabaseError(format!("Failed to parse availability: {}", e))))
            .collect()
    }

    pub async fn create_availability(
        &self,
        doctor_id: Uuid,
        request: CreateAvailabilityRequest,
        auth_token: &str,
    ) -> Result<DoctorAvailability, DoctorError> {
        if !(0..=6).contains(&request.day_of_week) {
            return Err(DoctorError::ValidationError(
                "Day of week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
            ));
        }
        if request.start_time >= request.end_time {
            return Err(DoctorError::ValidationError("Start time must be before end time".to_string()));
        }

        // Profile must exist before it gets a schedule.
        self.doctor_service.get_doctor(doctor_id, Some(auth_token)).await?;

        let existing = self.get_availability(doctor_id, Some(auth_token)).await?;
        let overlapping = existing.iter().any(|a| {
            a.day_of_week == request.day_of_week
                && local_windows_overlap((a.start_time, a.end_time), (request.start_time, request.end_time))
        });
        if overlapping {
            warn!("Overlapping availability rejected for doctor {} on day {}", doctor_id, request.day_of_week);
            return Err(DoctorError::ValidationError(
                "Availability overlaps an existing window on the same day".to_string(),
            ));
        }

        let now = rfc3339(Utc::now());
        let availability_data = json!({
            "doctor_id": doctor_id,
            "day_of_week": request.day_of_week,
            "start_time": request.start_time.format("%H:%M:%S").to_string(),
            "end_time": request.end_time.format("%H:%M:%S").to_string(),
            "is_available": true,
            "created_at": now,
            "updated_at": now,
        });

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/doctor_availability",
            Some(auth_token),
            Some(availability_data),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        let row = result.into_iter().next()
            .ok_or_else(|| DoctorError::DatabaseError("Failed to create availability".to_string()))?;
        let availability: DoctorAvailability = serde_json::from_value(row)
            .map_err(|e| DoctorError::DatabaseError(format!("Failed to parse availability: {}", e)))?;

        info!("Availability {} created for doctor {}", availability.id, doctor_id);
        Ok(availability)
    }

    pub async fn delete_availability(
        &self,
        doctor_id: Uuid,
        availability_id: Uuid,
        auth_token: &str,
    ) -> Result<(), DoctorError> {
        let path = format!(
            "/rest/v1/doctor_availability?id=eq.{}&doctor_id=eq.{}",
            availability_id, doctor_id
        );
        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::DELETE,
            &path,
            Some(auth_token),
            None,
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(DoctorError::AvailabilityNotFound);
        }
        info!("Availability {} deleted for doctor {}", availability_id, doctor_id);
        Ok(())
    }

    /// Active appointments of the doctor overlapping `range`.
    pub async fn booked_intervals(
        &self,
        doctor_id: Uuid,
        range: &TimeRange,
        auth_token: Option<&str>,
    ) -> Result<Vec<TimeRange>, DoctorError> {
        let path = format!(
            "/rest/v1/appointments?select=scheduled_start_time,scheduled_end_time&doctor_id=eq.{}&status=in.({})&scheduled_start_time=lt.{}&scheduled_end_time=gt.{}",
            doctor_id,
            HOLDING_STATUSES,
            rfc3339(range.end),
            rfc3339(range.start),
        );
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            auth_token,
            None,
        ).await.map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        let intervals = result.into_iter()
            .map(|row| serde_json::from_value::<BookedInterval>(row)
                .map_err(|e| DoctorError::DatabaseError(format!("Failed to parse appointment: {}", e))))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(intervals.iter().filter_map(BookedInterval::range).collect())
    }

    /// Bookable slots for the doctor on a clinic-local date.
    pub async fn get_available_slots(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: Option<&str>,
    ) -> Result<Vec<AvailableSlot>, DoctorError> {
        debug!("Calculating available slots for doctor {} on {}", doctor_id, date);

        let doctor = self.doctor_service.get_doctor(doctor_id, auth_token).await?;
        if !doctor.is_accepting_patients {
            return Ok(Vec::new());
        }
        let clinic = self.clinic_for(&doctor, auth_token).await?;
        if !clinic.is_active {
            return Ok(Vec::new());
        }

        let availability = self.get_availability(doctor_id, auth_token).await?;

        let Some(offset) = schedule::clinic_offset(clinic.utc_offset_minutes) else {
            return Ok(Vec::new());
        };
        let Some(day) = schedule::local_day(date, offset) else {
            return Ok(Vec::new());
        };

        let booked = self.booked_intervals(doctor_id, &day, auth_token).await?;

        Ok(compute_available_slots(
            &availability,
            &clinic,
            date,
            doctor.consultation_duration_minutes,
            &booked,
            Utc::now(),
        ))
    }

    /// True when the doctor's weekly schedule covers the whole range.
    pub async fn is_available_for(
        &self,
        doctor: &Doctor,
        clinic: &Clinic,
        range: &TimeRange,
        auth_token: &str,
    ) -> Result<bool, DoctorError> {
        let availability = self.get_availability(doctor.id, Some(auth_token)).await?;
        Ok(availability_covers(&availability, clinic, range))
    }

    async fn clinic_for(&self, doctor: &Doctor, auth_token: Option<&str>) -> Result<Clinic, DoctorError> {
        self.clinic_service.get_clinic(doctor.clinic_id, auth_token)
            .await
            .map_err(|e| match e {
                ClinicError::NotFound => DoctorError::ClinicNotFound,
                other => DoctorError::DatabaseError(other.to_string()),
            })
    }
}
