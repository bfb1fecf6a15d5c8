// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use clinic_cell::{Clinic, ClinicError, ClinicService};
use doctor_cell::{AvailabilityService, Doctor, DoctorError, DoctorService};
use patient_cell::{PatientError, PatientService};
use shared_config::AppConfig;
use shared_database::supabase::{SupabaseClient, SupabaseError};
use shared_models::auth::User;
use shared_utils::schedule::{rfc3339, TimeRange};

use crate::models::{
    Appointment, AppointmentError, AppointmentSearchQuery, AppointmentStats, AppointmentStatus,
    AppointmentValidationRules, BookAppointmentRequest, CancelAppointmentRequest,
    CompleteAppointmentRequest, ConflictCheckQuery, ConflictCheckResponse,
    RescheduleAppointmentRequest, StatsQuery,
};
use crate::services::confirmation::{generate_confirmation_number, is_valid_confirmation_number};
use crate::services::conflict::ConflictDetectionService;
use crate::services::events::{AppointmentEvent, AppointmentEventPublisher};
use crate::services::lifecycle::AppointmentLifecycleService;

/// Both halves of a reschedule.
#[derive(Debug, Clone, Serialize)]
pub struct RescheduleOutcome {
    pub original: Appointment,
    pub appointment: Appointment,
}

/// Fields copied onto a newly inserted appointment row.
struct NewAppointment<'a> {
    patient_id: Uuid,
    doctor_id: Uuid,
    clinic_id: Uuid,
    appointment_type: crate::models::AppointmentType,
    reason: Option<&'a str>,
    patient_notes: Option<&'a str>,
    range: TimeRange,
    rescheduled_from: Option<Uuid>,
}

pub struct AppointmentBookingService {
    supabase: Arc<SupabaseClient>,
    conflict_service: ConflictDetectionService,
    lifecycle_service: AppointmentLifecycleService,
    doctor_service: DoctorService,
    availability_service: AvailabilityService,
    clinic_service: ClinicService,
    patient_service: PatientService,
    events: AppointmentEventPublisher,
    validation_rules: AppointmentValidationRules,
}

impl AppointmentBookingService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        let validation_rules = AppointmentValidationRules::default();

        Self {
            conflict_service: ConflictDetectionService::new(Arc::clone(&supabase)),
            lifecycle_service: AppointmentLifecycleService::with_early_start(validation_rules.early_start_minutes),
            doctor_service: DoctorService::new(config),
            availability_service: AvailabilityService::new(config),
            clinic_service: ClinicService::new(config),
            patient_service: PatientService::new(config),
            events: AppointmentEventPublisher::new(config),
            supabase,
            validation_rules,
        }
    }

    // ==========================================================================
    // BOOKING
    // ==========================================================================

    pub async fn book_appointment(
        &self,
        patient_id: Uuid,
        request: BookAppointmentRequest,
        actor: &User,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        info!("Booking appointment for patient {} with doctor {}", patient_id, request.doctor_id);

        if actor.is_doctor() && request.doctor_id.to_string() != actor.id {
            warn!("Doctor {} tried to book on the calendar of doctor {}", actor.id, request.doctor_id);
            return Err(AppointmentError::Unauthorized);
        }

        let doctor = self.load_doctor(request.doctor_id, auth_token).await?;
        if !doctor.is_accepting_patients {
            warn!("Doctor {} is not accepting patients", doctor.id);
            return Err(AppointmentError::DoctorNotAcceptingPatients);
        }

        let duration = request.duration_minutes.unwrap_or(doctor.consultation_duration_minutes);
        let range = self.validation_rules.validate_range(request.scheduled_start_time, duration, Utc::now())?;

        self.patient_service.get_patient(patient_id, auth_token)
            .await
            .map_err(|e| match e {
                PatientError::NotFound => AppointmentError::PatientNotFound,
                other => AppointmentError::DatabaseError(other.to_string()),
            })?;

        let clinic_id = request.clinic_id.unwrap_or(doctor.clinic_id);
        let clinic = self.validate_slot(&doctor, clinic_id, patient_id, &range, None, auth_token).await?;

        let appointment = self.insert_appointment(
            NewAppointment {
                patient_id,
                doctor_id: doctor.id,
                clinic_id: clinic.id,
                appointment_type: request.appointment_type.unwrap_or_default(),
                reason: request.reason.as_deref(),
                patient_notes: request.patient_notes.as_deref(),
                range,
                rescheduled_from: None,
            },
            auth_token,
        ).await?;

        info!("Appointment {} booked ({})", appointment.id, appointment.confirmation_number);
        self.events.publish(AppointmentEvent::Booked, &appointment, Some(&actor.id), auth_token).await;

        Ok(appointment)
    }

    /// Runs every check a new range must pass: clinic, opening hours, doctor
    /// schedule, doctor conflicts and patient conflicts.
    async fn validate_slot(
        &self,
        doctor: &Doctor,
        clinic_id: Uuid,
        patient_id: Uuid,
        range: &TimeRange,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Clinic, AppointmentError> {
        if clinic_id != doctor.clinic_id {
            return Err(AppointmentError::ValidationError(
                "Doctor does not practise at the requested clinic".to_string(),
            ));
        }

        let clinic = self.clinic_service.get_active_clinic(clinic_id, auth_token)
            .await
            .map_err(|e| match e {
                ClinicError::NotFound => AppointmentError::ClinicNotFound,
                ClinicError::Inactive => AppointmentError::ClinicInactive,
                other => AppointmentError::DatabaseError(other.to_string()),
            })?;

        if !clinic.is_open_for(range) {
            warn!("Clinic {} closed for {} - {}", clinic.id, range.start, range.end);
            return Err(AppointmentError::ClinicClosed);
        }

        let available = self.availability_service.is_available_for(doctor, &clinic, range, auth_token)
            .await
            .map_err(map_doctor_error)?;
        if !available {
            warn!("Doctor {} not available for {} - {}", doctor.id, range.start, range.end);
            return Err(AppointmentError::DoctorNotAvailable);
        }

        let conflicts = self.conflict_service
            .check_conflicts(doctor.id, range, exclude_appointment_id, auth_token)
            .await?;
        if conflicts.has_conflict {
            return Err(AppointmentError::ConflictDetected);
        }

        if self.conflict_service
            .patient_has_conflict(patient_id, range, exclude_appointment_id, auth_token)
            .await?
        {
            warn!("Patient {} already booked during {} - {}", patient_id, range.start, range.end);
            return Err(AppointmentError::PatientConflict);
        }

        Ok(clinic)
    }

    /// Inserts a `scheduled` row. A collision on the confirmation number is
    /// retried with a fresh number; any other unique violation is the
    /// double-booking index rejecting the slot.
    async fn insert_appointment(
        &self,
        new: NewAppointment<'_>,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let attempts = self.validation_rules.confirmation_attempts;

        for attempt in 1..=attempts {
            let now = Utc::now();
            let confirmation_number = generate_confirmation_number(now.date_naive(), &mut rand::thread_rng());

            let body = json!({
                "confirmation_number": confirmation_number,
                "patient_id": new.patient_id,
                "doctor_id": new.doctor_id,
                "clinic_id": new.clinic_id,
                "appointment_type": new.appointment_type,
                "reason": new.reason,
                "scheduled_start_time": rfc3339(new.range.start),
                "duration_minutes": new.range.duration_minutes(),
                "scheduled_end_time": rfc3339(new.range.end),
                "status": AppointmentStatus::Scheduled,
                "patient_notes": new.patient_notes,
                "rescheduled_from": new.rescheduled_from,
                "created_at": rfc3339(now),
                "updated_at": rfc3339(now),
            });

            let result: anyhow::Result<Vec<Value>> = self.supabase.request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(auth_token),
                Some(body),
                Some(SupabaseClient::return_representation()),
            ).await;

            match result {
                Ok(rows) => return parse_single(rows),
                Err(e) => match SupabaseError::conflict_message(&e) {
                    Some(message) if message.contains("confirmation_number") => {
                        warn!("Confirmation number collision on attempt {}/{}", attempt, attempts);
                        continue;
                    }
                    Some(_) => {
                        warn!("Store rejected overlapping booking for doctor {}", new.doctor_id);
                        return Err(AppointmentError::ConflictDetected);
                    }
                    None => return Err(AppointmentError::DatabaseError(e.to_string())),
                },
            }
        }

        error!("Could not allocate a unique confirmation number after {} attempts", attempts);
        Err(AppointmentError::DatabaseError(
            "Could not allocate a unique confirmation number".to_string(),
        ))
    }

    // ==========================================================================
    // READS
    // ==========================================================================

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.fetch_appointment(appointment_id, auth_token).await?;
        ensure_can_view(&appointment, user)?;
        Ok(self.refresh_missed(appointment, auth_token).await)
    }

    pub async fn get_appointment_by_confirmation(
        &self,
        confirmation_number: &str,
        user: &User,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let confirmation_number = confirmation_number.trim().to_ascii_uppercase();
        if !is_valid_confirmation_number(&confirmation_number) {
            return Err(AppointmentError::NotFound);
        }

        let path = format!("/rest/v1/appointments?confirmation_number=eq.{}", confirmation_number);
        let rows: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let appointment = parse_single(rows)?;
        ensure_can_view(&appointment, user)?;
        Ok(self.refresh_missed(appointment, auth_token).await)
    }

    pub async fn search_appointments(
        &self,
        query: AppointmentSearchQuery,
        user: &User,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let (patient_id, doctor_id) = scope_to_user(user, query.patient_id, query.doctor_id)?;

        let mut query_parts = Vec::new();
        if let Some(patient_id) = patient_id {
            query_parts.push(format!("patient_id=eq.{}", patient_id));
        }
        if let Some(doctor_id) = doctor_id {
            query_parts.push(format!("doctor_id=eq.{}", doctor_id));
        }
        if let Some(clinic_id) = query.clinic_id {
            query_parts.push(format!("clinic_id=eq.{}", clinic_id));
        }
        if let Some(status) = query.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        if let Some(from_date) = query.from_date {
            query_parts.push(format!("scheduled_start_time=gte.{}", rfc3339(from_date)));
        }
        if let Some(to_date) = query.to_date {
            query_parts.push(format!("scheduled_start_time=lt.{}", rfc3339(to_date)));
        }
        query_parts.push("order=scheduled_start_time.asc".to_string());
        query_parts.push(format!("limit={}", query.limit.unwrap_or(50).clamp(1, 200)));
        query_parts.push(format!("offset={}", query.offset.unwrap_or(0).max(0)));

        let appointments = self.fetch_many(&query_parts, auth_token).await?;
        Ok(self.refresh_missed_many(appointments, auth_token).await)
    }

    /// Active appointments of the caller that have not started yet.
    pub async fn get_upcoming_appointments(
        &self,
        user: &User,
        limit: Option<i32>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut query_parts = Vec::new();
        if user.is_patient() {
            query_parts.push(format!("patient_id=eq.{}", user.id));
        } else if user.is_doctor() {
            query_parts.push(format!("doctor_id=eq.{}", user.id));
        } else if !user.is_admin() {
            return Err(AppointmentError::Unauthorized);
        }
        query_parts.push(format!("status={}", AppointmentStatus::active_filter()));
        query_parts.push(format!("scheduled_start_time=gte.{}", rfc3339(Utc::now())));
        query_parts.push("order=scheduled_start_time.asc".to_string());
        query_parts.push(format!("limit={}", limit.unwrap_or(10).clamp(1, 100)));

        self.fetch_many(&query_parts, auth_token).await
    }

    pub async fn check_conflicts(
        &self,
        query: ConflictCheckQuery,
        auth_token: &str,
    ) -> Result<ConflictCheckResponse, AppointmentError> {
        if query.duration_minutes <= 0 {
            return Err(AppointmentError::ValidationError("Duration must be positive".to_string()));
        }
        let range = TimeRange::from_duration(query.start_time, query.duration_minutes);
        self.conflict_service
            .check_conflicts(query.doctor_id, &range, query.exclude_appointment_id, auth_token)
            .await
    }

    /// Counts per status over the caller's visible appointments. Stale
    /// `scheduled` rows are counted as missed.
    pub async fn get_appointment_stats(
        &self,
        query: StatsQuery,
        user: &User,
        auth_token: &str,
    ) -> Result<AppointmentStats, AppointmentError> {
        let (patient_id, doctor_id) = scope_to_user(user, query.patient_id, query.doctor_id)?;

        let mut query_parts = Vec::new();
        if let Some(patient_id) = patient_id {
            query_parts.push(format!("patient_id=eq.{}", patient_id));
        }
        if let Some(doctor_id) = doctor_id {
            query_parts.push(format!("doctor_id=eq.{}", doctor_id));
        }
        if let Some(clinic_id) = query.clinic_id {
            query_parts.push(format!("clinic_id=eq.{}", clinic_id));
        }
        if let Some(from_date) = query.from_date {
            query_parts.push(format!("scheduled_start_time=gte.{}", rfc3339(from_date)));
        }
        if let Some(to_date) = query.to_date {
            query_parts.push(format!("scheduled_start_time=lt.{}", rfc3339(to_date)));
        }

        let now = Utc::now();
        let mut appointments = self.fetch_many(&query_parts, auth_token).await?;
        for appointment in appointments.iter_mut() {
            if self.lifecycle_service.should_mark_missed(appointment, now) {
                appointment.status = AppointmentStatus::Missed;
            }
        }

        Ok(AppointmentStats::from_appointments(&appointments))
    }

    // ==========================================================================
    // LIFECYCLE
    // ==========================================================================

    pub async fn confirm_appointment(
        &self,
        appointment_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.get_appointment(appointment_id, user, auth_token).await?;
        ensure_treating_doctor(&appointment, user)?;
        self.lifecycle_service.validate_status_transition(appointment.status, AppointmentStatus::Confirmed)?;

        let now = Utc::now();
        let mut fields = Map::new();
        fields.insert("confirmed_at".to_string(), json!(rfc3339(now)));

        let confirmed = self.transition(&appointment, AppointmentStatus::Confirmed, fields, auth_token).await?;
        self.events.publish(AppointmentEvent::Confirmed, &confirmed, Some(&user.id), auth_token).await;
        Ok(confirmed)
    }

    pub async fn start_appointment(
        &self,
        appointment_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.get_appointment(appointment_id, user, auth_token).await?;
        ensure_treating_doctor(&appointment, user)?;

        let now = Utc::now();
        self.lifecycle_service.can_start(&appointment, now)?;

        let mut fields = Map::new();
        fields.insert("actual_start_time".to_string(), json!(rfc3339(now)));

        let started = self.transition(&appointment, AppointmentStatus::InProgress, fields, auth_token).await?;
        self.events.publish(AppointmentEvent::Started, &started, Some(&user.id), auth_token).await;
        Ok(started)
    }

    pub async fn complete_appointment(
        &self,
        appointment_id: Uuid,
        request: CompleteAppointmentRequest,
        user: &User,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.get_appointment(appointment_id, user, auth_token).await?;
        ensure_treating_doctor(&appointment, user)?;
        self.lifecycle_service.validate_status_transition(appointment.status, AppointmentStatus::Completed)?;

        let mut fields = Map::new();
        fields.insert("actual_end_time".to_string(), json!(rfc3339(Utc::now())));
        if let Some(notes) = request.doctor_notes {
            fields.insert("doctor_notes".to_string(), json!(notes));
        }

        let completed = self.transition(&appointment, AppointmentStatus::Completed, fields, auth_token).await?;
        self.events.publish(AppointmentEvent::Completed, &completed, Some(&user.id), auth_token).await;
        Ok(completed)
    }

    /// Cancelling twice is rejected with `AlreadyCancelled` and sends
    /// nothing.
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
        user: &User,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        if request.reason.trim().is_empty() {
            return Err(AppointmentError::ValidationError("Cancellation reason is required".to_string()));
        }

        let appointment = self.get_appointment(appointment_id, user, auth_token).await?;
        self.lifecycle_service.validate_status_transition(appointment.status, AppointmentStatus::Cancelled)?;

        let now = Utc::now();
        let mut fields = Map::new();
        fields.insert("cancellation_reason".to_string(), json!(request.reason.trim()));
        fields.insert("cancelled_by".to_string(), json!(user.id));
        fields.insert("cancelled_at".to_string(), json!(rfc3339(now)));

        let cancelled = match self.transition(&appointment, AppointmentStatus::Cancelled, fields, auth_token).await {
            Ok(cancelled) => cancelled,
            Err(AppointmentError::InvalidStatusTransition { .. }) => {
                // Lost a race; report a concurrent cancel the same way as a repeated one.
                let current = self.fetch_appointment(appointment_id, auth_token).await?;
                if current.status == AppointmentStatus::Cancelled {
                    return Err(AppointmentError::AlreadyCancelled);
                }
                return Err(AppointmentError::InvalidStatusTransition {
                    from: current.status,
                    to: AppointmentStatus::Cancelled,
                });
            }
            Err(e) => return Err(e),
        };

        self.events.publish(AppointmentEvent::Cancelled, &cancelled, Some(&user.id), auth_token).await;
        Ok(cancelled)
    }

    /// Retires the original as `rescheduled` before inserting the new slot,
    /// so the store's overlap constraint never sees both rows active. If the
    /// insert fails the original goes back to its previous status.
    pub async fn reschedule_appointment(
        &self,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
        user: &User,
        auth_token: &str,
    ) -> Result<RescheduleOutcome, AppointmentError> {
        let original = self.get_appointment(appointment_id, user, auth_token).await?;
        self.lifecycle_service.validate_status_transition(original.status, AppointmentStatus::Rescheduled)?;

        let doctor = self.load_doctor(original.doctor_id, auth_token).await?;
        let duration = request.new_duration_minutes.unwrap_or(original.duration_minutes);
        let range = self.validation_rules.validate_range(request.new_start_time, duration, Utc::now())?;

        self.validate_slot(&doctor, original.clinic_id, original.patient_id, &range, Some(original.id), auth_token)
            .await?;

        let retired = self.transition(&original, AppointmentStatus::Rescheduled, Map::new(), auth_token).await?;

        let inserted = self.insert_appointment(
            NewAppointment {
                patient_id: original.patient_id,
                doctor_id: original.doctor_id,
                clinic_id: original.clinic_id,
                appointment_type: original.appointment_type,
                reason: request.reason.as_deref().or(original.reason.as_deref()),
                patient_notes: original.patient_notes.as_deref(),
                range,
                rescheduled_from: Some(original.id),
            },
            auth_token,
        ).await;

        let replacement = match inserted {
            Ok(replacement) => replacement,
            Err(e) => {
                warn!("Replacement for appointment {} rejected: {}", original.id, e);
                self.restore(&retired, original.status, auth_token).await;
                return Err(e);
            }
        };

        let retired = self.link_replacement(retired, replacement.id, auth_token).await;

        info!("Appointment {} rescheduled to {}", retired.id, replacement.id);
        self.events.publish(AppointmentEvent::Rescheduled, &replacement, Some(&user.id), auth_token).await;

        Ok(RescheduleOutcome {
            original: retired,
            appointment: replacement,
        })
    }

    /// Doctor-reported no-show.
    pub async fn mark_appointment_missed(
        &self,
        appointment_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.get_appointment(appointment_id, user, auth_token).await?;
        ensure_treating_doctor(&appointment, user)?;
        self.lifecycle_service.can_mark_missed(&appointment, Utc::now())?;

        let missed = self.transition(&appointment, AppointmentStatus::Missed, Map::new(), auth_token).await?;
        self.events.publish(AppointmentEvent::Missed, &missed, Some(&user.id), auth_token).await;
        Ok(missed)
    }

    /// Moves every `scheduled` appointment whose end has passed to `missed`.
    #[instrument(skip(self, auth_token))]
    pub async fn mark_missed_appointments(
        &self,
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<usize, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?status=eq.{}&scheduled_end_time=lte.{}",
            AppointmentStatus::Scheduled,
            rfc3339(now)
        );
        let body = json!({
            "status": AppointmentStatus::Missed,
            "updated_at": rfc3339(now),
        });

        let rows: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(body),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let missed = parse_many(rows)?;
        for appointment in &missed {
            self.events.publish(AppointmentEvent::Missed, appointment, None, auth_token).await;
        }

        if !missed.is_empty() {
            info!("Marked {} appointments as missed", missed.len());
        }
        Ok(missed.len())
    }

    // ==========================================================================
    // HELPERS
    // ==========================================================================

    async fn load_doctor(&self, doctor_id: Uuid, auth_token: &str) -> Result<Doctor, AppointmentError> {
        self.doctor_service.get_doctor(doctor_id, Some(auth_token))
            .await
            .map_err(map_doctor_error)
    }

    async fn fetch_appointment(&self, appointment_id: Uuid, auth_token: &str) -> Result<Appointment, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let rows: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        parse_single(rows)
    }

    async fn fetch_many(&self, query_parts: &[String], auth_token: &str) -> Result<Vec<Appointment>, AppointmentError> {
        let path = if query_parts.is_empty() {
            "/rest/v1/appointments".to_string()
        } else {
            format!("/rest/v1/appointments?{}", query_parts.join("&"))
        };
        debug!("Fetching appointments: {}", path);

        let rows: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        parse_many(rows)
    }

    /// Conditional update: only applies while the row is still in the
    /// status it was read in.
    async fn transition(
        &self,
        appointment: &Appointment,
        new_status: AppointmentStatus,
        mut fields: Map<String, Value>,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        fields.insert("status".to_string(), json!(new_status));
        fields.insert("updated_at".to_string(), json!(rfc3339(Utc::now())));

        let path = format!(
            "/rest/v1/appointments?id=eq.{}&status=eq.{}",
            appointment.id, appointment.status
        );
        let rows: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(Value::Object(fields)),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        if rows.is_empty() {
            warn!("Appointment {} changed status concurrently", appointment.id);
            return Err(AppointmentError::InvalidStatusTransition {
                from: appointment.status,
                to: new_status,
            });
        }

        let updated = parse_single(rows)?;
        info!("Appointment {} moved {} -> {}", updated.id, appointment.status, updated.status);
        Ok(updated)
    }

    /// Applies the missed rule to a single appointment read.
    async fn refresh_missed(&self, appointment: Appointment, auth_token: &str) -> Appointment {
        if !self.lifecycle_service.should_mark_missed(&appointment, Utc::now()) {
            return appointment;
        }

        match self.transition(&appointment, AppointmentStatus::Missed, Map::new(), auth_token).await {
            Ok(missed) => {
                self.events.publish(AppointmentEvent::Missed, &missed, None, auth_token).await;
                missed
            }
            Err(e) => {
                warn!("Could not mark appointment {} as missed: {}", appointment.id, e);
                appointment
            }
        }
    }

    /// Applies the missed rule to a page of appointments with one update.
    async fn refresh_missed_many(&self, mut appointments: Vec<Appointment>, auth_token: &str) -> Vec<Appointment> {
        let now = Utc::now();
        let stale: Vec<String> = appointments.iter()
            .filter(|a| self.lifecycle_service.should_mark_missed(a, now))
            .map(|a| a.id.to_string())
            .collect();
        if stale.is_empty() {
            return appointments;
        }

        let path = format!(
            "/rest/v1/appointments?id=in.({})&status=eq.{}",
            stale.join(","),
            AppointmentStatus::Scheduled
        );
        let body = json!({
            "status": AppointmentStatus::Missed,
            "updated_at": rfc3339(now),
        });

        let result: anyhow::Result<Vec<Value>> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(body),
            Some(SupabaseClient::return_representation()),
        ).await;

        let updated = match result.map_err(|e| AppointmentError::DatabaseError(e.to_string())).and_then(parse_many) {
            Ok(updated) => updated,
            Err(e) => {
                warn!("Could not mark {} appointments as missed: {}", stale.len(), e);
                return appointments;
            }
        };

        for missed in updated {
            self.events.publish(AppointmentEvent::Missed, &missed, None, auth_token).await;
            if let Some(slot) = appointments.iter_mut().find(|a| a.id == missed.id) {
                *slot = missed;
            }
        }
        appointments
    }

    /// Puts a retired appointment back after its replacement was rejected.
    async fn restore(&self, retired: &Appointment, previous: AppointmentStatus, auth_token: &str) {
        match self.transition(retired, previous, Map::new(), auth_token).await {
            Ok(_) => info!("Appointment {} restored to {}", retired.id, previous),
            Err(e) => error!("Failed to restore appointment {} to {}: {}", retired.id, previous, e),
        }
    }

    /// Points the retired row at its replacement. The replacement already
    /// carries `rescheduled_from`, so a failure here is logged, not returned.
    async fn link_replacement(&self, retired: Appointment, replacement_id: Uuid, auth_token: &str) -> Appointment {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&status=eq.{}",
            retired.id,
            AppointmentStatus::Rescheduled
        );
        let body = json!({
            "rescheduled_to": replacement_id,
            "updated_at": rfc3339(Utc::now()),
        });

        let result: anyhow::Result<Vec<Value>> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(body),
            Some(SupabaseClient::return_representation()),
        ).await;

        match result.map_err(|e| AppointmentError::DatabaseError(e.to_string())).and_then(parse_single) {
            Ok(linked) => linked,
            Err(e) => {
                error!("Failed to link appointment {} to replacement {}: {}", retired.id, replacement_id, e);
                retired
            }
        }
    }
}

// ==============================================================================
// AUTHORIZATION
// ==============================================================================

/// Patients and doctors see appointments they take part in; admins see all.
pub fn ensure_can_view(appointment: &Appointment, user: &User) -> Result<(), AppointmentError> {
    if user.is_admin() || appointment.is_participant(&user.id) {
        return Ok(());
    }
    warn!("User {} denied access to appointment {}", user.id, appointment.id);
    Err(AppointmentError::Unauthorized)
}

/// Clinical transitions are reserved for the appointment's doctor or an admin.
pub fn ensure_treating_doctor(appointment: &Appointment, user: &User) -> Result<(), AppointmentError> {
    if user.is_admin() || (user.is_doctor() && appointment.doctor_id.to_string() == user.id) {
        return Ok(());
    }
    Err(AppointmentError::Unauthorized)
}

/// Narrows patient/doctor filters to what the caller may see.
pub fn scope_to_user(
    user: &User,
    patient_id: Option<Uuid>,
    doctor_id: Option<Uuid>,
) -> Result<(Option<Uuid>, Option<Uuid>), AppointmentError> {
    if user.is_admin() {
        return Ok((patient_id, doctor_id));
    }
    let own_id = Uuid::parse_str(&user.id).map_err(|_| AppointmentError::Unauthorized)?;

    if user.is_doctor() {
        if doctor_id.is_some_and(|id| id != own_id) {
            return Err(AppointmentError::Unauthorized);
        }
        return Ok((patient_id, Some(own_id)));
    }
    if user.is_patient() {
        if patient_id.is_some_and(|id| id != own_id) {
            return Err(AppointmentError::Unauthorized);
        }
        return Ok((Some(own_id), doctor_id));
    }
    Err(AppointmentError::Unauthorized)
}

fn map_doctor_error(e: DoctorError) -> AppointmentError {
    match e {
        DoctorError::NotFound => AppointmentError::DoctorNotFound,
        DoctorError::ClinicNotFound => AppointmentError::ClinicNotFound,
        DoctorError::NotAcceptingPatients => AppointmentError::DoctorNotAcceptingPatients,
        other => AppointmentError::DatabaseError(other.to_string()),
    }
}

fn parse_single(rows: Vec<Value>) -> Result<Appointment, AppointmentError> {
    let row = rows.into_iter().next().ok_or(AppointmentError::NotFound)?;
    serde_json::from_value(row)
        .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse appointment: {}", e)))
}

fn parse_many(rows: Vec<Value>) -> Result<Vec<Appointment>, AppointmentError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row)
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse appointment: {}", e))))
        .collect()
}
