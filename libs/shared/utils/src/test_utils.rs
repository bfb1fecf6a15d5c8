use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use base64::{Engine as _, engine::general_purpose};
use serde_json::json;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

use crate::schedule::rfc3339;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            supabase_service_role_key: "test-service-role-key".to_string(),
            server_port: 3000,
            audit_log_ttl_days: 90,
            sweep_interval_seconds: 300,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "patient".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, "doctor")
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }

    pub fn uuid(&self) -> Uuid {
        Uuid::parse_str(&self.id).unwrap_or_default()
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// Canned rows in the shape the store returns them.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn patient_response(patient_id: &str, email: &str, first_name: &str, last_name: &str) -> serde_json::Value {
        json!({
            "id": patient_id,
            "first_name": first_name,
            "last_name": last_name,
            "email": email,
            "phone_number": "+353 1 555 0100",
            "date_of_birth": "1990-01-01",
            "gender": "female",
            "address": "1 Main Street",
            "emergency_contact_name": null,
            "emergency_contact_phone": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    /// Clinic open 08:00-20:00 UTC every day.
    pub fn clinic_response(clinic_id: &str, specialties: &[&str]) -> serde_json::Value {
        let hours: Vec<serde_json::Value> = (0..7)
            .map(|day| json!({
                "day_of_week": day,
                "open_time": "08:00:00",
                "close_time": "20:00:00"
            }))
            .collect();

        json!({
            "id": clinic_id,
            "name": "Riverside Clinic",
            "address": "12 Quay Road",
            "city": "Dublin",
            "phone": "+353 1 555 0199",
            "email": "front-desk@riverside.example",
            "specialties": specialties,
            "operating_hours": hours,
            "utc_offset_minutes": 0,
            "is_active": true,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn doctor_response(doctor_id: &str, clinic_id: &str, specialty: &str) -> serde_json::Value {
        json!({
            "id": doctor_id,
            "first_name": "Aoife",
            "last_name": "Byrne",
            "email": "aoife.byrne@riverside.example",
            "specialty": specialty,
            "clinic_id": clinic_id,
            "bio": null,
            "license_number": "MCRN-004512",
            "years_experience": 12,
            "consultation_duration_minutes": 30,
            "is_accepting_patients": true,
            "rating": 4.7,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    /// Weekly availability window for one day, wall-clock `HH:MM:SS`.
    pub fn availability_response(doctor_id: &str, day_of_week: i32, start: &str, end: &str) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4(),
            "doctor_id": doctor_id,
            "day_of_week": day_of_week,
            "start_time": start,
            "end_time": end,
            "is_available": true,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    /// Availability 08:00-20:00 on every day of the week.
    pub fn full_week_availability(doctor_id: &str) -> serde_json::Value {
        let rows: Vec<serde_json::Value> = (0..7)
            .map(|day| Self::availability_response(doctor_id, day, "08:00:00", "20:00:00"))
            .collect();
        json!(rows)
    }

    pub fn appointment_response(
        appointment_id: &str,
        patient_id: &str,
        doctor_id: &str,
        clinic_id: &str,
        start: DateTime<Utc>,
        duration_minutes: i32,
        status: &str,
    ) -> serde_json::Value {
        let end = start + Duration::minutes(duration_minutes as i64);
        json!({
            "id": appointment_id,
            "confirmation_number": "APT-20240101-ABC234",
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "clinic_id": clinic_id,
            "appointment_type": "consultation",
            "reason": "Persistent cough",
            "scheduled_start_time": rfc3339(start),
            "duration_minutes": duration_minutes,
            "scheduled_end_time": rfc3339(end),
            "status": status,
            "patient_notes": null,
            "doctor_notes": null,
            "cancellation_reason": null,
            "cancelled_by": null,
            "cancelled_at": null,
            "rescheduled_from": null,
            "rescheduled_to": null,
            "confirmed_at": null,
            "actual_start_time": null,
            "actual_end_time": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn notification_response(user_id: &str, channel: &str, is_read: bool) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4(),
            "user_id": user_id,
            "channel": channel,
            "notification_type": "appointment_booked",
            "title": "Appointment booked",
            "message": "Your appointment is booked",
            "related_entity_type": "appointment",
            "related_entity_id": Uuid::new_v4(),
            "is_read": is_read,
            "read_at": null,
            "delivery_status": if channel == "in_app" { "sent" } else { "pending" },
            "created_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn error_response(message: &str, code: &str) -> serde_json::Value {
        json!({
            "message": message,
            "code": code
        })
    }
}
