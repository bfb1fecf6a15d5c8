use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::{appointment_routes, AppointmentBookingService};
use shared_utils::schedule::rfc3339;
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};

fn app_for(server: &MockServer) -> (Router, TestConfig) {
    let config = TestConfig::with_supabase_url(&server.uri());
    (appointment_routes(config.to_arc()), config)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Tomorrow at `hour`:00 UTC, inside the mocked clinic hours.
fn tomorrow_at(hour: u32) -> DateTime<Utc> {
    (Utc::now().date_naive() + Duration::days(1))
        .and_hms_opt(hour, 0, 0)
        .unwrap()
        .and_utc()
}

fn authed(method: &str, uri: &str, token: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Bearer {}", token));
    match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Doctor, clinic, patient and weekly availability lookups used by booking
/// and rescheduling.
async fn mount_booking_context(server: &MockServer, patient_id: &str, doctor_id: &str, clinic_id: &str) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .and(query_param("id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::doctor_response(doctor_id, clinic_id, "General Practice")
        ])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .and(query_param("id", format!("eq.{}", patient_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::patient_response(patient_id, "niamh@example.com", "Niamh", "Kelly")
        ])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/clinics"))
        .and(query_param("id", format!("eq.{}", clinic_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::clinic_response(clinic_id, &["General Practice"])
        ])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_availability"))
        .respond_with(ResponseTemplate::new(200)
            .set_body_json(MockSupabaseResponses::full_week_availability(doctor_id)))
        .mount(server)
        .await;
}

async fn mount_patient_free(server: &MockServer, patient_id: &str) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("patient_id", format!("eq.{}", patient_id)))
        .and(query_param("status", "in.(scheduled,confirmed,in_progress)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

async fn mount_audit(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/rest/v1/audit_logs"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{}])))
        .mount(server)
        .await;
}

async fn mount_appointment(server: &MockServer, row: Value) {
    let id = row["id"].as_str().unwrap().to_string();
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
        .mount(server)
        .await;
}

/// Expects exactly `times` notifications of `notification_type` to `user_id`.
async fn expect_notification(server: &MockServer, user_id: &str, notification_type: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .and(body_partial_json(json!({ "user_id": user_id, "notification_type": notification_type })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::notification_response(user_id, "in_app", false)
        ])))
        .expect(times)
        .mount(server)
        .await;
}

/// No other bookings on the doctor's calendar.
async fn mount_open_calendar(server: &MockServer, doctor_id: &str) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

fn confirmation_collision() -> ResponseTemplate {
    ResponseTemplate::new(409).set_body_json(MockSupabaseResponses::error_response(
        "duplicate key value violates unique constraint \"appointments_confirmation_number_key\"",
        "23505",
    ))
}

#[tokio::test]
async fn patient_books_open_slot() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("niamh@example.com");
    let doctor_id = Uuid::new_v4().to_string();
    let clinic_id = Uuid::new_v4().to_string();
    let appointment_id = Uuid::new_v4().to_string();
    let start = tomorrow_at(10);

    mount_booking_context(&mock_server, &patient.id, &doctor_id, &clinic_id).await;
    mount_patient_free(&mock_server, &patient.id).await;
    mount_audit(&mock_server).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({
            "patient_id": patient.id,
            "doctor_id": doctor_id,
            "status": "scheduled",
            "duration_minutes": 30
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                &appointment_id, &patient.id, &doctor_id, &clinic_id, start, 30, "scheduled"
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;
    // Only the doctor is told; the patient made the booking.
    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .and(body_partial_json(json!({ "user_id": doctor_id })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::notification_response(&doctor_id, "in_app", false)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed("POST", "/", &token, Some(json!({
            "doctor_id": doctor_id,
            "scheduled_start_time": rfc3339(start),
            "reason": "Persistent cough"
        }))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["appointment"]["id"], appointment_id);
    assert_eq!(json["appointment"]["status"], "scheduled");
}

#[tokio::test]
async fn overlapping_booking_is_rejected_with_409() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("niamh@example.com");
    let doctor_id = Uuid::new_v4().to_string();
    let clinic_id = Uuid::new_v4().to_string();
    let start = tomorrow_at(10);

    mount_booking_context(&mock_server, &patient.id, &doctor_id, &clinic_id).await;
    mount_patient_free(&mock_server, &patient.id).await;
    // Another patient already holds 09:45-10:15.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                &Uuid::new_v4().to_string(),
                &Uuid::new_v4().to_string(),
                &doctor_id,
                &clinic_id,
                start - Duration::minutes(15),
                30,
                "confirmed",
            )
        ])))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed("POST", "/", &token, Some(json!({
            "doctor_id": doctor_id,
            "scheduled_start_time": rfc3339(start)
        }))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn store_rejection_of_overlap_is_reported_as_conflict() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("niamh@example.com");
    let doctor_id = Uuid::new_v4().to_string();
    let clinic_id = Uuid::new_v4().to_string();

    mount_booking_context(&mock_server, &patient.id, &doctor_id, &clinic_id).await;
    mount_patient_free(&mock_server, &patient.id).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_json(MockSupabaseResponses::error_response(
            "conflicting key value violates exclusion constraint \"appointments_doctor_no_overlap\"",
            "23P01",
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed("POST", "/", &token, Some(json!({
            "doctor_id": doctor_id,
            "scheduled_start_time": rfc3339(tomorrow_at(11))
        }))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn admin_booking_requires_patient_id() {
    let mock_server = MockServer::start().await;
    let admin = TestUser::admin("desk@example.com");

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&admin, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed("POST", "/", &token, Some(json!({
            "doctor_id": Uuid::new_v4(),
            "scheduled_start_time": rfc3339(tomorrow_at(10))
        }))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancelling_twice_is_rejected_without_notifications() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("niamh@example.com");
    let appointment_id = Uuid::new_v4().to_string();
    let doctor_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                &appointment_id, &patient.id, &doctor_id, &Uuid::new_v4().to_string(),
                tomorrow_at(10), 30, "cancelled"
            )
        ])))
        .mount(&mock_server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed(
            "POST",
            &format!("/{}/cancel", appointment_id),
            &token,
            Some(json!({ "reason": "Feeling better" })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn patient_cancels_and_doctor_is_notified() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("niamh@example.com");
    let appointment_id = Uuid::new_v4().to_string();
    let doctor_id = Uuid::new_v4().to_string();
    let clinic_id = Uuid::new_v4().to_string();
    let start = tomorrow_at(10);

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                &appointment_id, &patient.id, &doctor_id, &clinic_id, start, 30, "scheduled"
            )
        ])))
        .mount(&mock_server)
        .await;

    let mut cancelled = MockSupabaseResponses::appointment_response(
        &appointment_id, &patient.id, &doctor_id, &clinic_id, start, 30, "cancelled",
    );
    cancelled["cancellation_reason"] = json!("Feeling better");
    cancelled["cancelled_by"] = json!(patient.id);
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .and(query_param("status", "eq.scheduled"))
        .and(body_partial_json(json!({ "status": "cancelled", "cancellation_reason": "Feeling better" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([cancelled])))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_audit(&mock_server).await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .and(body_partial_json(json!({ "user_id": doctor_id, "notification_type": "appointment_cancelled" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::notification_response(&doctor_id, "in_app", false)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed(
            "POST",
            &format!("/{}/cancel", appointment_id),
            &token,
            Some(json!({ "reason": "Feeling better" })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["appointment"]["status"], "cancelled");
}

#[tokio::test]
async fn stale_scheduled_appointment_reads_as_missed() {
    let mock_server = MockServer::start().await;
    let doctor = TestUser::doctor("aoife@example.com");
    let patient_id = Uuid::new_v4().to_string();
    let appointment_id = Uuid::new_v4().to_string();
    let clinic_id = Uuid::new_v4().to_string();
    let start = Utc::now() - Duration::hours(3);

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                &appointment_id, &patient_id, &doctor.id, &clinic_id, start, 30, "scheduled"
            )
        ])))
        .mount(&mock_server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .and(query_param("status", "eq.scheduled"))
        .and(body_partial_json(json!({ "status": "missed" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                &appointment_id, &patient_id, &doctor.id, &clinic_id, start, 30, "missed"
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_audit(&mock_server).await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::notification_response(&patient_id, "in_app", false)
        ])))
        .mount(&mock_server)
        .await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&doctor, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed("GET", &format!("/{}", appointment_id), &token, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "missed");
}

#[tokio::test]
async fn outsider_cannot_view_appointment() {
    let mock_server = MockServer::start().await;
    let outsider = TestUser::patient("someone@example.com");
    let appointment_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                &appointment_id,
                &Uuid::new_v4().to_string(),
                &Uuid::new_v4().to_string(),
                &Uuid::new_v4().to_string(),
                tomorrow_at(10),
                30,
                "scheduled",
            )
        ])))
        .mount(&mock_server)
        .await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&outsider, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed("GET", &format!("/{}", appointment_id), &token, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn reschedule_books_new_slot_and_retires_original() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("niamh@example.com");
    let doctor_id = Uuid::new_v4().to_string();
    let clinic_id = Uuid::new_v4().to_string();
    let original_id = Uuid::new_v4().to_string();
    let replacement_id = Uuid::new_v4().to_string();
    let original_start = tomorrow_at(10);
    let new_start = tomorrow_at(14);

    mount_booking_context(&mock_server, &patient.id, &doctor_id, &clinic_id).await;
    mount_patient_free(&mock_server, &patient.id).await;
    mount_audit(&mock_server).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", original_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                &original_id, &patient.id, &doctor_id, &clinic_id, original_start, 30, "confirmed"
            )
        ])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let mut replacement = MockSupabaseResponses::appointment_response(
        &replacement_id, &patient.id, &doctor_id, &clinic_id, new_start, 30, "scheduled",
    );
    replacement["rescheduled_from"] = json!(original_id);
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({ "rescheduled_from": original_id, "status": "scheduled" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([replacement])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let retired = MockSupabaseResponses::appointment_response(
        &original_id, &patient.id, &doctor_id, &clinic_id, original_start, 30, "rescheduled",
    );
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", original_id)))
        .and(query_param("status", "eq.confirmed"))
        .and(body_partial_json(json!({ "status": "rescheduled" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([retired.clone()])))
        .expect(1)
        .mount(&mock_server)
        .await;
    let mut linked = retired;
    linked["rescheduled_to"] = json!(replacement_id);
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", original_id)))
        .and(query_param("status", "eq.rescheduled"))
        .and(body_partial_json(json!({ "rescheduled_to": replacement_id })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([linked])))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::notification_response(&doctor_id, "in_app", false)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed(
            "PATCH",
            &format!("/{}/reschedule", original_id),
            &token,
            Some(json!({ "new_start_time": rfc3339(new_start) })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["original"]["status"], "rescheduled");
    assert_eq!(json["original"]["rescheduled_to"], replacement_id);
    assert_eq!(json["appointment"]["id"], replacement_id);
    assert_eq!(json["appointment"]["rescheduled_from"], original_id);
}

#[tokio::test]
async fn requests_without_token_are_rejected() {
    let mock_server = MockServer::start().await;
    let (app, _) = app_for(&mock_server);

    let response = app
        .oneshot(Request::builder().uri("/upcoming").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn doctor_cannot_book_on_another_doctors_calendar() {
    let mock_server = MockServer::start().await;
    let doctor = TestUser::doctor("aoife@example.com");
    let colleague_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&doctor, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed("POST", "/", &token, Some(json!({
            "patient_id": Uuid::new_v4(),
            "doctor_id": colleague_id,
            "scheduled_start_time": rfc3339(tomorrow_at(10))
        }))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn patient_with_overlapping_booking_is_rejected() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("niamh@example.com");
    let doctor_id = Uuid::new_v4().to_string();
    let clinic_id = Uuid::new_v4().to_string();
    let start = tomorrow_at(10);

    mount_booking_context(&mock_server, &patient.id, &doctor_id, &clinic_id).await;
    mount_open_calendar(&mock_server, &doctor_id).await;
    // Already seeing a different doctor at 09:45-10:15.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("patient_id", format!("eq.{}", patient.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                &Uuid::new_v4().to_string(),
                &patient.id,
                &Uuid::new_v4().to_string(),
                &clinic_id,
                start - Duration::minutes(15),
                30,
                "scheduled",
            )
        ])))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed("POST", "/", &token, Some(json!({
            "doctor_id": doctor_id,
            "scheduled_start_time": rfc3339(start)
        }))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("Patient already has an appointment"));
}

#[tokio::test]
async fn confirmation_number_collision_is_retried_with_fresh_number() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("niamh@example.com");
    let doctor_id = Uuid::new_v4().to_string();
    let clinic_id = Uuid::new_v4().to_string();
    let appointment_id = Uuid::new_v4().to_string();
    let start = tomorrow_at(10);

    mount_booking_context(&mock_server, &patient.id, &doctor_id, &clinic_id).await;
    mount_patient_free(&mock_server, &patient.id).await;
    mount_open_calendar(&mock_server, &doctor_id).await;
    mount_audit(&mock_server).await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(confirmation_collision())
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                &appointment_id, &patient.id, &doctor_id, &clinic_id, start, 30, "scheduled"
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;
    expect_notification(&mock_server, &doctor_id, "appointment_booked", 1).await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed("POST", "/", &token, Some(json!({
            "doctor_id": doctor_id,
            "scheduled_start_time": rfc3339(start)
        }))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let numbers: Vec<String> = mock_server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method.as_str() == "POST" && r.url.path() == "/rest/v1/appointments")
        .map(|r| {
            let body: Value = serde_json::from_slice(&r.body).unwrap();
            body["confirmation_number"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(numbers.len(), 2);
    assert_ne!(numbers[0], numbers[1]);
    assert!(numbers.iter().all(|n| n.starts_with("APT-")));
}

#[tokio::test]
async fn booking_fails_after_three_confirmation_collisions() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("niamh@example.com");
    let doctor_id = Uuid::new_v4().to_string();
    let clinic_id = Uuid::new_v4().to_string();

    mount_booking_context(&mock_server, &patient.id, &doctor_id, &clinic_id).await;
    mount_patient_free(&mock_server, &patient.id).await;
    mount_open_calendar(&mock_server, &doctor_id).await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(confirmation_collision())
        .expect(3)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed("POST", "/", &token, Some(json!({
            "doctor_id": doctor_id,
            "scheduled_start_time": rfc3339(tomorrow_at(10))
        }))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn reschedule_within_own_slot_retires_original_before_inserting() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("niamh@example.com");
    let doctor_id = Uuid::new_v4().to_string();
    let clinic_id = Uuid::new_v4().to_string();
    let original_id = Uuid::new_v4().to_string();
    let replacement_id = Uuid::new_v4().to_string();
    let original_start = tomorrow_at(10);
    let new_start = original_start + Duration::minutes(15);

    let original = MockSupabaseResponses::appointment_response(
        &original_id, &patient.id, &doctor_id, &clinic_id, original_start, 30, "confirmed",
    );

    mount_booking_context(&mock_server, &patient.id, &doctor_id, &clinic_id).await;
    mount_audit(&mock_server).await;
    mount_appointment(&mock_server, original.clone()).await;
    // The only overlapping booking, for both doctor and patient, is the one being moved.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([original.clone()])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("patient_id", format!("eq.{}", patient.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([original.clone()])))
        .mount(&mock_server)
        .await;

    let mut retired = original.clone();
    retired["status"] = json!("rescheduled");
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", original_id)))
        .and(query_param("status", "eq.confirmed"))
        .and(body_partial_json(json!({ "status": "rescheduled" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([retired.clone()])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut replacement = MockSupabaseResponses::appointment_response(
        &replacement_id, &patient.id, &doctor_id, &clinic_id, new_start, 30, "scheduled",
    );
    replacement["rescheduled_from"] = json!(original_id);
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({
            "rescheduled_from": original_id,
            "scheduled_start_time": rfc3339(new_start)
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([replacement])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut linked = retired;
    linked["rescheduled_to"] = json!(replacement_id);
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", original_id)))
        .and(query_param("status", "eq.rescheduled"))
        .and(body_partial_json(json!({ "rescheduled_to": replacement_id })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([linked])))
        .expect(1)
        .mount(&mock_server)
        .await;
    expect_notification(&mock_server, &doctor_id, "appointment_rescheduled", 1).await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed(
            "PATCH",
            &format!("/{}/reschedule", original_id),
            &token,
            Some(json!({ "new_start_time": rfc3339(new_start) })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["original"]["rescheduled_to"], replacement_id);

    let requests = mock_server.received_requests().await.unwrap();
    let retired_at = requests
        .iter()
        .position(|r| {
            r.method.as_str() == "PATCH"
                && r.url.query().is_some_and(|q| q.contains("status=eq.confirmed"))
        })
        .unwrap();
    let inserted_at = requests
        .iter()
        .position(|r| r.method.as_str() == "POST" && r.url.path() == "/rest/v1/appointments")
        .unwrap();
    assert!(retired_at < inserted_at);
}

#[tokio::test]
async fn rejected_replacement_restores_original() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("niamh@example.com");
    let doctor_id = Uuid::new_v4().to_string();
    let clinic_id = Uuid::new_v4().to_string();
    let original_id = Uuid::new_v4().to_string();
    let original_start = tomorrow_at(10);

    let original = MockSupabaseResponses::appointment_response(
        &original_id, &patient.id, &doctor_id, &clinic_id, original_start, 30, "confirmed",
    );

    mount_booking_context(&mock_server, &patient.id, &doctor_id, &clinic_id).await;
    mount_patient_free(&mock_server, &patient.id).await;
    mount_open_calendar(&mock_server, &doctor_id).await;
    mount_appointment(&mock_server, original.clone()).await;

    let mut retired = original.clone();
    retired["status"] = json!("rescheduled");
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", original_id)))
        .and(query_param("status", "eq.confirmed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([retired])))
        .expect(1)
        .mount(&mock_server)
        .await;
    // Someone else took the slot between the check and the insert.
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_json(MockSupabaseResponses::error_response(
            "conflicting key value violates exclusion constraint \"appointments_doctor_no_overlap\"",
            "23P01",
        )))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", original_id)))
        .and(query_param("status", "eq.rescheduled"))
        .and(body_partial_json(json!({ "status": "confirmed" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([original])))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed(
            "PATCH",
            &format!("/{}/reschedule", original_id),
            &token,
            Some(json!({ "new_start_time": rfc3339(tomorrow_at(14)) })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn sweep_marks_stale_scheduled_appointments_missed() {
    let mock_server = MockServer::start().await;
    let now = Utc::now();
    let clinic_id = Uuid::new_v4().to_string();
    let first = (Uuid::new_v4().to_string(), Uuid::new_v4().to_string(), Uuid::new_v4().to_string());
    let second = (Uuid::new_v4().to_string(), Uuid::new_v4().to_string(), Uuid::new_v4().to_string());

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.scheduled"))
        .and(query_param("scheduled_end_time", format!("lte.{}", rfc3339(now))))
        .and(body_partial_json(json!({ "status": "missed" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                &first.0, &first.1, &first.2, &clinic_id, now - Duration::hours(2), 30, "missed"
            ),
            MockSupabaseResponses::appointment_response(
                &second.0, &second.1, &second.2, &clinic_id, now - Duration::hours(5), 60, "missed"
            ),
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_audit(&mock_server).await;
    // No actor, so both patient and doctor hear about each one.
    for user_id in [&first.1, &first.2, &second.1, &second.2] {
        expect_notification(&mock_server, user_id, "appointment_missed", 1).await;
    }

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = AppointmentBookingService::new(&config);

    let marked = service.mark_missed_appointments(now, "service-role-key").await.unwrap();
    assert_eq!(marked, 2);
}

#[tokio::test]
async fn doctor_confirms_and_patient_is_notified() {
    let mock_server = MockServer::start().await;
    let doctor = TestUser::doctor("aoife@example.com");
    let patient_id = Uuid::new_v4().to_string();
    let appointment_id = Uuid::new_v4().to_string();
    let clinic_id = Uuid::new_v4().to_string();
    let start = tomorrow_at(10);

    mount_appointment(&mock_server, MockSupabaseResponses::appointment_response(
        &appointment_id, &patient_id, &doctor.id, &clinic_id, start, 30, "scheduled",
    )).await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .and(query_param("status", "eq.scheduled"))
        .and(body_partial_json(json!({ "status": "confirmed" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                &appointment_id, &patient_id, &doctor.id, &clinic_id, start, 30, "confirmed"
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_audit(&mock_server).await;
    expect_notification(&mock_server, &patient_id, "appointment_confirmed", 1).await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&doctor, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed("POST", &format!("/{}/confirm", appointment_id), &token, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["appointment"]["status"], "confirmed");
}

#[tokio::test]
async fn patient_cannot_confirm_own_appointment() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("niamh@example.com");
    let appointment_id = Uuid::new_v4().to_string();

    mount_appointment(&mock_server, MockSupabaseResponses::appointment_response(
        &appointment_id,
        &patient.id,
        &Uuid::new_v4().to_string(),
        &Uuid::new_v4().to_string(),
        tomorrow_at(10),
        30,
        "scheduled",
    )).await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed("POST", &format!("/{}/confirm", appointment_id), &token, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn doctor_starts_shortly_before_scheduled_time() {
    let mock_server = MockServer::start().await;
    let doctor = TestUser::doctor("aoife@example.com");
    let patient_id = Uuid::new_v4().to_string();
    let appointment_id = Uuid::new_v4().to_string();
    let clinic_id = Uuid::new_v4().to_string();
    let start = Utc::now() + Duration::minutes(10);

    mount_appointment(&mock_server, MockSupabaseResponses::appointment_response(
        &appointment_id, &patient_id, &doctor.id, &clinic_id, start, 30, "confirmed",
    )).await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .and(query_param("status", "eq.confirmed"))
        .and(body_partial_json(json!({ "status": "in_progress" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                &appointment_id, &patient_id, &doctor.id, &clinic_id, start, 30, "in_progress"
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_audit(&mock_server).await;
    expect_notification(&mock_server, &patient_id, "appointment_started", 1).await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&doctor, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed("POST", &format!("/{}/start", appointment_id), &token, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["appointment"]["status"], "in_progress");
}

#[tokio::test]
async fn doctor_completes_with_notes() {
    let mock_server = MockServer::start().await;
    let doctor = TestUser::doctor("aoife@example.com");
    let patient_id = Uuid::new_v4().to_string();
    let appointment_id = Uuid::new_v4().to_string();
    let clinic_id = Uuid::new_v4().to_string();
    let start = Utc::now() - Duration::minutes(20);

    mount_appointment(&mock_server, MockSupabaseResponses::appointment_response(
        &appointment_id, &patient_id, &doctor.id, &clinic_id, start, 30, "in_progress",
    )).await;
    let mut completed = MockSupabaseResponses::appointment_response(
        &appointment_id, &patient_id, &doctor.id, &clinic_id, start, 30, "completed",
    );
    completed["doctor_notes"] = json!("Rest and fluids");
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .and(query_param("status", "eq.in_progress"))
        .and(body_partial_json(json!({ "status": "completed", "doctor_notes": "Rest and fluids" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([completed])))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_audit(&mock_server).await;
    expect_notification(&mock_server, &patient_id, "appointment_completed", 1).await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&doctor, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed(
            "POST",
            &format!("/{}/complete", appointment_id),
            &token,
            Some(json!({ "doctor_notes": "Rest and fluids" })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["appointment"]["status"], "completed");
    assert_eq!(json["appointment"]["doctor_notes"], "Rest and fluids");
}

#[tokio::test]
async fn doctor_reports_no_show_after_start() {
    let mock_server = MockServer::start().await;
    let doctor = TestUser::doctor("aoife@example.com");
    let patient_id = Uuid::new_v4().to_string();
    let appointment_id = Uuid::new_v4().to_string();
    let clinic_id = Uuid::new_v4().to_string();
    let start = Utc::now() - Duration::minutes(20);

    mount_appointment(&mock_server, MockSupabaseResponses::appointment_response(
        &appointment_id, &patient_id, &doctor.id, &clinic_id, start, 30, "confirmed",
    )).await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .and(query_param("status", "eq.confirmed"))
        .and(body_partial_json(json!({ "status": "missed" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                &appointment_id, &patient_id, &doctor.id, &clinic_id, start, 30, "missed"
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_audit(&mock_server).await;
    expect_notification(&mock_server, &patient_id, "appointment_missed", 1).await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&doctor, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed("POST", &format!("/{}/missed", appointment_id), &token, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["appointment"]["status"], "missed");
}
