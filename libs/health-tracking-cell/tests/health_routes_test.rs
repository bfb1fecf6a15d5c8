use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use health_tracking_cell::{health_routes, ReminderService};
use shared_utils::schedule::rfc3339;
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};

fn app_for(server: &MockServer) -> (Router, TestConfig) {
    let config = TestConfig::with_supabase_url(&server.uri());
    (health_routes(config.to_arc()), config)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
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

fn medication_row(id: &str, patient_id: &str, is_active: bool, end_date: Option<&str>) -> serde_json::Value {
    json!({
        "id": id,
        "patient_id": patient_id,
        "name": "Amoxicillin",
        "dosage": "500mg",
        "frequency": "3x daily",
        "instructions": "Take with food",
        "prescribed_by": null,
        "start_date": "2026-01-05",
        "end_date": end_date,
        "is_active": is_active,
        "created_at": "2026-01-05T09:00:00Z",
        "updated_at": "2026-01-05T09:00:00Z"
    })
}

fn metric_row(patient_id: &str, metric_type: &str, value: f64, secondary: Option<f64>, unit: &str, hours_ago: i64) -> serde_json::Value {
    let recorded_at = rfc3339(Utc::now() - Duration::hours(hours_ago));
    json!({
        "id": Uuid::new_v4(),
        "patient_id": patient_id,
        "metric_type": metric_type,
        "value": value,
        "secondary_value": secondary,
        "unit": unit,
        "recorded_at": recorded_at,
        "notes": null,
        "created_at": recorded_at
    })
}

fn reminder_row(id: &str, patient_id: &str, recurrence: &str, next_trigger_at: &str) -> serde_json::Value {
    json!({
        "id": id,
        "patient_id": patient_id,
        "reminder_type": "medication",
        "title": "Evening dose",
        "message": "Take 500mg Amoxicillin",
        "related_entity_id": null,
        "next_trigger_at": next_trigger_at,
        "recurrence": recurrence,
        "is_active": true,
        "last_triggered_at": null,
        "created_at": "2026-01-05T09:00:00Z",
        "updated_at": "2026-01-05T09:00:00Z"
    })
}

#[tokio::test]
async fn blood_pressure_without_diastolic_is_rejected() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("niamh@example.com");

    Mock::given(method("POST"))
        .and(path("/rest/v1/health_metrics"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed(
            "POST",
            &format!("/patients/{}/metrics", patient.id),
            &token,
            Some(json!({ "metric_type": "blood_pressure", "value": 120.0 })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn heart_rate_is_stored_with_default_unit() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("niamh@example.com");

    Mock::given(method("POST"))
        .and(path("/rest/v1/health_metrics"))
        .and(body_partial_json(json!({
            "patient_id": patient.id,
            "metric_type": "heart_rate",
            "unit": "bpm"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            metric_row(&patient.id, "heart_rate", 72.0, None, "bpm", 0)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed(
            "POST",
            &format!("/patients/{}/metrics", patient.id),
            &token,
            Some(json!({ "metric_type": "heart_rate", "value": 72.0 })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["unit"], "bpm");
}

#[tokio::test]
async fn summary_reports_per_type_statistics() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("niamh@example.com");
    let doctor = TestUser::doctor("aoife@example.com");

    Mock::given(method("GET"))
        .and(path("/rest/v1/health_metrics"))
        .and(query_param("patient_id", format!("eq.{}", patient.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            metric_row(&patient.id, "blood_pressure", 130.0, Some(85.0), "mmHg", 30),
            metric_row(&patient.id, "blood_pressure", 120.0, Some(75.0), "mmHg", 2),
            metric_row(&patient.id, "weight", 70.5, None, "kg", 5)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&doctor, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed("GET", &format!("/patients/{}/metrics/summary?days=7", patient.id), &token, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let summary = json["summary"].as_array().unwrap();
    assert_eq!(summary.len(), 2);
    assert_eq!(summary[0]["metric_type"], "blood_pressure");
    assert_eq!(summary[0]["count"], 2);
    assert_eq!(summary[0]["average"], 125.0);
    assert_eq!(summary[0]["latest_value"], 120.0);
    assert_eq!(summary[1]["metric_type"], "weight");
    assert_eq!(summary[1]["latest_value"], 70.5);
}

#[tokio::test]
async fn doctors_read_but_cannot_change_medications() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("niamh@example.com");
    let doctor = TestUser::doctor("aoife@example.com");
    let medication_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/medications"))
        .and(query_param("patient_id", format!("eq.{}", patient.id)))
        .and(query_param("is_active", "eq.true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            medication_row(&medication_id, &patient.id, true, None)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/medications"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&doctor, &config.jwt_secret, Some(1));

    let response = app.clone()
        .oneshot(authed(
            "GET",
            &format!("/patients/{}/medications?active_only=true", patient.id),
            &token,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["total"], 1);

    let response = app
        .oneshot(authed(
            "POST",
            &format!("/patients/{}/medications", patient.id),
            &token,
            Some(json!({ "name": "Ibuprofen", "dosage": "200mg", "frequency": "as needed" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn discontinue_ends_course_today() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("niamh@example.com");
    let medication_id = Uuid::new_v4().to_string();
    let today = Utc::now().date_naive().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/medications"))
        .and(query_param("id", format!("eq.{}", medication_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            medication_row(&medication_id, &patient.id, true, None)
        ])))
        .mount(&mock_server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/medications"))
        .and(query_param("id", format!("eq.{}", medication_id)))
        .and(body_partial_json(json!({ "is_active": false, "end_date": today })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            medication_row(&medication_id, &patient.id, false, Some(today.as_str()))
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed(
            "POST",
            &format!("/patients/{}/medications/{}/discontinue", patient.id, medication_id),
            &token,
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["is_active"], false);
    assert_eq!(json["end_date"], today);
}

#[tokio::test]
async fn discontinuing_twice_conflicts() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("niamh@example.com");
    let medication_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/medications"))
        .and(query_param("id", format!("eq.{}", medication_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            medication_row(&medication_id, &patient.id, false, Some("2026-02-01"))
        ])))
        .mount(&mock_server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/medications"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let (app, config) = app_for(&mock_server);
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, Some(1));

    let response = app
        .oneshot(authed(
            "POST",
            &format!("/patients/{}/medications/{}/discontinue", patient.id, medication_id),
            &token,
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn due_reminders_fire_once_and_advance() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("niamh@example.com");
    let daily_id = Uuid::new_v4().to_string();
    let once_id = Uuid::new_v4().to_string();

    let now = Utc::now();
    let due_at = now - Duration::hours(1);
    let daily_next = rfc3339(due_at + Duration::days(1));

    Mock::given(method("GET"))
        .and(path("/rest/v1/reminders"))
        .and(query_param("is_active", "eq.true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            reminder_row(&daily_id, &patient.id, "daily", &rfc3339(due_at)),
            reminder_row(&once_id, &patient.id, "once", &rfc3339(due_at))
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/reminders"))
        .and(query_param("id", format!("eq.{}", daily_id)))
        .and(body_partial_json(json!({ "next_trigger_at": daily_next })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            reminder_row(&daily_id, &patient.id, "daily", &daily_next)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;
    // Another sweep already claimed the one-off reminder.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/reminders"))
        .and(query_param("id", format!("eq.{}", once_id)))
        .and(body_partial_json(json!({ "is_active": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .and(body_partial_json(json!({
            "user_id": patient.id,
            "notification_type": "reminder",
            "related_entity_type": "reminder"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::notification_response(&patient.id, "in_app", false)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = ReminderService::new(&config);

    let fired = service.process_due_reminders(now, "service-role-key").await.unwrap();
    assert_eq!(fired, 1);
}
