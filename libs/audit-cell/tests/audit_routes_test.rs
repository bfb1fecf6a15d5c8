use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use audit_cell::{audit_routes, AuditService, NewAuditEntry};
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

fn audit_row(entity_id: &str) -> serde_json::Value {
    json!({
        "id": Uuid::new_v4(),
        "actor_id": "someone",
        "action": "appointment.cancelled",
        "entity_type": "appointment",
        "entity_id": entity_id,
        "outcome": "success",
        "details": {"reason": "feeling better"},
        "created_at": "2026-01-01T10:00:00Z",
        "expires_at": "2026-04-01T10:00:00Z"
    })
}

#[tokio::test]
async fn admin_can_read_entity_trail() {
    let mock_server = MockServer::start().await;
    let entity_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/audit_logs"))
        .and(query_param("entity_type", "eq.appointment"))
        .and(query_param("entity_id", format!("eq.{}", entity_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([audit_row(&entity_id)])))
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri());
    let admin = TestUser::admin("admin@example.com");
    let token = JwtTestUtils::create_test_token(&admin, &config.jwt_secret, Some(1));

    let response = audit_routes(config.to_arc())
        .oneshot(
            Request::builder()
                .uri(format!("/appointment/{}", entity_id))
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["total"], 1);
    assert_eq!(json["entries"][0]["action"], "appointment.cancelled");
}

#[tokio::test]
async fn patients_cannot_read_audit_trail() {
    let config = TestConfig::default();
    let patient = TestUser::patient("p@example.com");
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, Some(1));

    let response = audit_routes(config.to_arc())
        .oneshot(
            Request::builder()
                .uri(format!("/appointment/{}", Uuid::new_v4()))
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn record_posts_entry_with_expiry() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/audit_logs"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = AuditService::new(&config);
    let entry = service
        .record(
            NewAuditEntry::new("appointment.booked", "appointment", Uuid::new_v4()).with_actor("u1"),
            "token",
        )
        .await
        .unwrap();

    assert_eq!(entry.expires_at - entry.created_at, Duration::days(90));
}

#[tokio::test]
async fn purge_counts_deleted_rows() {
    let mock_server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/audit_logs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            audit_row("a"),
            audit_row("b")
        ])))
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let removed = AuditService::new(&config)
        .purge_expired(Utc::now(), "service-key")
        .await
        .unwrap();

    assert_eq!(removed, 2);
}
