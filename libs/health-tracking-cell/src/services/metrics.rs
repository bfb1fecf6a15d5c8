use chrono::{DateTime, Duration, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_utils::schedule::rfc3339;

use crate::models::{
    summarize, HealthError, HealthMetric, MetricQuery, MetricSummary, RecordMetricRequest,
    SummaryQuery,
};

const DEFAULT_SUMMARY_DAYS: i64 = 30;

pub struct MetricService {
    supabase: SupabaseClient,
}

impl MetricService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn record_metric(
        &self,
        patient_id: Uuid,
        request: RecordMetricRequest,
        auth_token: &str,
    ) -> Result<HealthMetric, HealthError> {
        let now = Utc::now();
        request.validate(now)?;

        let body = json!({
            "patient_id": patient_id,
            "metric_type": request.metric_type,
            "value": request.value,
            "secondary_value": request.secondary_value,
            "unit": request.metric_type.default_unit(),
            "recorded_at": rfc3339(request.recorded_at.unwrap_or(now)),
            "notes": request.notes,
            "created_at": rfc3339(now),
        });

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/health_metrics",
            Some(auth_token),
            Some(body),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| HealthError::DatabaseError(e.to_string()))?;

        let row = result.into_iter().next().ok_or(HealthError::MetricNotFound)?;
        let metric: HealthMetric = serde_json::from_value(row)
            .map_err(|e| HealthError::DatabaseError(format!("Failed to parse health metric: {}", e)))?;

        info!("Recorded {} for patient {}", metric.metric_type, patient_id);
        Ok(metric)
    }

    pub async fn list_metrics(
        &self,
        patient_id: Uuid,
        query: MetricQuery,
        auth_token: &str,
    ) -> Result<Vec<HealthMetric>, HealthError> {
        let mut query_parts = vec![format!("patient_id=eq.{}", patient_id)];
        if let Some(metric_type) = query.metric_type {
            query_parts.push(format!("metric_type=eq.{}", metric_type));
        }
        if let Some(from) = query.from {
            query_parts.push(format!("recorded_at=gte.{}", rfc3339(from)));
        }
        if let Some(to) = query.to {
            query_parts.push(format!("recorded_at=lt.{}", rfc3339(to)));
        }
        query_parts.push("order=recorded_at.desc".to_string());
        if let Some(limit) = query.limit {
            query_parts.push(format!("limit={}", limit.clamp(1, 1000)));
        }

        self.fetch(&query_parts, auth_token).await
    }

    /// Statistics per metric type over the `days` leading up to `now`.
    pub async fn summarize_metrics(
        &self,
        patient_id: Uuid,
        query: SummaryQuery,
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Vec<MetricSummary>, HealthError> {
        let days = query.days.unwrap_or(DEFAULT_SUMMARY_DAYS);
        if !(1..=365).contains(&days) {
            return Err(HealthError::ValidationError("days must be between 1 and 365".to_string()));
        }

        let mut query_parts = vec![
            format!("patient_id=eq.{}", patient_id),
            format!("recorded_at=gte.{}", rfc3339(now - Duration::days(days))),
            format!("recorded_at=lte.{}", rfc3339(now)),
        ];
        if let Some(metric_type) = query.metric_type {
            query_parts.push(format!("metric_type=eq.{}", metric_type));
        }

        let metrics = self.fetch(&query_parts, auth_token).await?;
        Ok(summarize(&metrics))
    }

    async fn fetch(&self, query_parts: &[String], auth_token: &str) -> Result<Vec<HealthMetric>, HealthError> {
        let path = format!("/rest/v1/health_metrics?{}", query_parts.join("&"));
        debug!("Fetching health metrics: {}", path);

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| HealthError::DatabaseError(e.to_string()))?;

        result.into_iter()
            .map(|row| serde_json::from_value(row)
                .map_err(|e| HealthError::DatabaseError(format!("Failed to parse health metric: {}", e))))
            .collect()
    }
}
