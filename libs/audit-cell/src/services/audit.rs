use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_utils::schedule::rfc3339;

use crate::models::{AuditEntry, AuditOutcome, NewAuditEntry};

pub struct AuditService {
    supabase: SupabaseClient,
    ttl_days: i64,
}

impl AuditService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            ttl_days: config.audit_log_ttl_days,
        }
    }

    #[instrument(skip(self, event, auth_token), fields(action = %event.action))]
    pub async fn record(&self, event: NewAuditEntry, auth_token: &str) -> Result<AuditEntry> {
        let entry = event.into_entry(Utc::now(), self.ttl_days);
        log_to_tracing(&entry);

        let body = json!({
            "id": entry.id,
            "actor_id": entry.actor_id,
            "action": entry.action,
            "entity_type": entry.entity_type,
            "entity_id": entry.entity_id,
            "outcome": entry.outcome,
            "details": entry.details,
            "created_at": rfc3339(entry.created_at),
            "expires_at": rfc3339(entry.expires_at),
        });

        let _: Value = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/audit_logs",
            Some(auth_token),
            Some(body),
            Some(SupabaseClient::return_representation()),
        ).await?;

        Ok(entry)
    }

    /// Records an entry, logging instead of failing when the write is rejected.
    pub async fn record_best_effort(&self, event: NewAuditEntry, auth_token: &str) {
        let action = event.action.clone();
        if let Err(e) = self.record(event, auth_token).await {
            warn!("Failed to persist audit entry '{}': {}", action, e);
        }
    }

    pub async fn list_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
        limit: Option<i32>,
        auth_token: &str,
    ) -> Result<Vec<AuditEntry>> {
        debug!("Fetching audit trail for {} {}", entity_type, entity_id);

        let path = format!(
            "/rest/v1/audit_logs?entity_type=eq.{}&entity_id=eq.{}&order=created_at.desc&limit={}",
            sanitize_filter_value(entity_type),
            sanitize_filter_value(entity_id),
            limit.unwrap_or(100).clamp(1, 500)
        );

        let rows: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(|e| anyhow!("Failed to parse audit entry: {}", e)))
            .collect()
    }

    /// Deletes entries whose expiry has passed. Returns how many were removed.
    #[instrument(skip(self, auth_token))]
    pub async fn purge_expired(&self, now: DateTime<Utc>, auth_token: &str) -> Result<usize> {
        let path = format!("/rest/v1/audit_logs?expires_at=lte.{}", rfc3339(now));

        let removed: Value = self.supabase.request_with_headers(
            Method::DELETE,
            &path,
            Some(auth_token),
            None,
            Some(SupabaseClient::return_representation()),
        ).await?;

        let count = removed.as_array().map(|rows| rows.len()).unwrap_or(0);
        if count > 0 {
            info!("Purged {} expired audit entries", count);
        }
        Ok(count)
    }
}

fn log_to_tracing(entry: &AuditEntry) {
    match entry.outcome {
        AuditOutcome::Success => info!(
            audit_id = %entry.id,
            actor_id = ?entry.actor_id,
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            "AUDIT: {}", entry.action
        ),
        AuditOutcome::Denied | AuditOutcome::Failure => warn!(
            audit_id = %entry.id,
            actor_id = ?entry.actor_id,
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            outcome = ?entry.outcome,
            "AUDIT FAILURE: {}", entry.action
        ),
    }
}

// Entity identifiers are uuids or snake_case names; anything else is dropped
// rather than passed through into the filter.
fn sanitize_filter_value(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}
