use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Denied,
    Failure,
}

/// Stored audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor_id: Option<String>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub outcome: AuditOutcome,
    pub details: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Audit event before it is written.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub actor_id: Option<String>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub outcome: AuditOutcome,
    pub details: Option<Value>,
}

impl NewAuditEntry {
    pub fn new(action: impl Into<String>, entity_type: impl Into<String>, entity_id: impl ToString) -> Self {
        Self {
            actor_id: None,
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.to_string(),
            outcome: AuditOutcome::Success,
            details: None,
        }
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn into_entry(self, now: DateTime<Utc>, ttl_days: i64) -> AuditEntry {
        AuditEntry {
            id: Uuid::new_v4(),
            actor_id: self.actor_id,
            action: self.action,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            outcome: self.outcome,
            details: self.details,
            created_at: now,
            expires_at: now + Duration::days(ttl_days),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expiry_follows_ttl() {
        let now = Utc::now();
        let entry = NewAuditEntry::new("appointment.cancelled", "appointment", Uuid::nil())
            .with_actor("user-1")
            .with_details(json!({"reason": "travel"}))
            .into_entry(now, 30);

        assert_eq!(entry.expires_at - entry.created_at, Duration::days(30));
        assert!(!entry.is_expired(now));
        assert!(entry.is_expired(now + Duration::days(30)));
        assert_eq!(entry.actor_id.as_deref(), Some("user-1"));
        assert_eq!(entry.outcome, AuditOutcome::Success);
    }
}
