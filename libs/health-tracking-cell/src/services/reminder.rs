use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use notification_cell::{NewNotification, NotificationService, NotificationType};
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_utils::schedule::rfc3339;
use shared_utils::validation::require_non_empty;

use crate::models::{
    advance_trigger, CreateReminderRequest, HealthError, Reminder, UpdateReminderRequest,
};

/// Reminders claimed per sweep.
const SWEEP_BATCH: usize = 200;

pub struct ReminderService {
    supabase: SupabaseClient,
    notifications: NotificationService,
}

impl ReminderService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            notifications: NotificationService::new(config),
        }
    }

    pub async fn create_reminder(
        &self,
        patient_id: Uuid,
        request: CreateReminderRequest,
        auth_token: &str,
    ) -> Result<Reminder, HealthError> {
        let now = Utc::now();
        request.validate(now)?;

        let body = json!({
            "patient_id": patient_id,
            "reminder_type": request.reminder_type,
            "title": request.title.trim(),
            "message": request.message.trim(),
            "related_entity_id": request.related_entity_id,
            "next_trigger_at": rfc3339(request.next_trigger_at),
            "recurrence": request.recurrence,
            "is_active": true,
            "last_triggered_at": null,
            "created_at": rfc3339(now),
            "updated_at": rfc3339(now),
        });

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/reminders",
            Some(auth_token),
            Some(body),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| HealthError::DatabaseError(e.to_string()))?;

        let reminder = parse_single(result)?;
        info!("Reminder {} created for patient {} ({:?})", reminder.id, patient_id, reminder.recurrence);
        Ok(reminder)
    }

    pub async fn list_reminders(
        &self,
        patient_id: Uuid,
        active_only: bool,
        auth_token: &str,
    ) -> Result<Vec<Reminder>, HealthError> {
        let mut query_parts = vec![format!("patient_id=eq.{}", patient_id)];
        if active_only {
            query_parts.push("is_active=eq.true".to_string());
        }
        query_parts.push("order=next_trigger_at.asc".to_string());

        self.fetch(&query_parts, auth_token).await
    }

    pub async fn update_reminder(
        &self,
        patient_id: Uuid,
        reminder_id: Uuid,
        request: UpdateReminderRequest,
        auth_token: &str,
    ) -> Result<Reminder, HealthError> {
        let mut update_data = Map::new();
        if let Some(title) = request.title {
            require_non_empty("title", &title).map_err(HealthError::ValidationError)?;
            update_data.insert("title".to_string(), json!(title.trim()));
        }
        if let Some(message) = request.message {
            require_non_empty("message", &message).map_err(HealthError::ValidationError)?;
            update_data.insert("message".to_string(), json!(message.trim()));
        }
        if let Some(next_trigger_at) = request.next_trigger_at {
            if next_trigger_at <= Utc::now() {
                return Err(HealthError::ValidationError("next_trigger_at must be in the future".to_string()));
            }
            update_data.insert("next_trigger_at".to_string(), json!(rfc3339(next_trigger_at)));
        }
        if let Some(recurrence) = request.recurrence {
            update_data.insert("recurrence".to_string(), json!(recurrence));
        }
        if let Some(is_active) = request.is_active {
            update_data.insert("is_active".to_string(), json!(is_active));
        }

        if update_data.is_empty() {
            return Err(HealthError::ValidationError("No fields to update".to_string()));
        }
        update_data.insert("updated_at".to_string(), json!(rfc3339(Utc::now())));

        let path = format!("/rest/v1/reminders?id=eq.{}&patient_id=eq.{}", reminder_id, patient_id);
        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(Value::Object(update_data)),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| HealthError::DatabaseError(e.to_string()))?;

        parse_single(result)
    }

    pub async fn delete_reminder(
        &self,
        patient_id: Uuid,
        reminder_id: Uuid,
        auth_token: &str,
    ) -> Result<(), HealthError> {
        let path = format!("/rest/v1/reminders?id=eq.{}&patient_id=eq.{}", reminder_id, patient_id);
        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::DELETE,
            &path,
            Some(auth_token),
            None,
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| HealthError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(HealthError::ReminderNotFound);
        }
        Ok(())
    }

    /// Fires every active reminder due at `now`. Each reminder is claimed
    /// with a conditional update on its trigger time before the
    /// notification goes out, so concurrent sweeps fire it once.
    #[instrument(skip(self, auth_token))]
    pub async fn process_due_reminders(
        &self,
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<usize, HealthError> {
        let query_parts = vec![
            "is_active=eq.true".to_string(),
            format!("next_trigger_at=lte.{}", rfc3339(now)),
            "order=next_trigger_at.asc".to_string(),
            format!("limit={}", SWEEP_BATCH),
        ];
        let due = self.fetch(&query_parts, auth_token).await?;
        debug!("{} reminders due", due.len());

        let mut fired = 0;
        for reminder in due.iter().filter(|r| r.is_due(now)) {
            match self.claim(reminder, now, auth_token).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Reminder {} already handled", reminder.id);
                    continue;
                }
                Err(e) => {
                    error!("Failed to advance reminder {}: {}", reminder.id, e);
                    continue;
                }
            }

            let notification = NewNotification::in_app(
                reminder.patient_id,
                NotificationType::Reminder,
                reminder.title.clone(),
                reminder.message.clone(),
            );
            let notification = match reminder.related_entity_id {
                Some(entity_id) => notification.related_to(reminder.reminder_type.as_str(), entity_id),
                None => notification.related_to("reminder", reminder.id),
            };

            if let Err(e) = self.notifications.send(notification, auth_token).await {
                warn!("Reminder {} fired but notification failed: {}", reminder.id, e);
            }
            fired += 1;
        }

        if fired > 0 {
            info!("Fired {} reminders", fired);
        }
        Ok(fired)
    }

    /// Moves the reminder to its next trigger, or deactivates a one-off.
    /// Returns false when another sweep got there first.
    async fn claim(&self, reminder: &Reminder, now: DateTime<Utc>, auth_token: &str) -> Result<bool, HealthError> {
        let mut update_data = Map::new();
        update_data.insert("last_triggered_at".to_string(), json!(rfc3339(now)));
        update_data.insert("updated_at".to_string(), json!(rfc3339(now)));
        match advance_trigger(reminder.next_trigger_at, reminder.recurrence, now) {
            Some(next) => {
                update_data.insert("next_trigger_at".to_string(), json!(rfc3339(next)));
            }
            None => {
                update_data.insert("is_active".to_string(), json!(false));
            }
        }

        let path = format!(
            "/rest/v1/reminders?id=eq.{}&is_active=eq.true&next_trigger_at=eq.{}",
            reminder.id,
            rfc3339(reminder.next_trigger_at)
        );
        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(Value::Object(update_data)),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| HealthError::DatabaseError(e.to_string()))?;

        Ok(!result.is_empty())
    }

    async fn fetch(&self, query_parts: &[String], auth_token: &str) -> Result<Vec<Reminder>, HealthError> {
        let path = format!("/rest/v1/reminders?{}", query_parts.join("&"));
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| HealthError::DatabaseError(e.to_string()))?;

        result.into_iter()
            .map(|row| serde_json::from_value(row)
                .map_err(|e| HealthError::DatabaseError(format!("Failed to parse reminder: {}", e))))
            .collect()
    }
}

fn parse_single(rows: Vec<Value>) -> Result<Reminder, HealthError> {
    let row = rows.into_iter().next().ok_or(HealthError::ReminderNotFound)?;
    serde_json::from_value(row)
        .map_err(|e| HealthError::DatabaseError(format!("Failed to parse reminder: {}", e)))
}
