use chrono::Utc;
use futures::future::join_all;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_utils::schedule::rfc3339;

use crate::models::{NewNotification, Notification, NotificationError, NotificationQuery};

pub struct NotificationService {
    supabase: SupabaseClient,
}

impl NotificationService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn send(
        &self,
        notification: NewNotification,
        auth_token: &str,
    ) -> Result<Notification, NotificationError> {
        notification.validate()?;

        debug!("Sending {} notification via {:?} to user {}",
               notification.notification_type, notification.channel, notification.user_id);

        let now = Utc::now();
        let body = json!({
            "user_id": notification.user_id,
            "channel": notification.channel,
            "notification_type": notification.notification_type,
            "title": notification.title,
            "message": notification.message,
            "related_entity_type": notification.related_entity_type,
            "related_entity_id": notification.related_entity_id,
            "is_read": false,
            "read_at": null,
            "delivery_status": notification.channel.initial_delivery_status(),
            "created_at": rfc3339(now),
        });

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/notifications",
            Some(auth_token),
            Some(body),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| NotificationError::DatabaseError(e.to_string()))?;

        let row = result.into_iter().next()
            .ok_or_else(|| NotificationError::DatabaseError("Failed to create notification".to_string()))?;

        parse_notification(row)
    }

    /// Sends every notification concurrently. Failures are logged and
    /// dropped; the successfully stored notifications are returned.
    pub async fn send_to_many(
        &self,
        notifications: Vec<NewNotification>,
        auth_token: &str,
    ) -> Vec<Notification> {
        let total = notifications.len();
        let results = join_all(
            notifications.into_iter().map(|n| self.send(n, auth_token))
        ).await;

        let mut sent = Vec::with_capacity(total);
        for result in results {
            match result {
                Ok(notification) => sent.push(notification),
                Err(e) => warn!("Failed to send notification: {}", e),
            }
        }

        if sent.len() < total {
            warn!("{} of {} notifications could not be sent", total - sent.len(), total);
        }
        sent
    }

    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        query: NotificationQuery,
        auth_token: &str,
    ) -> Result<Vec<Notification>, NotificationError> {
        let mut query_parts = vec![format!("user_id=eq.{}", user_id)];
        if query.unread_only.unwrap_or(false) {
            query_parts.push("is_read=eq.false".to_string());
        }
        query_parts.push("order=created_at.desc".to_string());
        query_parts.push(format!("limit={}", query.limit.unwrap_or(50).clamp(1, 200)));
        query_parts.push(format!("offset={}", query.offset.unwrap_or(0).max(0)));

        let path = format!("/rest/v1/notifications?{}", query_parts.join("&"));
        let rows: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| NotificationError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(parse_notification).collect()
    }

    pub async fn unread_count(
        &self,
        user_id: Uuid,
        auth_token: &str,
    ) -> Result<usize, NotificationError> {
        let path = format!("/rest/v1/notifications?select=id&user_id=eq.{}&is_read=eq.false", user_id);
        let rows: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| NotificationError::DatabaseError(e.to_string()))?;

        Ok(rows.len())
    }

    pub async fn mark_read(
        &self,
        notification_id: Uuid,
        user_id: Uuid,
        auth_token: &str,
    ) -> Result<Notification, NotificationError> {
        let path = format!("/rest/v1/notifications?id=eq.{}&user_id=eq.{}", notification_id, user_id);
        let body = json!({
            "is_read": true,
            "read_at": rfc3339(Utc::now()),
        });

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(body),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| NotificationError::DatabaseError(e.to_string()))?;

        let row = result.into_iter().next().ok_or(NotificationError::NotFound)?;
        parse_notification(row)
    }

    pub async fn mark_all_read(
        &self,
        user_id: Uuid,
        auth_token: &str,
    ) -> Result<usize, NotificationError> {
        let path = format!("/rest/v1/notifications?user_id=eq.{}&is_read=eq.false", user_id);
        let body = json!({
            "is_read": true,
            "read_at": rfc3339(Utc::now()),
        });

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(body),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| NotificationError::DatabaseError(e.to_string()))?;

        info!("Marked {} notifications read for user {}", result.len(), user_id);
        Ok(result.len())
    }

    pub async fn delete(
        &self,
        notification_id: Uuid,
        user_id: Uuid,
        auth_token: &str,
    ) -> Result<(), NotificationError> {
        let path = format!("/rest/v1/notifications?id=eq.{}&user_id=eq.{}", notification_id, user_id);
        let removed: Value = self.supabase.request_with_headers(
            Method::DELETE,
            &path,
            Some(auth_token),
            None,
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| NotificationError::DatabaseError(e.to_string()))?;

        match removed.as_array() {
            Some(rows) if !rows.is_empty() => Ok(()),
            _ => Err(NotificationError::NotFound),
        }
    }
}

fn parse_notification(row: Value) -> Result<Notification, NotificationError> {
    serde_json::from_value(row)
        .map_err(|e| NotificationError::DatabaseError(format!("Failed to parse notification: {}", e)))
}
