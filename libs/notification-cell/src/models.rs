use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    InApp,
    Email,
    Sms,
}

impl NotificationChannel {
    /// In-app messages are delivered by being stored; other channels wait
    /// for the delivery worker.
    pub fn initial_delivery_status(&self) -> DeliveryStatus {
        match self {
            NotificationChannel::InApp => DeliveryStatus::Sent,
            NotificationChannel::Email | NotificationChannel::Sms => DeliveryStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    AppointmentBooked,
    AppointmentConfirmed,
    AppointmentStarted,
    AppointmentCancelled,
    AppointmentRescheduled,
    AppointmentCompleted,
    AppointmentMissed,
    Reminder,
    System,
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotificationType::AppointmentBooked => "appointment_booked",
            NotificationType::AppointmentConfirmed => "appointment_confirmed",
            NotificationType::AppointmentStarted => "appointment_started",
            NotificationType::AppointmentCancelled => "appointment_cancelled",
            NotificationType::AppointmentRescheduled => "appointment_rescheduled",
            NotificationType::AppointmentCompleted => "appointment_completed",
            NotificationType::AppointmentMissed => "appointment_missed",
            NotificationType::Reminder => "reminder",
            NotificationType::System => "system",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub channel: NotificationChannel,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub related_entity_type: Option<String>,
    pub related_entity_id: Option<Uuid>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub delivery_status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub channel: NotificationChannel,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub related_entity_type: Option<String>,
    pub related_entity_id: Option<Uuid>,
}

impl NewNotification {
    pub fn in_app(
        user_id: Uuid,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            channel: NotificationChannel::InApp,
            notification_type,
            title: title.into(),
            message: message.into(),
            related_entity_type: None,
            related_entity_id: None,
        }
    }

    pub fn via(mut self, channel: NotificationChannel) -> Self {
        self.channel = channel;
        self
    }

    pub fn related_to(mut self, entity_type: impl Into<String>, entity_id: Uuid) -> Self {
        self.related_entity_type = Some(entity_type.into());
        self.related_entity_id = Some(entity_id);
        self
    }

    pub fn validate(&self) -> Result<(), NotificationError> {
        if self.title.trim().is_empty() {
            return Err(NotificationError::ValidationError("title cannot be empty".to_string()));
        }
        if self.message.trim().is_empty() {
            return Err(NotificationError::ValidationError("message cannot be empty".to_string()));
        }
        if self.title.len() > 200 {
            return Err(NotificationError::ValidationError("title must be at most 200 characters".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationQuery {
    pub unread_only: Option<bool>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum NotificationError {
    #[error("Notification not found")]
    NotFound,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
