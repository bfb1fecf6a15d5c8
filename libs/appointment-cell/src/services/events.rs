use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use audit_cell::{AuditService, NewAuditEntry};
use notification_cell::{NewNotification, NotificationService, NotificationType};
use shared_config::AppConfig;

use crate::models::Appointment;

/// Status changes that leave an audit entry and notify participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentEvent {
    Booked,
    Confirmed,
    Started,
    Completed,
    Cancelled,
    Rescheduled,
    Missed,
}

impl AppointmentEvent {
    pub fn action(&self) -> &'static str {
        match self {
            AppointmentEvent::Booked => "appointment.booked",
            AppointmentEvent::Confirmed => "appointment.confirmed",
            AppointmentEvent::Started => "appointment.started",
            AppointmentEvent::Completed => "appointment.completed",
            AppointmentEvent::Cancelled => "appointment.cancelled",
            AppointmentEvent::Rescheduled => "appointment.rescheduled",
            AppointmentEvent::Missed => "appointment.missed",
        }
    }

    fn notification_type(&self) -> NotificationType {
        match self {
            AppointmentEvent::Booked => NotificationType::AppointmentBooked,
            AppointmentEvent::Confirmed => NotificationType::AppointmentConfirmed,
            AppointmentEvent::Started => NotificationType::AppointmentStarted,
            AppointmentEvent::Completed => NotificationType::AppointmentCompleted,
            AppointmentEvent::Cancelled => NotificationType::AppointmentCancelled,
            AppointmentEvent::Rescheduled => NotificationType::AppointmentRescheduled,
            AppointmentEvent::Missed => NotificationType::AppointmentMissed,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            AppointmentEvent::Booked => "Appointment booked",
            AppointmentEvent::Confirmed => "Appointment confirmed",
            AppointmentEvent::Started => "Appointment started",
            AppointmentEvent::Completed => "Appointment completed",
            AppointmentEvent::Cancelled => "Appointment cancelled",
            AppointmentEvent::Rescheduled => "Appointment rescheduled",
            AppointmentEvent::Missed => "Appointment missed",
        }
    }
}

pub fn describe(event: AppointmentEvent, appointment: &Appointment) -> String {
    let when = appointment.scheduled_start_time.format("%Y-%m-%d %H:%M UTC");
    match event {
        AppointmentEvent::Booked => format!(
            "Appointment {} is booked for {}", appointment.confirmation_number, when
        ),
        AppointmentEvent::Rescheduled => format!(
            "Appointment moved to {} (confirmation {})", when, appointment.confirmation_number
        ),
        AppointmentEvent::Cancelled => format!(
            "Appointment {} on {} was cancelled{}",
            appointment.confirmation_number,
            when,
            appointment.cancellation_reason.as_deref()
                .map(|r| format!(": {}", r))
                .unwrap_or_default()
        ),
        _ => format!("Appointment {} on {} is now {}", appointment.confirmation_number, when, appointment.status),
    }
}

/// Everyone who should hear about the change: the participants other than
/// whoever made it.
pub fn recipients(appointment: &Appointment, actor_id: Option<&str>) -> Vec<Uuid> {
    [appointment.patient_id, appointment.doctor_id]
        .into_iter()
        .filter(|id| actor_id != Some(id.to_string().as_str()))
        .collect()
}

pub struct AppointmentEventPublisher {
    notifications: NotificationService,
    audit: AuditService,
}

impl AppointmentEventPublisher {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            notifications: NotificationService::new(config),
            audit: AuditService::new(config),
        }
    }

    /// Records the audit entry and sends notifications. Failures are logged
    /// and never surface to the caller.
    pub async fn publish(
        &self,
        event: AppointmentEvent,
        appointment: &Appointment,
        actor_id: Option<&str>,
        auth_token: &str,
    ) {
        info!("{} {} ({})", event.action(), appointment.id, appointment.confirmation_number);

        let mut entry = NewAuditEntry::new(event.action(), "appointment", appointment.id)
            .with_details(json!({
                "status": appointment.status,
                "confirmation_number": appointment.confirmation_number,
                "scheduled_start_time": appointment.scheduled_start_time,
                "rescheduled_from": appointment.rescheduled_from,
                "rescheduled_to": appointment.rescheduled_to,
            }));
        if let Some(actor) = actor_id {
            entry = entry.with_actor(actor);
        }
        self.audit.record_best_effort(entry, auth_token).await;

        let notification_type = event.notification_type();
        let message = describe(event, appointment);
        let outgoing: Vec<NewNotification> = recipients(appointment, actor_id)
            .into_iter()
            .map(|user_id| {
                NewNotification::in_app(user_id, notification_type, event.title(), message.clone())
                    .related_to("appointment", appointment.id)
            })
            .collect();

        let sent = self.notifications.send_to_many(outgoing, auth_token).await;
        debug!("{} notifications sent for {}", sent.len(), event.action());
    }
}
