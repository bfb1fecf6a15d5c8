use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, instrument};

use appointment_cell::AppointmentBookingService;
use audit_cell::AuditService;
use health_tracking_cell::ReminderService;
use shared_config::AppConfig;

/// Periodic housekeeping run with the service-role key: stale appointments
/// become missed, due reminders fire and expired audit entries are purged.
pub fn spawn(config: Arc<AppConfig>) -> JoinHandle<()> {
    let period = Duration::from_secs(config.sweep_interval_seconds.max(1));
    info!("Background sweeper running every {:?}", period);

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            sweep(&config).await;
        }
    })
}

#[instrument(skip(config))]
async fn sweep(config: &AppConfig) {
    let now = Utc::now();
    let token = config.supabase_service_role_key.as_str();

    match AppointmentBookingService::new(config).mark_missed_appointments(now, token).await {
        Ok(count) => info!(count, "Missed appointment sweep finished"),
        Err(e) => error!("Missed appointment sweep failed: {}", e),
    }

    match ReminderService::new(config).process_due_reminders(now, token).await {
        Ok(count) => info!(count, "Reminder sweep finished"),
        Err(e) => error!("Reminder sweep failed: {}", e),
    }

    match AuditService::new(config).purge_expired(now, token).await {
        Ok(count) => info!(count, "Audit purge finished"),
        Err(e) => error!("Audit purge failed: {}", e),
    }
}
