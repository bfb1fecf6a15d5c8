use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_utils::validation::require_non_empty;

// ==============================================================================
// MEDICATIONS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Medication {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    pub instructions: Option<String>,
    pub prescribed_by: Option<Uuid>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMedicationRequest {
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    pub instructions: Option<String>,
    pub prescribed_by: Option<Uuid>,
    /// Defaults to today.
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl CreateMedicationRequest {
    pub fn validate(&self, start_date: NaiveDate) -> Result<(), HealthError> {
        require_non_empty("name", &self.name).map_err(HealthError::ValidationError)?;
        require_non_empty("dosage", &self.dosage).map_err(HealthError::ValidationError)?;
        require_non_empty("frequency", &self.frequency).map_err(HealthError::ValidationError)?;
        validate_medication_dates(start_date, self.end_date)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateMedicationRequest {
    pub dosage: Option<String>,
    pub frequency: Option<String>,
    pub instructions: Option<String>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MedicationQuery {
    pub active_only: Option<bool>,
}

pub fn validate_medication_dates(start: NaiveDate, end: Option<NaiveDate>) -> Result<(), HealthError> {
    if end.is_some_and(|end| end < start) {
        return Err(HealthError::ValidationError("end_date cannot be before start_date".to_string()));
    }
    Ok(())
}

// ==============================================================================
// HEALTH METRICS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    BloodPressure,
    HeartRate,
    Weight,
    BloodGlucose,
    Temperature,
    OxygenSaturation,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::BloodPressure => "blood_pressure",
            MetricType::HeartRate => "heart_rate",
            MetricType::Weight => "weight",
            MetricType::BloodGlucose => "blood_glucose",
            MetricType::Temperature => "temperature",
            MetricType::OxygenSaturation => "oxygen_saturation",
        }
    }

    pub fn default_unit(&self) -> &'static str {
        match self {
            MetricType::BloodPressure => "mmHg",
            MetricType::HeartRate => "bpm",
            MetricType::Weight => "kg",
            MetricType::BloodGlucose => "mmol/L",
            MetricType::Temperature => "celsius",
            MetricType::OxygenSaturation => "%",
        }
    }

    /// Inclusive range of physiologically plausible readings. For blood
    /// pressure this is the systolic value.
    pub fn plausible_range(&self) -> (f64, f64) {
        match self {
            MetricType::BloodPressure => (50.0, 260.0),
            MetricType::HeartRate => (20.0, 250.0),
            MetricType::Weight => (0.5, 500.0),
            MetricType::BloodGlucose => (1.0, 35.0),
            MetricType::Temperature => (30.0, 45.0),
            MetricType::OxygenSaturation => (50.0, 100.0),
        }
    }

    pub fn requires_secondary_value(&self) -> bool {
        matches!(self, MetricType::BloodPressure)
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diastolic range for blood pressure readings.
const DIASTOLIC_RANGE: (f64, f64) = (30.0, 180.0);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMetric {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub metric_type: MetricType,
    pub value: f64,
    /// Diastolic value for blood pressure.
    pub secondary_value: Option<f64>,
    pub unit: String,
    pub recorded_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMetricRequest {
    pub metric_type: MetricType,
    pub value: f64,
    pub secondary_value: Option<f64>,
    /// Must match the type's unit when given.
    pub unit: Option<String>,
    /// Defaults to now.
    pub recorded_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl RecordMetricRequest {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), HealthError> {
        let metric = self.metric_type;

        if !self.value.is_finite() || !within(self.value, metric.plausible_range()) {
            let (min, max) = metric.plausible_range();
            return Err(HealthError::ValidationError(format!(
                "{} must be between {} and {} {}",
                metric, min, max, metric.default_unit()
            )));
        }

        match (metric.requires_secondary_value(), self.secondary_value) {
            (true, None) => {
                return Err(HealthError::ValidationError(
                    "blood_pressure requires a diastolic secondary_value".to_string(),
                ));
            }
            (true, Some(diastolic)) => {
                if !diastolic.is_finite() || !within(diastolic, DIASTOLIC_RANGE) {
                    return Err(HealthError::ValidationError(format!(
                        "Diastolic value must be between {} and {} mmHg",
                        DIASTOLIC_RANGE.0, DIASTOLIC_RANGE.1
                    )));
                }
                if diastolic >= self.value {
                    return Err(HealthError::ValidationError(
                        "Diastolic value must be below the systolic value".to_string(),
                    ));
                }
            }
            (false, Some(_)) => {
                return Err(HealthError::ValidationError(format!(
                    "{} does not take a secondary_value",
                    metric
                )));
            }
            (false, None) => {}
        }

        if let Some(unit) = self.unit.as_deref() {
            if unit != metric.default_unit() {
                return Err(HealthError::ValidationError(format!(
                    "{} must be recorded in {}",
                    metric,
                    metric.default_unit()
                )));
            }
        }

        if self.recorded_at.is_some_and(|at| at > now) {
            return Err(HealthError::ValidationError("recorded_at cannot be in the future".to_string()));
        }
        Ok(())
    }
}

fn within(value: f64, (min, max): (f64, f64)) -> bool {
    value >= min && value <= max
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricQuery {
    pub metric_type: Option<MetricType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryQuery {
    pub metric_type: Option<MetricType>,
    /// Window length ending now. Defaults to 30 days.
    pub days: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSummary {
    pub metric_type: MetricType,
    pub unit: String,
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub average: f64,
    /// Average diastolic value for blood pressure.
    pub average_secondary: Option<f64>,
    pub latest_value: f64,
    pub latest_secondary_value: Option<f64>,
    pub latest_recorded_at: DateTime<Utc>,
}

/// Per-type statistics over `metrics`, ordered by metric type.
pub fn summarize(metrics: &[HealthMetric]) -> Vec<MetricSummary> {
    let mut grouped: BTreeMap<MetricType, Vec<&HealthMetric>> = BTreeMap::new();
    for metric in metrics {
        grouped.entry(metric.metric_type).or_default().push(metric);
    }

    grouped
        .into_iter()
        .filter_map(|(metric_type, readings)| {
            let latest = readings.iter().max_by_key(|m| m.recorded_at)?;
            let count = readings.len();
            let values = readings.iter().map(|m| m.value);
            let min = values.clone().fold(f64::INFINITY, f64::min);
            let max = values.clone().fold(f64::NEG_INFINITY, f64::max);
            let average = values.sum::<f64>() / count as f64;

            let secondaries: Vec<f64> = readings.iter().filter_map(|m| m.secondary_value).collect();
            let average_secondary = (!secondaries.is_empty())
                .then(|| secondaries.iter().sum::<f64>() / secondaries.len() as f64);

            Some(MetricSummary {
                metric_type,
                unit: metric_type.default_unit().to_string(),
                count,
                min,
                max,
                average,
                average_secondary,
                latest_value: latest.value,
                latest_secondary_value: latest.secondary_value,
                latest_recorded_at: latest.recorded_at,
            })
        })
        .collect()
}

// ==============================================================================
// REMINDERS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReminderType {
    Medication,
    Appointment,
    Metric,
    Custom,
}

impl ReminderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderType::Medication => "medication",
            ReminderType::Appointment => "appointment",
            ReminderType::Metric => "metric",
            ReminderType::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    #[default]
    Once,
    Daily,
    Weekly,
}

impl Recurrence {
    pub fn period(&self) -> Option<Duration> {
        match self {
            Recurrence::Once => None,
            Recurrence::Daily => Some(Duration::days(1)),
            Recurrence::Weekly => Some(Duration::weeks(1)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub reminder_type: ReminderType,
    pub title: String,
    pub message: String,
    pub related_entity_id: Option<Uuid>,
    pub next_trigger_at: DateTime<Utc>,
    pub recurrence: Recurrence,
    pub is_active: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reminder {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.next_trigger_at <= now
    }
}

/// First trigger strictly after `now` for a recurring reminder, skipping
/// every period that was missed. `None` for one-off reminders.
pub fn advance_trigger(
    next_trigger_at: DateTime<Utc>,
    recurrence: Recurrence,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let period = recurrence.period()?;
    if next_trigger_at > now {
        return Some(next_trigger_at);
    }
    let elapsed = (now - next_trigger_at).num_seconds();
    let steps = elapsed / period.num_seconds() + 1;
    Some(next_trigger_at + period * steps as i32)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReminderRequest {
    pub reminder_type: ReminderType,
    pub title: String,
    pub message: String,
    pub related_entity_id: Option<Uuid>,
    pub next_trigger_at: DateTime<Utc>,
    #[serde(default)]
    pub recurrence: Recurrence,
}

impl CreateReminderRequest {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), HealthError> {
        require_non_empty("title", &self.title).map_err(HealthError::ValidationError)?;
        require_non_empty("message", &self.message).map_err(HealthError::ValidationError)?;
        if self.title.len() > 200 {
            return Err(HealthError::ValidationError("title must be at most 200 characters".to_string()));
        }
        if self.next_trigger_at <= now {
            return Err(HealthError::ValidationError("next_trigger_at must be in the future".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateReminderRequest {
    pub title: Option<String>,
    pub message: Option<String>,
    pub next_trigger_at: Option<DateTime<Utc>>,
    pub recurrence: Option<Recurrence>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReminderQuery {
    pub active_only: Option<bool>,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug)]
pub enum HealthError {
    #[error("Medication not found")]
    MedicationNotFound,

    #[error("Health metric not found")]
    MetricNotFound,

    #[error("Reminder not found")]
    ReminderNotFound,

    #[error("Medication is already discontinued")]
    AlreadyDiscontinued,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
