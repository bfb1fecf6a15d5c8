//! Time-range helpers shared by the clinic, doctor and appointment cells.
//!
//! All ranges are half-open: `[start, end)`. Two back-to-back appointments
//! (one ending at 10:00, the next starting at 10:00) do not overlap.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn from_duration(start: DateTime<Utc>, duration_minutes: i32) -> Self {
        Self {
            start,
            end: start + Duration::minutes(duration_minutes as i64),
        }
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

/// RFC 3339 with a `Z` suffix, safe to embed in a query string unencoded.
pub fn rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn clinic_offset(utc_offset_minutes: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(utc_offset_minutes * 60)
}

/// Day of week numbered from Sunday = 0, as stored in schedules.
pub fn day_of_week(date: NaiveDate) -> i32 {
    date.weekday().num_days_from_sunday() as i32
}

/// Local wall-clock date of `time` in a clinic at `offset`.
pub fn local_date(time: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    time.with_timezone(&offset).date_naive()
}

/// UTC range covering a local wall-clock window on `date`.
pub fn local_window(
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
    offset: FixedOffset,
) -> Option<TimeRange> {
    let start_utc = offset
        .from_local_datetime(&date.and_time(start))
        .single()?
        .with_timezone(&Utc);
    let end_utc = offset
        .from_local_datetime(&date.and_time(end))
        .single()?
        .with_timezone(&Utc);
    TimeRange::new(start_utc, end_utc)
}

/// UTC range covering the whole local calendar day.
pub fn local_day(date: NaiveDate, offset: FixedOffset) -> Option<TimeRange> {
    let start = offset
        .from_local_datetime(&date.and_time(NaiveTime::MIN))
        .single()?
        .with_timezone(&Utc);
    TimeRange::new(start, start + Duration::days(1))
}

/// Two wall-clock windows on the same day overlap.
pub fn local_windows_overlap(a: (NaiveTime, NaiveTime), b: (NaiveTime, NaiveTime)) -> bool {
    a.0 < b.1 && b.0 < a.1
}
