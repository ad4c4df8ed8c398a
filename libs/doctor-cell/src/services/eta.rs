use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Doctor;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtaEstimate {
    pub formatted: String,
    pub timestamp: DateTime<Utc>,
    pub is_overbooked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArrivalEstimate {
    /// The doctor does not run this shift on that weekday, or the position
    /// is too far out to place on the calendar.
    Unavailable,
    Cancelled,
    Scheduled(EtaEstimate),
}

impl ArrivalEstimate {
    pub fn scheduled(self) -> Option<EtaEstimate> {
        match self {
            ArrivalEstimate::Scheduled(eta) => Some(eta),
            _ => None,
        }
    }
}

/// Point estimate of when the patient at `position` (1-based) will be seen:
/// shift start, plus any delay override covering the shift, plus
/// `(position - 1) * average_time_per_patient`. Schedule times are
/// interpreted as UTC wall-clock.
pub fn estimate_arrival(
    doctor: &Doctor,
    date: NaiveDate,
    shift_name: &str,
    position: u32,
) -> ArrivalEstimate {
    let Some(shift) = doctor.shift_on(date, shift_name) else {
        return ArrivalEstimate::Unavailable;
    };

    let delay_minutes = match doctor.override_for(date).filter(|o| o.applies_to(shift_name)) {
        Some(active) if active.is_cancellation() => return ArrivalEstimate::Cancelled,
        Some(active) => active.delay_minutes(),
        None => 0,
    };

    let ahead = i64::from(position.saturating_sub(1));
    let Some(start) = i64::from(doctor.average_time_per_patient_minutes)
        .checked_mul(ahead)
        .and_then(|queued| queued.checked_add(i64::from(delay_minutes)))
        .and_then(Duration::try_minutes)
        .and_then(|offset| date.and_time(shift.start_time).and_utc().checked_add_signed(offset))
    else {
        return ArrivalEstimate::Unavailable;
    };

    ArrivalEstimate::Scheduled(EtaEstimate {
        formatted: format_display_time(start),
        timestamp: start,
        is_overbooked: position > shift.max_tokens,
    })
}

pub fn format_display_time(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%I:%M %p").to_string()
}
