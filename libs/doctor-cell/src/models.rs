use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_database::StoreError;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub institution_id: String,
    pub first_name: String,
    pub last_name: String,
    pub specialty: String,
    pub average_time_per_patient_minutes: u32,
    pub weekly_schedule: WeeklySchedule,
    #[serde(default)]
    pub overrides: Vec<DailyOverride>,
    #[serde(default)]
    pub metrics: DoctorMetrics,
    #[serde(default)]
    pub leave_settings: LeaveSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Doctor {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Uppercase initials used as the token prefix for consultations.
    /// Honorifics such as "Dr." are skipped.
    pub fn initials(&self) -> String {
        let initials: String = self
            .full_name()
            .split_whitespace()
            .filter(|word| {
                let bare = word.trim_end_matches('.').to_ascii_lowercase();
                !matches!(bare.as_str(), "dr" | "prof" | "mr" | "mrs" | "ms")
            })
            .filter_map(|word| word.chars().find(|c| c.is_alphabetic()))
            .flat_map(char::to_uppercase)
            .collect();

        if initials.is_empty() {
            "DR".to_string()
        } else {
            initials
        }
    }

    pub fn schedule_for(&self, date: NaiveDate) -> Option<&DaySchedule> {
        self.weekly_schedule.day(date.weekday())
    }

    /// The shift only counts if the doctor works that weekday.
    pub fn shift_on(&self, date: NaiveDate, shift_name: &str) -> Option<&Shift> {
        self.schedule_for(date)
            .filter(|day| day.is_available)
            .and_then(|day| day.shift(shift_name))
    }

    pub fn override_for(&self, date: NaiveDate) -> Option<&DailyOverride> {
        self.overrides.iter().find(|o| o.date == date)
    }

    /// Replaces any override already recorded for the same date and returns
    /// the one it displaced.
    pub fn replace_override(&mut self, new_override: DailyOverride) -> Option<DailyOverride> {
        let previous = self
            .overrides
            .iter()
            .position(|o| o.date == new_override.date)
            .map(|idx| self.overrides.remove(idx));
        self.overrides.push(new_override);
        self.overrides.sort_by_key(|o| o.date);
        previous
    }

    pub fn validate(&self) -> Result<(), DoctorError> {
        if self.first_name.trim().is_empty() && self.last_name.trim().is_empty() {
            return Err(DoctorError::ValidationError("Doctor name is required".to_string()));
        }
        if !(1..=MINUTES_PER_DAY).contains(&self.average_time_per_patient_minutes) {
            return Err(DoctorError::ValidationError(format!(
                "Average time per patient must be between 1 and {} minutes",
                MINUTES_PER_DAY
            )));
        }
        self.weekly_schedule.validate()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeeklySchedule {
    pub days: HashMap<Weekday, DaySchedule>,
}

impl WeeklySchedule {
    pub fn day(&self, weekday: Weekday) -> Option<&DaySchedule> {
        self.days.get(&weekday)
    }

    pub fn with_day(mut self, weekday: Weekday, day: DaySchedule) -> Self {
        self.days.insert(weekday, day);
        self
    }

    pub fn validate(&self) -> Result<(), DoctorError> {
        for (weekday, day) in &self.days {
            day.validate()
                .map_err(|e| DoctorError::ValidationError(format!("{}: {}", weekday, e.message())))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub is_available: bool,
    #[serde(default)]
    pub shifts: Vec<Shift>,
    #[serde(default)]
    pub breaks: Vec<Break>,
}

impl DaySchedule {
    pub fn shift(&self, name: &str) -> Option<&Shift> {
        self.shifts.iter().find(|s| s.name == name)
    }

    pub fn shift_names(&self) -> BTreeSet<String> {
        self.shifts.iter().map(|s| s.name.clone()).collect()
    }

    pub fn validate(&self) -> Result<(), DoctorError> {
        let mut names = BTreeSet::new();
        for shift in &self.shifts {
            if shift.name.trim().is_empty() {
                return Err(DoctorError::ValidationError("Shift name is required".to_string()));
            }
            if !names.insert(shift.name.as_str()) {
                return Err(DoctorError::ValidationError(format!(
                    "Duplicate shift name '{}'",
                    shift.name
                )));
            }
            if shift.start_time >= shift.end_time {
                return Err(DoctorError::ValidationError(format!(
                    "Shift '{}' must start before it ends",
                    shift.name
                )));
            }
            if shift.max_tokens == 0 {
                return Err(DoctorError::ValidationError(format!(
                    "Shift '{}' must allow at least one token",
                    shift.name
                )));
            }
        }

        let mut ordered: Vec<&Shift> = self.shifts.iter().collect();
        ordered.sort_by_key(|s| s.start_time);
        for pair in ordered.windows(2) {
            if pair[1].start_time < pair[0].end_time {
                return Err(DoctorError::ValidationError(format!(
                    "Shifts '{}' and '{}' overlap",
                    pair[0].name, pair[1].name
                )));
            }
        }

        if let Some(brk) = self.breaks.iter().find(|b| b.start_time >= b.end_time) {
            return Err(DoctorError::ValidationError(format!(
                "Break starting at {} must end after it starts",
                brk.start_time
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shift {
    pub name: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Break {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "shift_names", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideScope {
    WholeDay,
    Shifts(BTreeSet<String>),
}

impl OverrideScope {
    pub fn covers(&self, shift_name: &str) -> bool {
        match self {
            OverrideScope::WholeDay => true,
            OverrideScope::Shifts(names) => names.contains(shift_name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideEffect {
    Delay { minutes: u32 },
    Cancelled,
}

/// A doctor-declared change to one calendar date. At most one per date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyOverride {
    pub date: NaiveDate,
    pub scope: OverrideScope,
    pub effect: OverrideEffect,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DailyOverride {
    /// An empty shift list means the whole day. A cancellation ignores any
    /// delay; a non-cancelling override needs a positive delay.
    pub fn new(
        date: NaiveDate,
        shift_names: Vec<String>,
        delay_minutes: u32,
        is_cancelled: bool,
        note: Option<String>,
    ) -> Result<Self, DoctorError> {
        if shift_names.iter().any(|name| name.trim().is_empty()) {
            return Err(DoctorError::ValidationError("Shift names must not be blank".to_string()));
        }

        let scope = if shift_names.is_empty() {
            OverrideScope::WholeDay
        } else {
            OverrideScope::Shifts(shift_names.into_iter().collect())
        };

        let effect = match (is_cancelled, delay_minutes) {
            (true, _) => OverrideEffect::Cancelled,
            (false, 0) => {
                return Err(DoctorError::ValidationError(
                    "An override must either cancel or delay the schedule".to_string(),
                ))
            }
            (false, minutes) if minutes > MINUTES_PER_DAY => {
                return Err(DoctorError::ValidationError(format!(
                    "A delay cannot exceed {} minutes",
                    MINUTES_PER_DAY
                )))
            }
            (false, minutes) => OverrideEffect::Delay { minutes },
        };

        Ok(Self {
            date,
            scope,
            effect,
            note: note.filter(|n| !n.trim().is_empty()),
            created_at: Utc::now(),
        })
    }

    pub fn is_cancellation(&self) -> bool {
        self.effect == OverrideEffect::Cancelled
    }

    pub fn delay_minutes(&self) -> u32 {
        match self.effect {
            OverrideEffect::Delay { minutes } => minutes,
            OverrideEffect::Cancelled => 0,
        }
    }

    pub fn applies_to(&self, shift_name: &str) -> bool {
        self.scope.covers(shift_name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorMetrics {
    pub leaves_taken: u32,
    pub cancellations_count: u32,
    pub late_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveSettings {
    pub leave_limit_per_year: u32,
}

impl Default for LeaveSettings {
    fn default() -> Self {
        Self {
            leave_limit_per_year: 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDoctorRequest {
    pub first_name: String,
    pub last_name: String,
    pub specialty: String,
    pub average_time_per_patient_minutes: u32,
    pub weekly_schedule: WeeklySchedule,
    pub leave_settings: Option<LeaveSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateScheduleRequest {
    pub weekly_schedule: WeeklySchedule,
    pub average_time_per_patient_minutes: Option<u32>,
    pub leave_settings: Option<LeaveSettings>,
}

#[derive(Error, Debug)]
pub enum DoctorError {
    #[error("Doctor not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Concurrent update conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),
}

impl DoctorError {
    fn message(&self) -> String {
        match self {
            DoctorError::ValidationError(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}
