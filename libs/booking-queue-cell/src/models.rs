use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use doctor_cell::{DailyOverride, OverrideScope};

use crate::error::BookingQueueError;

// ==============================================================================
// TOKEN STATUS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStatus {
    Waiting,
    Called,
    InProgress,
    Completed,
    Hold,
    Skipped,
    Cancelled,
}

impl TokenStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TokenStatus::Completed | TokenStatus::Skipped | TokenStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: TokenStatus) -> bool {
        use TokenStatus::*;

        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Cancelled) => true,
            (Waiting, Called) => true,
            (Called, InProgress) => true,
            (InProgress, Completed) => true,
            (Waiting | Called, Hold) => true,
            (Hold, Waiting) => true,
            (Waiting | Called, Skipped) => true,
            _ => false,
        }
    }

    /// Statuses a disruption cascade is allowed to touch.
    pub fn is_cascadable(self) -> bool {
        matches!(self, TokenStatus::Waiting | TokenStatus::Hold)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TokenStatus::Waiting => "WAITING",
            TokenStatus::Called => "CALLED",
            TokenStatus::InProgress => "IN_PROGRESS",
            TokenStatus::Completed => "COMPLETED",
            TokenStatus::Hold => "HOLD",
            TokenStatus::Skipped => "SKIPPED",
            TokenStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==============================================================================
// SEQUENCE SCOPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SequenceScope {
    Department { name: String },
    InvoiceMaster,
    DepartmentOrder { department: String },
    DoctorShift { doctor_id: Uuid, shift_name: String },
}

impl SequenceScope {
    /// Stable counter key for this scope. Doctor and shift are both part of
    /// the key so two doctors never share a number line.
    pub fn key(&self) -> String {
        match self {
            SequenceScope::Department { name } => format!("dept:{}", name),
            SequenceScope::InvoiceMaster => "invoice".to_string(),
            SequenceScope::DepartmentOrder { department } => format!("order:{}", department),
            SequenceScope::DoctorShift { doctor_id, shift_name } => {
                format!("doctor:{}:{}", doctor_id, shift_name)
            }
        }
    }
}

// ==============================================================================
// QUEUE TOKENS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientSnapshot {
    pub patient_id: Option<Uuid>,
    pub name: String,
    pub age: Option<u32>,
    pub gender: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub item_id: Option<String>,
    pub name: String,
    pub department: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueToken {
    pub id: Uuid,
    pub institution_id: String,
    pub date: NaiveDate,
    pub scope_key: String,
    pub token_code: String,
    pub sequence: u64,
    pub doctor_id: Option<Uuid>,
    pub shift_name: Option<String>,
    /// 0 is normal, 1 is front-of-queue.
    pub priority: u8,
    pub patient: PatientSnapshot,
    pub items: Vec<ItemSnapshot>,
    pub status: TokenStatus,
    pub is_rescheduled: bool,
    pub original_date: Option<NaiveDate>,
    pub pending_reallocation: bool,
    pub estimated_start_time: Option<DateTime<Utc>>,
    pub estimated_start_display: Option<String>,
    pub is_overbooked: bool,
    pub notes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub called_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueueToken {
    pub fn belongs_to_shift(&self, doctor_id: Uuid, date: NaiveDate, scope: &OverrideScope) -> bool {
        self.doctor_id == Some(doctor_id)
            && self.date == date
            && self
                .shift_name
                .as_deref()
                .map(|name| scope.covers(name))
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenTarget {
    Department { name: String },
    Consultation { doctor_id: Uuid, shift_name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueTokenRequest {
    pub date: NaiveDate,
    pub target: TokenTarget,
    pub patient: PatientSnapshot,
    #[serde(default)]
    pub items: Vec<ItemSnapshot>,
    #[serde(default)]
    pub priority: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub status: TokenStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayBoardEntry {
    pub token_id: Uuid,
    pub token_code: String,
    pub sequence: u64,
    pub priority: u8,
    pub status: TokenStatus,
    pub patient_name: String,
    pub estimated_start_display: Option<String>,
    pub is_overbooked: bool,
}

impl From<&QueueToken> for DisplayBoardEntry {
    fn from(token: &QueueToken) -> Self {
        Self {
            token_id: token.id,
            token_code: token.token_code.clone(),
            sequence: token.sequence,
            priority: token.priority,
            status: token.status,
            patient_name: token.patient.name.clone(),
            estimated_start_display: token.estimated_start_display.clone(),
            is_overbooked: token.is_overbooked,
        }
    }
}

// ==============================================================================
// LIVE SHIFTS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LiveShiftStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl fmt::Display for LiveShiftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LiveShiftStatus::Pending => "PENDING",
            LiveShiftStatus::InProgress => "IN_PROGRESS",
            LiveShiftStatus::Completed => "COMPLETED",
            LiveShiftStatus::Cancelled => "CANCELLED",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveShift {
    pub id: String,
    pub institution_id: String,
    pub date: NaiveDate,
    pub doctor_id: Uuid,
    pub shift_name: String,
    pub status: LiveShiftStatus,
    pub planned_start_time: DateTime<Utc>,
    pub planned_end_time: DateTime<Utc>,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub actual_end_time: Option<DateTime<Utc>>,
    pub max_tokens: u32,
    pub total_tokens_booked: u32,
    pub tokens_completed: u32,
    pub current_token_id: Option<Uuid>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LiveShift {
    pub fn key(date: NaiveDate, doctor_id: Uuid, shift_name: &str) -> String {
        format!("{}:{}:{}", date, doctor_id, shift_name)
    }
}

/// Secondary index grouping a collection's documents by calendar date.
pub fn date_index(date: NaiveDate) -> String {
    format!("date:{}", date)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelShiftRequest {
    pub reason: Option<String>,
}

// ==============================================================================
// DISRUPTIONS & CASCADE POLICY
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CascadePolicy {
    AutoNextAvailable,
    CancelAll,
    ManualAllocation,
}

impl FromStr for CascadePolicy {
    type Err = BookingQueueError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "AUTO_NEXT_AVAILABLE" => Ok(CascadePolicy::AutoNextAvailable),
            "CANCEL_ALL" => Ok(CascadePolicy::CancelAll),
            "MANUAL_ALLOCATION" => Ok(CascadePolicy::ManualAllocation),
            other => Err(BookingQueueError::ValidationError(format!(
                "Unknown cascade policy '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisruptionClass {
    FullDayLeave,
    ShiftCancellation,
    Delay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstitutionSettings {
    pub whole_day_policy: CascadePolicy,
    pub shift_policy: CascadePolicy,
    #[serde(default)]
    pub department_prefixes: HashMap<String, String>,
}

impl InstitutionSettings {
    pub fn policy_for(&self, class: DisruptionClass) -> Option<CascadePolicy> {
        match class {
            DisruptionClass::FullDayLeave => Some(self.whole_day_policy),
            DisruptionClass::ShiftCancellation => Some(self.shift_policy),
            DisruptionClass::Delay => None,
        }
    }

    /// Configured prefix for a department, else the first three letters of
    /// its name in upper case ("Pathology" gives "PAT").
    pub fn prefix_for(&self, department: &str) -> String {
        if let Some(prefix) = self.department_prefixes.get(department) {
            return prefix.clone();
        }
        let derived: String = department
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(3)
            .collect::<String>()
            .to_ascii_uppercase();
        if derived.is_empty() {
            "TKN".to_string()
        } else {
            derived
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyOverrideRequest {
    pub date: NaiveDate,
    #[serde(default)]
    pub shift_names: Vec<String>,
    #[serde(default)]
    pub delay_minutes: u32,
    #[serde(default)]
    pub is_cancelled: bool,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideOutcome {
    #[serde(rename = "override")]
    pub daily_override: DailyOverride,
    pub classification: DisruptionClass,
    pub policy: Option<CascadePolicy>,
    pub cascade_job_id: Option<Uuid>,
    pub cascaded_token_ids: Vec<Uuid>,
    /// The cascade did not finish inline and is left to the worker.
    pub cascade_pending: bool,
}

// ==============================================================================
// CASCADE OUTBOX
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CascadeJobStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeJob {
    pub id: Uuid,
    pub institution_id: String,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub scope: OverrideScope,
    pub policy: CascadePolicy,
    pub classification: DisruptionClass,
    pub note: Option<String>,
    pub status: CascadeJobStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub affected_token_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct CascadeWorkerConfig {
    pub worker_id: String,
    pub poll_interval_seconds: u64,
    pub job_timeout_seconds: u64,
    pub institutions: Vec<String>,
}

impl Default for CascadeWorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("cascade-worker-{}", Uuid::new_v4()),
            poll_interval_seconds: 30,
            job_timeout_seconds: 60,
            institutions: Vec::new(),
        }
    }
}
