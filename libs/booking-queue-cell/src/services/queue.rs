use std::cmp::Reverse;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use doctor_cell::{estimate_arrival, DoctorService, EtaEstimate};
use shared_config::AppConfig;
use shared_database::{Collection, TenantResolver, UpdateOutcome};

use crate::error::BookingQueueError;
use crate::models::{
    date_index, DisplayBoardEntry, IssueTokenRequest, QueueToken, SequenceScope, TokenStatus, TokenTarget,
};
use crate::services::live_shift::LiveShiftService;
use crate::services::notifier::{queue_channel, Notifier, TOKEN_ISSUED, TOKEN_UPDATED};
use crate::services::sequencer::{format_token_code, TokenSequencer};
use crate::services::settings::SettingsService;

pub const TOKENS: &str = "queue_tokens";
pub const REALLOCATION_INDEX: &str = "pending_reallocation";

/// Owns queue tokens from issue to a terminal state.
pub struct QueueService {
    tenants: Arc<dyn TenantResolver>,
    doctors: Arc<DoctorService>,
    sequencer: Arc<TokenSequencer>,
    live_shifts: Arc<LiveShiftService>,
    settings: Arc<SettingsService>,
    notifier: Arc<dyn Notifier>,
    sequence_width: usize,
    max_conflict_retries: u32,
}

impl QueueService {
    pub fn new(
        tenants: Arc<dyn TenantResolver>,
        doctors: Arc<DoctorService>,
        sequencer: Arc<TokenSequencer>,
        live_shifts: Arc<LiveShiftService>,
        settings: Arc<SettingsService>,
        notifier: Arc<dyn Notifier>,
        config: &AppConfig,
    ) -> Self {
        Self {
            tenants,
            doctors,
            sequencer,
            live_shifts,
            settings,
            notifier,
            sequence_width: config.token_sequence_width,
            max_conflict_retries: config.max_conflict_retries,
        }
    }

    async fn tokens(&self, institution_id: &str) -> Result<Collection<QueueToken>, BookingQueueError> {
        let store = self.tenants.resolve(institution_id).await?;
        Ok(Collection::new(store, TOKENS))
    }

    /// Issues a WAITING token. The patient and item snapshots are frozen
    /// here; consultation tokens also get their booking-time ETA and count
    /// towards the live shift's bookings.
    #[instrument(skip(self, request), fields(institution_id = %institution_id, date = %request.date))]
    pub async fn issue_token(
        &self,
        institution_id: &str,
        request: IssueTokenRequest,
    ) -> Result<QueueToken, BookingQueueError> {
        if request.patient.name.trim().is_empty() {
            return Err(BookingQueueError::ValidationError(
                "Patient name is required".to_string(),
            ));
        }
        if request.priority > 1 {
            return Err(BookingQueueError::ValidationError(
                "Priority must be 0 (normal) or 1 (front of queue)".to_string(),
            ));
        }

        let date = request.date;
        let (scope, prefix, doctor, shift_name) = match &request.target {
            TokenTarget::Department { name } => {
                if name.trim().is_empty() {
                    return Err(BookingQueueError::ValidationError(
                        "Department name is required".to_string(),
                    ));
                }
                let settings = self.settings.get_settings(institution_id).await?;
                (
                    SequenceScope::Department { name: name.clone() },
                    settings.prefix_for(name),
                    None,
                    None,
                )
            }
            TokenTarget::Consultation { doctor_id, shift_name } => {
                let doctor = self.doctors.get_doctor(institution_id, *doctor_id).await?;
                if doctor.shift_on(date, shift_name).is_none() {
                    return Err(BookingQueueError::ValidationError(format!(
                        "Dr. {} does not run a '{}' shift on {}",
                        doctor.full_name(),
                        shift_name,
                        date
                    )));
                }
                if doctor
                    .override_for(date)
                    .is_some_and(|o| o.is_cancellation() && o.applies_to(shift_name))
                {
                    return Err(BookingQueueError::ValidationError(format!(
                        "Shift '{}' on {} has been cancelled",
                        shift_name, date
                    )));
                }
                (
                    SequenceScope::DoctorShift {
                        doctor_id: *doctor_id,
                        shift_name: shift_name.clone(),
                    },
                    doctor.initials(),
                    Some(doctor),
                    Some(shift_name.clone()),
                )
            }
        };

        let sequence = self.sequencer.next_sequence(institution_id, date, &scope).await?;

        let eta: Option<EtaEstimate> = match (&doctor, &shift_name) {
            (Some(doctor), Some(shift)) => {
                estimate_arrival(doctor, date, shift, queue_position(sequence)).scheduled()
            }
            _ => None,
        };

        let now = Utc::now();
        let token = QueueToken {
            id: Uuid::new_v4(),
            institution_id: institution_id.to_string(),
            date,
            scope_key: scope.key(),
            token_code: format_token_code(&prefix, sequence, self.sequence_width),
            sequence,
            doctor_id: doctor.as_ref().map(|d| d.id),
            shift_name: shift_name.clone(),
            priority: request.priority,
            patient: request.patient,
            items: request.items,
            status: TokenStatus::Waiting,
            is_rescheduled: false,
            original_date: None,
            pending_reallocation: false,
            estimated_start_time: eta.as_ref().map(|e| e.timestamp),
            estimated_start_display: eta.as_ref().map(|e| e.formatted.clone()),
            is_overbooked: eta.as_ref().map(|e| e.is_overbooked).unwrap_or(false),
            notes: Vec::new(),
            created_at: now,
            updated_at: now,
            called_at: None,
            completed_at: None,
        };

        let tokens = self.tokens(institution_id).await?;
        let id = token.id.to_string();
        tokens.index_add(&date_index(date), &id).await?;
        let stored = tokens.insert(&id, &token).await?.value;

        if let (Some(doctor), Some(shift)) = (&doctor, &shift_name) {
            self.live_shifts
                .record_booking(institution_id, doctor, date, shift)
                .await?;
        }

        self.notifier.publish(
            &queue_channel(institution_id, date, &stored.scope_key),
            TOKEN_ISSUED,
            json!(stored),
        );
        info!("Issued token {} ({}) for {}", stored.token_code, stored.id, date);
        Ok(stored)
    }

    pub async fn get_token(&self, institution_id: &str, token_id: Uuid) -> Result<QueueToken, BookingQueueError> {
        self.tokens(institution_id)
            .await?
            .get(&token_id.to_string())
            .await?
            .map(|v| v.value)
            .ok_or_else(|| BookingQueueError::NotFound(format!("token {}", token_id)))
    }

    /// Applies a status change conditioned on the status read. Of two
    /// operators racing on the same token, the loser re-reads the winner's
    /// status and is rejected by the transition table.
    #[instrument(skip(self), fields(institution_id = %institution_id))]
    pub async fn transition(
        &self,
        institution_id: &str,
        token_id: Uuid,
        next: TokenStatus,
    ) -> Result<QueueToken, BookingQueueError> {
        let (token, _) = self
            .update_token(institution_id, token_id, |token| {
                if !token.status.can_transition_to(next) {
                    return Err(BookingQueueError::InvalidTransition {
                        from: token.status.to_string(),
                        to: next.to_string(),
                    });
                }
                let now = Utc::now();
                token.status = next;
                match next {
                    TokenStatus::Called => token.called_at = Some(now),
                    TokenStatus::Completed => token.completed_at = Some(now),
                    _ => {}
                }
                Ok(true)
            })
            .await?;

        if let (Some(doctor_id), Some(shift)) = (token.doctor_id, token.shift_name.as_deref()) {
            match next {
                TokenStatus::Called | TokenStatus::InProgress => {
                    self.live_shifts
                        .set_current_token(institution_id, token.date, doctor_id, shift, token.id)
                        .await?;
                }
                TokenStatus::Completed => {
                    self.live_shifts
                        .record_completion(institution_id, token.date, doctor_id, shift, token.id)
                        .await?;
                }
                _ => {}
            }
        }

        debug!("Token {} is now {}", token.token_code, token.status);
        Ok(token)
    }

    /// Non-terminal tokens of a scope in calling order: front-of-queue first,
    /// then by sequence.
    pub async fn display_board(
        &self,
        institution_id: &str,
        date: NaiveDate,
        scope_key: &str,
    ) -> Result<Vec<DisplayBoardEntry>, BookingQueueError> {
        let mut tokens = self
            .list_tokens(institution_id, date, |t| {
                t.scope_key == scope_key && !t.status.is_terminal()
            })
            .await?;
        tokens.sort_by_key(|t| (Reverse(t.priority), t.sequence));
        Ok(tokens.iter().map(DisplayBoardEntry::from).collect())
    }

    /// Tokens cancelled under manual allocation that an operator still has
    /// to re-book.
    pub async fn reallocation_queue(&self, institution_id: &str) -> Result<Vec<QueueToken>, BookingQueueError> {
        let mut tokens: Vec<QueueToken> = self
            .tokens(institution_id)
            .await?
            .list_indexed(REALLOCATION_INDEX)
            .await?
            .into_iter()
            .map(|v| v.value)
            .filter(|t| t.pending_reallocation)
            .collect();
        tokens.sort_by(|a, b| (a.date, &a.scope_key, a.sequence).cmp(&(b.date, &b.scope_key, b.sequence)));
        Ok(tokens)
    }

    pub async fn resolve_reallocation(
        &self,
        institution_id: &str,
        token_id: Uuid,
    ) -> Result<QueueToken, BookingQueueError> {
        let (token, changed) = self
            .update_token(institution_id, token_id, |token| {
                if !token.pending_reallocation {
                    return Ok(false);
                }
                token.pending_reallocation = false;
                token.notes.push("Re-allocation handled by operator".to_string());
                Ok(true)
            })
            .await?;

        if changed {
            info!("Token {} removed from the reallocation queue", token.token_code);
        }
        Ok(token)
    }

    /// Tokens currently dated `date` that match `predicate`.
    pub async fn list_tokens<P>(
        &self,
        institution_id: &str,
        date: NaiveDate,
        predicate: P,
    ) -> Result<Vec<QueueToken>, BookingQueueError>
    where
        P: Fn(&QueueToken) -> bool,
    {
        Ok(self
            .tokens(institution_id)
            .await?
            .list_indexed(&date_index(date))
            .await?
            .into_iter()
            .map(|v| v.value)
            .filter(|t| t.date == date && predicate(t))
            .collect())
    }

    /// Optimistic read-modify-write of one token. `mutate` sees a fresh copy
    /// on every attempt and returns whether it changed anything; the flag is
    /// handed back alongside the stored token.
    ///
    /// Index entries are added before the write and dropped after it, so an
    /// index is always a superset of the tokens it describes.
    pub async fn update_token<F>(
        &self,
        institution_id: &str,
        token_id: Uuid,
        mut mutate: F,
    ) -> Result<(QueueToken, bool), BookingQueueError>
    where
        F: FnMut(&mut QueueToken) -> Result<bool, BookingQueueError>,
    {
        let tokens = self.tokens(institution_id).await?;
        let id = token_id.to_string();

        for attempt in 0..=self.max_conflict_retries {
            let current = tokens
                .get(&id)
                .await?
                .ok_or_else(|| BookingQueueError::NotFound(format!("token {}", token_id)))?;

            let mut token = current.value.clone();
            if !mutate(&mut token)? {
                return Ok((current.value, false));
            }
            token.updated_at = Utc::now();

            let previous = &current.value;
            if token.date != previous.date {
                tokens.index_add(&date_index(token.date), &id).await?;
            }
            if token.pending_reallocation && !previous.pending_reallocation {
                tokens.index_add(REALLOCATION_INDEX, &id).await?;
            }

            match tokens.update_if_version(&id, current.version, &token).await? {
                UpdateOutcome::Updated(stored) => {
                    let token = stored.value;
                    if token.date != previous.date {
                        if let Err(e) = tokens.index_remove(&date_index(previous.date), &id).await {
                            warn!("Token {} left in the {} index: {}", token_id, previous.date, e);
                        }
                    }
                    if previous.pending_reallocation && !token.pending_reallocation {
                        if let Err(e) = tokens.index_remove(REALLOCATION_INDEX, &id).await {
                            warn!("Token {} left in the reallocation index: {}", token_id, e);
                        }
                    }
                    self.notifier.publish(
                        &queue_channel(institution_id, token.date, &token.scope_key),
                        TOKEN_UPDATED,
                        json!(token),
                    );
                    return Ok((token, true));
                }
                UpdateOutcome::Conflict { current_version } => {
                    warn!(
                        "Token {} changed concurrently (expected v{}, found v{}), attempt {}",
                        token_id, current.version, current_version, attempt + 1
                    );
                }
                UpdateOutcome::Missing => {
                    return Err(BookingQueueError::NotFound(format!("token {}", token_id)))
                }
            }
        }

        Err(BookingQueueError::ConcurrencyConflict(format!(
            "token {} kept changing after {} retries",
            token_id, self.max_conflict_retries
        )))
    }
}

/// 1-based queue position for a sequence number.
pub fn queue_position(sequence: u64) -> u32 {
    u32::try_from(sequence).unwrap_or(u32::MAX)
}
