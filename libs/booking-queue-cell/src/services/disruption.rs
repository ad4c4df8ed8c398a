use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use doctor_cell::{
    estimate_arrival, DailyOverride, DaySchedule, Doctor, DoctorService, OverrideScope,
};
use shared_database::{Collection, TenantResolver};

use crate::error::BookingQueueError;
use crate::models::{
    ApplyOverrideRequest, CascadeJob, CascadeJobStatus, CascadePolicy, DisruptionClass,
    LiveShiftStatus, OverrideOutcome, QueueToken, TokenStatus,
};
use crate::services::live_shift::LiveShiftService;
use crate::services::notifier::{doctor_channel, Notifier, OVERRIDE_APPLIED, TOKENS_CASCADED};
use crate::services::queue::{queue_position, QueueService};
use crate::services::settings::SettingsService;

pub const CASCADE_JOBS: &str = "cascade_jobs";
pub const PENDING_JOBS_INDEX: &str = "pending";

/// Records doctor-declared delays and cancellations and propagates
/// cancellations to issued tokens.
///
/// The override and the doctor's metric increment are one conditional write
/// on the doctor document. The cascade is recorded as a `CascadeJob` in the
/// tenant outbox and run once inline; a failed run stays PENDING for the
/// cascade worker. Every step of the cascade is idempotent per token.
pub struct DisruptionService {
    tenants: Arc<dyn TenantResolver>,
    doctors: Arc<DoctorService>,
    queue: Arc<QueueService>,
    live_shifts: Arc<LiveShiftService>,
    settings: Arc<SettingsService>,
    notifier: Arc<dyn Notifier>,
}

impl DisruptionService {
    pub fn new(
        tenants: Arc<dyn TenantResolver>,
        doctors: Arc<DoctorService>,
        queue: Arc<QueueService>,
        live_shifts: Arc<LiveShiftService>,
        settings: Arc<SettingsService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            tenants,
            doctors,
            queue,
            live_shifts,
            settings,
            notifier,
        }
    }

    async fn jobs(&self, institution_id: &str) -> Result<Collection<CascadeJob>, BookingQueueError> {
        let store = self.tenants.resolve(institution_id).await?;
        Ok(Collection::new(store, CASCADE_JOBS))
    }

    #[instrument(skip(self, request), fields(institution_id = %institution_id, doctor_id = %doctor_id, date = %request.date))]
    pub async fn apply_override(
        &self,
        institution_id: &str,
        doctor_id: Uuid,
        request: ApplyOverrideRequest,
    ) -> Result<OverrideOutcome, BookingQueueError> {
        let date = request.date;
        let daily_override = DailyOverride::new(
            date,
            request.shift_names,
            request.delay_minutes,
            request.is_cancelled,
            request.note,
        )?;

        if daily_override.is_cancellation() {
            self.ensure_no_completed_shift(institution_id, doctor_id, &daily_override)
                .await?;
        }

        let (doctor, classification) = self
            .doctors
            .update_doctor(
                institution_id,
                doctor_id,
                |doctor: &mut Doctor| -> Result<DisruptionClass, BookingQueueError> {
                    let classification = {
                        let day = working_day(doctor, date)?;
                        if let OverrideScope::Shifts(names) = &daily_override.scope {
                            if let Some(unknown) = names.iter().find(|n| day.shift(n).is_none()) {
                                return Err(BookingQueueError::ValidationError(format!(
                                    "Unknown shift '{}' on {}",
                                    unknown, date
                                )));
                            }
                        }
                        classify(&daily_override, day)
                    };

                    let metrics = &mut doctor.metrics;
                    match classification {
                        DisruptionClass::FullDayLeave => {
                            let limit = doctor.leave_settings.leave_limit_per_year;
                            if metrics.leaves_taken >= limit {
                                return Err(BookingQueueError::QuotaExceeded {
                                    leaves_taken: metrics.leaves_taken,
                                    limit,
                                });
                            }
                            metrics.leaves_taken += 1;
                        }
                        DisruptionClass::ShiftCancellation => metrics.cancellations_count += 1,
                        DisruptionClass::Delay => metrics.late_count += 1,
                    }

                    doctor.replace_override(daily_override.clone());
                    Ok(classification)
                },
            )
            .await?;

        info!(
            "Override for Dr. {} on {} recorded as {:?}",
            doctor.full_name(),
            date,
            classification
        );
        self.notifier.publish(
            &doctor_channel(institution_id, doctor_id),
            OVERRIDE_APPLIED,
            json!({
                "doctor_id": doctor_id,
                "override": daily_override,
                "classification": classification,
                "metrics": doctor.metrics,
            }),
        );

        let mut outcome = OverrideOutcome {
            daily_override,
            classification,
            policy: None,
            cascade_job_id: None,
            cascaded_token_ids: Vec::new(),
            cascade_pending: false,
        };

        let settings = self.settings.get_settings(institution_id).await?;
        let Some(policy) = settings.policy_for(classification) else {
            return Ok(outcome);
        };

        let now = Utc::now();
        let job = CascadeJob {
            id: Uuid::new_v4(),
            institution_id: institution_id.to_string(),
            doctor_id,
            date,
            scope: outcome.daily_override.scope.clone(),
            policy,
            classification,
            note: outcome.daily_override.note.clone(),
            status: CascadeJobStatus::Pending,
            attempts: 0,
            last_error: None,
            affected_token_ids: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        let jobs = self.jobs(institution_id).await?;
        jobs.index_add(PENDING_JOBS_INDEX, &job.id.to_string()).await?;
        jobs.insert(&job.id.to_string(), &job).await?;

        outcome.policy = Some(policy);
        outcome.cascade_job_id = Some(job.id);

        let job_id = job.id;
        match self.run_cascade_job(institution_id, job).await {
            Ok(done) => outcome.cascaded_token_ids = done.affected_token_ids,
            Err(e) => {
                warn!("Cascade job {} failed, leaving it for the worker: {}", job_id, e);
                outcome.cascade_pending = true;
                match self.get_job(institution_id, job_id).await {
                    Ok(partial) => outcome.cascaded_token_ids = partial.affected_token_ids,
                    Err(read_err) => warn!("Could not read back cascade job {}: {}", job_id, read_err),
                }
            }
        }

        Ok(outcome)
    }

    pub async fn get_job(&self, institution_id: &str, job_id: Uuid) -> Result<CascadeJob, BookingQueueError> {
        self.jobs(institution_id)
            .await?
            .get(&job_id.to_string())
            .await?
            .map(|v| v.value)
            .ok_or_else(|| BookingQueueError::NotFound(format!("cascade job {}", job_id)))
    }

    pub async fn pending_jobs(&self, institution_id: &str) -> Result<Vec<CascadeJob>, BookingQueueError> {
        let mut jobs: Vec<CascadeJob> = self
            .jobs(institution_id)
            .await?
            .list_indexed(PENDING_JOBS_INDEX)
            .await?
            .into_iter()
            .map(|v| v.value)
            .filter(|job| job.status == CascadeJobStatus::Pending)
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    /// Institutions whose outboxes the cascade worker should sweep.
    pub async fn known_institutions(&self) -> Result<Vec<String>, BookingQueueError> {
        Ok(self.tenants.known_tenants().await?)
    }

    pub async fn retry_job(&self, institution_id: &str, job_id: Uuid) -> Result<CascadeJob, BookingQueueError> {
        let job = self.get_job(institution_id, job_id).await?;
        self.run_cascade_job(institution_id, job).await
    }

    /// Runs a job to completion, or records the failure on it and returns
    /// the error. Tokens changed before a failure stay recorded on the job.
    /// Completed jobs are returned untouched.
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn run_cascade_job(
        &self,
        institution_id: &str,
        mut job: CascadeJob,
    ) -> Result<CascadeJob, BookingQueueError> {
        if job.status == CascadeJobStatus::Completed {
            return Ok(job);
        }

        let jobs = self.jobs(institution_id).await?;
        job.attempts += 1;
        job.updated_at = Utc::now();

        match self.cascade(institution_id, &mut job).await {
            Ok(()) => {
                job.status = CascadeJobStatus::Completed;
                job.last_error = None;
                job.completed_at = Some(Utc::now());
                let stored = jobs.put(&job.id.to_string(), &job).await?.value;
                if let Err(e) = jobs.index_remove(PENDING_JOBS_INDEX, &stored.id.to_string()).await {
                    warn!("Cascade job {} left in the pending index: {}", stored.id, e);
                }

                self.notifier.publish(
                    &doctor_channel(institution_id, stored.doctor_id),
                    TOKENS_CASCADED,
                    json!({
                        "job_id": stored.id,
                        "date": stored.date,
                        "policy": stored.policy,
                        "token_ids": stored.affected_token_ids,
                    }),
                );
                info!(
                    "Cascade job {} completed: {} tokens under {:?}",
                    stored.id,
                    stored.affected_token_ids.len(),
                    stored.policy
                );
                Ok(stored)
            }
            Err(e) => {
                job.last_error = Some(e.to_string());
                job.updated_at = Utc::now();
                if let Err(put_err) = jobs.put(&job.id.to_string(), &job).await {
                    warn!("Could not record failure on cascade job {}: {}", job.id, put_err);
                }
                Err(e)
            }
        }
    }

    /// Records every changed token on `job` as it goes.
    async fn cascade(&self, institution_id: &str, job: &mut CascadeJob) -> Result<(), BookingQueueError> {
        let doctor = self.doctors.get_doctor(institution_id, job.doctor_id).await?;

        let shift_names: Vec<String> = doctor
            .schedule_for(job.date)
            .map(|day| {
                day.shifts
                    .iter()
                    .filter(|s| job.scope.covers(&s.name))
                    .map(|s| s.name.clone())
                    .collect()
            })
            .unwrap_or_default();
        for shift_name in &shift_names {
            match self
                .live_shifts
                .cancel_if_tracked(institution_id, job.date, job.doctor_id, shift_name, job.note.clone())
                .await
            {
                Ok(_) => {}
                Err(BookingQueueError::InvalidTransition { from, .. }) => {
                    warn!("Live shift {} on {} left as {}", shift_name, job.date, from);
                }
                Err(e) => return Err(e),
            }
        }

        let affected = self
            .queue
            .list_tokens(institution_id, job.date, |t| {
                t.status.is_cascadable() && t.belongs_to_shift(job.doctor_id, job.date, &job.scope)
            })
            .await?;
        debug!("{} tokens affected by cascade job {}", affected.len(), job.id);

        for token in affected {
            let (updated, changed) = {
                let job: &CascadeJob = job;
                self.queue
                    .update_token(institution_id, token.id, |t| Ok(cascade_token(t, job, &doctor)))
                    .await?
            };
            if changed && !job.affected_token_ids.contains(&updated.id) {
                job.affected_token_ids.push(updated.id);
            }
        }
        Ok(())
    }

    async fn ensure_no_completed_shift(
        &self,
        institution_id: &str,
        doctor_id: Uuid,
        daily_override: &DailyOverride,
    ) -> Result<(), BookingQueueError> {
        let doctor = self.doctors.get_doctor(institution_id, doctor_id).await?;
        let Some(day) = doctor.schedule_for(daily_override.date) else {
            return Ok(());
        };

        for shift in day.shifts.iter().filter(|s| daily_override.applies_to(&s.name)) {
            let live = self
                .live_shifts
                .get_shift(institution_id, daily_override.date, doctor_id, &shift.name)
                .await?;
            if live.is_some_and(|l| l.status == LiveShiftStatus::Completed) {
                return Err(BookingQueueError::ValidationError(format!(
                    "Shift '{}' on {} has already been completed",
                    shift.name, daily_override.date
                )));
            }
        }
        Ok(())
    }
}

/// A cancellation covering every shift the doctor runs that day is a
/// full-day leave; a partial cancellation is shift level.
pub fn classify(daily_override: &DailyOverride, day: &DaySchedule) -> DisruptionClass {
    if !daily_override.is_cancellation() {
        return DisruptionClass::Delay;
    }
    match &daily_override.scope {
        OverrideScope::WholeDay => DisruptionClass::FullDayLeave,
        OverrideScope::Shifts(names) if names.is_superset(&day.shift_names()) => {
            DisruptionClass::FullDayLeave
        }
        OverrideScope::Shifts(_) => DisruptionClass::ShiftCancellation,
    }
}

/// Applies the job's policy to one token. Returns false, changing nothing,
/// for tokens the job no longer applies to: already served, already
/// cancelled, or already moved off the disrupted date.
pub fn cascade_token(token: &mut QueueToken, job: &CascadeJob, doctor: &Doctor) -> bool {
    if !token.status.is_cascadable() || !token.belongs_to_shift(job.doctor_id, job.date, &job.scope) {
        return false;
    }

    let reason = job
        .note
        .clone()
        .unwrap_or_else(|| "Doctor unavailable".to_string());

    match job.policy {
        CascadePolicy::CancelAll => {
            token.status = TokenStatus::Cancelled;
            token.notes.push(format!("Cancelled: {}", reason));
        }
        CascadePolicy::ManualAllocation => {
            token.status = TokenStatus::Cancelled;
            token.is_rescheduled = false;
            token.pending_reallocation = true;
            token.notes.push(format!("Cancelled, awaiting manual re-allocation: {}", reason));
        }
        CascadePolicy::AutoNextAvailable => {
            let Some(next_date) = job.date.succ_opt() else {
                return false;
            };
            reschedule(token, doctor, job.date, next_date);
            token.notes.push(format!("Moved from {} to {}: {}", job.date, next_date, reason));
        }
    }
    true
}

fn reschedule(token: &mut QueueToken, doctor: &Doctor, from: NaiveDate, to: NaiveDate) {
    token.original_date.get_or_insert(from);
    token.date = to;
    token.is_rescheduled = true;
    token.priority = 1;

    let eta = token
        .shift_name
        .as_deref()
        .and_then(|shift| estimate_arrival(doctor, to, shift, queue_position(token.sequence)).scheduled());
    token.estimated_start_time = eta.as_ref().map(|e| e.timestamp);
    token.estimated_start_display = eta.as_ref().map(|e| e.formatted.clone());
    token.is_overbooked = eta.map(|e| e.is_overbooked).unwrap_or(false);
}

fn working_day(doctor: &Doctor, date: NaiveDate) -> Result<&DaySchedule, BookingQueueError> {
    doctor
        .schedule_for(date)
        .filter(|day| day.is_available)
        .ok_or_else(|| {
            BookingQueueError::ValidationError(format!(
                "Dr. {} is not scheduled to work on {}",
                doctor.full_name(),
                date
            ))
        })
}
