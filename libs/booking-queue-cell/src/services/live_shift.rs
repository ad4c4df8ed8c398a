use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use doctor_cell::{Doctor, DoctorService};
use shared_config::AppConfig;
use shared_database::{Collection, StoreError, TenantResolver, UpdateOutcome};

use crate::error::BookingQueueError;
use crate::models::{date_index, LiveShift, LiveShiftStatus};
use crate::services::notifier::{doctor_channel, Notifier, LIVE_SHIFT_UPDATED};

pub const LIVE_SHIFTS: &str = "live_shifts";

/// Operational record of shifts actually running. One document per
/// (date, doctor, shift) inside the tenant store; creation is
/// create-if-absent so concurrent first bookings converge on one record.
pub struct LiveShiftService {
    tenants: Arc<dyn TenantResolver>,
    doctors: Arc<DoctorService>,
    notifier: Arc<dyn Notifier>,
    max_conflict_retries: u32,
}

impl LiveShiftService {
    pub fn new(
        tenants: Arc<dyn TenantResolver>,
        doctors: Arc<DoctorService>,
        notifier: Arc<dyn Notifier>,
        config: &AppConfig,
    ) -> Self {
        Self {
            tenants,
            doctors,
            notifier,
            max_conflict_retries: config.max_conflict_retries,
        }
    }

    async fn shifts(&self, institution_id: &str) -> Result<Collection<LiveShift>, BookingQueueError> {
        let store = self.tenants.resolve(institution_id).await?;
        Ok(Collection::new(store, LIVE_SHIFTS))
    }

    pub async fn get_shift(
        &self,
        institution_id: &str,
        date: NaiveDate,
        doctor_id: Uuid,
        shift_name: &str,
    ) -> Result<Option<LiveShift>, BookingQueueError> {
        let id = LiveShift::key(date, doctor_id, shift_name);
        Ok(self.shifts(institution_id).await?.get(&id).await?.map(|v| v.value))
    }

    pub async fn list_for_date(
        &self,
        institution_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<LiveShift>, BookingQueueError> {
        let mut shifts: Vec<LiveShift> = self
            .shifts(institution_id)
            .await?
            .list_indexed(&date_index(date))
            .await?
            .into_iter()
            .map(|v| v.value)
            .filter(|shift| shift.date == date)
            .collect();
        shifts.sort_by(|a, b| {
            a.planned_start_time
                .cmp(&b.planned_start_time)
                .then_with(|| a.doctor_id.cmp(&b.doctor_id))
        });
        Ok(shifts)
    }

    /// Returns the live record for the shift, creating it PENDING with the
    /// planned times from the doctor's schedule when absent.
    pub async fn ensure_shift(
        &self,
        institution_id: &str,
        doctor: &Doctor,
        date: NaiveDate,
        shift_name: &str,
    ) -> Result<LiveShift, BookingQueueError> {
        let shifts = self.shifts(institution_id).await?;
        let id = LiveShift::key(date, doctor.id, shift_name);

        if let Some(existing) = shifts.get(&id).await? {
            return Ok(existing.value);
        }

        let shift = doctor.shift_on(date, shift_name).ok_or_else(|| {
            BookingQueueError::ValidationError(format!(
                "Dr. {} does not run a '{}' shift on {}",
                doctor.full_name(),
                shift_name,
                date
            ))
        })?;

        let now = Utc::now();
        let record = LiveShift {
            id: id.clone(),
            institution_id: institution_id.to_string(),
            date,
            doctor_id: doctor.id,
            shift_name: shift_name.to_string(),
            status: LiveShiftStatus::Pending,
            planned_start_time: date.and_time(shift.start_time).and_utc(),
            planned_end_time: date.and_time(shift.end_time).and_utc(),
            actual_start_time: None,
            actual_end_time: None,
            max_tokens: shift.max_tokens,
            total_tokens_booked: 0,
            tokens_completed: 0,
            current_token_id: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        };

        shifts.index_add(&date_index(date), &id).await?;
        match shifts.insert(&id, &record).await {
            Ok(stored) => {
                debug!("Live shift {} created", id);
                Ok(stored.value)
            }
            Err(StoreError::AlreadyExists { .. }) => shifts
                .get(&id)
                .await?
                .map(|v| v.value)
                .ok_or_else(|| BookingQueueError::NotFound(format!("live shift {}", id))),
            Err(e) => Err(e.into()),
        }
    }

    /// PENDING to IN_PROGRESS. Starting an already running shift returns it unchanged.
    pub async fn start_shift(
        &self,
        institution_id: &str,
        date: NaiveDate,
        doctor_id: Uuid,
        shift_name: &str,
    ) -> Result<LiveShift, BookingQueueError> {
        let doctor = self.doctors.get_doctor(institution_id, doctor_id).await?;
        if doctor
            .override_for(date)
            .is_some_and(|o| o.is_cancellation() && o.applies_to(shift_name))
        {
            return Err(BookingQueueError::ValidationError(format!(
                "Shift '{}' on {} has been cancelled",
                shift_name, date
            )));
        }

        let record = self.ensure_shift(institution_id, &doctor, date, shift_name).await?;
        let started = self
            .update_shift(institution_id, &record.id, |shift| match shift.status {
                LiveShiftStatus::Pending => {
                    shift.status = LiveShiftStatus::InProgress;
                    shift.actual_start_time = Some(Utc::now());
                    Ok(true)
                }
                LiveShiftStatus::InProgress => Ok(false),
                other => Err(invalid(other, LiveShiftStatus::InProgress)),
            })
            .await?
            .ok_or_else(|| BookingQueueError::NotFound(format!("live shift {}", record.id)))?;

        info!("Shift {} started", started.id);
        Ok(started)
    }

    pub async fn complete_shift(
        &self,
        institution_id: &str,
        date: NaiveDate,
        doctor_id: Uuid,
        shift_name: &str,
    ) -> Result<LiveShift, BookingQueueError> {
        let id = LiveShift::key(date, doctor_id, shift_name);
        let completed = self
            .update_shift(institution_id, &id, |shift| match shift.status {
                LiveShiftStatus::InProgress => {
                    shift.status = LiveShiftStatus::Completed;
                    shift.actual_end_time = Some(Utc::now());
                    shift.current_token_id = None;
                    Ok(true)
                }
                LiveShiftStatus::Completed => Ok(false),
                other => Err(invalid(other, LiveShiftStatus::Completed)),
            })
            .await?
            .ok_or_else(|| BookingQueueError::NotFound(format!("live shift {}", id)))?;

        info!("Shift {} completed with {} tokens served", id, completed.tokens_completed);
        Ok(completed)
    }

    pub async fn cancel_shift(
        &self,
        institution_id: &str,
        date: NaiveDate,
        doctor_id: Uuid,
        shift_name: &str,
        reason: Option<String>,
    ) -> Result<LiveShift, BookingQueueError> {
        let doctor = self.doctors.get_doctor(institution_id, doctor_id).await?;
        let record = self.ensure_shift(institution_id, &doctor, date, shift_name).await?;

        self.cancel_if_tracked(institution_id, date, doctor_id, shift_name, reason)
            .await?
            .ok_or_else(|| BookingQueueError::NotFound(format!("live shift {}", record.id)))
    }

    /// Cancels the live record when one exists; shifts nobody has booked or
    /// started have no record and are left alone.
    pub async fn cancel_if_tracked(
        &self,
        institution_id: &str,
        date: NaiveDate,
        doctor_id: Uuid,
        shift_name: &str,
        reason: Option<String>,
    ) -> Result<Option<LiveShift>, BookingQueueError> {
        let id = LiveShift::key(date, doctor_id, shift_name);
        let cancelled = self
            .update_shift(institution_id, &id, |shift| match shift.status {
                LiveShiftStatus::Pending | LiveShiftStatus::InProgress => {
                    shift.status = LiveShiftStatus::Cancelled;
                    shift.actual_end_time = Some(Utc::now());
                    shift.cancel_reason = reason.clone();
                    shift.current_token_id = None;
                    Ok(true)
                }
                LiveShiftStatus::Cancelled => Ok(false),
                other => Err(invalid(other, LiveShiftStatus::Cancelled)),
            })
            .await?;

        if cancelled.is_some() {
            info!("Shift {} cancelled", id);
        }
        Ok(cancelled)
    }

    pub async fn record_booking(
        &self,
        institution_id: &str,
        doctor: &Doctor,
        date: NaiveDate,
        shift_name: &str,
    ) -> Result<LiveShift, BookingQueueError> {
        let record = self.ensure_shift(institution_id, doctor, date, shift_name).await?;
        self.update_shift(institution_id, &record.id, |shift| {
            shift.total_tokens_booked += 1;
            Ok(true)
        })
        .await?
        .ok_or_else(|| BookingQueueError::NotFound(format!("live shift {}", record.id)))
    }

    pub async fn record_completion(
        &self,
        institution_id: &str,
        date: NaiveDate,
        doctor_id: Uuid,
        shift_name: &str,
        token_id: Uuid,
    ) -> Result<Option<LiveShift>, BookingQueueError> {
        let id = LiveShift::key(date, doctor_id, shift_name);
        self.update_shift(institution_id, &id, |shift| {
            shift.tokens_completed += 1;
            if shift.current_token_id == Some(token_id) {
                shift.current_token_id = None;
            }
            Ok(true)
        })
        .await
    }

    pub async fn set_current_token(
        &self,
        institution_id: &str,
        date: NaiveDate,
        doctor_id: Uuid,
        shift_name: &str,
        token_id: Uuid,
    ) -> Result<Option<LiveShift>, BookingQueueError> {
        let id = LiveShift::key(date, doctor_id, shift_name);
        self.update_shift(institution_id, &id, |shift| {
            if shift.current_token_id == Some(token_id) {
                return Ok(false);
            }
            shift.current_token_id = Some(token_id);
            Ok(true)
        })
        .await
    }

    /// Optimistic read-modify-write. `mutate` returns whether it changed
    /// anything; unchanged records are returned without a write. `None` when
    /// the record does not exist.
    async fn update_shift<F>(
        &self,
        institution_id: &str,
        id: &str,
        mut mutate: F,
    ) -> Result<Option<LiveShift>, BookingQueueError>
    where
        F: FnMut(&mut LiveShift) -> Result<bool, BookingQueueError>,
    {
        let shifts = self.shifts(institution_id).await?;

        for attempt in 0..=self.max_conflict_retries {
            let Some(current) = shifts.get(id).await? else {
                return Ok(None);
            };

            let mut shift = current.value.clone();
            if !mutate(&mut shift)? {
                return Ok(Some(current.value));
            }
            shift.updated_at = Utc::now();

            match shifts.update_if_version(id, current.version, &shift).await? {
                UpdateOutcome::Updated(stored) => {
                    self.notifier.publish(
                        &doctor_channel(institution_id, stored.value.doctor_id),
                        LIVE_SHIFT_UPDATED,
                        json!(stored.value),
                    );
                    return Ok(Some(stored.value));
                }
                UpdateOutcome::Conflict { current_version } => {
                    warn!(
                        "Live shift {} changed concurrently (expected v{}, found v{}), attempt {}",
                        id, current.version, current_version, attempt + 1
                    );
                }
                UpdateOutcome::Missing => return Ok(None),
            }
        }

        Err(BookingQueueError::ConcurrencyConflict(format!(
            "live shift {} kept changing after {} retries",
            id, self.max_conflict_retries
        )))
    }
}

fn invalid(from: LiveShiftStatus, to: LiveShiftStatus) -> BookingQueueError {
    BookingQueueError::InvalidTransition {
        from: from.to_string(),
        to: to.to_string(),
    }
}
