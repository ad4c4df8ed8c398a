use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{Collection, TenantResolver, UpdateOutcome, Versioned};

use crate::models::{CreateDoctorRequest, Doctor, DoctorError, UpdateScheduleRequest, MINUTES_PER_DAY};
use crate::services::availability::slots_for_date;
use crate::services::eta::{estimate_arrival, ArrivalEstimate};

pub const DOCTORS: &str = "doctors";

pub struct DoctorService {
    tenants: Arc<dyn TenantResolver>,
    max_conflict_retries: u32,
}

impl DoctorService {
    pub fn new(tenants: Arc<dyn TenantResolver>, config: &AppConfig) -> Self {
        Self {
            tenants,
            max_conflict_retries: config.max_conflict_retries,
        }
    }

    async fn doctors(&self, institution_id: &str) -> Result<Collection<Doctor>, DoctorError> {
        let store = self.tenants.resolve(institution_id).await?;
        Ok(Collection::new(store, DOCTORS))
    }

    /// Create a doctor record; the weekly schedule is validated before anything is written.
    pub async fn create_doctor(
        &self,
        institution_id: &str,
        request: CreateDoctorRequest,
    ) -> Result<Doctor, DoctorError> {
        let now = Utc::now();
        let doctor = Doctor {
            id: Uuid::new_v4(),
            institution_id: institution_id.to_string(),
            first_name: request.first_name,
            last_name: request.last_name,
            specialty: request.specialty,
            average_time_per_patient_minutes: request.average_time_per_patient_minutes,
            weekly_schedule: request.weekly_schedule,
            overrides: Vec::new(),
            metrics: Default::default(),
            leave_settings: request.leave_settings.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        doctor.validate()?;

        let stored = self
            .doctors(institution_id)
            .await?
            .insert(&doctor.id.to_string(), &doctor)
            .await?;

        info!("Doctor {} created for institution {}", doctor.id, institution_id);
        Ok(stored.value)
    }

    pub async fn get_doctor(&self, institution_id: &str, doctor_id: Uuid) -> Result<Doctor, DoctorError> {
        Ok(self.get_versioned(institution_id, doctor_id).await?.value)
    }

    pub async fn get_versioned(
        &self,
        institution_id: &str,
        doctor_id: Uuid,
    ) -> Result<Versioned<Doctor>, DoctorError> {
        self.doctors(institution_id)
            .await?
            .get(&doctor_id.to_string())
            .await?
            .ok_or_else(|| DoctorError::NotFound(doctor_id.to_string()))
    }

    pub async fn update_schedule(
        &self,
        institution_id: &str,
        doctor_id: Uuid,
        request: UpdateScheduleRequest,
    ) -> Result<Doctor, DoctorError> {
        debug!("Updating schedule for doctor {}", doctor_id);

        let (doctor, _) = self
            .update_doctor(institution_id, doctor_id, |doctor| {
                doctor.weekly_schedule = request.weekly_schedule.clone();
                if let Some(avg) = request.average_time_per_patient_minutes {
                    doctor.average_time_per_patient_minutes = avg;
                }
                if let Some(settings) = request.leave_settings {
                    doctor.leave_settings = settings;
                }
                doctor.validate()
            })
            .await?;

        Ok(doctor)
    }

    /// Read-modify-write of a doctor record under optimistic concurrency.
    ///
    /// `mutate` runs against a fresh copy on every attempt, so checks it makes
    /// (quota, validation) always see the state that is finally written.
    pub async fn update_doctor<F, R, E>(
        &self,
        institution_id: &str,
        doctor_id: Uuid,
        mut mutate: F,
    ) -> Result<(Doctor, R), E>
    where
        F: FnMut(&mut Doctor) -> Result<R, E>,
        E: From<DoctorError>,
    {
        let doctors = self.doctors(institution_id).await?;
        let id = doctor_id.to_string();

        for attempt in 0..=self.max_conflict_retries {
            let current = doctors
                .get(&id)
                .await
                .map_err(DoctorError::from)?
                .ok_or_else(|| DoctorError::NotFound(id.clone()))?;

            let mut doctor = current.value.clone();
            let output = mutate(&mut doctor)?;
            doctor.updated_at = Utc::now();

            match doctors
                .update_if_version(&id, current.version, &doctor)
                .await
                .map_err(DoctorError::from)?
            {
                UpdateOutcome::Updated(stored) => return Ok((stored.value, output)),
                UpdateOutcome::Conflict { current_version } => {
                    warn!(
                        "Doctor {} changed concurrently (expected v{}, found v{}), attempt {}",
                        doctor_id, current.version, current_version, attempt + 1
                    );
                }
                UpdateOutcome::Missing => return Err(DoctorError::NotFound(id).into()),
            }
        }

        Err(DoctorError::ConcurrencyConflict(format!(
            "doctor {} kept changing after {} retries",
            doctor_id, self.max_conflict_retries
        ))
        .into())
    }

    /// Slot starts for a date; defaults the slot length to the doctor's
    /// average consultation time.
    pub async fn available_slots(
        &self,
        institution_id: &str,
        doctor_id: Uuid,
        date: NaiveDate,
        slot_duration_minutes: Option<u32>,
    ) -> Result<Vec<NaiveTime>, DoctorError> {
        if slot_duration_minutes.is_some_and(|d| !(1..=MINUTES_PER_DAY).contains(&d)) {
            return Err(DoctorError::ValidationError(format!(
                "Slot duration must be between 1 and {} minutes",
                MINUTES_PER_DAY
            )));
        }

        let doctor = self.get_doctor(institution_id, doctor_id).await?;
        let duration = slot_duration_minutes.unwrap_or(doctor.average_time_per_patient_minutes);

        let slots = slots_for_date(&doctor, date, duration);
        debug!("Found {} slots for doctor {} on {}", slots.len(), doctor_id, date);
        Ok(slots)
    }

    pub async fn estimate_arrival(
        &self,
        institution_id: &str,
        doctor_id: Uuid,
        date: NaiveDate,
        shift_name: &str,
        position: u32,
    ) -> Result<ArrivalEstimate, DoctorError> {
        let doctor = self.get_doctor(institution_id, doctor_id).await?;
        Ok(estimate_arrival(&doctor, date, shift_name, position))
    }
}
