use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Weekday};

use booking_queue_cell::*;
use doctor_cell::{
    Break, CreateDoctorRequest, DaySchedule, Doctor, DoctorError, DoctorService, Shift,
    WeeklySchedule,
};
use shared_database::TenantResolver;
use shared_utils::test_utils::{TestConfig, TestTenants, TEST_INSTITUTION};

mod faults;
mod disruption;
mod live_shift;

pub fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// 2025-06-02 is a Monday. Tuesdays are off in the test schedule.
pub fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
}

pub fn tuesday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 3).unwrap()
}

pub fn weekly_schedule() -> WeeklySchedule {
    WeeklySchedule::default()
        .with_day(
            Weekday::Mon,
            DaySchedule {
                is_available: true,
                shifts: vec![
                    Shift {
                        name: "Morning".to_string(),
                        start_time: t(9, 0),
                        end_time: t(13, 0),
                        max_tokens: 16,
                    },
                    Shift {
                        name: "Evening".to_string(),
                        start_time: t(17, 0),
                        end_time: t(19, 0),
                        max_tokens: 8,
                    },
                ],
                breaks: vec![Break {
                    start_time: t(11, 0),
                    end_time: t(11, 30),
                }],
            },
        )
        .with_day(
            Weekday::Tue,
            DaySchedule {
                is_available: false,
                shifts: vec![],
                breaks: vec![],
            },
        )
}

pub fn patient(name: &str) -> PatientSnapshot {
    PatientSnapshot {
        patient_id: None,
        name: name.to_string(),
        age: Some(34),
        gender: Some("F".to_string()),
    }
}

/// Every service wired over one tenant resolver.
pub struct Harness {
    pub tenants: Arc<dyn TenantResolver>,
    pub doctors: Arc<DoctorService>,
    pub sequencer: Arc<TokenSequencer>,
    pub live_shifts: Arc<LiveShiftService>,
    pub settings: Arc<SettingsService>,
    pub queue: Arc<QueueService>,
    pub disruption: Arc<DisruptionService>,
}

impl Harness {
    pub fn new(config: TestConfig) -> Self {
        Self::with_notifier(config, Arc::new(BroadcastNotifier::new()))
    }

    pub fn with_notifier(config: TestConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_tenants(config, TestTenants::new().resolver(), notifier)
    }

    /// Fails the `nth` conditional write to `collection` in the test institution.
    pub fn with_failing_write(config: TestConfig, collection: &'static str, nth: usize) -> Self {
        let tenants = faults::FailingTenants::new(faults::FailingStore::new(collection, nth));
        Self::with_tenants(config, Arc::new(tenants), Arc::new(BroadcastNotifier::new()))
    }

    pub fn with_tenants(
        config: TestConfig,
        resolver: Arc<dyn TenantResolver>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let app_config = config.to_app_config();

        let doctors = Arc::new(DoctorService::new(resolver.clone(), &app_config));
        let sequencer = Arc::new(TokenSequencer::new(resolver.clone()));
        let settings = Arc::new(SettingsService::new(resolver.clone(), &app_config));
        let live_shifts = Arc::new(LiveShiftService::new(
            resolver.clone(),
            doctors.clone(),
            notifier.clone(),
            &app_config,
        ));
        let queue = Arc::new(QueueService::new(
            resolver.clone(),
            doctors.clone(),
            sequencer.clone(),
            live_shifts.clone(),
            settings.clone(),
            notifier.clone(),
            &app_config,
        ));
        let disruption = Arc::new(DisruptionService::new(
            resolver.clone(),
            doctors.clone(),
            queue.clone(),
            live_shifts.clone(),
            settings.clone(),
            notifier,
        ));

        Self {
            tenants: resolver,
            doctors,
            sequencer,
            live_shifts,
            settings,
            queue,
            disruption,
        }
    }

    pub async fn create_doctor(&self) -> Doctor {
        self.doctors
            .create_doctor(
                TEST_INSTITUTION,
                CreateDoctorRequest {
                    first_name: "Asha".to_string(),
                    last_name: "Rao".to_string(),
                    specialty: "General Medicine".to_string(),
                    average_time_per_patient_minutes: 15,
                    weekly_schedule: weekly_schedule(),
                    leave_settings: None,
                },
            )
            .await
            .unwrap()
    }

    pub async fn book(&self, doctor: &Doctor, shift: &str, name: &str) -> QueueToken {
        self.queue
            .issue_token(
                TEST_INSTITUTION,
                IssueTokenRequest {
                    date: monday(),
                    target: TokenTarget::Consultation {
                        doctor_id: doctor.id,
                        shift_name: shift.to_string(),
                    },
                    patient: patient(name),
                    items: vec![],
                    priority: 0,
                },
            )
            .await
            .unwrap()
    }

    pub async fn book_department(&self, department: &str, name: &str, priority: u8) -> QueueToken {
        self.queue
            .issue_token(
                TEST_INSTITUTION,
                IssueTokenRequest {
                    date: monday(),
                    target: TokenTarget::Department {
                        name: department.to_string(),
                    },
                    patient: patient(name),
                    items: vec![ItemSnapshot {
                        item_id: Some("CBC".to_string()),
                        name: "Complete Blood Count".to_string(),
                        department: Some(department.to_string()),
                    }],
                    priority,
                },
            )
            .await
            .unwrap()
    }

    pub async fn set_leaves(&self, doctor: &Doctor, leaves_taken: u32, limit: u32) {
        self.doctors
            .update_doctor(TEST_INSTITUTION, doctor.id, |d| -> Result<(), DoctorError> {
                d.metrics.leaves_taken = leaves_taken;
                d.leave_settings.leave_limit_per_year = limit;
                Ok(())
            })
            .await
            .unwrap();
    }
}

pub fn cancel(shift_names: &[&str], note: &str) -> ApplyOverrideRequest {
    ApplyOverrideRequest {
        date: monday(),
        shift_names: shift_names.iter().map(|s| s.to_string()).collect(),
        delay_minutes: 0,
        is_cancelled: true,
        note: Some(note.to_string()),
    }
}
