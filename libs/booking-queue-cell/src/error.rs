use thiserror::Error;

use doctor_cell::DoctorError;
use shared_database::StoreError;

#[derive(Error, Debug)]
pub enum BookingQueueError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Leave limit reached: {leaves_taken} of {limit} leaves already taken this year")]
    QuotaExceeded { leaves_taken: u32, limit: u32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Concurrent update conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Persistence error: {0}")]
    PersistenceError(#[from] StoreError),

    #[error("Worker timeout: cascade took longer than {timeout_seconds} seconds")]
    WorkerTimeout { timeout_seconds: u64 },
}

impl From<DoctorError> for BookingQueueError {
    fn from(err: DoctorError) -> Self {
        match err {
            DoctorError::NotFound(id) => BookingQueueError::NotFound(format!("doctor {}", id)),
            DoctorError::ValidationError(msg) => BookingQueueError::ValidationError(msg),
            DoctorError::ConcurrencyConflict(msg) => BookingQueueError::ConcurrencyConflict(msg),
            DoctorError::Persistence(e) => BookingQueueError::PersistenceError(e),
        }
    }
}
