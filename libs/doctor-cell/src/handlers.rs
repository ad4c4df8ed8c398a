use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use shared_database::StoreError;
use shared_models::error::AppError;

use crate::models::{CreateDoctorRequest, DoctorError, UpdateScheduleRequest};
use crate::services::{ArrivalEstimate, DoctorService};

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: NaiveDate,
    pub duration_minutes: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct EtaQuery {
    pub date: NaiveDate,
    pub shift: String,
    pub position: u32,
}

impl From<DoctorError> for AppError {
    fn from(err: DoctorError) -> Self {
        match err {
            DoctorError::NotFound(_) => AppError::NotFound(err.to_string()),
            DoctorError::ValidationError(msg) => AppError::ValidationError(msg),
            DoctorError::ConcurrencyConflict(_) => AppError::conflict(err.to_string()),
            DoctorError::Persistence(StoreError::InvalidTenant(id)) => {
                AppError::BadRequest(format!("Unknown institution identifier '{}'", id))
            }
            DoctorError::Persistence(e) => {
                error!("Doctor persistence failure: {}", e);
                AppError::Database(e.to_string())
            }
        }
    }
}

pub async fn create_doctor(
    State(service): State<Arc<DoctorService>>,
    Path(institution_id): Path<String>,
    Json(request): Json<CreateDoctorRequest>,
) -> Result<Json<Value>, AppError> {
    info!("Create doctor request for institution {}", institution_id);

    let doctor = service.create_doctor(&institution_id, request).await?;
    Ok(Json(json!({ "success": true, "doctor": doctor })))
}

pub async fn get_doctor(
    State(service): State<Arc<DoctorService>>,
    Path((institution_id, doctor_id)): Path<(String, Uuid)>,
) -> Result<Json<Value>, AppError> {
    let doctor = service.get_doctor(&institution_id, doctor_id).await?;
    Ok(Json(json!(doctor)))
}

pub async fn update_schedule(
    State(service): State<Arc<DoctorService>>,
    Path((institution_id, doctor_id)): Path<(String, Uuid)>,
    Json(request): Json<UpdateScheduleRequest>,
) -> Result<Json<Value>, AppError> {
    info!("Schedule update for doctor {} in {}", doctor_id, institution_id);

    let doctor = service.update_schedule(&institution_id, doctor_id, request).await?;
    Ok(Json(json!({ "success": true, "doctor": doctor })))
}

pub async fn get_available_slots(
    State(service): State<Arc<DoctorService>>,
    Path((institution_id, doctor_id)): Path<(String, Uuid)>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let slots = service
        .available_slots(&institution_id, doctor_id, query.date, query.duration_minutes)
        .await?;

    let formatted: Vec<String> = slots.iter().map(|s| s.format("%H:%M").to_string()).collect();
    Ok(Json(json!({
        "doctor_id": doctor_id,
        "date": query.date,
        "slots": formatted,
        "total": formatted.len(),
    })))
}

pub async fn estimate_arrival(
    State(service): State<Arc<DoctorService>>,
    Path((institution_id, doctor_id)): Path<(String, Uuid)>,
    Query(query): Query<EtaQuery>,
) -> Result<Json<Value>, AppError> {
    if query.position == 0 {
        return Err(AppError::BadRequest("position is 1-based".to_string()));
    }

    let estimate = service
        .estimate_arrival(&institution_id, doctor_id, query.date, &query.shift, query.position)
        .await?;

    Ok(Json(match estimate {
        ArrivalEstimate::Unavailable => Value::Null,
        other => json!(other),
    }))
}
