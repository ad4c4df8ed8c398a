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

use crate::error::BookingQueueError;
use crate::models::{
    ApplyOverrideRequest, CancelShiftRequest, InstitutionSettings, IssueTokenRequest,
    SequenceScope, TransitionRequest,
};
use crate::services::{
    DisruptionService, LiveShiftService, QueueService, SettingsService, TokenSequencer,
};

#[derive(Clone)]
pub struct QueueState {
    pub queue: Arc<QueueService>,
    pub sequencer: Arc<TokenSequencer>,
    pub live_shifts: Arc<LiveShiftService>,
    pub disruption: Arc<DisruptionService>,
    pub settings: Arc<SettingsService>,
}

#[derive(Debug, Deserialize)]
pub struct BoardQuery {
    pub date: NaiveDate,
    pub department: Option<String>,
    pub doctor_id: Option<Uuid>,
    pub shift: Option<String>,
}

impl BoardQuery {
    fn scope(&self) -> Result<SequenceScope, AppError> {
        match (&self.department, self.doctor_id, &self.shift) {
            (Some(name), None, None) => Ok(SequenceScope::Department { name: name.clone() }),
            (None, Some(doctor_id), Some(shift_name)) => Ok(SequenceScope::DoctorShift {
                doctor_id,
                shift_name: shift_name.clone(),
            }),
            _ => Err(AppError::BadRequest(
                "Pass either 'department' or both 'doctor_id' and 'shift'".to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct SequenceRequest {
    pub date: NaiveDate,
    pub scope: SequenceScope,
}

impl From<BookingQueueError> for AppError {
    fn from(err: BookingQueueError) -> Self {
        match err {
            BookingQueueError::ValidationError(msg) => AppError::ValidationError(msg),
            BookingQueueError::InvalidTransition { ref from, ref to } => AppError::Conflict {
                details: Some(json!({ "current_status": from, "requested_status": to })),
                message: err.to_string(),
            },
            BookingQueueError::QuotaExceeded { leaves_taken, limit } => AppError::Unprocessable {
                details: Some(json!({ "leaves_taken": leaves_taken, "limit": limit })),
                message: err.to_string(),
            },
            BookingQueueError::NotFound(_) => AppError::NotFound(err.to_string()),
            BookingQueueError::ConcurrencyConflict(_) => AppError::Conflict {
                details: Some(json!({ "retryable": true })),
                message: err.to_string(),
            },
            BookingQueueError::PersistenceError(StoreError::InvalidTenant(id)) => {
                AppError::BadRequest(format!("Unknown institution identifier '{}'", id))
            }
            BookingQueueError::PersistenceError(e) => {
                error!("Queue persistence failure: {}", e);
                AppError::Database(e.to_string())
            }
            BookingQueueError::WorkerTimeout { .. } => AppError::Internal(err.to_string()),
        }
    }
}

pub async fn issue_token(
    State(state): State<QueueState>,
    Path(institution_id): Path<String>,
    Json(request): Json<IssueTokenRequest>,
) -> Result<Json<Value>, AppError> {
    info!("Issue token request for institution {} on {}", institution_id, request.date);

    let token = state.queue.issue_token(&institution_id, request).await?;
    Ok(Json(json!({ "success": true, "token": token })))
}

pub async fn get_token(
    State(state): State<QueueState>,
    Path((institution_id, token_id)): Path<(String, Uuid)>,
) -> Result<Json<Value>, AppError> {
    let token = state.queue.get_token(&institution_id, token_id).await?;
    Ok(Json(json!(token)))
}

pub async fn transition_token(
    State(state): State<QueueState>,
    Path((institution_id, token_id)): Path<(String, Uuid)>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<Value>, AppError> {
    info!("Token {} -> {} in {}", token_id, request.status, institution_id);

    let token = state
        .queue
        .transition(&institution_id, token_id, request.status)
        .await?;
    Ok(Json(json!({ "success": true, "token": token })))
}

pub async fn display_board(
    State(state): State<QueueState>,
    Path(institution_id): Path<String>,
    Query(query): Query<BoardQuery>,
) -> Result<Json<Value>, AppError> {
    let scope = query.scope()?;
    let entries = state
        .queue
        .display_board(&institution_id, query.date, &scope.key())
        .await?;

    Ok(Json(json!({
        "date": query.date,
        "scope": scope.key(),
        "tokens": entries,
    })))
}

pub async fn reallocation_queue(
    State(state): State<QueueState>,
    Path(institution_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let tokens = state.queue.reallocation_queue(&institution_id).await?;
    Ok(Json(json!({ "total": tokens.len(), "tokens": tokens })))
}

pub async fn resolve_reallocation(
    State(state): State<QueueState>,
    Path((institution_id, token_id)): Path<(String, Uuid)>,
) -> Result<Json<Value>, AppError> {
    let token = state.queue.resolve_reallocation(&institution_id, token_id).await?;
    Ok(Json(json!({ "success": true, "token": token })))
}

pub async fn next_sequence(
    State(state): State<QueueState>,
    Path(institution_id): Path<String>,
    Json(request): Json<SequenceRequest>,
) -> Result<Json<Value>, AppError> {
    let sequence = state
        .sequencer
        .next_sequence(&institution_id, request.date, &request.scope)
        .await?;
    Ok(Json(json!({ "scope": request.scope.key(), "sequence": sequence })))
}

pub async fn apply_override(
    State(state): State<QueueState>,
    Path((institution_id, doctor_id)): Path<(String, Uuid)>,
    Json(request): Json<ApplyOverrideRequest>,
) -> Result<Json<Value>, AppError> {
    info!("Override for doctor {} on {} in {}", doctor_id, request.date, institution_id);

    let outcome = state
        .disruption
        .apply_override(&institution_id, doctor_id, request)
        .await?;
    Ok(Json(json!({ "success": true, "result": outcome })))
}

pub async fn start_shift(
    State(state): State<QueueState>,
    Path((institution_id, doctor_id, date, shift_name)): Path<(String, Uuid, NaiveDate, String)>,
) -> Result<Json<Value>, AppError> {
    let shift = state
        .live_shifts
        .start_shift(&institution_id, date, doctor_id, &shift_name)
        .await?;
    Ok(Json(json!({ "success": true, "live_shift": shift })))
}

pub async fn complete_shift(
    State(state): State<QueueState>,
    Path((institution_id, doctor_id, date, shift_name)): Path<(String, Uuid, NaiveDate, String)>,
) -> Result<Json<Value>, AppError> {
    let shift = state
        .live_shifts
        .complete_shift(&institution_id, date, doctor_id, &shift_name)
        .await?;
    Ok(Json(json!({ "success": true, "live_shift": shift })))
}

pub async fn cancel_shift(
    State(state): State<QueueState>,
    Path((institution_id, doctor_id, date, shift_name)): Path<(String, Uuid, NaiveDate, String)>,
    Json(request): Json<CancelShiftRequest>,
) -> Result<Json<Value>, AppError> {
    let shift = state
        .live_shifts
        .cancel_shift(&institution_id, date, doctor_id, &shift_name, request.reason)
        .await?;
    Ok(Json(json!({ "success": true, "live_shift": shift })))
}

pub async fn list_live_shifts(
    State(state): State<QueueState>,
    Path(institution_id): Path<String>,
    Query(query): Query<DateQuery>,
) -> Result<Json<Value>, AppError> {
    let shifts = state.live_shifts.list_for_date(&institution_id, query.date).await?;
    Ok(Json(json!({ "date": query.date, "live_shifts": shifts })))
}

pub async fn get_settings(
    State(state): State<QueueState>,
    Path(institution_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let settings = state.settings.get_settings(&institution_id).await?;
    Ok(Json(json!(settings)))
}

pub async fn update_settings(
    State(state): State<QueueState>,
    Path(institution_id): Path<String>,
    Json(settings): Json<InstitutionSettings>,
) -> Result<Json<Value>, AppError> {
    let settings = state.settings.put_settings(&institution_id, settings).await?;
    Ok(Json(json!({ "success": true, "settings": settings })))
}

pub async fn retry_cascade_job(
    State(state): State<QueueState>,
    Path((institution_id, job_id)): Path<(String, Uuid)>,
) -> Result<Json<Value>, AppError> {
    info!("Manual retry of cascade job {} in {}", job_id, institution_id);

    let job = state.disruption.retry_job(&institution_id, job_id).await?;
    Ok(Json(json!({ "success": true, "job": job })))
}
