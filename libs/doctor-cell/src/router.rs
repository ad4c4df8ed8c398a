use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::handlers;
use crate::services::DoctorService;

pub fn doctor_routes(service: Arc<DoctorService>) -> Router {
    Router::new()
        .route("/institutions/{institution_id}/doctors", post(handlers::create_doctor))
        .route("/institutions/{institution_id}/doctors/{doctor_id}", get(handlers::get_doctor))
        .route(
            "/institutions/{institution_id}/doctors/{doctor_id}/schedule",
            put(handlers::update_schedule),
        )
        .route(
            "/institutions/{institution_id}/doctors/{doctor_id}/slots",
            get(handlers::get_available_slots),
        )
        .route(
            "/institutions/{institution_id}/doctors/{doctor_id}/eta",
            get(handlers::estimate_arrival),
        )
        .with_state(service)
}
