use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers;
pub use crate::handlers::QueueState;

pub fn booking_queue_routes(state: QueueState) -> Router {
    Router::new()
        .route("/institutions/{institution_id}/tokens", post(handlers::issue_token))
        .route(
            "/institutions/{institution_id}/tokens/{token_id}",
            get(handlers::get_token),
        )
        .route(
            "/institutions/{institution_id}/tokens/{token_id}/transition",
            post(handlers::transition_token),
        )
        .route(
            "/institutions/{institution_id}/tokens/{token_id}/reallocate",
            post(handlers::resolve_reallocation),
        )
        .route("/institutions/{institution_id}/board", get(handlers::display_board))
        .route(
            "/institutions/{institution_id}/reallocation-queue",
            get(handlers::reallocation_queue),
        )
        .route(
            "/institutions/{institution_id}/sequences/next",
            post(handlers::next_sequence),
        )
        .route(
            "/institutions/{institution_id}/doctors/{doctor_id}/overrides",
            post(handlers::apply_override),
        )
        .route(
            "/institutions/{institution_id}/doctors/{doctor_id}/live-shifts/{date}/{shift_name}/start",
            post(handlers::start_shift),
        )
        .route(
            "/institutions/{institution_id}/doctors/{doctor_id}/live-shifts/{date}/{shift_name}/complete",
            post(handlers::complete_shift),
        )
        .route(
            "/institutions/{institution_id}/doctors/{doctor_id}/live-shifts/{date}/{shift_name}/cancel",
            post(handlers::cancel_shift),
        )
        .route(
            "/institutions/{institution_id}/live-shifts",
            get(handlers::list_live_shifts),
        )
        .route(
            "/institutions/{institution_id}/settings",
            get(handlers::get_settings).put(handlers::update_settings),
        )
        .route(
            "/institutions/{institution_id}/cascade-jobs/{job_id}/retry",
            post(handlers::retry_cascade_job),
        )
        .with_state(state)
}
