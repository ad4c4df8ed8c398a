use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use booking_queue_cell::{
    booking_queue_routes, BroadcastNotifier, DisruptionService, LiveShiftService, Notifier,
    QueueService, QueueState, SettingsService, TokenSequencer,
};
use doctor_cell::{doctor_routes, DoctorService};
use shared_config::AppConfig;
use shared_database::TenantResolver;

pub struct Services {
    pub doctors: Arc<DoctorService>,
    pub notifier: Arc<BroadcastNotifier>,
    pub queue: QueueState,
    pub disruption: Arc<DisruptionService>,
}

impl Services {
    pub fn build(tenants: Arc<dyn TenantResolver>, config: &AppConfig) -> Self {
        let notifier = Arc::new(BroadcastNotifier::new());
        let publisher: Arc<dyn Notifier> = notifier.clone();

        let doctors = Arc::new(DoctorService::new(tenants.clone(), config));
        let sequencer = Arc::new(TokenSequencer::new(tenants.clone()));
        let settings = Arc::new(SettingsService::new(tenants.clone(), config));
        let live_shifts = Arc::new(LiveShiftService::new(
            tenants.clone(),
            doctors.clone(),
            publisher.clone(),
            config,
        ));
        let queue = Arc::new(QueueService::new(
            tenants.clone(),
            doctors.clone(),
            sequencer.clone(),
            live_shifts.clone(),
            settings.clone(),
            publisher.clone(),
            config,
        ));
        let disruption = Arc::new(DisruptionService::new(
            tenants,
            doctors.clone(),
            queue.clone(),
            live_shifts.clone(),
            settings.clone(),
            publisher,
        ));

        Self {
            doctors,
            notifier,
            queue: QueueState {
                queue,
                sequencer,
                live_shifts,
                disruption: disruption.clone(),
                settings,
            },
            disruption,
        }
    }
}

pub fn create_router(services: &Services) -> Router {
    let notifier = services.notifier.clone();

    Router::new()
        .route("/", get(|| async { "Clinic queue API is running!" }))
        .route(
            "/status",
            get(move || {
                let notifier = notifier.clone();
                async move { Json(status(&notifier)) }
            }),
        )
        .merge(doctor_routes(services.doctors.clone()))
        .merge(booking_queue_routes(services.queue.clone()))
}

fn status(notifier: &BroadcastNotifier) -> Value {
    json!({
        "status": "ok",
        "notification_channels": notifier.active_channels().len(),
    })
}
