use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Notify, RwLock};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, instrument, warn};

use shared_config::AppConfig;

use crate::error::BookingQueueError;
use crate::models::{CascadeJob, CascadeWorkerConfig};
use crate::services::disruption::DisruptionService;

impl CascadeWorkerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            poll_interval_seconds: config.cascade_poll_interval_seconds,
            job_timeout_seconds: config.cascade_job_timeout_seconds,
            institutions: config.cascade_institutions.clone(),
            ..Self::default()
        }
    }
}

/// Re-runs cascade jobs left PENDING in the tenant outboxes.
pub struct CascadeWorkerService {
    config: CascadeWorkerConfig,
    disruption: Arc<DisruptionService>,
    is_shutdown: RwLock<bool>,
    wake: Notify,
}

impl CascadeWorkerService {
    pub fn new(config: CascadeWorkerConfig, disruption: Arc<DisruptionService>) -> Self {
        Self {
            config,
            disruption,
            is_shutdown: RwLock::new(false),
            wake: Notify::new(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn start(&self) -> Result<(), BookingQueueError> {
        info!(
            "Starting cascade worker, polling every {}s",
            self.config.poll_interval_seconds
        );

        let poll_interval = Duration::from_secs(self.config.poll_interval_seconds.max(1));
        loop {
            if *self.is_shutdown.read().await {
                break;
            }

            let completed = self.sweep().await;
            if completed > 0 {
                info!("Cascade worker completed {} pending jobs", completed);
            }

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = self.wake.notified() => {
                    debug!("Cascade worker woken");
                }
            }
        }

        info!("Cascade worker {} stopped", self.config.worker_id);
        Ok(())
    }

    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown for cascade worker {}", self.config.worker_id);
        *self.is_shutdown.write().await = true;
        self.wake.notify_one();
    }

    /// One pass over every known institution plus any configured ones.
    /// Returns the number of jobs that completed.
    pub async fn sweep(&self) -> usize {
        let institutions = self.institutions().await;
        join_all(
            institutions
                .iter()
                .map(|institution_id| self.sweep_institution(institution_id)),
        )
        .await
        .into_iter()
        .sum()
    }

    async fn institutions(&self) -> Vec<String> {
        let mut institutions = match self.disruption.known_institutions().await {
            Ok(known) => known,
            Err(e) => {
                warn!("Could not list institutions, sweeping configured ones only: {}", e);
                Vec::new()
            }
        };
        for configured in &self.config.institutions {
            if !institutions.contains(configured) {
                institutions.push(configured.clone());
            }
        }
        institutions
    }

    pub async fn sweep_institution(&self, institution_id: &str) -> usize {
        let jobs = match self.disruption.pending_jobs(institution_id).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("Failed to list cascade jobs for {}: {}", institution_id, e);
                return 0;
            }
        };

        let mut completed = 0;
        for job in jobs {
            let job_id = job.id;
            match self.process_job(institution_id, job).await {
                Ok(done) => {
                    debug!("Cascade job {} done after {} attempts", job_id, done.attempts);
                    completed += 1;
                }
                Err(e) => error!("Cascade job {} in {} failed: {}", job_id, institution_id, e),
            }
        }
        completed
    }

    async fn process_job(
        &self,
        institution_id: &str,
        job: CascadeJob,
    ) -> Result<CascadeJob, BookingQueueError> {
        let job_timeout = Duration::from_secs(self.config.job_timeout_seconds);

        match timeout(job_timeout, self.disruption.run_cascade_job(institution_id, job)).await {
            Ok(result) => result,
            Err(_) => Err(BookingQueueError::WorkerTimeout {
                timeout_seconds: self.config.job_timeout_seconds,
            }),
        }
    }
}
