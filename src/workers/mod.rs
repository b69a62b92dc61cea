use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::services::learning::LearningService;

pub struct WorkerManager {
    scheduler: Mutex<JobScheduler>,
    shutdown_tx: broadcast::Sender<()>,
    learning: Arc<LearningService>,
    config: SchedulerConfig,
}

impl WorkerManager {
    pub async fn new(learning: Arc<LearningService>, config: SchedulerConfig) -> Result<Self, WorkerError> {
        let scheduler = JobScheduler::new().await.map_err(WorkerError::Scheduler)?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            shutdown_tx,
            learning,
            config,
        })
    }

    pub async fn start(&self) -> Result<(), WorkerError> {
        if !self.config.enable_expiry_worker {
            info!("ENABLE_EXPIRY_WORKER disabled, skipping worker startup");
            return Ok(());
        }

        let scheduler = self.scheduler.lock().await;

        let learning = Arc::clone(&self.learning);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let schedule = self.config.expiry_sweep_schedule.clone();

        let job = Job::new_async(schedule.as_str(), move |_uuid, _lock| {
            let learning = Arc::clone(&learning);
            let mut rx = shutdown_rx.resubscribe();
            Box::pin(async move {
                tokio::select! {
                    _ = rx.recv() => {},
                    _ = async {
                        let expired = learning.expire_stale(Utc::now());
                        if expired > 0 {
                            info!(expired, "expired unanswered quiz notifications");
                        } else {
                            debug!("expiry sweep found nothing to expire");
                        }
                    } => {}
                }
            })
        })
        .map_err(WorkerError::Scheduler)?;
        scheduler.add(job).await.map_err(WorkerError::Scheduler)?;
        info!(schedule = %schedule, "expiry sweep worker scheduled");

        scheduler.start().await.map_err(WorkerError::Scheduler)?;
        info!("All workers started");

        Ok(())
    }

    pub async fn stop(&self) {
        info!("Stopping workers...");
        let _ = self.shutdown_tx.send(());

        let mut scheduler = self.scheduler.lock().await;
        if let Err(e) = scheduler.shutdown().await {
            warn!(error = %e, "Error shutting down worker scheduler");
        }

        info!("Workers stopped");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),
}
