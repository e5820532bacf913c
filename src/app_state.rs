use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, ConfigError};
use crate::db::{self, PgJobStore};
use crate::services::{
    dispatcher::Dispatcher,
    engine::{Analyzer, ImageEngine},
    job_store::{JobStore, MemoryJobStore, StoreError},
    lifecycle::JobController,
    queue::{MemoryQueue, PendingQueue, QueueError, RedisQueue},
    storage::{ImageStore, LocalImageStore, R2Client, StorageError},
    worker::{run_reaper, Worker},
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub images: Arc<dyn ImageStore>,
    pub engine: Arc<dyn Analyzer>,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        images: Arc<dyn ImageStore>,
        engine: Arc<dyn Analyzer>,
    ) -> Self {
        Self {
            dispatcher,
            images,
            engine,
        }
    }

    pub fn controller(&self) -> &Arc<JobController> {
        self.dispatcher.controller()
    }

    /// Start `count` workers named `{prefix}-{n}` plus the stale-job reaper.
    pub fn spawn_workers(
        &self,
        config: &AppConfig,
        count: usize,
        shutdown: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let prefix = config.worker_prefix();
        let mut handles = Vec::with_capacity(count + 1);

        for n in 0..count {
            let worker = Worker::new(
                format!("{prefix}-{n}"),
                self.dispatcher.clone(),
                self.images.clone(),
                self.engine.clone(),
                config.worker_idle_wait(),
            );
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move { worker.run_loop(shutdown).await }));
        }

        handles.push(tokio::spawn(run_reaper(
            self.dispatcher.clone(),
            config.reclaim_after(),
            config.reaper_interval(),
            shutdown.clone(),
        )));

        tracing::info!(workers = count, prefix = %prefix, "Workers started");
        handles
    }

    /// Build the backends selected by `config`.
    ///
    /// Postgres, Redis and R2 are used when configured; otherwise the job
    /// snapshot file, the in-process queue and local disk under `DATA_DIR`.
    pub async fn from_config(config: &AppConfig) -> Result<Self, BootstrapError> {
        let store: Arc<dyn JobStore> = match &config.database_url {
            Some(url) => {
                tracing::info!("Connecting to PostgreSQL database");
                let pool = db::init_pool(url, &config.pool_settings()).await?;
                tracing::info!("Running database migrations");
                db::run_migrations(&pool).await?;
                Arc::new(PgJobStore::new(pool))
            }
            None => {
                let path = config.snapshot_path();
                tracing::info!(path = %path.display(), "Using job snapshot file");
                Arc::new(MemoryJobStore::open(path).await?)
            }
        };

        let queue: Arc<dyn PendingQueue> = match &config.redis_url {
            Some(url) => {
                tracing::info!("Connecting to Redis pending set");
                Arc::new(RedisQueue::new(url)?)
            }
            None => Arc::new(MemoryQueue::new()),
        };

        let images: Arc<dyn ImageStore> = match config.r2()? {
            Some(r2) => {
                tracing::info!(bucket = %r2.bucket, "Initializing R2 storage client");
                Arc::new(R2Client::new(
                    &r2.bucket,
                    &r2.endpoint,
                    &r2.access_key,
                    &r2.secret_key,
                )?)
            }
            None => {
                let root = config.images_dir();
                tracing::info!(path = %root.display(), "Storing images on local disk");
                Arc::new(LocalImageStore::new(root))
            }
        };

        let controller = Arc::new(JobController::new(store));
        let dispatcher = Arc::new(Dispatcher::new(controller, queue));
        Ok(Self::new(dispatcher, images, Arc::new(ImageEngine::new())))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
