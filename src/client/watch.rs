//! Polling of job snapshots until they reach a terminal status.
//!
//! Each watched job has exactly one polling task. Starting a new watch on a
//! job cancels the previous task, and dropping a [`Watch`] cancels its own.
//! Slots carry a generation number so a task that finishes late never
//! clears the slot of the task that replaced it.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::client::http::{ClientError, JobSource};
use crate::models::job::Job;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

struct Slot {
    generation: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct Slots(Mutex<HashMap<Uuid, Slot>>);

impl Slots {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Slot>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a new slot, cancelling whichever task held the job before.
    fn replace(&self, job_id: Uuid, generation: u64, token: CancellationToken) {
        if let Some(previous) = self.lock().insert(job_id, Slot { generation, token }) {
            previous.token.cancel();
            tracing::debug!(job_id = %job_id, "Replaced existing job watch");
        }
    }

    /// Remove the slot if it still belongs to `generation`.
    fn release(&self, job_id: Uuid, generation: u64) {
        let mut slots = self.lock();
        if slots.get(&job_id).map(|slot| slot.generation) == Some(generation) {
            slots.remove(&job_id);
        }
    }
}

/// Starts and tracks per-job polling tasks.
pub struct JobWatcher {
    source: Arc<dyn JobSource>,
    interval: Duration,
    slots: Arc<Slots>,
    next_generation: AtomicU64,
}

impl JobWatcher {
    pub fn new(source: Arc<dyn JobSource>) -> Self {
        Self {
            source,
            interval: DEFAULT_POLL_INTERVAL,
            slots: Arc::new(Slots::default()),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll `job_id` now and then every interval until it is terminal.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn watch(&self, job_id: Uuid) -> Watch {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.slots.replace(job_id, generation, token.clone());

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(poll_job(
            self.source.clone(),
            job_id,
            self.interval,
            token.clone(),
            tx,
            self.slots.clone(),
            generation,
        ));

        Watch {
            job_id,
            rx,
            token,
            slots: self.slots.clone(),
            generation,
        }
    }

    /// Stop polling `job_id`, if it is being watched.
    pub fn stop(&self, job_id: Uuid) {
        if let Some(slot) = self.slots.lock().remove(&job_id) {
            slot.token.cancel();
        }
    }

    pub fn stop_all(&self) {
        for (_, slot) in self.slots.lock().drain() {
            slot.token.cancel();
        }
    }

    pub fn is_watching(&self, job_id: Uuid) -> bool {
        self.slots.lock().contains_key(&job_id)
    }

    /// Number of live polling tasks.
    pub fn active(&self) -> usize {
        self.slots.lock().len()
    }
}

impl Drop for JobWatcher {
    fn drop(&mut self) {
        self.stop_all();
    }
}

async fn poll_job(
    source: Arc<dyn JobSource>,
    job_id: Uuid,
    interval: Duration,
    token: CancellationToken,
    tx: mpsc::Sender<Result<Job, ClientError>>,
    slots: Arc<Slots>,
    generation: u64,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = source.fetch_job(job_id) => result,
        };

        // a failed read ends the watch; the caller decides whether to retry
        let last = match &result {
            Ok(job) => job.is_terminal(),
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Job poll failed");
                true
            }
        };

        let delivered = tokio::select! {
            biased;
            _ = token.cancelled() => false,
            sent = tx.send(result) => sent.is_ok(),
        };
        if !delivered || last {
            break;
        }
    }

    slots.release(job_id, generation);
    tracing::debug!(job_id = %job_id, generation, "Job watch finished");
}

/// Stream of snapshots for one job. Ends after the first terminal snapshot,
/// after a failed read, or when the watch is stopped or replaced.
pub struct Watch {
    job_id: Uuid,
    rx: mpsc::Receiver<Result<Job, ClientError>>,
    token: CancellationToken,
    slots: Arc<Slots>,
    generation: u64,
}

impl Watch {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Cancel the polling task. Snapshots already received stay readable.
    pub fn stop(&mut self) {
        self.token.cancel();
        self.slots.release(self.job_id, self.generation);
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Stream for Watch {
    type Item = Result<Job, ClientError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.stop();
    }
}
