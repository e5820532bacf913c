use uuid::Uuid;

use crate::models::job::{Job, JobStatus};

/// Client-side list of job snapshots, newest first.
///
/// Server snapshots always win. The only local edit is marking a job
/// cancelled after the server confirmed the cancel.
#[derive(Debug, Default, Clone)]
pub struct JobListView {
    jobs: Vec<Job>,
}

impl JobListView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole view with a fresh listing.
    pub fn replace_all(&mut self, mut jobs: Vec<Job>) {
        sort_newest_first(&mut jobs);
        self.jobs = jobs;
    }

    /// Merge one server snapshot, replacing any local copy.
    pub fn reconcile(&mut self, snapshot: Job) {
        match self.jobs.iter_mut().find(|job| job.id == snapshot.id) {
            Some(existing) => *existing = snapshot,
            None => {
                self.jobs.push(snapshot);
                sort_newest_first(&mut self.jobs);
            }
        }
    }

    /// Record the outcome of a cancel request.
    ///
    /// Only a successful cancel of a job we still show as pending changes the
    /// view. Returns whether it did.
    pub fn record_cancel(&mut self, job_id: Uuid, success: bool) -> bool {
        if !success {
            return false;
        }
        match self.jobs.iter_mut().find(|job| job.id == job_id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Cancelled;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, job_id: Uuid) -> Option<&Job> {
        self.jobs.iter().find(|job| job.id == job_id)
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Jobs that may still change and are worth watching.
    pub fn active(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter().filter(|job| !job.is_terminal())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

fn sort_newest_first(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}
