use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::manager::JobManager;
use super::JobFailure;

/// Sink for pipeline progress.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, stage: &str, percent: u8, details: Option<Value>);

    /// Non-fatal problem worth surfacing on the final job.
    fn warn(&self, message: &str);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _stage: &str, _percent: u8, _details: Option<Value>) {}

    fn warn(&self, _message: &str) {}
}

/// Handed to a pipeline function by [`JobManager::run_job`]: reports
/// progress for its one job and exposes the cooperative cancellation flag.
#[derive(Clone)]
pub struct JobContext {
    job_id: String,
    manager: JobManager,
    cancel: CancellationToken,
}

impl JobContext {
    pub(crate) fn new(job_id: &str, manager: JobManager, cancel: CancellationToken) -> Self {
        Self {
            job_id: job_id.to_string(),
            manager,
            cancel,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stage-boundary check. Returns the cancellation failure once the job
    /// has been asked to stop.
    pub fn checkpoint(&self) -> Result<(), JobFailure> {
        if self.cancel.is_cancelled() {
            log::info!("Job {} observed cancellation", self.job_id);
            return Err(JobFailure::cancelled());
        }
        Ok(())
    }
}

impl ProgressReporter for JobContext {
    fn report(&self, stage: &str, percent: u8, details: Option<Value>) {
        if let Err(e) = self
            .manager
            .update_progress(&self.job_id, stage, i64::from(percent), details)
        {
            log::warn!("Progress update for job {} failed: {}", self.job_id, e);
        }
    }

    fn warn(&self, message: &str) {
        if let Err(e) = self.manager.add_warning(&self.job_id, message) {
            log::warn!("Recording warning for job {} failed: {}", self.job_id, e);
        }
    }
}
