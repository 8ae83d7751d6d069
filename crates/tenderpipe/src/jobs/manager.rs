//! Job lifecycle owner.
//!
//! Every mutation of a job happens under that job's own lock: the manager
//! clones the record, applies the change, persists it (one retry), swaps it
//! in and publishes the matching event before releasing the lock. Record and
//! published event therefore never disagree, and a subscriber sees one
//! job's events in mutation order.
//!
//! Listeners run under that lock and must not call back into the manager
//! for the same job.
//!
//! Only unfinished jobs are held in memory. Once a terminal record has been
//! written the slot is dropped and reads are served from the store.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::broadcast::event_channel::{deliver, panic_message};
use crate::broadcast::{EventChannel, EventType, Listener, ProgressEvent, Subscription};
use crate::db::DatabaseError;
use crate::error::ErrorKind;

use super::model::{Job, JobStatus};
use super::progress::JobContext;
use super::store::{JobCounts, JobList, JobQuery, JobStore};
use super::{JobError, JobFailure};

struct JobSlot {
    job: Mutex<Job>,
    cancel: CancellationToken,
}

impl JobSlot {
    fn new(job: Job) -> Self {
        Self {
            job: Mutex::new(job),
            cancel: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Job> {
        match self.job.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job slot lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn snapshot(&self) -> Job {
        self.lock().clone()
    }
}

struct ManagerInner {
    store: Arc<dyn JobStore>,
    channel: EventChannel,
    slots: RwLock<HashMap<String, Arc<JobSlot>>>,
    limiter: Option<Arc<Semaphore>>,
}

/// Creates, runs and tracks jobs. Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<ManagerInner>,
}

impl JobManager {
    /// `max_concurrent_jobs == 0` runs every job immediately; otherwise
    /// jobs beyond the limit wait in `queued`.
    pub fn new(store: Arc<dyn JobStore>, channel: EventChannel, max_concurrent_jobs: usize) -> Self {
        let limiter = (max_concurrent_jobs > 0).then(|| Arc::new(Semaphore::new(max_concurrent_jobs)));
        Self {
            inner: Arc::new(ManagerInner {
                store,
                channel,
                slots: RwLock::new(HashMap::new()),
                limiter,
            }),
        }
    }

    pub fn channel(&self) -> &EventChannel {
        &self.inner.channel
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────────

    /// Allocates a pending job and persists it.
    pub fn create_job(&self, payload: Value) -> Result<String, JobError> {
        let id = uuid::Uuid::new_v4().to_string();
        let job = Job::new(&id, payload);

        self.persist(&job, true)
            .map_err(|source| JobError::Persistence {
                job_id: id.clone(),
                source,
            })?;

        self.write_slots()
            .insert(id.clone(), Arc::new(JobSlot::new(job)));
        log::info!("Created job {}", id);
        Ok(id)
    }

    /// Runs `pipeline` for the job and records its outcome.
    ///
    /// Returns the final job. A job cancelled before it started is returned
    /// as-is without invoking `pipeline`.
    pub async fn run_job<F, Fut>(&self, job_id: &str, pipeline: F) -> Result<Job, JobError>
    where
        F: FnOnce(JobContext) -> Fut,
        Fut: Future<Output = Result<Value, JobFailure>>,
    {
        let Some(slot) = self.find_slot(job_id) else {
            return self.finished_job(job_id);
        };

        let permit = match self.inner.limiter.clone() {
            Some(limiter) => {
                let (job, _) = self.mutate_slot(&slot, job_id, |job| {
                    if job.is_terminal() {
                        return Ok(None);
                    }
                    job.transition(JobStatus::Queued)?;
                    Ok(Some(
                        ProgressEvent::for_job(EventType::Info, job)
                            .with_message("Waiting for a free worker slot"),
                    ))
                })?;
                if job.is_terminal() {
                    return Ok(job);
                }

                tokio::select! {
                    permit = limiter.acquire_owned() => permit.ok(),
                    _ = slot.cancel.cancelled() => {
                        log::info!("Job {} left the queue after cancellation", job_id);
                        return Ok(slot.snapshot());
                    }
                }
            }
            None => None,
        };

        let (job, _) = self.mutate_slot(&slot, job_id, |job| {
            if job.is_terminal() {
                return Ok(None);
            }
            job.transition(JobStatus::Running)?;
            Ok(Some(
                ProgressEvent::for_job(EventType::Progress, job).with_message("Job started"),
            ))
        })?;
        if job.is_terminal() {
            return Ok(job);
        }
        log::info!("Job {} running", job_id);

        let ctx = JobContext::new(job_id, self.clone(), slot.cancel.clone());
        let outcome = AssertUnwindSafe(async move { pipeline(ctx).await })
            .catch_unwind()
            .await;
        drop(permit);

        let (job, _) = self.mutate_slot(&slot, job_id, |job| {
            if job.is_terminal() {
                return Ok(None);
            }
            let event = match outcome {
                Ok(Ok(value)) => {
                    job.transition(JobStatus::Completed)?;
                    job.advance(100);
                    job.result = Some(value.clone());
                    ProgressEvent::for_job(EventType::Success, job)
                        .with_message("Job completed")
                        .with_data(value)
                }
                Ok(Err(failure)) if failure.is_cancelled() => {
                    job.transition(JobStatus::Cancelled)?;
                    ProgressEvent::for_job(EventType::Info, job)
                        .with_code(ErrorKind::Cancelled)
                        .with_message(failure.message)
                }
                Ok(Err(failure)) => {
                    job.fail(failure.kind, failure.message.clone())?;
                    ProgressEvent::for_job(EventType::Error, job)
                        .with_code(failure.kind)
                        .with_message(failure.message)
                }
                Err(payload) => {
                    let message = format!("Pipeline panicked: {}", panic_message(&payload));
                    job.fail(ErrorKind::FatalStageError, message.clone())?;
                    ProgressEvent::for_job(EventType::Error, job)
                        .with_code(ErrorKind::FatalStageError)
                        .with_message(message)
                }
            };
            Ok(Some(event))
        })?;

        match job.error {
            Some(ref error) => log::warn!("Job {} ended {}: {}", job_id, job.status, error),
            None => log::info!("Job {} ended {}", job_id, job.status),
        }
        Ok(job)
    }

    /// Records progress for a running job. Percent is clamped to 0–100 and
    /// never lowers the stored value. Returns false (and logs) when the job
    /// is not running.
    pub fn update_progress(
        &self,
        job_id: &str,
        stage: &str,
        percent: i64,
        details: Option<Value>,
    ) -> Result<bool, JobError> {
        let (_, changed) = self.mutate(job_id, |job| {
            if job.status != JobStatus::Running {
                log::warn!(
                    "Ignoring progress '{}' for job {} in status {}",
                    stage,
                    job.id,
                    job.status
                );
                return Ok(None);
            }
            job.advance(percent);
            job.current_stage = Some(stage.to_string());
            Ok(Some(
                ProgressEvent::for_job(EventType::Progress, job).with_details(details),
            ))
        })?;
        Ok(changed)
    }

    /// Appends a warning to a running job and announces it as `info`.
    pub fn add_warning(&self, job_id: &str, message: &str) -> Result<bool, JobError> {
        let (_, changed) = self.mutate(job_id, |job| {
            if job.status != JobStatus::Running {
                return Ok(None);
            }
            job.warnings.push(message.to_string());
            job.updated_at = chrono::Utc::now();
            Ok(Some(
                ProgressEvent::for_job(EventType::Info, job).with_message(message),
            ))
        })?;
        Ok(changed)
    }

    /// Requests cancellation. Pending and queued jobs are cancelled at once;
    /// running jobs are flagged and stop at their next checkpoint. Returns
    /// the status after the call.
    pub fn cancel_job(&self, job_id: &str) -> Result<JobStatus, JobError> {
        let Some(slot) = self.find_slot(job_id) else {
            let job = self.finished_job(job_id)?;
            return Err(JobError::NotCancellable {
                job_id: job.id,
                status: job.status,
            });
        };
        let (job, _) = self.mutate_slot(&slot, job_id, |job| match job.status {
            JobStatus::Pending | JobStatus::Queued => {
                job.transition(JobStatus::Cancelled)?;
                job.cancel_requested = true;
                Ok(Some(
                    ProgressEvent::for_job(EventType::Info, job)
                        .with_code(ErrorKind::Cancelled)
                        .with_message("Job cancelled before start"),
                ))
            }
            JobStatus::Running if job.cancel_requested => Ok(None),
            JobStatus::Running => {
                job.cancel_requested = true;
                job.updated_at = chrono::Utc::now();
                Ok(Some(
                    ProgressEvent::for_job(EventType::Info, job)
                        .with_message("Cancellation requested"),
                ))
            }
            status => Err(JobError::NotCancellable {
                job_id: job.id.clone(),
                status,
            }),
        })?;

        slot.cancel.cancel();
        log::info!("Cancellation of job {} requested ({})", job_id, job.status);
        Ok(job.status)
    }

    // ─── Queries ────────────────────────────────────────────────────────────

    pub fn get_job(&self, job_id: &str) -> Result<Option<Job>, JobError> {
        if let Some(slot) = self.find_slot(job_id) {
            return Ok(Some(slot.snapshot()));
        }
        self.inner
            .store
            .get(job_id)
            .map_err(|source| JobError::Persistence {
                job_id: job_id.to_string(),
                source,
            })
    }

    /// Lists stored jobs, preferring the live record of jobs this manager owns.
    pub fn list_jobs(&self, query: &JobQuery) -> Result<JobList, JobError> {
        let mut list = self
            .inner
            .store
            .list(query)
            .map_err(|source| JobError::Persistence {
                job_id: "<list>".to_string(),
                source,
            })?;
        for job in list.jobs.iter_mut() {
            if let Some(slot) = self.find_slot(&job.id) {
                *job = slot.snapshot();
            }
        }
        Ok(list)
    }

    pub fn stats(&self) -> Result<JobCounts, JobError> {
        self.inner
            .store
            .counts()
            .map_err(|source| JobError::Persistence {
                job_id: "<stats>".to_string(),
                source,
            })
    }

    /// Removes a terminal job from memory and the store.
    pub fn delete_job(&self, job_id: &str) -> Result<(), JobError> {
        if let Some(slot) = self.find_slot(job_id) {
            let job = slot.snapshot();
            if !job.is_terminal() {
                return Err(JobError::NotDeletable {
                    job_id: job_id.to_string(),
                    status: job.status,
                });
            }
        }

        let removed = self
            .inner
            .store
            .delete(job_id)
            .map_err(|source| JobError::Persistence {
                job_id: job_id.to_string(),
                source,
            })?;
        let cached = self.write_slots().remove(job_id).is_some();
        if !removed && !cached {
            return Err(JobError::NotFound(job_id.to_string()));
        }
        log::info!("Deleted job {}", job_id);
        Ok(())
    }

    /// Subscribes to a job's events. The listener first receives a snapshot
    /// of the job, then every later event.
    pub fn subscribe<F>(&self, job_id: &str, listener: F) -> Result<Subscription, JobError>
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let forward = Arc::clone(&listener);

        match self.find_slot(job_id) {
            Some(slot) => {
                let guard = slot.lock();
                deliver(&listener, job_id, &ProgressEvent::snapshot(&guard));
                Ok(self
                    .inner
                    .channel
                    .subscribe(job_id, move |e: &ProgressEvent| forward(e)))
            }
            None => {
                let job = self
                    .get_job(job_id)?
                    .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
                deliver(&listener, job_id, &ProgressEvent::snapshot(&job));
                Ok(self
                    .inner
                    .channel
                    .subscribe(job_id, move |e: &ProgressEvent| forward(e)))
            }
        }
    }

    /// Marks stored jobs left non-terminal by a previous process as failed.
    pub fn recover_interrupted(&self) -> Result<usize, JobError> {
        let mut recovered = 0;
        for status in [JobStatus::Pending, JobStatus::Queued, JobStatus::Running] {
            let query = JobQuery {
                status: Some(status),
                limit: Some(i64::MAX as u64),
                offset: None,
            };
            let list = self
                .inner
                .store
                .list(&query)
                .map_err(|source| JobError::Persistence {
                    job_id: "<recover>".to_string(),
                    source,
                })?;

            for mut job in list.jobs {
                if self.find_slot(&job.id).is_some() {
                    continue;
                }
                job.fail(ErrorKind::FatalStageError, "Interrupted by process restart")?;
                self.persist(&job, false)
                    .map_err(|source| JobError::Persistence {
                        job_id: job.id.clone(),
                        source,
                    })?;
                recovered += 1;
            }
        }
        if recovered > 0 {
            log::warn!("Marked {} interrupted job(s) as failed", recovered);
        }
        Ok(recovered)
    }

    // ─── Internals ──────────────────────────────────────────────────────────

    fn read_slots(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<JobSlot>>> {
        match self.inner.slots.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job manager lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_slots(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<JobSlot>>> {
        match self.inner.slots.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job manager lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn find_slot(&self, job_id: &str) -> Option<Arc<JobSlot>> {
        self.read_slots().get(job_id).cloned()
    }

    fn slot(&self, job_id: &str) -> Result<Arc<JobSlot>, JobError> {
        self.find_slot(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    /// Stored record of a job whose slot was already evicted.
    fn finished_job(&self, job_id: &str) -> Result<Job, JobError> {
        match self.get_job(job_id)? {
            Some(job) if job.is_terminal() => Ok(job),
            _ => Err(JobError::NotFound(job_id.to_string())),
        }
    }

    /// Drops the in-memory slot of a job whose terminal record is stored.
    fn evict(&self, job_id: &str) {
        if self.write_slots().remove(job_id).is_some() {
            log::debug!("Evicted finished job {} from memory", job_id);
        }
    }

    /// Writes the job, retrying once.
    fn persist(&self, job: &Job, insert: bool) -> Result<(), DatabaseError> {
        let attempt = || {
            if insert {
                self.inner.store.insert(job)
            } else {
                self.inner.store.update(job)
            }
        };
        match attempt() {
            Ok(()) => Ok(()),
            Err(first) => {
                log::warn!("Persisting job {} failed, retrying: {}", job.id, first);
                attempt().inspect_err(|second| {
                    log::error!("Persisting job {} failed again: {}", job.id, second);
                })
            }
        }
    }

    /// Applies `f` to a copy of the job under its lock. `Ok(None)` from `f`
    /// means nothing changed; `Ok(Some(event))` persists the copy, installs
    /// it and publishes `event`. Returns the current job and whether it
    /// changed.
    fn mutate<F>(&self, job_id: &str, f: F) -> Result<(Job, bool), JobError>
    where
        F: FnOnce(&mut Job) -> Result<Option<ProgressEvent>, JobError>,
    {
        let slot = self.slot(job_id)?;
        self.mutate_slot(&slot, job_id, f)
    }

    /// `mutate` on a slot the caller already holds, which stays usable
    /// after eviction.
    fn mutate_slot<F>(&self, slot: &JobSlot, job_id: &str, f: F) -> Result<(Job, bool), JobError>
    where
        F: FnOnce(&mut Job) -> Result<Option<ProgressEvent>, JobError>,
    {
        let mut guard = slot.lock();

        let mut next = guard.clone();
        let Some(event) = f(&mut next)? else {
            return Ok((guard.clone(), false));
        };

        if let Err(source) = self.persist(&next, false) {
            return Err(self.fail_on_persistence(slot, &mut guard, source));
        }

        *guard = next;
        self.inner.channel.publish(job_id, &event);
        let job = guard.clone();
        if job.is_terminal() {
            self.evict(job_id);
        }
        Ok((job, true))
    }

    /// A write failed twice: the job becomes `failed` with
    /// `persistence_error` and its pipeline is asked to stop.
    fn fail_on_persistence(&self, slot: &JobSlot, job: &mut Job, source: DatabaseError) -> JobError {
        let job_id = job.id.clone();
        let message = format!("Failed to persist job state: {}", source);

        if job.fail(ErrorKind::PersistenceError, message.clone()).is_ok() {
            match self.persist(job, false) {
                Ok(()) => self.evict(&job_id),
                // The store is behind; keep serving the live record.
                Err(e) => log::error!("Job {} failure could not be persisted: {}", job_id, e),
            }
            let event = ProgressEvent::for_job(EventType::Error, job)
                .with_code(ErrorKind::PersistenceError)
                .with_message(message);
            self.inner.channel.publish(&job_id, &event);
        }
        slot.cancel.cancel();

        JobError::Persistence { job_id, source }
    }
}
