//! Per-job publish/subscribe channel.
//!
//! Each job id owns a copy-on-write listener list: `subscribe` and
//! `unsubscribe` swap in a new `Arc<Vec<_>>`, `publish` clones the current
//! `Arc` and iterates it without holding the lock. Delivery is synchronous
//! and a panicking listener is logged and skipped.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use super::progress_event::ProgressEvent;

/// A subscriber callback. Runs on the publisher's thread.
pub type Listener = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

#[derive(Clone)]
struct Registered {
    id: u64,
    listener: Listener,
}

#[derive(Default)]
struct ChannelInner {
    listeners: RwLock<HashMap<String, Arc<Vec<Registered>>>>,
    next_id: AtomicU64,
}

impl ChannelInner {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Vec<Registered>>>> {
        match self.listeners.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Event channel lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Vec<Registered>>>> {
        match self.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Event channel lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn remove(&self, job_id: &str, id: u64) {
        let mut map = self.write();
        let Some(current) = map.get(job_id) else {
            return;
        };
        let remaining: Vec<Registered> = current.iter().filter(|r| r.id != id).cloned().collect();
        if remaining.is_empty() {
            map.remove(job_id);
        } else {
            map.insert(job_id.to_string(), Arc::new(remaining));
        }
    }
}

/// In-process broadcast of progress events keyed by job id.
///
/// Cloning is cheap and clones share listeners.
#[derive(Clone, Default)]
pub struct EventChannel {
    inner: Arc<ChannelInner>,
}

impl EventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for `job_id`. The listener stays registered
    /// until the returned [`Subscription`] is unsubscribed or dropped.
    pub fn subscribe<F>(&self, job_id: &str, listener: F) -> Subscription
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let registered = Registered {
            id,
            listener: Arc::new(listener),
        };

        let mut map = self.inner.write();
        let mut next: Vec<Registered> = map
            .get(job_id)
            .map(|current| current.as_ref().clone())
            .unwrap_or_default();
        next.push(registered);
        map.insert(job_id.to_string(), Arc::new(next));
        drop(map);

        log::debug!("Listener {} subscribed to job {}", id, job_id);

        Subscription {
            channel: Arc::downgrade(&self.inner),
            job_id: job_id.to_string(),
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Delivers `event` to every listener currently registered for `job_id`,
    /// in registration order. Returns the number of listeners that ran
    /// without panicking.
    pub fn publish(&self, job_id: &str, event: &ProgressEvent) -> usize {
        let snapshot = match self.inner.read().get(job_id) {
            Some(listeners) => Arc::clone(listeners),
            None => return 0,
        };

        snapshot
            .iter()
            .filter(|registered| deliver(&registered.listener, job_id, event))
            .count()
    }

    pub fn listener_count(&self, job_id: &str) -> usize {
        self.inner.read().get(job_id).map_or(0, |l| l.len())
    }
}

/// Runs one listener, logging instead of propagating a panic. Returns
/// whether the listener completed.
pub(crate) fn deliver(listener: &Listener, job_id: &str, event: &ProgressEvent) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
        Ok(()) => true,
        Err(payload) => {
            log::error!(
                "Listener for job {} panicked on {} event: {}",
                job_id,
                event.event_type.as_str(),
                panic_message(&payload)
            );
            false
        }
    }
}

pub(crate) fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Handle for one registered listener. Deregisters exactly once, either via
/// [`Subscription::unsubscribe`] or on drop.
pub struct Subscription {
    channel: Weak<ChannelInner>,
    job_id: String,
    id: u64,
    active: AtomicBool,
}

impl Subscription {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Removes the listener. Later calls are no-ops.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.channel.upgrade() {
            inner.remove(&self.job_id, self.id);
            log::debug!("Listener {} unsubscribed from job {}", self.id, self.job_id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("job_id", &self.job_id)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
