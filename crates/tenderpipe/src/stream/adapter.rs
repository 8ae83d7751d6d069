use std::pin::Pin;
use std::time::Duration;

use futures_util::stream::{self, Stream};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, Sleep};

use crate::broadcast::{ProgressEvent, Subscription};
use crate::config::StreamConfig;
use crate::jobs::{JobError, JobManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    /// Interval between `ping` events.
    pub keepalive: Duration,
    /// The stream ends after this long even if the job is still running.
    pub max_lifetime: Duration,
}

impl From<&StreamConfig> for StreamOptions {
    fn from(config: &StreamConfig) -> Self {
        Self {
            keepalive: config.keepalive(),
            max_lifetime: config.max_lifetime(),
        }
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self::from(&StreamConfig::default())
    }
}

struct StreamState {
    job_id: String,
    events: mpsc::UnboundedReceiver<ProgressEvent>,
    keepalive: Interval,
    deadline: Pin<Box<Sleep>>,
    finished: bool,
    // Dropped with the stream, which deregisters the listener.
    _subscription: Subscription,
}

/// Opens a live event stream for one job.
///
/// The first item is a snapshot of the job, followed by every event the
/// manager publishes for it and a `ping` every `keepalive`. The stream ends
/// after forwarding a terminal event, once `max_lifetime` has passed, or
/// when the caller drops it.
pub fn job_events(
    manager: &JobManager,
    job_id: &str,
    options: StreamOptions,
) -> Result<impl Stream<Item = ProgressEvent> + Send + 'static, JobError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = manager.subscribe(job_id, move |event: &ProgressEvent| {
        // A closed receiver means the stream is gone and the subscription
        // is about to be dropped.
        let _ = tx.send(event.clone());
    })?;
    log::debug!("Event stream opened for job {}", job_id);

    let state = StreamState {
        job_id: job_id.to_string(),
        events: rx,
        keepalive: tokio::time::interval_at(Instant::now() + options.keepalive, options.keepalive),
        deadline: Box::pin(tokio::time::sleep(options.max_lifetime)),
        finished: false,
        _subscription: subscription,
    };

    Ok(stream::unfold(state, |mut state| async move {
        if state.finished {
            log::debug!("Event stream for job {} closed after terminal event", state.job_id);
            return None;
        }
        tokio::select! {
            biased;
            event = state.events.recv() => {
                let event = event?;
                state.finished = event.is_terminal();
                Some((event, state))
            }
            _ = &mut state.deadline => {
                log::info!("Event stream for job {} exceeded its lifetime", state.job_id);
                None
            }
            _ = state.keepalive.tick() => {
                let ping = ProgressEvent::ping(&state.job_id);
                Some((ping, state))
            }
        }
    }))
}
