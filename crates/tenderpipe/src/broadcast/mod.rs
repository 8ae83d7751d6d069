//! Live progress delivery for jobs.

pub mod event_channel;
pub mod progress_event;

pub use event_channel::{EventChannel, Listener, Subscription};
pub use progress_event::{EventType, ProgressEvent};
