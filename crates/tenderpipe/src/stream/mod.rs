//! Push delivery of one job's events to a long-lived remote connection.

pub mod adapter;

pub use adapter::{job_events, StreamOptions};
