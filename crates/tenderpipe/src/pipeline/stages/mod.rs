//! The work done by each pipeline stage, free of job and persistence
//! concerns.

pub mod contextual;
pub mod decision;
pub mod extraction;
pub mod market;

pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
