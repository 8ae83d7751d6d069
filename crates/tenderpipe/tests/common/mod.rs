//! Shared test utilities for tenderpipe integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring an orchestrator over in-memory stores
//! - Builders for data pools and scripted collaborators (price sources,
//!   models, stores) whose behavior a test controls

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
