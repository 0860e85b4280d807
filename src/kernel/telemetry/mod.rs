//! Generation & export telemetry.
//!
//! Telemetry is a READ-ONLY side-effect layer: nothing in the state machines
//! or the timeline reads it back.
//!
//! Events carry ids, counts and durations only. Never block text or audio.

pub mod event;
pub mod metrics;
pub mod recorder;
