//! zonewatch-core: geofencing kernel for tracked devices.
//! Spherical geometry, wind-driven gas plumes, danger/alert containment,
//! and the per-device violation lifecycle. Pure: no IO, time is passed in.

pub mod analytics;
pub mod codec;
pub mod containment;
pub mod geo;
pub mod plume;
pub mod tracker;
pub mod types;

pub use containment::ZoneSnapshot;
pub use tracker::{Transition, ViolationTracker};
pub use types::*;
