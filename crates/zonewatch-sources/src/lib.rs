//! zonewatch-sources: external collaborators of the polling loop.
//! Trait seams for the position feed, weather feed, stores and SMS sink,
//! plus their concrete HTTP and SQLite implementations.

pub mod error;
pub mod followmee;
pub mod infobip;
pub mod store;
pub mod traits;
pub mod weather;

pub use error::SourceError;
pub use traits::{
    HistoryStore, NotificationSink, PositionFeed, ViolationStore, WeatherFeed, ZoneStore,
};
