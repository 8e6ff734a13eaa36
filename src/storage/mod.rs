//! This module defines the storage interfaces and implementations for
//! telemetry events.
pub mod events;

pub use events::{EventStore, EventSummary, SledEventStore};
