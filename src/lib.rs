// kiln-dash: dashboard core for a single kiln / process temperature controller

pub mod api;
pub mod chart;
pub mod config;
pub mod history;
pub mod pins;
pub mod sync;
pub mod view;

pub use sync::{CycleOutcome, StateSynchronizer, SyncEvent, SyncStats, ViewMode};
