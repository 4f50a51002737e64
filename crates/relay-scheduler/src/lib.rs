//! `relay-scheduler` — clock-aligned, cron-gated enqueue of fixed prompts.
//!
//! Schedule definitions persist to JSON (`schedules/root.json` plus one file
//! per mode under `schedules/modes/`), matched against a hand-written
//! standard 5-field cron grammar rather than pulling in an external cron
//! crate. [`SchedulerEngine`] ticks once a minute, deduping fires within a
//! minute bucket, and enqueues through the [`ScheduleEnqueuer`] seam so this
//! crate never depends on `relay-queue` directly.

pub mod cron;
pub mod engine;
pub mod error;
pub mod store;
pub mod types;

pub use cron::CronExpr;
pub use engine::{ScheduleEnqueuer, SchedulerEngine, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use store::ScheduleStore;
pub use types::ScheduleEntry;
