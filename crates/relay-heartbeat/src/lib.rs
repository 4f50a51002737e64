//! `relay-heartbeat` — clock-aligned periodic self-check enqueue with
//! active-hours gating and reply-time dedup.
//!
//! [`HeartbeatEngine`] sleeps to the next aligned slot
//! (`ceil(now / interval) + 10s`), then — if enabled, within active hours,
//! the channel resolves, and the queue isn't busy — enqueues a fixed
//! checklist prompt through the [`HeartbeatEnqueuer`] seam. [`HeartbeatDedup`]
//! is the reply-side half: it decides whether a heartbeat turn's first reply
//! chunk should actually reach the channel or get suppressed (an "all clear"
//! sentinel, or a repeat of what was already delivered within 24h).

pub mod active_hours;
pub mod dedup;
pub mod engine;
pub mod types;

pub use active_hours::within_active_hours;
pub use dedup::HeartbeatDedup;
pub use engine::{ChannelResolver, HeartbeatEngine, HeartbeatEnqueuer, QueueBusyProbe};
pub use types::{Disposition, HeartbeatConfig};
