//! Monotonic time source + unique job id minting (§2).
//!
//! Kept as a thin seam so tests can substitute a fixed clock without
//! threading `DateTime::now()` calls through every module; the real adapters
//! (`taskqueue-store-postgres`, `taskqueue-testing`) assign ids, this module
//! only covers the scheduler's own need for "now" and client-facing ids
//! (e.g. websocket subscriber ids default to `Clock::new_id()` when the
//! dashboard transport has none of its own).

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Mint a new opaque unique id, used for subscriber client ids and anywhere
/// else the host transport doesn't already hand us one.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
