//! Timing intervals and the ledger that persists them.
//!
//! A timing is "open" while its duration is `0`. Closing sets the duration
//! exactly once; closed timings shorter than the ignore threshold are removed
//! from the ledger instead of being kept.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::LedgerError;

/// One interval of work on one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    /// Ledger id, `None` until the open record has been written.
    pub id: Option<i64>,
    pub task_id: i64,
    /// Epoch seconds.
    pub start_time: i64,
    /// Seconds since `start_time`; `0` while open.
    pub duration: i64,
}

impl Timing {
    /// Start a new open timing for `task_id` at `now`.
    pub fn start(task_id: i64, now: i64) -> Self {
        Self {
            id: None,
            task_id,
            start_time: now,
            duration: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.duration == 0
    }

    /// Seconds between `start_time` and `now`, never negative.
    pub fn elapsed(&self, now: i64) -> i64 {
        now.saturating_sub(self.start_time).max(0)
    }

    /// Fix the duration at `now` and return it.
    pub fn close(&mut self, now: i64) -> i64 {
        self.duration = self.elapsed(now);
        self.duration
    }
}

/// Decide whether a closed interval of `duration` seconds is kept.
///
/// The threshold itself is inclusive. A zero duration is never kept since it
/// would be indistinguishable from an open record.
pub fn should_keep(duration: i64, ignore_threshold: i64) -> bool {
    duration > 0 && duration >= ignore_threshold
}

/// The open record as read back from the ledger, joined with its task name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenTiming {
    pub timing_id: i64,
    pub task_id: i64,
    pub start_time: i64,
    pub task_name: String,
}

/// A closed interval as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingRecord {
    pub id: i64,
    pub task_id: i64,
    pub start_time: i64,
    pub duration: i64,
}

/// Durable storage of timing intervals.
///
/// Holds any number of closed records and at most one open record. Keeping
/// it to one open record is the engine's job, not the ledger's.
pub trait TimingLedger: Send + Sync {
    /// Write a new open record and return its id.
    fn insert_open(&self, task_id: i64, start_time: i64) -> Result<i64, LedgerError>;

    /// Set the duration of an existing record.
    fn update_duration(&self, timing_id: i64, duration: i64) -> Result<(), LedgerError>;

    /// Remove a record. Deleting an absent id is not an error.
    fn delete(&self, timing_id: i64) -> Result<(), LedgerError>;

    /// The open record, if any.
    fn query_open(&self) -> Result<Option<OpenTiming>, LedgerError>;

    /// Closed records that started in `[from, to)`, oldest first.
    fn list_closed(&self, from: i64, to: i64) -> Result<Vec<TimingRecord>, LedgerError>;

    /// Bumped whenever timings change.
    fn changes(&self) -> watch::Receiver<u64>;
}
