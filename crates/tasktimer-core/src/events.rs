use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A timing that was just closed, and whether the ledger keeps it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedTiming {
    /// `None` if the open record was never written.
    pub timing_id: Option<i64>,
    pub task_id: i64,
    pub task_name: String,
    pub start_time: i64,
    pub duration: i64,
    /// `false` when the duration fell below the ignore threshold and the
    /// record was deleted.
    pub kept: bool,
}

/// What a toggle did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    TimingStarted {
        task_id: i64,
        task_name: String,
        start_time: i64,
        at: DateTime<Utc>,
    },
    TimingStopped {
        closed: ClosedTiming,
        at: DateTime<Utc>,
    },
    /// The current timing was closed and another task started in one step.
    TimingSwitched {
        closed: ClosedTiming,
        task_id: i64,
        task_name: String,
        start_time: i64,
        at: DateTime<Utc>,
    },
}

impl Event {
    /// Name of the task being timed after this event, if any.
    pub fn now_timing(&self) -> Option<&str> {
        match self {
            Event::TimingStarted { task_name, .. } | Event::TimingSwitched { task_name, .. } => {
                Some(task_name)
            }
            Event::TimingStopped { .. } => None,
        }
    }

    pub fn closed(&self) -> Option<&ClosedTiming> {
        match self {
            Event::TimingStopped { closed, .. } | Event::TimingSwitched { closed, .. } => {
                Some(closed)
            }
            Event::TimingStarted { .. } => None,
        }
    }
}

/// Epoch seconds as a UTC timestamp.
pub(crate) fn at(epoch_secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(epoch_secs, 0).unwrap_or_default()
}
