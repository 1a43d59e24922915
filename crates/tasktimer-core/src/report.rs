//! Per-task totals of recorded time.

use std::collections::HashMap;

use chrono::{Local, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, ValidationError};
use crate::task::TaskStore;
use crate::timing::TimingLedger;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDuration {
    pub task_id: i64,
    pub task_name: String,
    pub sessions: u64,
    pub total_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DurationReport {
    /// Epoch seconds, inclusive.
    pub from: i64,
    /// Epoch seconds, exclusive.
    pub to: i64,
    pub tasks: Vec<TaskDuration>,
    pub total_secs: i64,
}

/// Sum closed timings that started in `[from, to)` per task.
///
/// Tasks appear in task-list order; tasks with no time in the range are
/// left out.
pub fn durations(
    tasks: &dyn TaskStore,
    ledger: &dyn TimingLedger,
    from: i64,
    to: i64,
) -> Result<DurationReport, LedgerError> {
    let mut totals: HashMap<i64, (u64, i64)> = HashMap::new();
    for record in ledger.list_closed(from, to)? {
        let entry = totals.entry(record.task_id).or_default();
        entry.0 += 1;
        entry.1 += record.duration;
    }

    let mut report = DurationReport {
        from,
        to,
        ..DurationReport::default()
    };
    for task in tasks.list_tasks()? {
        if let Some((sessions, total_secs)) = totals.remove(&task.id) {
            report.total_secs += total_secs;
            report.tasks.push(TaskDuration {
                task_id: task.id,
                task_name: task.name,
                sessions,
                total_secs,
            });
        }
    }
    Ok(report)
}

/// Local-time range covering the whole days `first..=last`, as epoch seconds.
pub fn day_range(first: NaiveDate, last: NaiveDate) -> Result<(i64, i64), ValidationError> {
    if last < first {
        return Err(ValidationError::InvalidValue {
            field: "to".to_string(),
            message: format!("{last} is before {first}"),
        });
    }
    let start_of = |date: NaiveDate| {
        let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
        Local
            .from_local_datetime(&midnight)
            .earliest()
            .map(|dt| dt.timestamp())
            .unwrap_or_else(|| midnight.and_utc().timestamp())
    };
    let after_last = last.succ_opt().ok_or_else(|| ValidationError::InvalidValue {
        field: "to".to_string(),
        message: "date out of range".to_string(),
    })?;
    Ok((start_of(first), start_of(after_last)))
}

/// Format seconds as `H:MM:SS`.
pub fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
