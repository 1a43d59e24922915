//! In-process task store and timing ledger.
//!
//! Same contract as [`super::SqliteStore`] without durability. Used by tests
//! and by embedders that persist elsewhere. Can be switched offline to
//! simulate an unreachable ledger.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;

use crate::error::{CoreError, LedgerError};
use crate::observer::ChangeFeed;
use crate::task::{sort_tasks, Task, TaskStore};
use crate::timing::{OpenTiming, TimingLedger, TimingRecord};

#[derive(Debug, Default)]
struct MemoryState {
    tasks: BTreeMap<i64, Task>,
    timings: BTreeMap<i64, TimingRecord>,
    last_task_id: i64,
    last_timing_id: i64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    feed: ChangeFeed,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with [`LedgerError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Every timing record, open or closed, in id order.
    pub fn all_timings(&self) -> Vec<TimingRecord> {
        self.state
            .lock()
            .map(|state| state.timings.values().cloned().collect())
            .unwrap_or_default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, LedgerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("memory store is offline".to_string()));
        }
        self.state
            .lock()
            .map_err(|_| LedgerError::Unavailable("memory store poisoned".to_string()))
    }
}

impl TaskStore for MemoryStore {
    fn save_task(&self, task: &Task) -> Result<Task, CoreError> {
        task.validate()?;
        let mut state = self.state()?;
        let mut saved = task.clone();
        if task.is_persisted() {
            let slot = state
                .tasks
                .get_mut(&task.id)
                .ok_or(LedgerError::TaskNotFound { task_id: task.id })?;
            *slot = saved.clone();
        } else {
            state.last_task_id += 1;
            saved.id = state.last_task_id;
            state.tasks.insert(saved.id, saved.clone());
        }
        drop(state);
        self.feed.notify();
        Ok(saved)
    }

    fn delete_task(&self, task_id: i64) -> Result<(), LedgerError> {
        let mut state = self.state()?;
        state.tasks.remove(&task_id);
        state.timings.retain(|_, t| t.task_id != task_id);
        drop(state);
        self.feed.notify();
        Ok(())
    }

    fn get_task(&self, task_id: i64) -> Result<Option<Task>, LedgerError> {
        Ok(self.state()?.tasks.get(&task_id).cloned())
    }

    fn list_tasks(&self) -> Result<Vec<Task>, LedgerError> {
        let mut tasks: Vec<Task> = self.state()?.tasks.values().cloned().collect();
        sort_tasks(&mut tasks);
        Ok(tasks)
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.feed.subscribe()
    }
}

impl TimingLedger for MemoryStore {
    fn insert_open(&self, task_id: i64, start_time: i64) -> Result<i64, LedgerError> {
        let mut state = self.state()?;
        if !state.tasks.contains_key(&task_id) {
            return Err(LedgerError::TaskNotFound { task_id });
        }
        state.last_timing_id += 1;
        let id = state.last_timing_id;
        state.timings.insert(
            id,
            TimingRecord {
                id,
                task_id,
                start_time,
                duration: 0,
            },
        );
        drop(state);
        self.feed.notify();
        Ok(id)
    }

    fn update_duration(&self, timing_id: i64, duration: i64) -> Result<(), LedgerError> {
        let mut state = self.state()?;
        let record = state
            .timings
            .get_mut(&timing_id)
            .ok_or(LedgerError::NotFound { timing_id })?;
        record.duration = duration;
        drop(state);
        self.feed.notify();
        Ok(())
    }

    fn delete(&self, timing_id: i64) -> Result<(), LedgerError> {
        let removed = self.state()?.timings.remove(&timing_id).is_some();
        if removed {
            self.feed.notify();
        }
        Ok(())
    }

    fn query_open(&self) -> Result<Option<OpenTiming>, LedgerError> {
        let state = self.state()?;
        let open = state
            .timings
            .values()
            .filter(|t| t.duration == 0)
            .max_by_key(|t| (t.start_time, t.id))
            .and_then(|t| {
                state.tasks.get(&t.task_id).map(|task| OpenTiming {
                    timing_id: t.id,
                    task_id: t.task_id,
                    start_time: t.start_time,
                    task_name: task.name.clone(),
                })
            });
        Ok(open)
    }

    fn list_closed(&self, from: i64, to: i64) -> Result<Vec<TimingRecord>, LedgerError> {
        let state = self.state()?;
        let mut records: Vec<_> = state
            .timings
            .values()
            .filter(|t| t.duration > 0 && t.start_time >= from && t.start_time < to)
            .cloned()
            .collect();
        records.sort_by_key(|t| (t.start_time, t.id));
        Ok(records)
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.feed.subscribe()
    }
}
