//! Timing engine.
//!
//! The engine is the single authority for "which task is being timed right
//! now". Every toggle is decided under one lock:
//!
//! ```text
//! none      --toggle(T)--> T      insert open record
//! T         --toggle(T)--> none   close T
//! T         --toggle(U)--> U      close T, insert open record for U
//! ```
//!
//! Closing computes `now - start_time` and either keeps the record with that
//! duration or deletes it when it is shorter than the ignore threshold.
//! Ledger writes go through a [`LedgerWriter`] and never fail a toggle; the
//! in-memory state is the source of truth for the next action.
//!
//! ## Usage
//!
//! ```ignore
//! let engine = TimingEngine::new(ledger, 3)?;
//! let mut display = engine.subscribe();
//! engine.toggle(&task)?;
//! println!("{:?}", display.current());
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::error::{LedgerError, Result, ValidationError};
use crate::events::{at, ClosedTiming, Event};
use crate::observer::{TimingObserver, TimingSubscription};
use crate::task::Task;
use crate::timing::{should_keep, Timing, TimingLedger};
use crate::writer::{LedgerWriter, TimingId, WriteFailure, WriteMode};

/// Snapshot of the timing in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentTiming {
    pub timing: Timing,
    pub task_name: String,
}

struct ActiveTiming {
    timing: Timing,
    task_name: String,
    id: TimingId,
}

impl ActiveTiming {
    fn snapshot(&self) -> CurrentTiming {
        CurrentTiming {
            timing: Timing {
                id: self.id.get(),
                ..self.timing.clone()
            },
            task_name: self.task_name.clone(),
        }
    }
}

struct EngineState {
    current: Option<ActiveTiming>,
    ignore_threshold: i64,
}

pub struct TimingEngine {
    state: Arc<Mutex<EngineState>>,
    ledger: Arc<dyn TimingLedger>,
    writer: LedgerWriter,
    observer: TimingObserver,
    clock: Arc<dyn Clock>,
    subscriptions: Mutex<Vec<JoinHandle<()>>>,
}

impl TimingEngine {
    /// Create an engine over `ledger`, recovering any open timing left by a
    /// previous run. Uses the system clock and inline writes.
    ///
    /// # Errors
    /// Returns an error if the ledger cannot be queried for an open timing.
    pub fn new(ledger: Arc<dyn TimingLedger>, ignore_threshold: i64) -> Result<Self> {
        let engine = Self {
            state: Arc::new(Mutex::new(EngineState {
                current: None,
                ignore_threshold: ignore_threshold.max(0),
            })),
            writer: LedgerWriter::new(Arc::clone(&ledger), WriteMode::Inline),
            ledger,
            observer: TimingObserver::new(),
            clock: Arc::new(SystemClock),
            subscriptions: Mutex::new(Vec::new()),
        };

        let recovered = engine.retrieve_open_timing()?;
        match &recovered {
            Some(current) => tracing::info!(
                task_id = current.timing.task_id,
                start_time = current.timing.start_time,
                "resuming open timing"
            ),
            None => tracing::debug!("no open timing to resume"),
        }

        let display = recovered.as_ref().map(|c| c.task_name.clone());
        engine.lock_state().current = recovered.and_then(|c| {
            Some(ActiveTiming {
                id: TimingId::known(c.timing.id?),
                timing: c.timing,
                task_name: c.task_name,
            })
        });
        engine.observer.publish(display);
        Ok(engine)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.writer = LedgerWriter::new(Arc::clone(&self.ledger), mode);
        self
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn current_timing(&self) -> Option<CurrentTiming> {
        self.lock_state().current.as_ref().map(ActiveTiming::snapshot)
    }

    pub fn ignore_threshold(&self) -> i64 {
        self.lock_state().ignore_threshold
    }

    /// Read the open timing straight from the ledger.
    ///
    /// Has no side effects, so repeated calls agree until the next write.
    /// The duration of the returned timing is always `0`; it is only
    /// materialised on close.
    pub fn retrieve_open_timing(&self) -> Result<Option<CurrentTiming>, LedgerError> {
        Ok(self.ledger.query_open()?.map(|open| CurrentTiming {
            timing: Timing {
                id: Some(open.timing_id),
                task_id: open.task_id,
                start_time: open.start_time,
                duration: 0,
            },
            task_name: open.task_name,
        }))
    }

    pub fn subscribe(&self) -> TimingSubscription {
        self.observer.subscribe()
    }

    pub fn observer(&self) -> &TimingObserver {
        &self.observer
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Start, stop, or switch timing for `task`.
    ///
    /// # Errors
    /// Fails with [`ValidationError::UnsavedTask`] if `task` has no id. Ledger
    /// failures never fail a toggle; see [`flush`](Self::flush).
    pub fn toggle(&self, task: &Task) -> Result<Event> {
        if !task.is_persisted() {
            return Err(ValidationError::UnsavedTask {
                name: task.name.clone(),
            }
            .into());
        }

        let now = self.clock.now();
        let mut state = self.lock_state();
        let threshold = state.ignore_threshold;

        let event = match state.current.take() {
            None => {
                let started = self.start(task, now);
                let event = started_event(&started, now);
                state.current = Some(started);
                event
            }
            Some(active) if active.timing.task_id == task.id => Event::TimingStopped {
                closed: self.close(active, now, threshold),
                at: at(now),
            },
            Some(active) => {
                let closed = self.close(active, now, threshold);
                let started = self.start(task, now);
                let event = Event::TimingSwitched {
                    closed,
                    task_id: started.timing.task_id,
                    task_name: started.task_name.clone(),
                    start_time: started.timing.start_time,
                    at: at(now),
                };
                state.current = Some(started);
                event
            }
        };

        self.observer
            .publish(state.current.as_ref().map(|a| a.task_name.clone()));
        Ok(event)
    }

    /// Apply a new ignore threshold to future closes. Negative values
    /// clamp to zero.
    pub fn on_threshold_changed(&self, threshold: i64) {
        let threshold = threshold.max(0);
        self.lock_state().ignore_threshold = threshold;
        tracing::debug!(threshold, "engine ignore threshold updated");
    }

    /// Apply every threshold published on `settings` until shutdown.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn follow_settings(&self, mut settings: watch::Receiver<i64>) {
        self.on_threshold_changed(*settings.borrow_and_update());
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            while settings.changed().await.is_ok() {
                let threshold = (*settings.borrow_and_update()).max(0);
                state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .ignore_threshold = threshold;
                tracing::debug!(threshold, "engine ignore threshold updated");
            }
        });
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Wait for in-flight ledger writes and return the failed ones.
    pub async fn flush(&self) -> Vec<WriteFailure> {
        self.writer.flush().await
    }

    /// Release settings subscriptions and wait for outstanding writes.
    pub async fn shutdown(&self) -> Vec<WriteFailure> {
        self.release_subscriptions();
        self.flush().await
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn start(&self, task: &Task, now: i64) -> ActiveTiming {
        let timing = Timing::start(task.id, now);
        let id = self.writer.insert_open(timing.task_id, timing.start_time);
        tracing::debug!(task_id = task.id, start_time = now, "timing started");
        ActiveTiming {
            timing,
            task_name: task.name.clone(),
            id,
        }
    }

    fn close(&self, mut active: ActiveTiming, now: i64, threshold: i64) -> ClosedTiming {
        let duration = active.timing.close(now);
        let kept = should_keep(duration, threshold);
        let timing_id = active.id.get();
        tracing::debug!(
            task_id = active.timing.task_id,
            duration,
            threshold,
            kept,
            "timing closed"
        );
        self.writer.close(active.id, duration, kept);
        ClosedTiming {
            timing_id,
            task_id: active.timing.task_id,
            task_name: active.task_name,
            start_time: active.timing.start_time,
            duration,
            kept,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_subscriptions(&self) {
        for handle in self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            handle.abort();
        }
    }
}

impl Drop for TimingEngine {
    fn drop(&mut self) {
        self.release_subscriptions();
    }
}

fn started_event(started: &ActiveTiming, now: i64) -> Event {
    Event::TimingStarted {
        task_id: started.timing.task_id,
        task_name: started.task_name.clone(),
        start_time: started.timing.start_time,
        at: at(now),
    }
}
