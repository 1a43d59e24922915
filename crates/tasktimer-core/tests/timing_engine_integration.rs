//! Integration tests for the timing engine.
//!
//! Covers the toggle decision table against both stores, restart recovery
//! through SQLite, ledger failure handling, and background writes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use proptest::prelude::*;
use tasktimer_core::{
    CoreError, LedgerError, ManualClock, MemoryStore, OpenTiming, SqliteStore, Task, TaskStore,
    TimingEngine, TimingLedger, TimingRecord, ValidationError, WriteMode, WriteOp,
};
use tokio::sync::watch;

// ============================================================================
// Test Helpers
// ============================================================================

/// Ledger wrapper counting calls per operation.
#[derive(Default)]
struct CountingLedger {
    inner: MemoryStore,
    inserts: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
    queries: AtomicUsize,
}

impl CountingLedger {
    fn counts(&self) -> (usize, usize, usize) {
        (
            self.inserts.load(Ordering::SeqCst),
            self.updates.load(Ordering::SeqCst),
            self.deletes.load(Ordering::SeqCst),
        )
    }
}

impl TimingLedger for CountingLedger {
    fn insert_open(&self, task_id: i64, start_time: i64) -> Result<i64, LedgerError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.inner.insert_open(task_id, start_time)
    }

    fn update_duration(&self, timing_id: i64, duration: i64) -> Result<(), LedgerError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update_duration(timing_id, duration)
    }

    fn delete(&self, timing_id: i64) -> Result<(), LedgerError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(timing_id)
    }

    fn query_open(&self) -> Result<Option<OpenTiming>, LedgerError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query_open()
    }

    fn list_closed(&self, from: i64, to: i64) -> Result<Vec<TimingRecord>, LedgerError> {
        self.inner.list_closed(from, to)
    }

    fn changes(&self) -> watch::Receiver<u64> {
        TimingLedger::changes(&self.inner)
    }
}

struct Harness {
    ledger: Arc<CountingLedger>,
    clock: ManualClock,
    engine: TimingEngine,
}

impl Harness {
    fn new(threshold: i64) -> Self {
        let ledger = Arc::new(CountingLedger::default());
        let clock = ManualClock::new(0);
        let engine = TimingEngine::new(ledger.clone(), threshold)
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        Self {
            ledger,
            clock,
            engine,
        }
    }

    fn task(&self, name: &str) -> Task {
        self.ledger.inner.save_task(&Task::new(name)).unwrap()
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn scenario_a_short_interval_is_deleted() {
    let h = Harness::new(5);
    let write = h.task("Write");

    h.engine.toggle(&write).unwrap();
    h.clock.set(3);
    h.engine.toggle(&write).unwrap();

    assert!(h.engine.current_timing().is_none());
    assert!(h.ledger.inner.all_timings().is_empty());
    assert_eq!(h.ledger.counts(), (1, 0, 1));
}

#[test]
fn scenario_b_switch_keeps_old_and_opens_new() {
    let h = Harness::new(5);
    let write = h.task("Write");
    let read = h.task("Read");

    h.engine.toggle(&write).unwrap();
    h.clock.set(10);
    h.engine.toggle(&read).unwrap();

    let timings = h.ledger.inner.all_timings();
    assert_eq!(timings.len(), 2);
    assert_eq!(timings[0].task_id, write.id);
    assert_eq!(timings[0].duration, 10);
    assert_eq!(timings[1].task_id, read.id);
    assert_eq!(timings[1].start_time, 10);
    assert_eq!(timings[1].duration, 0);

    let current = h.engine.current_timing().unwrap();
    assert_eq!(current.task_name, "Read");
    assert_eq!(current.timing.duration, 0);
    assert_eq!(h.ledger.counts(), (2, 1, 0));
}

#[test]
fn scenario_c_unsaved_task_makes_no_ledger_calls() {
    let h = Harness::new(5);
    let before = h.ledger.counts();

    let err = h.engine.toggle(&Task::new("Unsaved")).unwrap_err();

    assert!(matches!(
        err,
        CoreError::Validation(ValidationError::UnsavedTask { .. })
    ));
    assert_eq!(h.ledger.counts(), before);
    assert!(h.engine.current_timing().is_none());
}

#[test]
fn scenario_d_restart_recovers_open_timing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasktimer.db");
    let clock = ManualClock::new(1_000);

    let plan = {
        let store = Arc::new(SqliteStore::open_at(&path).unwrap());
        let plan = store.save_task(&Task::new("Plan")).unwrap();
        let engine = TimingEngine::new(store, 5)
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        engine.toggle(&plan).unwrap();
        plan
    };

    clock.set(1_500);
    let store = Arc::new(SqliteStore::open_at(&path).unwrap());
    let engine = TimingEngine::new(store.clone(), 5)
        .unwrap()
        .with_clock(Arc::new(clock.clone()));

    let recovered = engine.retrieve_open_timing().unwrap().unwrap();
    assert_eq!(recovered.task_name, "Plan");
    assert_eq!(recovered.timing.task_id, plan.id);
    assert_eq!(recovered.timing.start_time, 1_000);
    assert_eq!(recovered.timing.duration, 0);
    assert_eq!(engine.current_timing(), Some(recovered));
    assert_eq!(engine.observer().latest(), Some("Plan".to_string()));

    // Closing after the restart uses the recovered start time.
    let event = engine.toggle(&plan).unwrap();
    assert_eq!(event.closed().unwrap().duration, 500);
    assert_eq!(store.list_closed(0, 2_000).unwrap()[0].duration, 500);
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn retrieve_open_timing_is_idempotent() {
    let h = Harness::new(5);
    let write = h.task("Write");
    h.engine.toggle(&write).unwrap();

    let first = h.engine.retrieve_open_timing().unwrap();
    let second = h.engine.retrieve_open_timing().unwrap();
    assert!(first.is_some());
    assert_eq!(first, second);
}

#[test]
fn threshold_boundary_is_kept() {
    let h = Harness::new(5);
    let write = h.task("Write");
    h.engine.toggle(&write).unwrap();
    h.clock.set(5);
    let event = h.engine.toggle(&write).unwrap();

    assert!(event.closed().unwrap().kept);
    assert_eq!(h.ledger.counts(), (1, 1, 0));
    assert_eq!(h.ledger.inner.all_timings()[0].duration, 5);
}

#[test]
fn at_most_one_open_record_across_many_toggles() {
    let h = Harness::new(2);
    let tasks: Vec<_> = ["A", "B", "C"].iter().map(|n| h.task(n)).collect();

    for (step, pick) in [0, 1, 1, 2, 0, 0, 2, 1, 0, 2].into_iter().enumerate() {
        h.clock.set(step as i64 * 3);
        h.engine.toggle(&tasks[pick]).unwrap();
        let open = h
            .ledger
            .inner
            .all_timings()
            .into_iter()
            .filter(|t| t.duration == 0)
            .count();
        assert!(open <= 1, "step {step}: {open} open records");
        assert_eq!(open, usize::from(h.engine.current_timing().is_some()));
    }
}

proptest! {
    #[test]
    fn start_then_stop_closes_with_elapsed_duration(
        start in 0i64..1_000_000,
        elapsed in 0i64..100_000,
        threshold in 0i64..600,
    ) {
        let h = Harness::new(threshold);
        let task = h.task("Task");
        h.clock.set(start);

        h.engine.toggle(&task).unwrap();
        let current = h.engine.current_timing().unwrap();
        prop_assert_eq!(current.timing.duration, 0);
        prop_assert_eq!(h.ledger.counts(), (1, 0, 0));

        h.clock.set(start + elapsed);
        let event = h.engine.toggle(&task).unwrap();
        let closed = event.closed().unwrap();
        prop_assert_eq!(closed.duration, elapsed);
        prop_assert!(h.engine.current_timing().is_none());

        let (inserts, updates, deletes) = h.ledger.counts();
        prop_assert_eq!(inserts, 1);
        prop_assert_eq!(updates + deletes, 1);
        let kept = elapsed > 0 && elapsed >= threshold;
        prop_assert_eq!(closed.kept, kept);
        prop_assert_eq!(updates, usize::from(kept));
    }

    #[test]
    fn switching_closes_old_and_opens_new(
        elapsed in 0i64..10_000,
        threshold in 0i64..100,
    ) {
        let h = Harness::new(threshold);
        let first = h.task("First");
        let second = h.task("Second");

        h.engine.toggle(&first).unwrap();
        h.clock.set(elapsed);
        h.engine.toggle(&second).unwrap();

        let current = h.engine.current_timing().unwrap();
        prop_assert_eq!(current.timing.task_id, second.id);
        prop_assert_eq!(current.timing.start_time, elapsed);

        let timings = h.ledger.inner.all_timings();
        let kept_first = timings.iter().any(|t| t.task_id == first.id);
        prop_assert_eq!(kept_first, elapsed > 0 && elapsed >= threshold);
        prop_assert_eq!(timings.iter().filter(|t| t.duration == 0).count(), 1);
    }
}

// ============================================================================
// Ledger failures
// ============================================================================

#[tokio::test]
async fn vanished_record_is_reported_and_state_moves_on() {
    let h = Harness::new(0);
    let write = h.task("Write");
    h.engine.toggle(&write).unwrap();
    let id = h.engine.current_timing().unwrap().timing.id.unwrap();

    // Removed behind the engine's back.
    h.ledger.inner.delete(id).unwrap();

    h.clock.set(30);
    h.engine.toggle(&write).unwrap();
    assert!(h.engine.current_timing().is_none());

    let failures = h.engine.flush().await;
    assert_eq!(failures.len(), 1);
    assert_eq!(
        failures[0].op,
        WriteOp::UpdateDuration {
            timing_id: Some(id),
            duration: 30
        }
    );
    assert_eq!(failures[0].error, LedgerError::NotFound { timing_id: id });
}

#[tokio::test]
async fn outage_is_fire_and_forget() {
    let h = Harness::new(0);
    let write = h.task("Write");
    let read = h.task("Read");

    h.ledger.inner.set_offline(true);
    h.engine.toggle(&write).unwrap();
    h.clock.set(10);
    h.engine.toggle(&read).unwrap();
    assert_eq!(h.engine.current_timing().unwrap().task_name, "Read");
    assert_eq!(h.engine.observer().latest(), Some("Read".to_string()));

    // Storage comes back: the next start is written normally.
    h.ledger.inner.set_offline(false);
    h.clock.set(20);
    h.engine.toggle(&write).unwrap();
    let failures = h.engine.flush().await;
    assert_eq!(failures.len(), 4);
    assert_eq!(h.ledger.inner.all_timings().len(), 1);
    assert_eq!(h.engine.current_timing().unwrap().task_name, "Write");
}

// ============================================================================
// Background writes
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_writes_reach_the_ledger() {
    let store = Arc::new(SqliteStore::open_memory().unwrap());
    let write = store.save_task(&Task::new("Write")).unwrap();
    let read = store.save_task(&Task::new("Read")).unwrap();
    let clock = ManualClock::new(0);
    let engine = TimingEngine::new(store.clone(), 5)
        .unwrap()
        .with_clock(Arc::new(clock.clone()))
        .with_write_mode(WriteMode::Background(tokio::runtime::Handle::current()));
    let mut display = engine.subscribe();

    engine.toggle(&write).unwrap();
    clock.set(10);
    engine.toggle(&read).unwrap();
    assert_eq!(display.current(), Some("Read".to_string()));
    clock.set(12);
    engine.toggle(&read).unwrap();
    assert_eq!(display.current(), None);

    let failures = engine.shutdown().await;
    assert!(failures.is_empty(), "unexpected failures: {failures:?}");

    let closed = store.list_closed(0, 100).unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!((closed[0].task_id, closed[0].duration), (write.id, 10));
    assert!(store.query_open().unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_close_of_unwritten_timing_is_reported() {
    let store = Arc::new(MemoryStore::new());
    let write = store.save_task(&Task::new("Write")).unwrap();
    let clock = ManualClock::new(0);
    let engine = TimingEngine::new(store.clone(), 5)
        .unwrap()
        .with_clock(Arc::new(clock.clone()))
        .with_write_mode(WriteMode::Background(tokio::runtime::Handle::current()));

    store.set_offline(true);
    engine.toggle(&write).unwrap();
    clock.set(10);
    let event = engine.toggle(&write).unwrap();
    assert_eq!(event.closed().unwrap().duration, 10);
    assert!(engine.current_timing().is_none());

    let failures = tokio::time::timeout(std::time::Duration::from_secs(5), engine.shutdown())
        .await
        .expect("flush did not finish");
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().any(|f| f.op
        == WriteOp::InsertOpen {
            task_id: write.id,
            start_time: 0
        }));
    let close = failures
        .iter()
        .find(|f| matches!(f.op, WriteOp::UpdateDuration { .. }))
        .expect("close failure missing");
    assert_eq!(
        close.op,
        WriteOp::UpdateDuration {
            timing_id: None,
            duration: 10
        }
    );
    assert_eq!(
        close.error,
        LedgerError::Unavailable("open timing was never written".to_string())
    );

    store.set_offline(false);
    assert!(store.all_timings().is_empty());
}

#[tokio::test]
async fn settings_changes_reach_the_engine() {
    let h = Harness::new(5);
    let write = h.task("Write");
    let settings = tasktimer_core::SettingsWatcher::new(5);
    h.engine.follow_settings(settings.subscribe());

    settings.set_threshold(1);
    for _ in 0..100 {
        if h.engine.ignore_threshold() == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }

    h.engine.toggle(&write).unwrap();
    h.clock.set(2);
    let event = h.engine.toggle(&write).unwrap();
    assert!(event.closed().unwrap().kept);
    h.engine.shutdown().await;
}
