//! Dispatch of ledger writes on behalf of the engine.
//!
//! Writes never fail the caller. A failed write is logged, collected, and
//! handed back by [`LedgerWriter::flush`]; the engine's in-memory state is
//! not rolled back.
//!
//! In [`WriteMode::Background`] every write is its own tokio task and the
//! ledger call runs on the blocking pool, so writes finish in no particular
//! order. A close waits on its timing's [`TimingId`] until the insert that
//! creates the record has produced an id.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::LedgerError;
use crate::timing::TimingLedger;

/// Where ledger writes execute.
#[derive(Debug, Clone, Default)]
pub enum WriteMode {
    /// On the caller's thread, before the engine call returns.
    #[default]
    Inline,
    /// As independent tasks on the given runtime.
    Background(Handle),
}

/// Ledger id of a timing whose insert may still be in flight.
#[derive(Debug, Clone)]
pub struct TimingId {
    rx: watch::Receiver<Option<i64>>,
}

impl TimingId {
    /// An id that is already known, e.g. one recovered from the ledger.
    pub fn known(id: i64) -> Self {
        let (_tx, rx) = watch::channel(Some(id));
        Self { rx }
    }

    fn pending() -> (watch::Sender<Option<i64>>, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self { rx })
    }

    /// The id if the insert has completed.
    pub fn get(&self) -> Option<i64> {
        *self.rx.borrow()
    }

    /// Wait for the insert. `None` if it failed.
    pub async fn resolve(mut self) -> Option<i64> {
        self.rx.wait_for(Option::is_some).await.ok().and_then(|id| *id)
    }
}

/// The write that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOp {
    InsertOpen { task_id: i64, start_time: i64 },
    UpdateDuration { timing_id: Option<i64>, duration: i64 },
    Delete { timing_id: Option<i64> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    pub op: WriteOp,
    pub error: LedgerError,
}

#[derive(Clone)]
struct Failures(Arc<Mutex<Vec<WriteFailure>>>);

impl Failures {
    fn record(&self, op: WriteOp, error: LedgerError) {
        tracing::warn!(op = ?op, error = %error, "ledger write failed");
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(WriteFailure { op, error });
    }

    fn take(&self) -> Vec<WriteFailure> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

pub struct LedgerWriter {
    ledger: Arc<dyn TimingLedger>,
    mode: WriteMode,
    pending: Mutex<Vec<JoinHandle<()>>>,
    failures: Failures,
}

impl LedgerWriter {
    pub fn new(ledger: Arc<dyn TimingLedger>, mode: WriteMode) -> Self {
        Self {
            ledger,
            mode,
            pending: Mutex::new(Vec::new()),
            failures: Failures(Arc::new(Mutex::new(Vec::new()))),
        }
    }

    pub fn mode(&self) -> &WriteMode {
        &self.mode
    }

    /// Write a new open record. The returned id resolves once it exists.
    pub fn insert_open(&self, task_id: i64, start_time: i64) -> TimingId {
        let (tx, id) = TimingId::pending();
        let op = WriteOp::InsertOpen {
            task_id,
            start_time,
        };

        match &self.mode {
            WriteMode::Inline => match self.ledger.insert_open(task_id, start_time) {
                Ok(timing_id) => {
                    tracing::debug!(timing_id, task_id, "open timing written");
                    tx.send_replace(Some(timing_id));
                }
                Err(e) => self.failures.record(op, e),
            },
            WriteMode::Background(handle) => {
                let ledger = Arc::clone(&self.ledger);
                let failures = self.failures.clone();
                self.track(handle.spawn(async move {
                    let result =
                        run_blocking(move || ledger.insert_open(task_id, start_time)).await;
                    match result {
                        Ok(timing_id) => {
                            tracing::debug!(timing_id, task_id, "open timing written");
                            tx.send_replace(Some(timing_id));
                        }
                        Err(e) => failures.record(op, e),
                    }
                }));
            }
        }

        id
    }

    /// Close the record behind `id`: keep it with `duration` or delete it.
    pub fn close(&self, id: TimingId, duration: i64, keep: bool) {
        match &self.mode {
            WriteMode::Inline => {
                let timing_id = id.get();
                let (op, result) = match timing_id {
                    Some(timing_id) => close_record(self.ledger.as_ref(), timing_id, duration, keep),
                    None => never_written(None, duration, keep),
                };
                if let Err(e) = result {
                    self.failures.record(op, e);
                }
            }
            WriteMode::Background(handle) => {
                let ledger = Arc::clone(&self.ledger);
                let failures = self.failures.clone();
                self.track(handle.spawn(async move {
                    let (op, result) = match id.resolve().await {
                        Some(timing_id) => {
                            let op = close_op(Some(timing_id), duration, keep);
                            let result = run_blocking(move || {
                                close_record(ledger.as_ref(), timing_id, duration, keep).1
                            })
                            .await;
                            (op, result)
                        }
                        None => never_written(None, duration, keep),
                    };
                    if let Err(e) = result {
                        failures.record(op, e);
                    }
                }));
            }
        }
    }

    /// Wait for every dispatched write and return the ones that failed
    /// since the last flush.
    pub async fn flush(&self) -> Vec<WriteFailure> {
        loop {
            let handles = std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "ledger write task did not complete");
                }
            }
        }
        self.failures.take()
    }

    /// Failures recorded so far, without waiting for in-flight writes.
    pub fn take_failures(&self) -> Vec<WriteFailure> {
        self.failures.take()
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }
}

fn close_op(timing_id: Option<i64>, duration: i64, keep: bool) -> WriteOp {
    if keep {
        WriteOp::UpdateDuration {
            timing_id,
            duration,
        }
    } else {
        WriteOp::Delete { timing_id }
    }
}

fn close_record(
    ledger: &dyn TimingLedger,
    timing_id: i64,
    duration: i64,
    keep: bool,
) -> (WriteOp, Result<(), LedgerError>) {
    let op = close_op(Some(timing_id), duration, keep);
    let result = if keep {
        ledger.update_duration(timing_id, duration).map(|()| {
            tracing::info!(timing_id, duration, "timing saved");
        })
    } else {
        ledger.delete(timing_id).map(|()| {
            tracing::debug!(timing_id, duration, "timing too short, deleted");
        })
    };
    (op, result)
}

fn never_written(
    timing_id: Option<i64>,
    duration: i64,
    keep: bool,
) -> (WriteOp, Result<(), LedgerError>) {
    (
        close_op(timing_id, duration, keep),
        Err(LedgerError::Unavailable(
            "open timing was never written".to_string(),
        )),
    )
}

async fn run_blocking<T, F>(f: F) -> Result<T, LedgerError>
where
    F: FnOnce() -> Result<T, LedgerError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LedgerError::Unavailable(format!("ledger task failed: {e}")))?
}
