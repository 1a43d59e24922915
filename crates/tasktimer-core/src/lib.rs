//! # tasktimer Core Library
//!
//! Core logic for a personal task timer: the user toggles timing on a task,
//! and the library records intervals (start time + duration) per task. The
//! `tasktimer` CLI is a thin layer over this crate.
//!
//! ## Architecture
//!
//! - **Timing Engine**: owns "which task is being timed" and turns every
//!   toggle into start/stop/switch decisions, discarding intervals shorter
//!   than the ignore threshold
//! - **Ledger**: trait-based persistence of timings, with SQLite and
//!   in-memory implementations sharing one store with the task catalog
//! - **Writer**: inline or background (tokio) dispatch of ledger writes
//! - **Settings**: TOML configuration and a watch channel for live updates
//! - **Observer**: latest-value channel carrying the name of the timed task
//!
//! ## Key Components
//!
//! - [`TimingEngine`]: timing state machine
//! - [`TimingLedger`] / [`TaskStore`]: persistence boundaries
//! - [`SqliteStore`] / [`MemoryStore`]: store implementations
//! - [`SettingsWatcher`]: live ignore threshold
//! - [`TimingObserver`]: display-state notifications

pub mod clock;
pub mod engine;
pub mod error;
pub mod events;
pub mod observer;
pub mod report;
pub mod settings;
pub mod storage;
pub mod task;
pub mod timing;
pub mod writer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{CurrentTiming, TimingEngine};
pub use error::{ConfigError, CoreError, DatabaseError, LedgerError, ValidationError};
pub use events::{ClosedTiming, Event};
pub use observer::{ChangeFeed, TimingObserver, TimingSubscription};
pub use report::{DurationReport, TaskDuration};
pub use settings::SettingsWatcher;
pub use storage::{Config, MemoryStore, SqliteStore};
pub use task::{Task, TaskStore};
pub use timing::{OpenTiming, Timing, TimingLedger, TimingRecord};
pub use writer::{LedgerWriter, TimingId, WriteFailure, WriteMode, WriteOp};
