//! SQLite-backed task store and timing ledger.
//!
//! Provides persistent storage for:
//! - The task catalog
//! - Closed timing intervals and the single open timing
//!
//! The connection sits behind a mutex so background writes can share one
//! store across threads.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::watch;

use super::{data_dir, migrations};
use crate::error::{DatabaseError, LedgerError, Result};
use crate::observer::ChangeFeed;
use crate::task::{Task, TaskStore};
use crate::timing::{OpenTiming, TimingLedger, TimingRecord};

/// SQLite database holding tasks and timings.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    feed: ChangeFeed,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open the database at `<data dir>/tasktimer.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        let path = data_dir()?.join("tasktimer.db");
        Self::open_at(&path)
    }

    /// Open (or create) the database at `path`.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| DatabaseError::OpenFailed {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(DatabaseError::from)?;
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        tracing::debug!(path = ?path, "database opened");
        Ok(Self {
            conn: Mutex::new(conn),
            feed: ChangeFeed::new(),
            path,
        })
    }

    /// Location on disk, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn
            .lock()
            .map_err(|_| LedgerError::Unavailable("database connection poisoned".to_string()))
    }
}

fn row_to_task(row: &rusqlite::Row) -> Result<Task, rusqlite::Error> {
    Ok(Task {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        sort_order: row.get(3)?,
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl TaskStore for SqliteStore {
    fn save_task(&self, task: &Task) -> Result<Task> {
        task.validate()?;
        let conn = self.conn()?;
        let mut saved = task.clone();

        if task.is_persisted() {
            let changed = conn
                .execute(
                    "UPDATE tasks SET name = ?1, description = ?2, sort_order = ?3 WHERE id = ?4",
                    params![task.name, task.description, task.sort_order, task.id],
                )
                .map_err(LedgerError::from)?;
            if changed == 0 {
                return Err(LedgerError::TaskNotFound { task_id: task.id }.into());
            }
            tracing::debug!(task_id = task.id, "task updated");
        } else {
            conn.execute(
                "INSERT INTO tasks (name, description, sort_order) VALUES (?1, ?2, ?3)",
                params![task.name, task.description, task.sort_order],
            )
            .map_err(LedgerError::from)?;
            saved.id = conn.last_insert_rowid();
            tracing::debug!(task_id = saved.id, "task added");
        }

        drop(conn);
        self.feed.notify();
        Ok(saved)
    }

    fn delete_task(&self, task_id: i64) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
        drop(conn);
        tracing::debug!(task_id, "task deleted");
        self.feed.notify();
        Ok(())
    }

    fn get_task(&self, task_id: i64) -> Result<Option<Task>, LedgerError> {
        let conn = self.conn()?;
        let task = conn
            .query_row(
                "SELECT id, name, description, sort_order FROM tasks WHERE id = ?1",
                params![task_id],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    fn list_tasks(&self) -> Result<Vec<Task>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, description, sort_order FROM tasks ORDER BY sort_order, name",
        )?;
        let tasks = stmt
            .query_map([], row_to_task)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.feed.subscribe()
    }
}

impl TimingLedger for SqliteStore {
    fn insert_open(&self, task_id: i64, start_time: i64) -> Result<i64, LedgerError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO timings (task_id, start_time, duration) VALUES (?1, ?2, 0)",
            params![task_id, start_time],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                LedgerError::TaskNotFound { task_id }
            } else {
                LedgerError::from(e)
            }
        })?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.feed.notify();
        Ok(id)
    }

    fn update_duration(&self, timing_id: i64, duration: i64) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE timings SET duration = ?1 WHERE id = ?2",
            params![duration, timing_id],
        )?;
        drop(conn);
        if changed == 0 {
            return Err(LedgerError::NotFound { timing_id });
        }
        self.feed.notify();
        Ok(())
    }

    fn delete(&self, timing_id: i64) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM timings WHERE id = ?1", params![timing_id])?;
        drop(conn);
        if changed > 0 {
            self.feed.notify();
        }
        Ok(())
    }

    fn query_open(&self) -> Result<Option<OpenTiming>, LedgerError> {
        let conn = self.conn()?;
        let open = conn
            .query_row(
                "SELECT timing_id, task_id, start_time, task_name FROM current_timing LIMIT 1",
                [],
                |row| {
                    Ok(OpenTiming {
                        timing_id: row.get(0)?,
                        task_id: row.get(1)?,
                        start_time: row.get(2)?,
                        task_name: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(open)
    }

    fn list_closed(&self, from: i64, to: i64) -> Result<Vec<TimingRecord>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, task_id, start_time, duration FROM timings
             WHERE duration > 0 AND start_time >= ?1 AND start_time < ?2
             ORDER BY start_time, id",
        )?;
        let records = stmt
            .query_map(params![from, to], |row| {
                Ok(TimingRecord {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    start_time: row.get(2)?,
                    duration: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    fn store_with_task(name: &str) -> (SqliteStore, Task) {
        let store = SqliteStore::open_memory().unwrap();
        let task = store.save_task(&Task::new(name)).unwrap();
        (store, task)
    }

    #[test]
    fn save_assigns_id_then_updates() {
        let (store, task) = store_with_task("Write");
        assert!(task.is_persisted());

        let renamed = Task {
            name: "Write docs".into(),
            ..task.clone()
        };
        let saved = store.save_task(&renamed).unwrap();
        assert_eq!(saved.id, task.id);
        assert_eq!(store.get_task(task.id).unwrap().unwrap().name, "Write docs");
    }

    #[test]
    fn save_rejects_empty_name() {
        let store = SqliteStore::open_memory().unwrap();
        let err = store.save_task(&Task::new("")).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(store.list_tasks().unwrap().is_empty());
    }

    #[test]
    fn update_of_missing_task_fails() {
        let store = SqliteStore::open_memory().unwrap();
        let ghost = Task {
            id: 42,
            ..Task::new("Ghost")
        };
        assert!(matches!(
            store.save_task(&ghost),
            Err(CoreError::Ledger(LedgerError::TaskNotFound { task_id: 42 }))
        ));
    }

    #[test]
    fn list_orders_by_sort_order_then_name() {
        let store = SqliteStore::open_memory().unwrap();
        store.save_task(&Task::new("Zeta")).unwrap();
        store.save_task(&Task::new("Beta").with_sort_order(2)).unwrap();
        store.save_task(&Task::new("Alpha").with_sort_order(2)).unwrap();
        let names: Vec<_> = store
            .list_tasks()
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["Zeta", "Alpha", "Beta"]);
    }

    #[test]
    fn open_timing_round_trip() {
        let (store, task) = store_with_task("Plan");
        assert!(store.query_open().unwrap().is_none());

        let id = store.insert_open(task.id, 1_000).unwrap();
        let open = store.query_open().unwrap().unwrap();
        assert_eq!(
            open,
            OpenTiming {
                timing_id: id,
                task_id: task.id,
                start_time: 1_000,
                task_name: "Plan".into(),
            }
        );

        store.update_duration(id, 30).unwrap();
        assert!(store.query_open().unwrap().is_none());
        let closed = store.list_closed(0, 2_000).unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].duration, 30);
    }

    #[test]
    fn update_missing_timing_is_not_found() {
        let store = SqliteStore::open_memory().unwrap();
        assert_eq!(
            store.update_duration(99, 10),
            Err(LedgerError::NotFound { timing_id: 99 })
        );
    }

    #[test]
    fn delete_only_touches_its_own_record() {
        let (store, task) = store_with_task("Read");
        let first = store.insert_open(task.id, 100).unwrap();
        store.update_duration(first, 50).unwrap();
        let second = store.insert_open(task.id, 200).unwrap();

        store.delete(second).unwrap();
        store.delete(second).unwrap();
        store.delete(12345).unwrap();

        assert!(store.query_open().unwrap().is_none());
        assert_eq!(store.list_closed(0, 1_000).unwrap().len(), 1);
    }

    #[test]
    fn insert_for_missing_task_fails() {
        let store = SqliteStore::open_memory().unwrap();
        assert_eq!(
            store.insert_open(7, 100),
            Err(LedgerError::TaskNotFound { task_id: 7 })
        );
    }

    #[test]
    fn deleting_task_removes_its_timings() {
        let (store, task) = store_with_task("Gone");
        let id = store.insert_open(task.id, 100).unwrap();
        store.update_duration(id, 20).unwrap();
        store.delete_task(task.id).unwrap();
        assert!(store.get_task(task.id).unwrap().is_none());
        assert!(store.list_closed(0, 1_000).unwrap().is_empty());
    }

    #[test]
    fn list_closed_respects_range_and_skips_open() {
        let (store, task) = store_with_task("Range");
        for (start, duration) in [(100, 10), (200, 20), (300, 30)] {
            let id = store.insert_open(task.id, start).unwrap();
            store.update_duration(id, duration).unwrap();
        }
        store.insert_open(task.id, 250).unwrap();

        let starts: Vec<_> = store
            .list_closed(150, 300)
            .unwrap()
            .into_iter()
            .map(|r| r.start_time)
            .collect();
        assert_eq!(starts, vec![200]);
    }

    #[test]
    fn writes_bump_change_feed() {
        let (store, task) = store_with_task("Feed");
        let mut rx = TimingLedger::changes(&store);
        let before = *rx.borrow_and_update();
        store.insert_open(task.id, 1).unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update() > before);
    }

    #[test]
    fn open_at_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasktimer.db");
        {
            let store = SqliteStore::open_at(&path).unwrap();
            let task = store.save_task(&Task::new("Persist")).unwrap();
            store.insert_open(task.id, 500).unwrap();
        }
        let store = SqliteStore::open_at(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        assert_eq!(store.query_open().unwrap().unwrap().task_name, "Persist");
    }
}
