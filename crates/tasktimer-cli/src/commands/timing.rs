//! Toggle and status commands.

use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use tasktimer_core::report::format_duration;
use tasktimer_core::{
    Clock, Config, LedgerError, SettingsWatcher, SqliteStore, SystemClock, TaskStore,
    TimingEngine, WriteMode,
};
use tokio::runtime::Handle;

pub async fn toggle(id: i64) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(SqliteStore::open()?);
    let task = store
        .get_task(id)?
        .ok_or(LedgerError::TaskNotFound { task_id: id })?;

    let settings = SettingsWatcher::from_file(&Config::path()?);
    let engine = TimingEngine::new(store, settings.threshold())?
        .with_write_mode(WriteMode::Background(Handle::current()));
    engine.follow_settings(settings.subscribe());
    let mut display = engine.subscribe();

    let event = engine.toggle(&task)?;
    println!("{}", serde_json::to_string_pretty(&event)?);
    println!("{}", display_line(display.current().as_deref()));

    for failure in engine.shutdown().await {
        eprintln!(
            "warning: {} was not recorded: {}",
            serde_json::to_string(&failure.op)?,
            failure.error
        );
    }
    Ok(())
}

pub fn status(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(SqliteStore::open()?);
    let engine = TimingEngine::new(store, Config::load_or_default().ignore_threshold())?;
    let current = engine.current_timing();

    if json {
        println!("{}", serde_json::to_string_pretty(&current)?);
        return Ok(());
    }

    match current {
        Some(current) => {
            let started = DateTime::<Utc>::from_timestamp(current.timing.start_time, 0)
                .map(|dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| current.timing.start_time.to_string());
            println!("{}", display_line(Some(&current.task_name)));
            println!("Started: {started}");
            println!(
                "Elapsed: {}",
                format_duration(current.timing.elapsed(SystemClock.now()))
            );
        }
        None => println!("{}", display_line(None)),
    }
    Ok(())
}

fn display_line(task_name: Option<&str>) -> String {
    match task_name {
        Some(name) => format!("Now timing: {name}"),
        None => "Not timing".to_string(),
    }
}
