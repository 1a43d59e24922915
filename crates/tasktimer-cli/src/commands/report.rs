use chrono::{Duration, Local, NaiveDate};
use clap::Args;
use tasktimer_core::report::{day_range, durations, format_duration};
use tasktimer_core::SqliteStore;

#[derive(Args)]
pub struct ReportArgs {
    /// First day to include (YYYY-MM-DD, default: 6 days before --to)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last day to include (YYYY-MM-DD, default: today)
    #[arg(long)]
    to: Option<NaiveDate>,
    /// Print as JSON
    #[arg(long)]
    json: bool,
}

pub fn run(args: ReportArgs) -> Result<(), Box<dyn std::error::Error>> {
    let last = args.to.unwrap_or_else(|| Local::now().date_naive());
    let first = args.from.unwrap_or(last - Duration::days(6));
    let (from, to) = day_range(first, last)?;
    tracing::debug!(%first, %last, from, to, "building duration report");

    let store = SqliteStore::open()?;
    let report = durations(&store, &store, from, to)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{first} .. {last}");
    if report.tasks.is_empty() {
        println!("No recorded time");
        return Ok(());
    }
    let width = report
        .tasks
        .iter()
        .map(|t| t.task_name.chars().count())
        .max()
        .unwrap_or(0)
        .max(5);
    for task in &report.tasks {
        println!(
            "{:<width$}  {:>10}  {:>3} sessions",
            task.task_name,
            format_duration(task.total_secs),
            task.sessions
        );
    }
    println!("{:<width$}  {:>10}", "Total", format_duration(report.total_secs));
    Ok(())
}
