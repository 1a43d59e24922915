//! Task management commands for CLI.

use clap::Subcommand;
use tasktimer_core::{LedgerError, SqliteStore, Task, TaskStore};

#[derive(Subcommand)]
pub enum TaskAction {
    /// Create a new task
    Add {
        /// Task name
        name: String,
        /// Task description
        #[arg(long)]
        description: Option<String>,
        /// Position in the task list (lower first)
        #[arg(long, default_value = "0")]
        sort_order: i64,
    },
    /// List tasks
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update a task
    Edit {
        /// Task ID
        id: i64,
        /// New name
        #[arg(long)]
        name: Option<String>,
        /// New description
        #[arg(long)]
        description: Option<String>,
        /// New position in the task list
        #[arg(long)]
        sort_order: Option<i64>,
    },
    /// Delete a task and its recorded time
    Delete {
        /// Task ID
        id: i64,
    },
}

pub fn run(action: TaskAction) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteStore::open()?;

    match action {
        TaskAction::Add {
            name,
            description,
            sort_order,
        } => {
            let task = Task::new(name)
                .with_description(description.unwrap_or_default())
                .with_sort_order(sort_order);
            let task = store.save_task(&task)?;
            println!("Task created: {}", task.id);
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        TaskAction::List { json } => {
            let tasks = store.list_tasks()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else if tasks.is_empty() {
                println!("No tasks");
            } else {
                for task in &tasks {
                    if task.description.is_empty() {
                        println!("{:>4}  {}", task.id, task.name);
                    } else {
                        println!("{:>4}  {}  ({})", task.id, task.name, task.description);
                    }
                }
            }
        }
        TaskAction::Edit {
            id,
            name,
            description,
            sort_order,
        } => {
            let mut task = store
                .get_task(id)?
                .ok_or(LedgerError::TaskNotFound { task_id: id })?;
            if let Some(name) = name {
                task.name = name;
            }
            if let Some(description) = description {
                task.description = description;
            }
            if let Some(sort_order) = sort_order {
                task.sort_order = sort_order;
            }
            let task = store.save_task(&task)?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        TaskAction::Delete { id } => {
            store.delete_task(id)?;
            println!("Task deleted: {id}");
        }
    }
    Ok(())
}
