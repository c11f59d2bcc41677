//! `tasksync` -- offline-first task list with background sync.
//!
//! Every command works against the local cache; writes go to the remote
//! when it is reachable and are kept locally until the next `sync`
//! otherwise. Configuration via CLI flags, environment variables, or
//! config file (`~/.config/tasksync/config.toml`).
//!
//! ```bash
//! export TASKSYNC_URL=https://project.example.co TASKSYNC_API_KEY=anon-key
//! cargo run --bin tasksync -- login me@example.com --password secret
//! cargo run --bin tasksync -- add "Buy milk" -p high --category shopping
//! cargo run --bin tasksync -- ls --filter active --sort priority-high
//! cargo run --bin tasksync -- watch
//! ```

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use tasksync::app::{App, AppError};
use tasksync::cache::CacheError;
use tasksync::config::{CliArgs, ClientConfig, Command};
use tasksync::sync::{Resource, SyncError};
use tasksync::view::{self, SortOption, TaskFilter, TaskQuery, TaskStats};
use tasksync_proto::task::{NewTask, Task, TaskId, TaskPatch};

/// Errors surfaced to the user by a command.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    App(#[from] AppError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("{0}")]
    Usage(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Log to a file so command output stays clean.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let app = match App::open(config) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let command = cli.command.unwrap_or(Command::Ls {
        filter: TaskFilter::All.to_string(),
        search: String::new(),
        sort: SortOption::DateCreated.to_string(),
    });

    match run(&app, command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based tracing so log output never interleaves with
/// command output.
///
/// Returns a guard that must be held for the lifetime of the application
/// to ensure buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("tasksync.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(app: &App, command: Command) -> Result<(), CliError> {
    let reconciler = app.reconciler();
    match command {
        Command::Signup(creds) => {
            let session = app.sign_up(&creds.email, &creds.password).await?;
            println!("signed up as {} ({})", session.email, session.user_id);
        }
        Command::Login(creds) => {
            let session = app.sign_in(&creds.email, &creds.password).await?;
            println!("signed in as {} ({})", session.email, session.user_id);
        }
        Command::Logout => {
            app.sign_out().await?;
            println!("signed out");
        }
        Command::Pull => {
            let owner_id = app.owner_id()?;
            let tasks = finish(reconciler.pull_all(&owner_id).await)?;
            println!("pulled {} task(s)", tasks.len());
        }
        Command::Sync => {
            let report = finish(reconciler.sync().await)?;
            println!("pushed {}, pulled {}", report.pushed, report.pulled);
        }
        Command::Add {
            title,
            description,
            priority,
            category,
            due,
        } => {
            let new_task = NewTask::new(title)
                .with_description(description)
                .with_priority(priority.unwrap_or_default())
                .with_category(category.unwrap_or_default())
                .with_due_date(due);
            let task = finish(reconciler.create(new_task).await)?;
            println!("{}", render(&task));
        }
        Command::Edit {
            id,
            title,
            description,
            priority,
            category,
            due,
        } => {
            let patch = TaskPatch {
                title,
                description,
                completed: None,
                priority,
                category,
                due_date: due,
            };
            if patch.is_empty() {
                return Err(CliError::Usage("nothing to change".to_string()));
            }
            let task = finish(reconciler.update(&TaskId::new(id), patch).await)?;
            println!("{}", render(&task));
        }
        Command::Toggle { id } => {
            let task = find(app, &id)?;
            let task = finish(reconciler.toggle_completion(&task).await)?;
            println!("{}", render(&task));
        }
        Command::Rm { id } => {
            finish(reconciler.delete(&TaskId::new(id.clone())).await)?;
            println!("deleted {id}");
        }
        Command::ClearCompleted => {
            let owner_id = app.owner_id()?;
            let report = finish(reconciler.delete_completed(&owner_id).await)?;
            println!("deleted {}, failed {}", report.deleted, report.failed);
        }
        Command::Ls {
            filter,
            search,
            sort,
        } => {
            let filter = TaskFilter::from_name(&filter)
                .ok_or_else(|| CliError::Usage(format!("unknown filter {filter:?}")))?;
            let query = TaskQuery {
                filter,
                search,
                sort: SortOption::from_name(&sort),
            };
            let tasks = reconciler.cache().tasks_for_owner(&app.owner_id()?)?;
            for task in view::project(&tasks, &query) {
                println!("{}", render(&task));
            }
        }
        Command::Stats => {
            let tasks = reconciler.cache().tasks_for_owner(&app.owner_id()?)?;
            print_stats(TaskStats::from_tasks(&tasks));
        }
        Command::Watch => watch(app).await?,
    }
    Ok(())
}

/// Runs the scheduler and prints its progress until Ctrl-C.
async fn watch(app: &App) -> Result<(), CliError> {
    let projector = app.projector()?;
    let scheduler = app.start_scheduler();
    let mut scheduler_state = scheduler.state();
    let mut sync_state = app.reconciler().sync_state();
    let mut view_state = projector.state();

    println!("watching; press Ctrl-C to stop");
    print_stats(view_state.borrow_and_update().stats);

    loop {
        tokio::select! {
            Ok(()) = scheduler_state.changed() => {
                let state = *scheduler_state.borrow_and_update();
                println!("scheduler: {state:?}");
            }
            Ok(()) = sync_state.changed() => {
                match sync_state.borrow_and_update().clone() {
                    Some(Resource::Success(report)) => {
                        println!("synced: pushed {}, pulled {}", report.pushed, report.pulled);
                    }
                    Some(Resource::Error(e)) => println!("sync failed: {e}"),
                    Some(Resource::Loading) | None => {}
                }
            }
            Ok(()) = view_state.changed() => {
                let stats = view_state.borrow_and_update().stats;
                print_stats(stats);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    scheduler.shutdown().await;
    Ok(())
}

fn find(app: &App, id: &str) -> Result<Task, CliError> {
    app.reconciler()
        .cache()
        .get(&TaskId::new(id))?
        .ok_or_else(|| CliError::Usage(format!("no task with id {id}")))
}

fn finish<T>(resource: Resource<T>) -> Result<T, SyncError> {
    resource
        .into_result()
        .unwrap_or_else(|| Err(SyncError::Transport("operation did not finish".to_string())))
}

fn render(task: &Task) -> String {
    let mark = if task.completed { "x" } else { " " };
    let mut line = format!(
        "[{mark}] {}  {}  ({}, {})",
        task.id, task.title, task.priority, task.category
    );
    if let Some(due) = task.due_date {
        line.push_str(&format!("  due {}", due.to_rfc3339()));
    }
    if !task.synced {
        line.push_str("  *unsynced");
    }
    line
}

fn print_stats(stats: TaskStats) {
    println!(
        "{} total, {} active, {} completed, {} unsynced",
        stats.total, stats.active, stats.completed, stats.unsynced
    );
}
