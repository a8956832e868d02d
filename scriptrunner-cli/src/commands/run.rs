//! Run command - submit command matrices and wait for them to finish.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use tokio::sync::{mpsc, Notify};

use scriptrunner::debug::WAITING_FOR_START_REASON;
use scriptrunner::registry::{ListenerError, RunListener, RunRegistry};
use scriptrunner::run::{RunId, RunParams, RunSnapshot, RunState, RunStatus};
use scriptrunner::scheduler::{CompilerStrategy, ExecutorStrategy, SchedulerConfig};

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the run command.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Command matrix files to run
    #[arg(required = true)]
    pub matrices: Vec<PathBuf>,

    /// INI settings file copied next to every matrix
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Case-range filter, e.g. "1-3,5,8-"
    #[arg(long, default_value = "")]
    pub range: String,

    /// Sub-folder inside each run's working directory
    #[arg(long)]
    pub sub_folder: Option<String>,

    /// Keep running remaining cases after a failed one
    #[arg(long)]
    pub continue_on_failure: bool,

    /// Hold each run at its first step until Enter is pressed
    #[arg(long)]
    pub no_auto_start: bool,

    /// User recorded in the reports (defaults to $USER)
    #[arg(long)]
    pub user: Option<String>,

    /// Tag attached to the reports (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Environment name recorded in the reports
    #[arg(long)]
    pub environment: Option<String>,

    /// Workspace root (overrides config.ini)
    #[arg(long)]
    pub workspace: Option<PathBuf>,

    /// Compiler strategy: serial or pooled (overrides config.ini)
    #[arg(long)]
    pub compiler: Option<CompilerStrategy>,

    /// Executor strategy: serial or bounded (overrides config.ini)
    #[arg(long)]
    pub executor: Option<ExecutorStrategy>,

    /// Concurrency cap for the bounded executor (overrides config.ini)
    #[arg(long)]
    pub max_concurrent: Option<usize>,
}

/// Wakes the wait loop on every run event.
struct WakeListener(Arc<Notify>);

impl RunListener for WakeListener {
    fn on_run_event(&self, _run: &RunSnapshot) -> Result<(), ListenerError> {
        self.0.notify_one();
        Ok(())
    }
}

/// Run the run command.
pub fn run(args: RunArgs, config_path: Option<&Path>) -> Result<(), CliError> {
    let runner = CliRunner::new(config_path)?;
    runner.log_startup("run");

    let mut scheduler = SchedulerConfig::from(&runner.config().scheduler);
    if let Some(strategy) = args.compiler {
        scheduler.compiler_strategy = strategy;
    }
    if let Some(strategy) = args.executor {
        scheduler.executor_strategy = strategy;
    }
    if let Some(max) = args.max_concurrent {
        scheduler.max_concurrent_runs = max.max(1);
    }
    let root = runner.workspace_root(args.workspace.clone());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    runtime.block_on(async {
        let registry = runner.create_registry(scheduler, &root);
        let outcome = execute(&registry, &args).await;
        registry.shutdown().await;
        let runs = outcome?;
        print_summary(&registry, &runs)
    })
}

fn build_params(args: &RunArgs, matrix: PathBuf, settings: Option<PathBuf>) -> RunParams {
    let user = args
        .user
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "anonymous".to_string());

    let mut builder = RunParams::builder(matrix)
        .range(args.range.clone())
        .continue_on_failure(args.continue_on_failure)
        .auto_start(!args.no_auto_start)
        .auto_run(true)
        .user(user);
    if let Some(settings) = settings {
        builder = builder.settings_path(settings);
    }
    if let Some(sub_folder) = &args.sub_folder {
        builder = builder.sub_folder(sub_folder.clone());
    }
    if let Some(environment) = &args.environment {
        builder = builder.environment(environment.clone());
    }
    for tag in &args.tags {
        builder = builder.tag(tag.clone());
    }
    builder.build()
}

fn absolute(path: &Path) -> Result<PathBuf, CliError> {
    std::fs::canonicalize(path).map_err(|error| CliError::Matrix {
        path: path.to_path_buf(),
        error,
    })
}

/// Submits every matrix and waits until each run's report is closed.
async fn execute(registry: &RunRegistry, args: &RunArgs) -> Result<Vec<(RunId, PathBuf)>, CliError> {
    let wake = Arc::new(Notify::new());
    registry.subscribe(Arc::new(WakeListener(Arc::clone(&wake))));
    registry.start();

    let settings = args.settings.as_deref().map(absolute).transpose()?;
    let mut runs = Vec::with_capacity(args.matrices.len());
    for matrix in &args.matrices {
        let params = build_params(args, absolute(matrix)?, settings.clone());
        let id = registry.submit(params).map_err(|error| CliError::Submit {
            path: matrix.clone(),
            error,
        })?;
        println!("Submitted run {} ({})", id, matrix.display());
        runs.push((id, matrix.clone()));
    }

    let (line_tx, mut line_rx) = mpsc::channel::<()>(4);
    let mut reading = args.no_auto_start;
    if reading {
        // Detached: a thread blocked on stdin must not hold up runtime shutdown.
        std::thread::spawn(move || {
            for _ in std::io::stdin().lines() {
                if line_tx.blocking_send(()).is_err() {
                    break;
                }
            }
        });
    } else {
        drop(line_tx);
    }

    let mut announced = HashSet::new();
    let mut done = HashSet::new();
    let mut interrupted = false;
    loop {
        for (id, matrix) in &runs {
            let Some(run) = registry.get(*id) else {
                done.insert(*id);
                continue;
            };
            if run.is_terminal() && !run.locked && done.insert(*id) {
                println!("Run {} {}: {} ({})", id, run.state, run.status, matrix.display());
            }
            if run.state == RunState::Paused
                && run.pause_reason.as_deref() == Some(WAITING_FOR_START_REASON)
                && announced.insert(*id)
            {
                println!("Run {} is waiting for start; press Enter to start it", id);
            }
        }
        if done.len() == runs.len() {
            return Ok(runs);
        }

        tokio::select! {
            _ = wake.notified() => {}
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                eprintln!("Interrupted, canceling runs...");
                for (id, _) in &runs {
                    let _ = registry.cancel(*id);
                }
            }
            line = line_rx.recv(), if reading => match line {
                Some(()) => {
                    for (id, _) in &runs {
                        let _ = registry.resume(*id);
                    }
                }
                None => reading = false,
            },
        }
    }
}

fn print_summary(registry: &RunRegistry, runs: &[(RunId, PathBuf)]) -> Result<(), CliError> {
    println!();
    println!(
        "{:<6} {:<24} {:<10} {:<12} CAUSE",
        "RUN", "MATRIX", "STATE", "STATUS"
    );

    let mut failed = 0;
    for (id, matrix) in runs {
        let name = matrix
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        match registry.get(*id) {
            Some(run) => {
                if run.status != RunStatus::Executed {
                    failed += 1;
                }
                println!(
                    "{:<6} {:<24} {:<10} {:<12} {}",
                    id,
                    name,
                    run.state.to_string(),
                    run.status.to_string(),
                    run.cause.as_deref().unwrap_or("")
                );
                println!("       report: {}", run.work_folder.display());
            }
            None => {
                failed += 1;
                println!("{:<6} {:<24} (removed)", id, name);
            }
        }
    }

    if failed > 0 {
        return Err(CliError::RunsFailed {
            failed,
            total: runs.len(),
        });
    }
    Ok(())
}
