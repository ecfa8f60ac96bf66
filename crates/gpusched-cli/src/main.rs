//! gpusched CLI
//!
//! Waits for free GPUs on this host, runs a task on them and gives them back.

mod commands;

use clap::Parser;
use gpusched_core::SchedulerConfig;
use gpusched_store::StateStore;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// gpusched - share the GPUs of one machine between users
#[derive(Parser, Debug)]
#[command(name = "gpusched")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Initialize the pool: SIZE slots, the listed BUSY indices unavailable
    /// (comma separated, e.g. `-i 4,0,2`)
    #[arg(short, long, value_delimiter = ',', value_name = "SIZE[,BUSY...]")]
    init: Option<Vec<usize>>,

    /// Number of GPUs the task needs
    #[arg(short = 'c', long, default_value_t = 1)]
    gpu_count: usize,

    /// GPUs to take first when they are free (`-p 1,3` or `-p 1 -p 3`)
    #[arg(short, long, value_delimiter = ',', value_name = "IDX[,IDX...]")]
    preferred: Vec<usize>,

    /// GPUs that must all be part of the assignment (comma separated)
    #[arg(short, long, value_delimiter = ',', value_name = "IDX[,IDX...]")]
    forced: Vec<usize>,

    /// Mark GPUs free regardless of who holds them (comma separated)
    #[arg(short, long, value_delimiter = ',', value_name = "IDX[,IDX...]")]
    release: Option<Vec<usize>>,

    /// Show which GPUs are used and which are free
    #[arg(short, long)]
    status: bool,

    /// Also export the number of assigned GPUs to the task
    #[arg(long)]
    announce_count: bool,

    /// File receiving the task's stdout
    #[arg(short, long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// File receiving the task's stderr
    #[arg(short, long, value_name = "FILE")]
    err: Option<PathBuf>,

    /// Print a timing summary after the task and enable debug logs
    #[arg(short, long)]
    verbose: bool,

    /// Shared state file (default: /tmp/gpu_scheduler_info)
    #[arg(long, env = "GPUSCHED_STATE_FILE")]
    state_file: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Task command line; `__num__` arguments become the task's port
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "TASK")]
    task: Vec<String>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<SchedulerConfig> {
        let mut config = match &self.config {
            Some(path) => SchedulerConfig::from_file(path)?,
            None => SchedulerConfig::default(),
        };
        if let Some(path) = &self.state_file {
            config.store.path = path.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    // Initialize logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        config.logging.level.parse().unwrap_or(Level::WARN)
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(config.logging.target)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let store = StateStore::open(&config.store.path, config.store.default_pool_size)?
        .with_lock_retry(config.store.lock_retry());

    if let Some(init) = &cli.init {
        commands::init(&store, init).await?;
    }
    if let Some(indices) = &cli.release {
        commands::release(&store, indices).await?;
    }
    if cli.status {
        commands::status(&store).await?;
    }
    if cli.task.is_empty() {
        return Ok(ExitCode::SUCCESS);
    }

    let options = commands::RunOptions {
        count: cli.gpu_count,
        preferred: cli.preferred,
        forced: cli.forced,
        command: cli.task,
        stdout: cli.out,
        stderr: cli.err,
        announce_count: cli.announce_count,
        verbose: cli.verbose,
    };
    commands::run(&store, &config, options).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_is_trailing() {
        let cli = Cli::parse_from([
            "gpusched", "-c", "2", "-p", "1,3", "python", "train.py", "--port", "__num__",
        ]);
        assert_eq!(cli.gpu_count, 2);
        assert_eq!(cli.preferred, vec![1, 3]);
        assert_eq!(cli.task, vec!["python", "train.py", "--port", "__num__"]);
    }

    #[test]
    fn test_index_flag_stops_before_task() {
        let cli = Cli::parse_from(["gpusched", "-p", "1", "python", "train.py"]);
        assert_eq!(cli.preferred, vec![1]);
        assert_eq!(cli.task, vec!["python", "train.py"]);

        let cli = Cli::parse_from(["gpusched", "-f", "0", "-f", "2", "-r", "5,6", "sleep", "1"]);
        assert_eq!(cli.forced, vec![0, 2]);
        assert_eq!(cli.release, Some(vec![5, 6]));
        assert_eq!(cli.task, vec!["sleep", "1"]);

        let cli = Cli::parse_from(["gpusched", "-p", "1", "--", "-weird"]);
        assert_eq!(cli.task, vec!["-weird"]);
    }

    #[test]
    fn test_init_takes_size_and_busy() {
        let cli = Cli::parse_from(["gpusched", "-i", "4,0,2", "-s"]);
        assert_eq!(cli.init, Some(vec![4, 0, 2]));
        assert!(cli.status);
        assert!(cli.task.is_empty());
    }

    #[test]
    fn test_rejects_non_numeric_index() {
        assert!(Cli::try_parse_from(["gpusched", "-f", "x"]).is_err());
    }

    #[test]
    fn test_state_file_overrides_config() {
        let cli = Cli::parse_from(["gpusched", "--state-file", "/tmp/other", "-s"]);
        let config = cli.load_config().unwrap();
        assert_eq!(config.store.path, PathBuf::from("/tmp/other"));
        assert_eq!(config.admission.poll_delay_ms, 3000);
    }
}
