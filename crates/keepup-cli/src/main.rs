mod config_watcher;
mod daemon;
mod tasks;

use clap::{Parser, Subcommand};

use keepup_config::KeepUpConfig;
use keepup_types::{AccessType, NetworkTask};

#[derive(Parser)]
#[command(name = "keepup", about = "Periodic network endpoint monitor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default config to ~/.keepup/config.json5
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Add a monitoring task
    Add {
        /// Host name, IP address, or download URL
        address: String,

        /// Probe type: ping, connect, or download
        #[arg(short = 't', long = "type", default_value = "ping")]
        access_type: AccessType,

        /// Port for connect probes
        #[arg(short, long, default_value_t = 0)]
        port: u16,

        /// Minutes between probes
        #[arg(short, long, default_value_t = 15)]
        interval: u32,

        /// Only probe on Wi-Fi
        #[arg(long)]
        wifi_only: bool,

        /// Log a warning when a probe fails
        #[arg(long)]
        notify: bool,

        #[arg(long)]
        high_priority: bool,

        /// Start the task right away
        #[arg(long)]
        start: bool,
    },
    /// List all tasks
    List,
    /// Delete a task and its logs
    Remove { id: i64 },
    /// Start probing a task
    Start { id: i64 },
    /// Stop probing a task
    Stop { id: i64 },
    /// Show the log of a task, newest first
    Logs {
        id: i64,

        /// Show at most this many entries
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Delete the log instead of printing it
        #[arg(long, conflicts_with = "limit")]
        clear: bool,
    },
    /// Run the scheduler until interrupted
    Run,
    /// Check system health
    Health,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Commands::Init { force } = cli.command {
        return init_config(force);
    }

    let config = keepup_config::load_config().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {e}");
        Default::default()
    });

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::Init { .. } => {}
        Commands::Run => rt.block_on(daemon::run(config))?,
        Commands::Health => {
            println!("keepup is healthy");
            match config.database_path() {
                Ok(path) => println!("  database: {}", path.display()),
                Err(e) => println!("  database: unavailable ({e})"),
            }
            println!("  max concurrent probes: {}", config.worker.max_concurrent_probes);
            println!("  log entries kept per task: {}", config.log.limit);
            let intervals = config.suspension.active_intervals();
            if intervals.is_empty() {
                println!("  suspension: off");
            } else {
                let windows: Vec<String> = intervals.iter().map(ToString::to_string).collect();
                println!("  suspension: {}", windows.join(", "));
            }
        }
        command => rt.block_on(async {
            let store = daemon::open_store(&config)?;
            let (scheduler, _receiver) = daemon::build_scheduler(&config, store.clone());
            match command {
                Commands::Add {
                    address,
                    access_type,
                    port,
                    interval,
                    wifi_only,
                    notify,
                    high_priority,
                    start,
                } => {
                    let mut task = NetworkTask::new(address, port, access_type).with_interval(interval);
                    task.wifi_only = wifi_only;
                    task.notify_on_failure = notify;
                    task.high_priority = high_priority;
                    tasks::add(&scheduler, task, start).await
                }
                Commands::List => tasks::list(store.as_ref()).await,
                Commands::Remove { id } => tasks::remove(&scheduler, id).await,
                Commands::Start { id } => tasks::start(&scheduler, store.as_ref(), id).await,
                Commands::Stop { id } => tasks::stop(&scheduler, store.as_ref(), id).await,
                Commands::Logs { id, clear: true, .. } => tasks::clear_logs(store.as_ref(), id).await,
                Commands::Logs { id, limit, .. } => tasks::logs(store.as_ref(), id, limit).await,
                Commands::Init { .. } | Commands::Run | Commands::Health => Ok(()),
            }
        })?,
    }

    Ok(())
}

fn init_config(force: bool) -> anyhow::Result<()> {
    let path = keepup_config::config_file_path()?;
    if path.exists() && !force {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }
    keepup_config::save_config(&KeepUpConfig::default())?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
