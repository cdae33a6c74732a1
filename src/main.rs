mod config;
mod monitor;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use idlewalk_appium::{AppiumSession, Capabilities};
use idlewalk_core::{BrowseTask, KeywordMatcher, StopFlag, TaskManager, UiDriver};
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;

use config::AppConfig;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Engine(#[from] idlewalk_core::Error),

    #[error(transparent)]
    Driver(#[from] idlewalk_core::DriverError),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Parser)]
#[command(name = "idlewalk")]
#[command(about = "Browse a mobile app's item feed like an idle human")]
#[command(version)]
struct Cli {
    /// Profile file (built-in Xianyu profile when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a task until finished or interrupted
    Run {
        /// Task id to run
        #[arg(default_value = "browse_items")]
        task: String,
    },

    /// List available tasks
    List,

    /// Validate a profile without connecting
    Check,

    /// Watch and print screen transitions
    Monitor {
        /// Recognition interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Command::Check => check(&config),
        Command::List => {
            for info in known_tasks() {
                println!("{:<16} {}", info.id, info.description);
            }
            Ok(())
        }
        Command::Run { task } => run(&config, &task).await,
        Command::Monitor { interval_ms } => {
            let session = connect(&config).await?;
            let driver: Arc<dyn UiDriver> = Arc::new(session.clone());
            let stop = StopFlag::new();
            spawn_ctrl_c({
                let stop = stop.clone();
                move || stop.stop()
            });
            let result = monitor::watch(
                driver,
                config.screen_registry(),
                Duration::from_millis(interval_ms),
                stop,
            )
            .await;
            quit(&session).await;
            result
        }
    }
}

fn known_tasks() -> Vec<idlewalk_core::TaskInfo> {
    vec![BrowseTask::INFO]
}

fn check(config: &AppConfig) -> Result<()> {
    println!("Profile valid: {}", config.name);
    println!("  Server: {}", config.server_url());
    println!("  App: {} / {}", config.app.package, config.app.activity);
    println!("  Screens: {}", config.screens.len());
    println!("  Keywords: {}", config.search.keywords.join(", "));
    Ok(())
}

async fn run(config: &AppConfig, task_id: &str) -> Result<()> {
    let session = connect(config).await?;
    let driver: Arc<dyn UiDriver> = Arc::new(session.clone());

    let registry = config.screen_registry();
    let selectors = config.feed_selectors();
    let matcher = KeywordMatcher::new(
        config.search.keywords.clone(),
        config.search.case_sensitive,
    );
    let predicate = matcher.into_predicate();
    let browse_config = config.browse.to_browse_config();

    let mut manager = TaskManager::new();
    manager.register(BrowseTask::INFO, {
        let driver = Arc::clone(&driver);
        move || {
            Arc::new(BrowseTask::with_config(
                Arc::clone(&driver),
                registry.clone(),
                selectors.clone(),
                Arc::clone(&predicate),
                browse_config.clone(),
            ))
        }
    });
    let manager = Arc::new(manager);

    spawn_ctrl_c({
        let manager = Arc::clone(&manager);
        move || manager.stop()
    });

    let result = manager.run(task_id).await;
    quit(&session).await;

    let report = result?;
    println!();
    if report.stopped {
        println!("Stopped.");
    } else {
        println!("Finished.");
    }
    println!("  Items inspected: {}", report.total_processed);
    println!("  Matches visited: {}", report.matched);
    Ok(())
}

async fn connect(config: &AppConfig) -> Result<AppiumSession> {
    let mut caps =
        Capabilities::default().app(config.app.package.clone(), config.app.activity.clone());
    for (key, value) in &config.app.capabilities {
        let value = serde_json::to_value(value)
            .map_err(|e| Error::Config(format!("capability '{}': {}", key, e)))?;
        caps.extra.insert(key.clone(), value);
    }
    Ok(AppiumSession::connect(&config.server_url(), &caps).await?)
}

/// Invoke `on_signal` when ctrl-c arrives. The task keeps running until its
/// next stop checkpoint, then unwinds normally.
fn spawn_ctrl_c(on_signal: impl FnOnce() + Send + 'static) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!();
            println!("Interrupt received, stopping...");
            on_signal();
        }
    });
}

/// Session teardown happens on every exit path; a teardown failure is worth
/// a warning, never a changed exit code.
async fn quit(session: &AppiumSession) {
    if let Err(e) = session.quit().await {
        warn!("session teardown failed: {}", e);
    }
}
