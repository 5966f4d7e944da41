mod cmds;
mod watch;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use dirwatch_config::AppConfig;

#[derive(Debug, Parser)]
#[command(
    name = "dirwatch",
    version,
    about = "Watch a directory tree and keep a daily change report"
)]
struct Cli {
    /// Configuration file; missing files fall back to defaults.
    #[arg(long, global = true, default_value = "config/default.toml")]
    config: PathBuf,
    /// Directory to monitor (overrides `monitor.root`).
    #[arg(long, global = true)]
    root: Option<String>,
    /// HTTP port (overrides `server.port`).
    #[arg(long, global = true)]
    port: Option<u16>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Watch for changes, run scheduled scans and serve /status and /scan.
    Watch {
        /// Do not start the HTTP boundary.
        #[arg(long)]
        no_http: bool,
    },
    /// Run one full scan, append it to today's report and print it as JSON.
    Scan,
    /// Write today's digest into the report directory.
    Digest {
        /// Files to ground the digest in (default: today's report file).
        #[arg(value_name = "FILE")]
        files: Vec<PathBuf>,
        /// Report layout to follow instead of the built-in one.
        #[arg(long)]
        template: Option<PathBuf>,
    },
    /// Show snapshot history for a file under the monitored root.
    History {
        #[arg(value_name = "PATH")]
        path: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Show the patch a snapshot made to PATH (default: the latest).
        #[arg(long, value_name = "COMMIT", num_args = 0..=1, default_missing_value = "HEAD")]
        diff: Option<String>,
    },
    /// Check configuration, the monitored root and the enrichment backend.
    Doctor,
    /// Print the effective configuration, or write it to --config.
    Config {
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config)?;
    if let Some(root) = cli.root {
        config.monitor.root = root;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    let _log_guard = init_tracing(&config)?;

    match cli.command.unwrap_or(Commands::Watch { no_http: false }) {
        Commands::Watch { no_http } => watch::run(config, no_http).await?,
        Commands::Scan => cmds::scan(&config).await?,
        Commands::Digest { files, template } => {
            cmds::digest(&config, &files, template.as_deref()).await?
        }
        Commands::History { path, limit, diff } => match diff {
            Some(commit) => cmds::diff(&config, &path, &commit).await?,
            None => cmds::history(&config, &path, limit).await?,
        },
        Commands::Doctor => cmds::doctor(&config, &cli.config).await?,
        Commands::Config { write } => cmds::config(&config, &cli.config, write)?,
    }
    Ok(())
}

/// Console output goes to stderr so command output on stdout stays clean.
/// With `telemetry.log_dir` set, a daily-rotated file receives the same
/// events; the returned guard flushes it on drop.
fn init_tracing(config: &AppConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.telemetry.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter).with(console);

    let Some(dir) = config.log_dir() else {
        registry.init();
        return Ok(None);
    };
    std::fs::create_dir_all(&dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("dirwatch")
        .filename_suffix("log")
        .build(&dir)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);
    registry
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer),
        )
        .init();
    Ok(Some(guard))
}
