//! steamspeed CLI entry point.
//!
//! Provides `run`, `watch`, and `info` subcommands for a full download test,
//! following an already running download, or looking up an app.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use steamspeed::config::{default_config_path, load_config, load_or_default, Config};
use steamspeed::logging;
use steamspeed::monitor::{Monitor, MonitorError};
use steamspeed::session::SessionState;
use steamspeed::steamcmd::{extract_sources_block, DownloadProcess, SteamCmd};
use steamspeed::summary::{summarize, Summary};
use steamspeed::tailer::LogTailer;

/// steamspeed — measure Steam download throughput.
#[derive(Parser)]
#[command(name = "steamspeed", version, about)]
struct Cli {
    /// Config file (default: ~/.steamspeed/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write JSON logs to this directory.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Echo log lines and print the download sources report.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// steamcmd overrides shared by subcommands.
#[derive(Args)]
struct AppArgs {
    /// Application ID.
    #[arg(short = 'a', long = "app")]
    app_id: Option<String>,

    /// Steam username.
    #[arg(short = 'u', long = "user")]
    username: Option<String>,

    /// Steam password.
    #[arg(short = 'p', long = "password")]
    password: Option<String>,
}

/// Output and timeout options for monitoring subcommands.
#[derive(Args)]
struct MonitorArgs {
    /// Give up after this many seconds without log activity.
    #[arg(long)]
    timeout: Option<u64>,

    /// Print the summary as JSON.
    #[arg(long)]
    json: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Remove and re-download an app, then report the download rate.
    Run {
        /// App and account overrides.
        #[command(flatten)]
        app: AppArgs,

        /// Monitoring options.
        #[command(flatten)]
        monitor: MonitorArgs,
    },
    /// Follow the content log for a download started elsewhere.
    Watch {
        /// Content log to follow (default: ~/.steam/logs/content_log.txt).
        #[arg(long)]
        log: Option<PathBuf>,

        /// Monitoring options.
        #[command(flatten)]
        monitor: MonitorArgs,
    },
    /// Print the name of an app.
    Info {
        /// App and account overrides.
        #[command(flatten)]
        app: AppArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _logging_guard = match &cli.log_dir {
        Some(dir) => Some(logging::init_file(dir, cli.verbose)?),
        None => {
            logging::init_cli(cli.verbose);
            None
        }
    };

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => load_or_default(&default_config_path()?)?,
    };
    config.monitor.echo_lines |= cli.verbose;

    match cli.command {
        Command::Run { app, monitor } => {
            apply_app_args(&mut config, app);
            apply_monitor_args(&mut config, &monitor);
            config.validate()?;
            handle_run(&config, monitor.json, cli.verbose).await
        }
        Command::Watch { log, monitor } => {
            if log.is_some() {
                config.steam.content_log = log;
            }
            apply_monitor_args(&mut config, &monitor);
            config.validate()?;
            handle_watch(&config, monitor.json).await
        }
        Command::Info { app } => {
            apply_app_args(&mut config, app);
            config.validate()?;
            handle_info(&config).await
        }
    }
}

fn apply_app_args(config: &mut Config, app: AppArgs) {
    if let Some(app_id) = app.app_id {
        config.steam.app_id = app_id;
    }
    if let Some(username) = app.username {
        config.steam.username = username;
    }
    if let Some(password) = app.password {
        config.steam.password = password;
    }
}

fn apply_monitor_args(config: &mut Config, monitor: &MonitorArgs) {
    if monitor.timeout.is_some() {
        config.monitor.idle_timeout_secs = monitor.timeout;
    }
}

/// Remove and re-download the app while following the content log.
async fn handle_run(config: &Config, json: bool, verbose: bool) -> anyhow::Result<()> {
    let steamcmd = SteamCmd::new(&config.steam);
    let app_id = steamcmd.app_id().to_owned();
    let log_path = config.content_log()?;

    let name = steamcmd.app_name().await?;
    println!(
        "Download test for application {app_id} [{name}] (also see https://steamdb.info/app/{app_id}/)"
    );

    // Position at the end of the log before steamcmd starts writing to it.
    let tailer = LogTailer::open(&log_path)?;
    let process = steamcmd.spawn_download()?;

    let state = match follow(tailer, config).await {
        Ok(state) => state,
        Err(e) => {
            stop(process).await;
            return Err(e);
        }
    };

    let output = process.finish().await?;
    if verbose {
        match extract_sources_block(&output) {
            Some(block) => println!("\n{block}\n"),
            None => warn!("steamcmd printed no download sources report"),
        }
    }

    print_summary(&summarize(&state)?, json)
}

/// Follow a download started by someone else.
async fn handle_watch(config: &Config, json: bool) -> anyhow::Result<()> {
    let log_path = config.content_log()?;
    let tailer = LogTailer::open(&log_path)?;
    let state = follow(tailer, config).await?;
    print_summary(&summarize(&state)?, json)
}

/// Look up and print the app's name.
async fn handle_info(config: &Config) -> anyhow::Result<()> {
    let steamcmd = SteamCmd::new(&config.steam);
    let name = steamcmd.app_name().await?;
    println!("{} {name}", steamcmd.app_id());
    Ok(())
}

/// Run the monitor until the session ends or the user interrupts.
async fn follow(tailer: LogTailer, config: &Config) -> anyhow::Result<SessionState> {
    let monitor = Monitor::new(tailer, config.monitor.settings());

    tokio::select! {
        outcome = monitor.run() => match outcome {
            Ok(state) => Ok(state),
            Err(e @ MonitorError::SessionFailed { .. }) => Err(e.into()),
            Err(e) => Err(e).context("download monitoring stopped"),
        },
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("interrupted");
            anyhow::bail!("interrupted before the download finished")
        }
    }
}

async fn stop(process: DownloadProcess) {
    if let Err(e) = process.abort().await {
        warn!(error = %e, "failed to stop steamcmd");
    }
}

fn print_summary(summary: &Summary, json: bool) -> anyhow::Result<()> {
    if json {
        let rendered =
            serde_json::to_string_pretty(summary).context("failed to serialize summary")?;
        println!("{rendered}");
    } else {
        println!("{summary}");
    }
    Ok(())
}
