//! BIER orchagent entry point.
//!
//! Loads the configuration, connects every configured switch and applies
//! events read as JSON lines from a feed file or stdin until the feed ends or
//! SIGINT arrives. Rules go to an in-memory driver.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use bier_driver::MemoryDriver;
use bier_orchagent::{ControllerConfig, ControllerDaemon, FeedMessage};
use clap::Parser;
use log::{error, info, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

/// BIER multicast controller
#[derive(Parser, Debug)]
#[command(name = "bier-orchagent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Controller configuration (JSON)
    #[arg(short = 'c', long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Event feed, one JSON message per line. Reads stdin if absent.
    #[arg(short = 'f', long)]
    feed: Option<PathBuf>,

    /// Log every installed table entry on shutdown
    #[arg(long)]
    dump: bool,
}

async fn run_feed<R>(daemon: Arc<ControllerDaemon>, reader: R) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut applied = 0;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let message: FeedMessage = match serde_json::from_str(line) {
            Ok(m) => m,
            Err(e) => {
                warn!("Skipping malformed feed line: {}", e);
                continue;
            }
        };

        // handlers may sleep for the settle delay
        let d = Arc::clone(&daemon);
        match tokio::task::spawn_blocking(move || d.ingest(message)).await? {
            Ok(_) => applied += 1,
            Err(e) => warn!("Feed message rejected: {}", e),
        }
    }
    Ok(applied)
}

async fn open_feed(daemon: Arc<ControllerDaemon>, path: Option<PathBuf>) -> anyhow::Result<usize> {
    match path {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("cannot open feed {}", path.display()))?;
            run_feed(daemon, BufReader::new(file)).await
        }
        None => run_feed(daemon, BufReader::new(tokio::io::stdin())).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level)).init();

    info!("Starting bier-orchagent");
    info!("Config: {}", args.config.display());

    let config = match ControllerConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Protection: {:?}, {} switches, settle delay {}ms",
        config.protection,
        config.switches.len(),
        config.delay_ms
    );

    let daemon = Arc::new(ControllerDaemon::new(config, Arc::new(MemoryDriver::new())));
    if let Err(e) = daemon.connect_switches() {
        error!("Failed to connect switches: {}", e);
        return ExitCode::FAILURE;
    }

    let feed = open_feed(Arc::clone(&daemon), args.feed.clone());

    let code = tokio::select! {
        result = feed => match result {
            Ok(applied) => {
                info!("Feed finished after {} messages", applied);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Feed failed: {:#}", e);
                ExitCode::FAILURE
            }
        },
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => warn!("Received SIGINT, shutting down"),
                Err(e) => error!("Failed to listen for ctrl-c: {}", e),
            }
            ExitCode::SUCCESS
        }
    };

    if args.dump {
        for line in daemon.dump() {
            info!("{}", line);
        }
    }
    daemon.shutdown();
    code
}
