//! CLI entry point for the simulation harness: runs the bridge against a
//! simulated board and optionally prints a G-code file to completion.

use clap::Parser;
use printlink_rs::board::{Board, BoardEvent};
use printlink_rs::config::{self, Config};
use printlink_rs::hardware::serial::StreamChannel;
use printlink_rs::print_job::ReaderSource;
use printlink_rs::simulator::SimulatedBoard;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

/// Simulation Harness CLI
#[derive(Parser, Debug)]
#[command(name = "sim-harness", about = "Run the serial bridge against a simulated board.")]
pub struct Cli {
    /// Path to a TOML config file (overrides defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// G-code file to print
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Seconds to run when no file is given
    #[arg(long, default_value_t = 5)]
    seconds: u64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // 1. Load config (default or from file)
    let config = match &cli.config {
        Some(path) => match config::load_config(&path.to_string_lossy()) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load config: {e}");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    let level = config.logging.max_level().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    // 2. Wire the bridge to the simulator over an in-memory stream
    let (host, device) = tokio::io::duplex(1024);
    let simulator = tokio::spawn(SimulatedBoard::new().run(device));
    let board = Arc::new(Board::new(&config));
    let workers = board.start(StreamChannel::new(host, config.protocol.read_poll()));
    let mut events = board.subscribe();

    // 3. Start the job, if any
    if let Some(path) = &cli.file {
        let source = match ReaderSource::open(path).await {
            Ok(source) => source,
            Err(e) => {
                eprintln!("Failed to open {}: {e}", path.display());
                std::process::exit(1);
            }
        };
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        if let Err(e) = board.start_job(&name, Box::new(source)).await {
            eprintln!("Failed to start job: {e}");
            std::process::exit(1);
        }
    }

    // 4. Follow events until the job ends or the time runs out
    let deadline = tokio::time::sleep(Duration::from_secs(cli.seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline, if cli.file.is_none() => break,
            event = events.recv() => match event {
                Ok(BoardEvent::Progress { fraction }) => tracing::info!("Progress {:.0}%", fraction * 100.0),
                Ok(BoardEvent::JobFinished(report)) => {
                    tracing::info!("Job finished: {:?} ({} of {} bytes)", report.outcome, report.bytes_consumed, report.total_size);
                    break;
                }
                Ok(BoardEvent::StatusChanged(snapshot)) => tracing::info!(
                    "{} hotend {:.1}/{:.1} bed {:.1}/{:.1}",
                    snapshot.status, snapshot.hotend_temp, snapshot.hotend_target, snapshot.bed_temp, snapshot.bed_target
                ),
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    let snapshot = board.snapshot().await;
    println!("{}", serde_json::to_string_pretty(&snapshot).unwrap_or_default());
    board.shutdown().await;
    for worker in workers {
        let _ = worker.await;
    }
    simulator.abort();
}
