// src/main.rs - Serial bridge entry point
use clap::Parser;
use printlink_rs::board::Board;
use printlink_rs::config::{self, Config};
use printlink_rs::hardware::serial;
use printlink_rs::web;
use std::path::PathBuf;
use std::sync::Arc;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Bridge a network client to a G-code printer board over a serial link.
#[derive(Parser, Debug)]
#[command(name = "printer-bridge", version)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "printer.toml")]
    config: PathBuf,

    /// Serial device, overrides `serial.port`
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate, overrides `serial.baud`
    #[arg(short, long)]
    baud: Option<u32>,

    /// trace|debug|info|warn|error, overrides `logging.level`
    #[arg(long)]
    log_level: Option<String>,
}

fn load(cli: &Cli) -> Result<Config, BoxError> {
    let path = cli.config.to_string_lossy();
    let mut config = if cli.config.exists() {
        config::load_config(&path)?
    } else {
        eprintln!("Config file '{}' not found, using defaults", path);
        Config::default()
    };
    if let Some(port) = &cli.port {
        config.serial.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.serial.baud = baud;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    let config = load(&cli)?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(config.logging.max_level()?)
        .init();

    tracing::info!("Starting printer bridge {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Board: {} @ {} baud", config.serial.port, config.serial.baud);
    tracing::info!("Flow control: {:?}", config.protocol.flow_control);

    let channel = serial::open_serial_port(&config.serial.port, config.serial.baud, config.protocol.read_poll())
        .map_err(|e| {
            tracing::error!("Failed to open serial port '{}': {}", config.serial.port, e);
            tracing::error!("Available ports: {:?}", serial::available_ports());
            e
        })?;

    let board = Arc::new(Board::new(&config));
    let workers = board.start(channel);

    let app = web::api::create_router(board.clone(), config.web.gcode_dir.clone());
    let listener = tokio::net::TcpListener::bind(&config.web.bind).await?;
    tracing::info!("Web API listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
            tracing::info!("Shutting down");
        })
        .await?;

    board.shutdown().await;
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::warn!("Worker ended abnormally: {}", e);
        }
    }
    Ok(())
}
