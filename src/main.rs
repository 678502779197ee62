use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vlessgate::config::Config;
use vlessgate::server::GatewayServer;
use vlessgate::Result;

#[derive(Parser, Debug)]
#[command(name = "VlessGate")]
#[command(about = "VLESS-over-WebSocket proxy gateway in Rust", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(long)]
    bind: Option<String>,

    /// Bind port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Generate example configuration file
    #[arg(long, value_name = "FILE")]
    generate_config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(config_path) = args.generate_config {
        println!("Generating example configuration file: {:?}", config_path);
        Config::create_example(&config_path)?;
        println!("Edit the file and run: vlessgate --config {:?}", config_path);
        return Ok(());
    }

    init_logging(&args.log_level)?;

    info!("VlessGate v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = if let Some(config_path) = args.config {
        info!("Loading configuration from: {:?}", config_path);
        Config::from_file(config_path)?
    } else {
        info!("No configuration file specified, using defaults");
        Config::default()
    };

    // Environment variables beat the file; CLI flags beat both.
    config.apply_env_overrides();
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.server.bind_port = port;
    }

    let server = GatewayServer::new(config)?;

    let shutdown = tokio::spawn(async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down gracefully...");
    });

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                return Err(e);
            }
        }
        _ = shutdown => {
            info!("Server shutdown complete");
        }
    }

    server.shutdown();

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_new(level)
        .map_err(|e| vlessgate::GatewayError::Config(format!("Invalid log level: {e}")))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();

    Ok(())
}
