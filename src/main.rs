//! MQTT Logger Service - Main Entry Point
//!
//! Subscribes to a topic filter and logs every received message until
//! SIGINT or SIGTERM arrives.

use clap::{Parser, Subcommand};
use mqtt_logger::config::{LoggerConfig, DEFAULT_CONFIG_PATHS};
use mqtt_logger::observability::init_logging;
use mqtt_logger::{LoggerService, ServiceError, ServiceResult, ShutdownCoordinator, ShutdownFlag};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{error, info, Level};

/// Long-running MQTT subscriber that logs every received message
#[derive(Parser)]
#[command(name = "mqtt-logger")]
#[command(about = "Subscribe to an MQTT topic filter and log every message")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "MQTT_LOGGER_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the logger service (default)
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration with secrets masked
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logging depends on the config, so failures here go to stderr
    let (config, source) = match load_configuration(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            process::exit(1);
        }
    };

    if let Some(Commands::Config { show }) = cli.command {
        process::exit(handle_config_command(&config, show));
    }

    let guard = match init_logging(&config.logging, verbosity_level(cli.verbose)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", ServiceError::Logging(e));
            process::exit(1);
        }
    };

    info!("Starting MQTT Logger Service");
    match &source {
        Some(path) => info!("Loaded configuration from: {}", path.display()),
        None => info!("No configuration file found, using defaults"),
    }

    let exit_code = match run_service(config).await {
        Ok(()) => 0,
        Err(e) => {
            error!("Service failed: {}", e);
            1
        }
    };

    // process::exit skips destructors; flush the file writer first
    drop(guard);
    process::exit(exit_code);
}

fn load_configuration(
    config_path: Option<&Path>,
) -> Result<(LoggerConfig, Option<PathBuf>), ServiceError> {
    let (config, source) = match config_path {
        Some(path) => (LoggerConfig::load_from_file(path)?, Some(path.to_path_buf())),
        None => LoggerConfig::load_first_existing(DEFAULT_CONFIG_PATHS)?,
    };

    config.validate()?;
    Ok((config, source))
}

fn verbosity_level(verbose: u8) -> Option<Level> {
    match verbose {
        0 => None,
        1 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    }
}

fn handle_config_command(config: &LoggerConfig, show: bool) -> i32 {
    if !show {
        println!("Configuration is valid");
        return 0;
    }

    match config.to_redacted_toml() {
        Ok(rendered) => {
            println!("{rendered}");
            0
        }
        Err(e) => {
            eprintln!("Failed to render configuration: {e}");
            1
        }
    }
}

async fn run_service(config: LoggerConfig) -> ServiceResult<()> {
    let shutdown = ShutdownFlag::new();
    let _signals = ShutdownCoordinator::new(shutdown.clone())
        .install()
        .map_err(ServiceError::Signal)?;

    if let Some(credentials) = &config.broker_endpoint().credentials {
        info!("Using authentication for user: {}", credentials.username);
    }

    let mut service = LoggerService::from_config(&config, shutdown);
    service.run().await
}
