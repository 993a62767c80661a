//! vmnet-launch CLI entry point.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vmnet_launch::config::LauncherConfig;

mod cli;

/// vmnet-launch - run virtual machines on a vmnet network
#[derive(Parser, Debug)]
#[command(name = "vmnet-launch")]
#[command(about = "Run virtual machines connected through vmnet-helper")]
#[command(version)]
struct Cli {
    /// Configuration file (default: platform config directory).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a VM and supervise it until it exits.
    Start(cli::start::StartCmd),

    /// List host interfaces usable for bridged mode.
    Interfaces(cli::interfaces::InterfacesCmd),

    /// Print the guest address recorded for a VM.
    Address(cli::address::AddressCmd),

    /// Manage the launcher configuration.
    #[command(subcommand)]
    Config(cli::config::ConfigCmd),
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on RUST_LOG or default to info
    init_logging(cli.log_json);

    tracing::debug!(version = vmnet_launch::VERSION, "starting vmnet-launch");

    let path = match cli.config {
        Some(path) => path,
        None => match LauncherConfig::default_path() {
            Ok(path) => path,
            Err(e) => {
                tracing::error!(error = %e, "no config path");
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
    };

    // Load configuration
    let config = match LauncherConfig::load_from(&path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            LauncherConfig::default()
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Start(cmd) => cmd.run(&config),
        Commands::Interfaces(cmd) => cmd.run(&config),
        Commands::Address(cmd) => cmd.run(&config),
        Commands::Config(cmd) => cmd.run(&config, &path),
    };

    // Handle errors
    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber.
fn init_logging(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vmnet_launch=info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
