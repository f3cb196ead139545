//! ipcam CLI
//!
//! Resilient RTSP IP-camera viewer.
//!
//! # Usage
//!
//! ```bash
//! # Watch a camera, reconnecting as needed
//! ipcam view --host 192.168.1.64 --user admin --password secret --path /stream1
//!
//! # Save what a 3x zoom on the top-left corner shows
//! ipcam snapshot --host 192.168.1.64 --zoom 3 --center 0.25,0.25
//!
//! # Try the viewer without a camera
//! ipcam view --test-pattern
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// ipcam - resilient RTSP IP-camera viewer
#[derive(Parser)]
#[command(name = "ipcam")]
#[command(author = "GhostKellz")]
#[command(version)]
#[command(about = "Resilient RTSP IP-camera viewer", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a camera and report status until Ctrl+C
    #[command(alias = "watch")]
    View(commands::ViewArgs),

    /// Connect, grab one frame and save it as an image
    Snapshot(commands::SnapshotArgs),

    /// Manage the configuration file
    Config(commands::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(format!("ipcam={}", level).parse()?),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::View(args) => commands::view(args).await?,
        Commands::Snapshot(args) => commands::snapshot(args).await?,
        Commands::Config(args) => commands::config(args).await?,
    }

    Ok(())
}
