//! Config command - manage configuration files

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use ipcam_core::config::{sample_config, ConfigFile, InitOutcome};

/// Arguments for the config command
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the path to the config file
    Path,

    /// Show the effective configuration (password masked)
    Show,

    /// Generate a default config file
    Init {
        /// Force overwrite if file exists
        #[arg(short, long)]
        force: bool,
    },

    /// Print a sample configuration to stdout
    Sample,
}

/// Run config subcommand
pub async fn config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Path => {
            let path = ConfigFile::default_path();
            println!("{}", path.display());
            if !path.exists() {
                println!("(file does not exist)");
            } else {
                match ConfigFile::load_from(path).map(|config| config.camera) {
                    Ok(Some(camera)) => println!("(saved camera: {})", camera),
                    Ok(None) => println!("(no saved camera)"),
                    Err(e) => println!("(unreadable: {})", e),
                }
            }
        }
        ConfigCommand::Show => {
            let path = ConfigFile::default_path();
            if !path.exists() {
                println!("No configuration file found at: {}", path.display());
                println!();
                println!("Using default settings. Create a config file with:");
                println!("  ipcam config init");
                println!();
            } else {
                println!("Configuration file: {}\n", path.display());
            }

            let mut config = ConfigFile::load_from(path).context("Failed to load config file")?;
            config.capture_config().context("Invalid [capture] or [retry] settings")?;
            config.viewport_config().context("Invalid [viewport] settings")?;

            if let Some(camera) = config.camera.take() {
                let masked = "*".repeat(camera.password().chars().count());
                let username = camera.username().to_string();
                config.camera = Some(camera.with_credentials(username, masked));
            }
            let content =
                toml::to_string_pretty(&config).context("Failed to serialize configuration")?;
            println!("{}", content);
        }
        ConfigCommand::Init { force } => {
            let path = ConfigFile::default_path();
            match ConfigFile::init_at(&path, force).context("Failed to write config file")? {
                InitOutcome::Exists => {
                    println!("Configuration file already exists: {}", path.display());
                    println!();
                    println!("Use --force to overwrite, or edit the existing file.");
                }
                InitOutcome::Created => {
                    println!("Created configuration file: {}", path.display());
                    println!();
                    println!("Add a [camera] section, or run `ipcam view --host <ip> --remember`.");
                }
                InitOutcome::Replaced { kept_camera } => {
                    println!("Replaced configuration file: {}", path.display());
                    if kept_camera {
                        println!("The saved [camera] section was kept.");
                    }
                }
            }
        }
        ConfigCommand::Sample => {
            print!("{}", sample_config());
        }
    }

    Ok(())
}
