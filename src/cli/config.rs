//! Configuration CLI commands.

use clap::{Args, Subcommand};
use std::path::Path;
use vmnet_launch::{Error, LauncherConfig, Result};

/// Configuration commands
#[derive(Subcommand, Debug)]
pub enum ConfigCmd {
    /// Show the effective configuration
    Show(ShowCmd),

    /// Print the configuration file path
    Path,

    /// Write the effective configuration to the configuration file
    Init(InitCmd),
}

impl ConfigCmd {
    pub fn run(self, config: &LauncherConfig, path: &Path) -> Result<()> {
        match self {
            ConfigCmd::Show(cmd) => cmd.run(config, path),
            ConfigCmd::Path => {
                println!("{}", path.display());
                Ok(())
            }
            ConfigCmd::Init(cmd) => cmd.run(config, path),
        }
    }
}

/// Show the effective configuration
#[derive(Args, Debug)]
pub struct ShowCmd {
    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ShowCmd {
    pub fn run(self, config: &LauncherConfig, path: &Path) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(config)?);
            return Ok(());
        }

        let status = if path.exists() {
            "loaded"
        } else {
            "not found, using defaults"
        };
        println!("# {} ({})", path.display(), status);
        let data = toml::to_string_pretty(config).map_err(|e| Error::ConfigSave(e.to_string()))?;
        print!("{}", data);
        Ok(())
    }
}

/// Write the effective configuration to the configuration file
#[derive(Args, Debug)]
pub struct InitCmd {
    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

impl InitCmd {
    pub fn run(self, config: &LauncherConfig, path: &Path) -> Result<()> {
        if path.exists() && !self.force {
            return Err(Error::ConfigSave(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            )));
        }
        config.save_to(path)?;
        println!("Wrote {}", path.display());
        Ok(())
    }
}
