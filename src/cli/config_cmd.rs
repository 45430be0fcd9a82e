//! Configuration CLI commands

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;

use super::output::Output;
use crate::storage::Config;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Print the configuration file location
    Path,

    /// Write a configuration file with the defaults
    Init,
}

pub fn run(
    cmd: &ConfigCommands,
    explicit: Option<&Path>,
    output: &Output,
    load: impl FnOnce() -> Result<Config>,
) -> Result<()> {
    match cmd {
        ConfigCommands::Show => show(&load()?, output),
        ConfigCommands::Path => path(&config_path(explicit)?, output),
        ConfigCommands::Init => init(&config_path(explicit)?, output),
    }
}

fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => Config::default_path().context("Could not determine config directory"),
    }
}

fn show(config: &Config, output: &Output) -> Result<()> {
    if output.is_json() {
        output.data(config);
    } else {
        let text = toml::to_string_pretty(config).context("Failed to serialize config")?;
        print!("{}", text);
    }
    Ok(())
}

fn path(path: &Path, output: &Output) -> Result<()> {
    if output.is_json() {
        output.data(&serde_json::json!({
            "path": path.display().to_string(),
            "exists": path.exists(),
        }));
    } else {
        println!("{}", path.display());
    }
    Ok(())
}

fn init(path: &Path, output: &Output) -> Result<()> {
    if path.exists() {
        anyhow::bail!("Config file already exists: {}", path.display());
    }

    Config::default().save(path)?;
    output.success(&format!("Wrote default configuration to {}", path.display()));
    Ok(())
}
