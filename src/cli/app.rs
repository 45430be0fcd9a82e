//! Main CLI application structure

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use super::output::{Output, OutputFormat};
use super::{cache_cmd, config_cmd, view};
use crate::storage::Config;

#[derive(Parser)]
#[command(name = "dcmview")]
#[command(author, version, about = "Render DICOM metadata and thumbnails")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Enable verbose output for debugging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, env = "DCMVIEW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Maximum concurrent conversions
    #[arg(long, short = 'j', global = true)]
    pub jobs: Option<usize>,

    /// Seconds before a conversion is stopped (0 disables)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Render a file: attributes, directory records and thumbnails
    Show {
        /// DICOM file or DICOMDIR
        file: PathBuf,

        /// Print the document without waiting for conversions
        #[arg(long)]
        no_wait: bool,
    },

    /// Print the filtered attribute tree
    Tree {
        /// DICOM file or DICOMDIR
        file: PathBuf,
    },

    /// Play the preview of a multi-frame file
    Play {
        /// Multi-frame DICOM file
        file: PathBuf,
    },

    /// Manage the artifact cache
    #[command(subcommand)]
    Cache(cache_cmd::CacheCommands),

    /// Manage configuration
    #[command(subcommand)]
    Config(config_cmd::ConfigCommands),
}

impl Cli {
    /// Loads the configuration and applies command-line overrides
    fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;

        if let Some(jobs) = self.jobs {
            config.conversion.jobs = Some(jobs);
        }
        if let Some(timeout) = self.timeout {
            config.conversion.timeout_secs = timeout;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Log filter from `RUST_LOG`, or `warn` (`debug` with `--verbose`) when unset
fn log_filter(verbose: bool, env: Option<&str>) -> EnvFilter {
    let default = if verbose { "debug" } else { "warn" };
    match env.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => EnvFilter::try_new(value).unwrap_or_else(|_| EnvFilter::new(default)),
        None => EnvFilter::new(default),
    }
}

fn init_tracing(verbose: bool) {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();

    // Ignore failures: a subscriber may already be installed
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbose, env.as_deref()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Main entry point for the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(cli.format, cli.verbose);
    init_tracing(cli.verbose);

    output.verbose("dcmview starting");

    match &cli.command {
        Commands::Show { file, no_wait } => {
            let config = cli.load_config()?;
            output.verbose_ctx("show", &format!("Rendering {}", file.display()));
            view::show(&output, &config, file, !no_wait)?
        }

        Commands::Tree { file } => {
            let config = cli.load_config()?;
            view::tree(&output, &config, file)?
        }

        Commands::Play { file } => {
            let config = cli.load_config()?;
            view::play(&output, &config, file)?
        }

        Commands::Cache(cmd) => {
            let config = cli.load_config()?;
            cache_cmd::run(cmd, &config, &output)?
        }

        Commands::Config(cmd) => config_cmd::run(cmd, cli.config.as_deref(), &output, || {
            cli.load_config()
        })?,
    }

    output.verbose("Command completed successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn rust_log_takes_precedence() {
        assert_eq!(log_filter(false, Some("info")).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(log_filter(true, Some("error")).max_level_hint(), Some(LevelFilter::ERROR));
    }

    #[test]
    fn verbosity_sets_default_level() {
        assert_eq!(log_filter(false, None).max_level_hint(), Some(LevelFilter::WARN));
        assert_eq!(log_filter(true, None).max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(log_filter(false, Some("  ")).max_level_hint(), Some(LevelFilter::WARN));
    }
}
