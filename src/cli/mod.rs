//! # Command-Line Interface
//!
//! User-facing CLI commands and output formatting.
//!
//! ## Commands
//!
//! | Command | Purpose |
//! |---------|---------|
//! | `show <file>` | Render attributes, records and thumbnails |
//! | `tree <file>` | Print the filtered attribute tree |
//! | `play <file>` | Convert and play a multi-frame preview |
//! | `cache status`, `cache clear` | Inspect or empty the artifact cache |
//! | `config show`, `config path`, `config init` | Inspect or create the config file |
//!
//! ## Output Formats
//!
//! All commands support `--format` flag:
//! - `text` (default) - Human-readable output
//! - `json` - Machine-parseable JSON
//!
//! ## Verbose Mode
//!
//! Use `--verbose` (or `-v`) for progress messages and debug logging:
//! ```bash
//! dcmview --verbose show DICOMDIR
//! ```
//!
//! ## Entry Point
//!
//! Call [`run()`] to parse arguments and execute the appropriate command.

mod app;
mod cache_cmd;
mod config_cmd;
mod output;
mod view;

pub use app::{run, Cli, Commands};
pub use output::{Output, OutputFormat};
