//! # Storage Layer
//!
//! Configuration and the on-disk artifact cache.
//!
//! ## Locations
//!
//! | Data | Format | Location |
//! |------|--------|----------|
//! | Config | TOML | `<config dir>/dcmview/config.toml` |
//! | Artifacts | PNG / MP4 | `<cache dir>/dcmview/<hash>.<ext>` |
//! | In-progress artifacts | PNG / MP4 | `<cache dir>/dcmview/<hash>.tmp.<ext>` |
//!
//! ## Concurrency Safety
//!
//! The cache directory is shared by every open view and every process.
//! It needs no locking: artifacts are written under their temp name and
//! published with an atomic rename, and readers only trust final paths.
//!
//! ## Key Types
//!
//! - [`Config`] - Effective configuration
//! - [`CacheStore`] - Capability used by the renderer to find and publish artifacts
//! - [`DiskCache`] - The directory-backed cache

mod cache;
mod config;

pub use cache::{identity, CacheEntry, CacheError, CacheStats, CacheStore, DiskCache};
pub use config::{
    CacheConfig, Config, ConfigError, ConversionConfig, DisplayConfig, FilterConfig,
    PlayerConfig, ToolsConfig,
};
