//! CLI argument definitions for the catalog retriever service.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::{Path, PathBuf};

/// Environment variable naming the base configuration file.
pub const CONFIG_ENV: &str = "CATALOG_CONFIG";

/// Environment variable naming an override file, relative to the base file.
pub const OVERRIDE_ENV: &str = "CONFIG_OVERRIDE";

/// Multimodal product catalog retrieval service.
#[derive(Parser, Debug)]
#[command(name = "catalog", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Catalog CSV used to populate empty collections.
    #[arg(short = 'd', long = "data-source")]
    pub data_source: Option<PathBuf>,

    /// Serve from whatever the collections already hold.
    #[arg(long = "skip-import")]
    pub skip_import: bool,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > CATALOG_CONFIG env var > ./config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        resolve_config_path(self.config.as_deref(), std::env::var(CONFIG_ENV).ok())
    }

    /// Resolve the override file from CONFIG_OVERRIDE, next to the base file.
    pub fn resolve_override_path(&self, base: &Path) -> Option<PathBuf> {
        resolve_override_path(base, std::env::var(OVERRIDE_ENV).ok())
    }
}

fn resolve_config_path(flag: Option<&Path>, env: Option<String>) -> PathBuf {
    if let Some(p) = flag {
        return p.to_path_buf();
    }
    match env {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => PathBuf::from("config.toml"),
    }
}

fn resolve_override_path(base: &Path, env: Option<String>) -> Option<PathBuf> {
    let name = env.filter(|v| !v.trim().is_empty())?;
    let dir = base.parent().unwrap_or_else(|| Path::new(""));
    Some(dir.join(name))
}
