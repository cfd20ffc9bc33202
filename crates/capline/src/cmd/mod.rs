//! Command implementations for the capline CLI

pub mod frame;
pub mod serve;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use capline_config::Config;

/// Paths tried, in order, when no config file is given
const DEFAULT_CONFIG_PATHS: [&str; 2] = ["configs/capline.toml", "capline.toml"];

/// Configuration plus the file it came from, if any
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: Config,
    pub path: Option<PathBuf>,
}

/// Load configuration before logging is up
///
/// An explicit path must exist. Otherwise the default paths are tried and
/// built-in defaults are used if none exists.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        if !path.exists() {
            anyhow::bail!("config file not found: {}", path.display());
        }
        let config = Config::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;
        return Ok(LoadedConfig {
            config,
            path: Some(path.to_path_buf()),
        });
    }

    for candidate in DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from) {
        if candidate.exists() {
            let config = Config::from_file(&candidate).with_context(|| {
                format!("failed to load configuration from {}", candidate.display())
            })?;
            return Ok(LoadedConfig {
                config,
                path: Some(candidate),
            });
        }
    }

    Ok(LoadedConfig {
        config: Config::default(),
        path: None,
    })
}
