//! `dawpilot config`: show, locate or initialize the configuration.

use std::path::{Path, PathBuf};

use anyhow::Context;
use dawpilot_config::AppConfig;

use super::load_config;

pub fn run(config_path: Option<&Path>, init: bool, path_only: bool) -> anyhow::Result<()> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_path);

    if path_only {
        println!("{}", path.display());
        return Ok(());
    }

    if init {
        if write_default(&path)? {
            println!("Wrote default configuration to {}", path.display());
        } else {
            println!("Configuration already exists at {}", path.display());
        }
        return Ok(());
    }

    let config = load_config(config_path)?;
    println!("# {}", path.display());
    println!("{}", toml::to_string_pretty(&redacted(config))?);
    Ok(())
}

fn default_path() -> PathBuf {
    std::env::var("DAWPILOT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| AppConfig::config_dir().join("config.toml"))
}

/// Write the default file. Returns `false` when one already exists.
fn write_default(path: &Path) -> anyhow::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    std::fs::write(path, AppConfig::default_toml())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

fn redacted(mut config: AppConfig) -> AppConfig {
    let mask = |key: &mut Option<String>| {
        if key.is_some() {
            *key = Some("***".into());
        }
    };
    mask(&mut config.api_key);
    for provider in config.providers.values_mut() {
        mask(&mut provider.api_key);
    }
    config
}
