pub mod chat;
pub mod config_cmd;
pub mod serve;
pub mod tools;

use std::path::Path;

use anyhow::Context;
use dawpilot_config::AppConfig;

/// Load configuration from `--config` when given, else the default search
/// path. Environment overrides apply either way.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_with_env(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => AppConfig::load().context("failed to load config"),
    }
}
