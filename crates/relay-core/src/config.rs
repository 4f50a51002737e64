use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::de::DeserializeOwned;

use crate::error::{RelayError, Result};

/// Load a config type from a TOML file with environment overrides.
///
/// Checks in order: explicit `path` argument, then `default_path`. The
/// environment provider is always merged last so overrides win regardless of
/// whether the file exists.
pub fn load_config<T: DeserializeOwned>(
    path: Option<&str>,
    default_path: &str,
    env_prefix: &str,
) -> Result<T> {
    let path = path.unwrap_or(default_path);

    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(env_prefix).split("_"))
        .extract()
        .map_err(|e| RelayError::Config(e.to_string()))
}

/// Resolve `$HOME` (falling back to `.`) and join a relative suffix.
pub fn home_relative(suffix: &str) -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/{suffix}")
}

fn bool_true_value() -> bool {
    true
}

/// `#[serde(default = "relay_core::config::bool_true")]` helper for config
/// fields that should default to enabled.
pub fn bool_true() -> bool {
    bool_true_value()
}
