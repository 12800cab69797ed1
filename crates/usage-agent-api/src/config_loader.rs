//! Loads a [`ServiceConfig`] from a config file path using the layered
//! `config` crate builder (TOML primary, environment overrides under a
//! fixed prefix).

use crate::config::{ConfigError, ServiceConfig};
use std::path::Path;

const ENV_PREFIX: &str = "USAGE_AGENT";

/// Load and validate configuration from `path`.
///
/// The file format (TOML, YAML, or JSON) is inferred from its extension.
/// Environment variables prefixed `USAGE_AGENT__` override file values
/// using `__` as the nesting separator (e.g. `USAGE_AGENT__BUFFER_SECONDS`).
pub fn load(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"));

    let loaded = builder.build()?;
    let parsed: ServiceConfig = loaded.try_deserialize()?;
    parsed.validate()?;
    Ok(parsed)
}

#[cfg(test)]
#[path = "config_loader_tests.rs"]
mod tests;
