use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Prefix for environment overrides. Nested keys are separated by `__`, so
/// `MEDIAFLOW_QUEUE__MAX_RETRIES=5` sets `queue.max_retries`.
const ENV_PREFIX: &str = "MEDIAFLOW_";

fn with_env(figment: Figment) -> Figment {
    figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
}

fn extract(figment: Figment) -> Result<Config, ConfigError> {
    figment
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Load configuration from a TOML file, then apply environment overrides.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    extract(with_env(Figment::from(Toml::file(path))))
}

/// Load configuration from a TOML string. Environment overrides are not
/// applied.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    extract(Figment::from(Toml::string(toml_str)))
}
