//! Configuration parsing, environment overrides and validation.

pub mod env;
pub mod parser;
pub mod types;
pub mod validate;

pub use parser::load_config;
pub use types::*;

use crate::common::error::ConfigError;

/// Load the configuration file, apply environment overrides and validate it.
pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    for var in env::check_empty_env_vars() {
        tracing::warn!("Environment variable {} is set but empty", var);
    }

    let config = env::apply_env_overrides(load_config(path)?);
    validate::validate_config(&config)?;
    Ok(config)
}
