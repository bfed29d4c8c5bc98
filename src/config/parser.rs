//! Configuration file parsing (HOCON format, so plain JSON works too).

use std::path::Path;

use crate::common::error::ConfigError;
use crate::config::types::Config;
use hocon::HoconLoader;

/// Load configuration from a HOCON file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(ConfigError::IoError {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
        });
    }

    HoconLoader::new()
        .load_file(path)
        .map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?
        .resolve()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
}

/// Load configuration from a HOCON string.
#[allow(dead_code)]
pub fn load_config_str(content: &str) -> Result<Config, ConfigError> {
    HoconLoader::new()
        .load_str(content)
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?
        .resolve()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
}
