mod identity;
mod server;

pub use identity::{DEFAULT_CONSORTIUM_ROLE, IdentityConfig, TokenEntry};
pub use server::{DEFAULT_MAX_UPLOAD_BYTES, ServerConfig};

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Contents of `trove.toml`. Every field has a default, so an empty file is a
/// valid configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub identity: IdentityConfig,
}

impl Config {
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&contents)
    }
}
