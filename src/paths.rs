//! XDG-compliant path resolution for leolani.

use std::path::PathBuf;

use crate::error::ConfigError;

/// Global XDG directories for leolani.
#[derive(Debug, Clone)]
pub struct LeolaniPaths {
    /// `$XDG_CONFIG_HOME/leolani/`
    pub config_dir: PathBuf,
    /// `$XDG_DATA_HOME/leolani/`
    pub data_dir: PathBuf,
}

impl LeolaniPaths {
    /// Resolve directories from environment variables with standard fallbacks.
    pub fn resolve() -> Result<Self, ConfigError> {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .map_err(|_| ConfigError::NoHome)?;

        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".config"))
            .join("leolani");

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".local/share"))
            .join("leolani");

        Ok(Self {
            config_dir,
            data_dir,
        })
    }

    /// Rooted at an explicit directory, for tests and portable installs.
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config_dir: root.join("config"),
            data_dir: root.join("data"),
        }
    }

    /// `leolani.toml` in the config directory.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("leolani.toml")
    }

    /// Default location of the durable friend store.
    pub fn friends_dir(&self) -> PathBuf {
        self.data_dir.join("friends")
    }
}
