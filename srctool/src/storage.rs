//! XDG-compliant storage: configuration file and on-disk plugin layout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SrctoolError};
use crate::platform::PluginName;

/// Name of the configuration file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "srctool.conf";

/// Directory of the data dir holding installed plugins.
pub const PARSERS_FOLDER: &str = "parsers";

/// Checksum record written into every installed plugin directory.
pub const CHECKSUM_FILE_NAME: &str = "MD5SUM";

/// Executable every plugin ships at the root of its directory.
pub const PLUGIN_EXECUTABLE: &str = "parser";

/// Manages the srctool directories.
///
/// - Config: `~/.config/srctool/srctool.conf`
/// - Data: `~/.local/share/srctool/parsers/plugin-<name>/`
#[derive(Debug, Clone)]
pub struct Storage {
    config_dir: PathBuf,
    data_dir: PathBuf,
}

/// User configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Config {
    /// Root URL of the plugin download server.
    pub download_server_url: String,

    /// Upper bound for every HTTP request, in seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

const fn default_http_timeout_secs() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_server_url: "http://dl.devmine.ch/parsers".to_string(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl Config {
    /// Parse and validate a configuration document.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(content).map_err(|e| {
            debug!("config: {e}");
            SrctoolError::Config {
                reason: format!("malformed configuration file: {e}"),
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the server URL is usable.
    pub fn validate(&self) -> Result<()> {
        self.server_url()?;
        if self.http_timeout_secs == 0 {
            return Err(SrctoolError::Config {
                reason: "http_timeout_secs must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// The download server URL, parsed.
    pub fn server_url(&self) -> Result<Url> {
        let url = Url::parse(&self.download_server_url).map_err(|e| SrctoolError::Config {
            reason: format!("invalid download server URL '{}': {e}", self.download_server_url),
        })?;
        if url.cannot_be_a_base() {
            return Err(SrctoolError::Config {
                reason: format!("download server URL '{url}' cannot be a base URL"),
            });
        }
        Ok(url)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Storage {
    /// Create a storage handle on the default XDG directories, creating
    /// them if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - XDG directories cannot be determined
    /// - Directory creation fails
    pub fn new() -> Result<Self> {
        Self::with_overrides(None, None)
    }

    /// Like [`Storage::new`], but either directory may be replaced.
    pub fn with_overrides(config_dir: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<Self> {
        if let (Some(config_dir), Some(data_dir)) = (&config_dir, &data_dir) {
            return Self::at(config_dir, data_dir);
        }

        let proj_dirs = directories::ProjectDirs::from("", "", "srctool").ok_or_else(|| {
            SrctoolError::Directories {
                message: "could not determine XDG directories".to_string(),
            }
        })?;

        Self::at(
            config_dir.unwrap_or_else(|| proj_dirs.config_dir().to_path_buf()),
            data_dir.unwrap_or_else(|| proj_dirs.data_dir().to_path_buf()),
        )
    }

    /// Create a storage handle on explicit directories, creating them if
    /// needed.
    pub fn at(config_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Result<Self> {
        let storage = Self {
            config_dir: config_dir.into(),
            data_dir: data_dir.into(),
        };

        for dir in [storage.config_dir.clone(), storage.parsers_dir()] {
            if !dir.exists() {
                info!("creating {}", dir.display());
                std::fs::create_dir_all(&dir)?;
            }
        }

        Ok(storage)
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    /// Root directory of installed plugins.
    pub fn parsers_dir(&self) -> PathBuf {
        self.data_dir.join(PARSERS_FOLDER)
    }

    /// Install directory of a plugin.
    pub fn plugin_dir(&self, name: &PluginName) -> PathBuf {
        self.parsers_dir().join(name.artifact())
    }

    /// Checksum record of a plugin.
    pub fn checksum_path(&self, name: &PluginName) -> PathBuf {
        self.plugin_dir(name).join(CHECKSUM_FILE_NAME)
    }

    /// Executable of a plugin.
    pub fn executable_path(&self, name: &PluginName) -> PathBuf {
        self.plugin_dir(name).join(PLUGIN_EXECUTABLE)
    }

    /// Load the configuration, writing the default file first if none
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or created.
    pub fn load_config(&self) -> Result<Config> {
        let path = self.config_path();
        if !path.exists() {
            info!("creating default configuration at {}", path.display());
            let config = Config::default();
            self.save_config(&config)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&path).map_err(|e| {
            debug!("config: {e}");
            SrctoolError::Config {
                reason: format!("cannot read configuration file {}", path.display()),
            }
        })?;
        Config::parse(&content)
    }

    /// Save the configuration.
    pub fn save_config(&self, config: &Config) -> Result<()> {
        config.validate()?;
        let content = serde_json::to_string_pretty(config).map_err(|e| SrctoolError::Config {
            reason: format!("unable to serialize configuration: {e}"),
        })?;
        std::fs::write(self.config_path(), content)?;
        Ok(())
    }
}
