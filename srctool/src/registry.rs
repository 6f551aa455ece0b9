//! Local and remote views of the available plugins.
//!
//! A plugin counts as installed only when its directory holds a checksum
//! record. Directories matching `plugin-*` without one are reported as
//! corrupt and are never run or updated; removing them is the repair path.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::Serialize;
use tracing::debug;

use crate::catalog::Catalog;
use crate::error::{Result, SrctoolError};
use crate::platform::PluginName;
use crate::storage::Storage;
use crate::transfer::TransferClient;

/// A plugin directory found under the plugins root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plugin {
    pub name: PluginName,
    pub path: PathBuf,
    /// Digest of the archive this plugin was installed from.
    pub checksum: Option<String>,
}

impl Plugin {
    pub fn is_installed(&self) -> bool {
        self.checksum.is_some()
    }
}

/// Install state of a single plugin name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallState {
    Absent,
    Corrupt,
    Installed { checksum: String },
}

/// Read-only view of the plugins root.
#[derive(Debug, Clone)]
pub struct Registry {
    storage: Storage,
}

impl Registry {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Every `plugin-*` directory under the plugins root, sorted by name.
    pub fn scan(&self) -> Result<Vec<Plugin>> {
        let root = self.storage.parsers_dir();
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut plugins = Vec::new();
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let file_name = entry.file_name();
            let Some(name) = file_name.to_str().and_then(PluginName::from_artifact) else {
                debug!("skipping {}", entry.path().display());
                continue;
            };
            let checksum = self.read_checksum(&name)?;
            plugins.push(Plugin {
                path: entry.path(),
                name,
                checksum,
            });
        }

        plugins.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(plugins)
    }

    /// Plugins with a checksum record.
    pub fn installed(&self) -> Result<Vec<Plugin>> {
        Ok(self.scan()?.into_iter().filter(Plugin::is_installed).collect())
    }

    /// Plugin directories without a checksum record.
    pub fn corrupt(&self) -> Result<Vec<Plugin>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|plugin| !plugin.is_installed())
            .collect())
    }

    /// Names of the installed plugins.
    pub fn list_installed(&self) -> Result<BTreeSet<PluginName>> {
        Ok(self.installed()?.into_iter().map(|plugin| plugin.name).collect())
    }

    /// Names of the plugins the server publishes for the client's platform.
    pub async fn list_remote(&self, client: &TransferClient) -> Result<BTreeSet<PluginName>> {
        let text = client.fetch_catalog().await?;
        Ok(Catalog::parse(&text).plugins_for(client.platform()))
    }

    pub fn state(&self, name: &PluginName) -> Result<InstallState> {
        if !self.storage.plugin_dir(name).is_dir() {
            return Ok(InstallState::Absent);
        }
        Ok(match self.read_checksum(name)? {
            Some(checksum) => InstallState::Installed { checksum },
            None => InstallState::Corrupt,
        })
    }

    /// Recorded checksum of an installed plugin.
    ///
    /// # Errors
    ///
    /// [`SrctoolError::NotInstalled`] or [`SrctoolError::CorruptInstall`]
    /// when there is no valid install.
    pub fn local_checksum(&self, name: &PluginName) -> Result<String> {
        match self.state(name)? {
            InstallState::Installed { checksum } => Ok(checksum),
            InstallState::Absent => Err(SrctoolError::NotInstalled {
                name: name.to_string(),
            }),
            InstallState::Corrupt => Err(SrctoolError::CorruptInstall {
                name: name.to_string(),
                path: self.storage.plugin_dir(name),
            }),
        }
    }

    fn read_checksum(&self, name: &PluginName) -> Result<Option<String>> {
        let path = self.storage.checksum_path(name);
        match std::fs::read_to_string(&path) {
            Ok(content) if !content.trim().is_empty() => Ok(Some(content.trim().to_string())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                debug!("cannot read {}: {e}", path.display());
                Err(e.into())
            }
        }
    }
}
