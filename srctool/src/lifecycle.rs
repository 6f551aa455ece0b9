//! Plugin download, verification, installation and removal.
//!
//! Every new version is staged first: the archive is downloaded and
//! verified into a hidden directory under the plugins root, extracted
//! there, and given its checksum record. Only then is the plugin directory
//! renamed into place. A crash at any earlier point leaves a stray staging
//! directory behind, never a half-installed plugin.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tempfile::TempDir;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SrctoolError};
use crate::platform::PluginName;
use crate::registry::{InstallState, Plugin, Registry};
use crate::storage::{CHECKSUM_FILE_NAME, PLUGIN_EXECUTABLE};
use crate::transfer::TransferClient;

/// Prefix of the staging directories created under the plugins root.
const STAGING_PREFIX: &str = ".staging-";

/// Result of an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// Local and remote checksums are equal; nothing was touched.
    UpToDate,
    /// A new version replaced the previous one.
    Updated { previous: String, current: String },
}

/// Result of an uninstall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "path", rename_all = "snake_case")]
pub enum UninstallOutcome {
    Removed(PathBuf),
    /// Dry mode: the directory that would have been removed.
    DryRun(PathBuf),
}

/// Per-plugin outcomes of a bulk operation.
#[derive(Debug)]
pub struct BatchReport<T> {
    pub succeeded: Vec<(PluginName, T)>,
    pub failed: Vec<(PluginName, SrctoolError)>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<T> BatchReport<T> {
    fn record(&mut self, name: PluginName, result: Result<T>) {
        match result {
            Ok(value) => self.succeeded.push((name, value)),
            Err(e) => {
                warn!("{name}: {e}");
                self.failed.push((name, e));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.succeeded.is_empty() && self.failed.is_empty()
    }
}

/// A verified and extracted plugin waiting to be moved into place.
struct StagedPlugin {
    dir: TempDir,
    plugin_dir: PathBuf,
    checksum: String,
}

/// Sole writer of the plugins root.
///
/// Operations on the same plugin name are serialized by an in-process
/// lock; operations on different names may run concurrently.
#[derive(Debug)]
pub struct LifecycleManager {
    registry: Registry,
    client: TransferClient,
    locks: Mutex<HashMap<PluginName, Arc<Mutex<()>>>>,
}

impl LifecycleManager {
    pub fn new(registry: Registry, client: TransferClient) -> Self {
        Self {
            registry,
            client,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn client(&self) -> &TransferClient {
        &self.client
    }

    /// Install a plugin.
    ///
    /// # Process
    ///
    /// 1. Refuse if a valid or corrupt install already exists
    /// 2. Download the archive and verify its checksum
    /// 3. Extract into a staging directory and write the checksum record
    /// 4. Rename the staged plugin directory into place
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The plugin is already installed, or its directory is corrupt
    /// - Download, verification or extraction fails
    pub async fn install(&self, name: &PluginName) -> Result<Plugin> {
        let _guard = self.lock(name).await;

        match self.registry.state(name)? {
            InstallState::Absent => {}
            InstallState::Installed { .. } => {
                return Err(SrctoolError::AlreadyInstalled {
                    name: name.to_string(),
                });
            }
            InstallState::Corrupt => {
                return Err(SrctoolError::CorruptInstall {
                    name: name.to_string(),
                    path: self.plugin_dir(name),
                });
            }
        }

        let staged = self.stage(name).await?;
        let target = self.plugin_dir(name);
        tokio::fs::rename(&staged.plugin_dir, &target).await?;

        info!("{name} successfully installed");
        Ok(Plugin {
            name: name.clone(),
            path: target,
            checksum: Some(staged.checksum),
        })
    }

    /// Remove a plugin directory. Corrupt installs can be removed too.
    ///
    /// In dry mode the directory is only reported.
    pub async fn uninstall(&self, name: &PluginName, dry: bool) -> Result<UninstallOutcome> {
        let _guard = self.lock(name).await;

        let path = self.plugin_dir(name);
        if !path.is_dir() {
            debug!("{} does not exist", path.display());
            return Err(SrctoolError::NotInstalled {
                name: name.to_string(),
            });
        }

        if dry {
            return Ok(UninstallOutcome::DryRun(path));
        }

        debug!("removing {}", path.display());
        tokio::fs::remove_dir_all(&path).await?;

        info!("{name} successfully removed");
        Ok(UninstallOutcome::Removed(path))
    }

    /// Bring an installed plugin to the version the server publishes.
    ///
    /// Equal checksums are a no-op. Otherwise the new version is fully
    /// staged before the old one is touched, and the old one is restored
    /// if the swap fails.
    pub async fn update(&self, name: &PluginName) -> Result<UpdateOutcome> {
        let _guard = self.lock(name).await;

        let local = self.registry.local_checksum(name)?;
        let remote = self.client.fetch_checksum(name).await?;
        if local.eq_ignore_ascii_case(remote.trim()) {
            info!("{name}: latest version already installed");
            return Ok(UpdateOutcome::UpToDate);
        }

        info!("updating {name}");
        let staged = self.stage(name).await?;
        let target = self.plugin_dir(name);
        let previous_dir = staged.dir.path().join("previous");

        tokio::fs::rename(&target, &previous_dir).await?;
        if let Err(e) = tokio::fs::rename(&staged.plugin_dir, &target).await {
            warn!("{name}: swap failed, restoring previous version");
            restore_previous(staged.dir, &previous_dir, &target).await?;
            return Err(e.into());
        }

        info!("{name} successfully updated");
        Ok(UpdateOutcome::Updated {
            previous: local,
            current: staged.checksum,
        })
    }

    /// Install every remote plugin that is not installed yet.
    ///
    /// Only a failure to list the remote plugins is returned as an error;
    /// per-plugin failures are collected in the report.
    pub async fn install_all(&self) -> Result<BatchReport<Plugin>> {
        let remote = self.registry.list_remote(&self.client).await?;
        let installed = self.registry.list_installed()?;

        let mut report = BatchReport::default();
        for name in remote.difference(&installed) {
            report.record(name.clone(), self.install(name).await);
        }
        Ok(report)
    }

    /// Update every installed plugin.
    pub async fn update_all(&self) -> Result<BatchReport<UpdateOutcome>> {
        let mut report = BatchReport::default();
        for plugin in self.registry.installed()? {
            let result = self.update(&plugin.name).await;
            report.record(plugin.name, result);
        }
        Ok(report)
    }

    /// Remove every plugin directory, installed or corrupt.
    pub async fn uninstall_all(&self, dry: bool) -> Result<BatchReport<UninstallOutcome>> {
        let mut report = BatchReport::default();
        for plugin in self.registry.scan()? {
            let result = self.uninstall(&plugin.name, dry).await;
            report.record(plugin.name, result);
        }
        Ok(report)
    }

    fn plugin_dir(&self, name: &PluginName) -> PathBuf {
        self.registry.storage().plugin_dir(name)
    }

    async fn lock(&self, name: &PluginName) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(name.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Download, verify and extract a plugin next to the plugins root.
    async fn stage(&self, name: &PluginName) -> Result<StagedPlugin> {
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(self.registry.storage().parsers_dir())?;

        let archive = self.client.download(name, dir.path()).await?;

        let extract_root = dir.path().join("extract");
        std::fs::create_dir_all(&extract_root)?;
        extract_archive(&archive.path, &extract_root)?;

        let plugin_dir = extract_root.join(name.artifact());
        if !plugin_dir.is_dir() {
            return Err(SrctoolError::extraction(
                &archive.path,
                format!("archive has no {}/ directory", name.artifact()),
            ));
        }

        let executable = plugin_dir.join(PLUGIN_EXECUTABLE);
        if !executable.is_file() {
            return Err(SrctoolError::extraction(
                &archive.path,
                format!("archive has no {}/{PLUGIN_EXECUTABLE}", name.artifact()),
            ));
        }
        make_executable(&executable)?;

        // The record is written last: its presence marks a complete install.
        std::fs::write(plugin_dir.join(CHECKSUM_FILE_NAME), &archive.digest)?;

        Ok(StagedPlugin {
            dir,
            plugin_dir,
            checksum: archive.digest,
        })
    }
}

/// Move a set-aside install back into place. If that fails the staging
/// directory is kept so the previous version is not lost with it.
async fn restore_previous(staging: TempDir, previous: &Path, target: &Path) -> Result<()> {
    if let Err(e) = tokio::fs::rename(previous, target).await {
        let kept = staging.keep();
        error!(
            "cannot restore {}, previous version left in {}",
            target.display(),
            kept.join("previous").display()
        );
        return Err(e.into());
    }
    Ok(())
}

fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(archive)?;
    let mut zip =
        zip::ZipArchive::new(file).map_err(|e| SrctoolError::extraction(archive, e))?;
    zip.extract(dest)
        .map_err(|e| SrctoolError::extraction(archive, e))?;
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
