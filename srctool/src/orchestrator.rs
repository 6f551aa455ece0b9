//! Runs every installed plugin against a project and merges their output.
//!
//! Each plugin runs as its own subprocess, `<plugin-dir>/parser <project>`,
//! in its own task. All tasks share a cancellation token: the first plugin
//! that exits unsuccessfully or prints nothing cancels the others, which
//! kill and reap their subprocesses before the error is returned.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SrctoolError};
use crate::model::ProjectModel;
use crate::platform::PluginName;
use crate::registry::Registry;

/// One plugin run against one project.
#[derive(Debug, Clone)]
pub struct ParseJob {
    pub plugin: PluginName,
    pub executable: PathBuf,
    pub project: PathBuf,
}

/// Captured output of a successful [`ParseJob`].
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub plugin: PluginName,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Parse-time engine. Only reads the plugins root.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: Registry,
}

impl Orchestrator {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Run every installed plugin on `project` and merge their models.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No plugin is installed
    /// - Any plugin exits unsuccessfully or writes nothing to stdout
    /// - The parsed models cannot be merged
    ///
    /// A plugin whose output cannot be parsed is reported and left out of
    /// the merge.
    pub async fn parse<M: ProjectModel>(&self, project: &Path) -> Result<M> {
        for plugin in self.registry.corrupt()? {
            warn!(
                "skipping corrupt plugin {} ({})",
                plugin.name,
                plugin.path.display()
            );
        }

        let plugins = self.registry.installed()?;
        if plugins.is_empty() {
            return Err(SrctoolError::NoPluginsInstalled);
        }

        let cancel = CancellationToken::new();
        let mut units = JoinSet::new();
        for plugin in plugins {
            let job = ParseJob {
                executable: self.registry.storage().executable_path(&plugin.name),
                plugin: plugin.name,
                project: project.to_path_buf(),
            };
            units.spawn(job.run(cancel.clone()));
        }

        let mut models: Vec<(PluginName, M)> = Vec::new();
        let mut fatal: Option<SrctoolError> = None;

        while let Some(joined) = units.join_next().await {
            let outcome = joined.unwrap_or_else(|e| {
                Err(SrctoolError::Subprocess {
                    plugin: "unknown".to_string(),
                    reason: format!("plugin task failed: {e}"),
                })
            });

            match outcome {
                Ok(Some(output)) => {
                    if !output.stderr.is_empty() {
                        warn!(
                            "plugin {} errors:\n{}",
                            output.plugin,
                            String::from_utf8_lossy(&output.stderr).trim_end()
                        );
                    }
                    match M::parse(&output.stdout) {
                        Ok(model) => models.push((output.plugin, model)),
                        Err(e) => error!("ignoring output of plugin {}: {e}", output.plugin),
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    if fatal.is_none() {
                        cancel.cancel();
                        fatal = Some(e);
                    } else {
                        debug!("{e}");
                    }
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        info!("merging {} plugin output(s)", models.len());
        models.sort_by(|a, b| a.0.cmp(&b.0));
        M::merge_all(models.into_iter().map(|(_, model)| model).collect())
    }
}

impl ParseJob {
    /// Run the plugin to completion, or until `cancel` fires.
    ///
    /// Returns `Ok(None)` when cancelled; the subprocess is killed and
    /// reaped before returning.
    pub async fn run(self, cancel: CancellationToken) -> Result<Option<JobOutput>> {
        let mut command = Command::new(&self.executable);
        command
            .arg(&self.project)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            "command: {} {}",
            self.executable.display(),
            self.project.display()
        );

        let mut child = command.spawn().map_err(|e| self.failure(format!("cannot start: {e}")))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let finished = tokio::select! {
            result = collect(&mut child, stdout, stderr) => Some(result),
            () = cancel.cancelled() => None,
        };

        let Some(result) = finished else {
            debug!("plugin {} cancelled", self.plugin);
            if let Err(e) = child.kill().await {
                debug!("cannot kill plugin {}: {e}", self.plugin);
            }
            return Ok(None);
        };

        let (status, stdout, stderr) =
            result.map_err(|e| self.failure(format!("cannot collect output: {e}")))?;

        if !status.success() {
            debug!(
                "plugin {} stderr: {}",
                self.plugin,
                String::from_utf8_lossy(&stderr)
            );
            return Err(self.failure(format!("exited with {status}")));
        }
        if stdout.is_empty() {
            return Err(self.failure("did not produce any output".to_string()));
        }

        Ok(Some(JobOutput {
            plugin: self.plugin,
            stdout,
            stderr,
        }))
    }

    fn failure(&self, reason: String) -> SrctoolError {
        SrctoolError::Subprocess {
            plugin: self.plugin.to_string(),
            reason,
        }
    }
}

async fn collect(
    child: &mut Child,
    stdout: Option<impl AsyncRead + Unpin>,
    stderr: Option<impl AsyncRead + Unpin>,
) -> std::io::Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
    tokio::try_join!(child.wait(), read_pipe(stdout), read_pipe(stderr))
}

async fn read_pipe(pipe: Option<impl AsyncRead + Unpin>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}
