//! Command line surface and command handlers.

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use tracing::{info, warn};

use crate::catalog;
use crate::error::{Result, SrctoolError};
use crate::lifecycle::{BatchReport, LifecycleManager, UninstallOutcome, UpdateOutcome};
use crate::model::{JsonProject, ProjectModel};
use crate::orchestrator::Orchestrator;
use crate::platform::{Platform, PluginName};
use crate::registry::Registry;
use crate::storage::Storage;
use crate::transfer::TransferClient;

/// Tool for parsing source code with language parsers.
#[derive(Parser, Debug, Clone)]
#[command(name = "srctool", version, about, long_about = None)]
pub struct Cli {
    /// Enable debug mode
    #[arg(short = 'd', long = "debug", global = true)]
    pub debug: bool,

    /// Override the configuration directory
    #[arg(long, global = true, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Override the data directory holding the parsers
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Install a language parser (default: every remote parser)
    #[command(visible_alias = "i")]
    Install { name: Option<PluginName> },

    /// Uninstall a language parser (default: every parser)
    #[command(visible_alias = "u")]
    Uninstall {
        name: Option<PluginName>,

        /// Only show what would be removed
        #[arg(long)]
        dry: bool,

        /// Skip confirmation prompts
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Update a language parser (default: every installed parser)
    Update { name: Option<PluginName> },

    /// List installed parsers
    #[command(visible_alias = "l")]
    List {
        /// List remotely available parsers instead
        #[arg(short = 'r', long = "remote")]
        remote: bool,
    },

    /// Run every installed parser on a project and print the merged JSON
    #[command(visible_alias = "p")]
    Parse { project_path: PathBuf },

    /// Show the configuration, or get/set the download server URL
    #[command(visible_alias = "c")]
    Config {
        #[arg(long = "server-url", value_name = "URL", num_args = 0..=1)]
        server_url: Option<Option<String>>,
    },

    /// Print an MD5SUMS catalog for the archives under a directory
    Checksums {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
}

/// Execute a parsed command line.
pub async fn execute(cli: Cli) -> Result<()> {
    let storage = Storage::with_overrides(cli.config_dir, cli.data_dir)?;

    match cli.command {
        Command::Install { name } => handle_install(&lifecycle(&storage)?, name).await,
        Command::Uninstall { name, dry, yes } => {
            handle_uninstall(&lifecycle(&storage)?, name, dry, yes).await
        }
        Command::Update { name } => handle_update(&lifecycle(&storage)?, name).await,
        Command::List { remote } => handle_list(&storage, remote).await,
        Command::Parse { project_path } => handle_parse(storage, project_path).await,
        Command::Config { server_url } => handle_config(&storage, server_url),
        Command::Checksums { dir } => {
            print!("{}", catalog::render(&dir)?);
            Ok(())
        }
    }
}

fn lifecycle(storage: &Storage) -> Result<LifecycleManager> {
    Ok(LifecycleManager::new(
        Registry::new(storage.clone()),
        client(storage)?,
    ))
}

fn client(storage: &Storage) -> Result<TransferClient> {
    let config = storage.load_config()?;
    TransferClient::new(&config.server_url()?, Platform::detect(), config.http_timeout())
}

async fn handle_install(manager: &LifecycleManager, name: Option<PluginName>) -> Result<()> {
    let Some(name) = name else {
        let report = manager.install_all().await?;
        if report.is_empty() {
            info!("every available parser is already installed");
        }
        summarize("installed", &report);
        return Ok(());
    };

    manager.install(&name).await?;
    Ok(())
}

async fn handle_uninstall(
    manager: &LifecycleManager,
    name: Option<PluginName>,
    dry: bool,
    yes: bool,
) -> Result<()> {
    let Some(name) = name else {
        if !dry && !yes && is_tty() && !confirm("Uninstall every parser?")? {
            eprintln!("Uninstall cancelled");
            return Ok(());
        }
        let report = manager.uninstall_all(dry).await?;
        for (_, outcome) in &report.succeeded {
            print_uninstall(outcome);
        }
        summarize("uninstalled", &report);
        return Ok(());
    };

    let outcome = manager.uninstall(&name, dry).await?;
    print_uninstall(&outcome);
    Ok(())
}

fn print_uninstall(outcome: &UninstallOutcome) {
    if let UninstallOutcome::DryRun(path) = outcome {
        println!("would remove {}", path.display());
    }
}

async fn handle_update(manager: &LifecycleManager, name: Option<PluginName>) -> Result<()> {
    let Some(name) = name else {
        let report = manager.update_all().await?;
        let updated = report
            .succeeded
            .iter()
            .filter(|(_, outcome)| matches!(outcome, UpdateOutcome::Updated { .. }))
            .count();
        info!("{updated} parser(s) updated");
        summarize("checked", &report);
        return Ok(());
    };

    manager.update(&name).await?;
    Ok(())
}

async fn handle_list(storage: &Storage, remote: bool) -> Result<()> {
    let registry = Registry::new(storage.clone());

    if remote {
        let client = client(storage)?;
        let available = registry.list_remote(&client).await?;
        let installed = registry.list_installed()?;
        let rows = available
            .iter()
            .map(|name| {
                let status = if installed.contains(name) { "installed" } else { "" };
                vec![name.to_string(), status.to_string()]
            })
            .collect();
        format_table(&["NAME", "STATUS"], rows);
        return Ok(());
    }

    let rows = registry
        .scan()?
        .into_iter()
        .map(|plugin| match plugin.checksum {
            Some(checksum) => vec![plugin.name.to_string(), "installed".to_string(), checksum],
            None => vec![plugin.name.to_string(), "corrupt".to_string(), String::new()],
        })
        .collect();
    format_table(&["NAME", "STATUS", "CHECKSUM"], rows);
    Ok(())
}

async fn handle_parse(storage: Storage, project_path: PathBuf) -> Result<()> {
    if !project_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("project {} does not exist", project_path.display()),
        )
        .into());
    }

    let orchestrator = Orchestrator::new(Registry::new(storage));
    let project: JsonProject = orchestrator.parse(&project_path).await?;
    println!("{}", project.to_json()?);

    info!("done parsing");
    Ok(())
}

fn handle_config(storage: &Storage, server_url: Option<Option<String>>) -> Result<()> {
    let mut config = storage.load_config()?;

    match server_url {
        None => {
            let content =
                serde_json::to_string_pretty(&config).map_err(|e| SrctoolError::Config {
                    reason: e.to_string(),
                })?;
            println!("{content}");
        }
        Some(None) => println!("server-url = {}", config.download_server_url),
        Some(Some(url)) => {
            config.download_server_url = url;
            storage.save_config(&config)?;
            info!("download server URL successfully updated");
        }
    }
    Ok(())
}

fn summarize<T>(verb: &str, report: &BatchReport<T>) {
    if report.failed.is_empty() {
        info!("{} parser(s) {verb}", report.succeeded.len());
        return;
    }

    let failed: Vec<String> = report.failed.iter().map(|(name, _)| name.to_string()).collect();
    warn!(
        "{} parser(s) {verb}, {} failed: {}",
        report.succeeded.len(),
        failed.len(),
        failed.join(", ")
    );
}

fn is_tty() -> bool {
    std::io::stdout().is_terminal()
}

fn confirm(prompt: &str) -> Result<bool> {
    let answer = Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    Ok(answer)
}

/// Print aligned columns to stdout.
fn format_table(headers: &[&str], rows: Vec<Vec<String>>) {
    if rows.is_empty() {
        eprintln!("No parsers found");
        return;
    }

    for line in table_lines(headers, &rows) {
        println!("{line}");
    }
}

fn table_lines(headers: &[&str], rows: &[Vec<String>]) -> Vec<String> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let render = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{cell:width$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut lines = vec![render(headers.to_vec())];
    lines.extend(
        rows.iter()
            .map(|row| render(row.iter().map(String::as_str).collect())),
    );
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        match Cli::try_parse_from(args) {
            Ok(cli) => cli,
            Err(e) => panic!("Should parse {args:?}: {e}"),
        }
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_and_commands() {
        let cli = parse(&["srctool", "-d", "uninstall", "go", "--dry"]);
        assert!(cli.debug);
        match cli.command {
            Command::Uninstall { name, dry, yes } => {
                assert_eq!(name.map(|n| n.to_string()), Some("go".to_string()));
                assert!(dry);
                assert!(!yes);
            }
            other => panic!("Unexpected command {other:?}"),
        }

        let cli = parse(&["srctool", "list", "-r"]);
        assert!(matches!(cli.command, Command::List { remote: true }));

        let cli = parse(&["srctool", "p", "/tmp/project"]);
        assert!(matches!(cli.command, Command::Parse { .. }));
    }

    #[test]
    fn test_invalid_plugin_name_is_rejected() {
        assert!(Cli::try_parse_from(["srctool", "install", "../etc"]).is_err());
    }

    #[test]
    fn test_server_url_flag() {
        let cli = parse(&["srctool", "config"]);
        assert!(matches!(cli.command, Command::Config { server_url: None }));

        let cli = parse(&["srctool", "config", "--server-url"]);
        assert!(matches!(
            cli.command,
            Command::Config {
                server_url: Some(None)
            }
        ));

        let cli = parse(&["srctool", "config", "--server-url", "http://localhost/parsers"]);
        match cli.command {
            Command::Config {
                server_url: Some(Some(url)),
            } => assert_eq!(url, "http://localhost/parsers"),
            other => panic!("Unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_config_command_updates_server_url() -> Result<()> {
        let temp = TempDir::new()?;
        let config_dir = temp.path().join("config");
        let data_dir = temp.path().join("data");
        let cli = Cli {
            debug: false,
            config_dir: Some(config_dir.clone()),
            data_dir: Some(data_dir.clone()),
            command: Command::Config {
                server_url: Some(Some("http://localhost:8080/parsers".to_string())),
            },
        };
        execute(cli).await?;

        let storage = Storage::at(config_dir, data_dir)?;
        assert_eq!(
            storage.load_config()?.download_server_url,
            "http://localhost:8080/parsers"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_parse_missing_project() -> Result<()> {
        let temp = TempDir::new()?;
        let cli = Cli {
            debug: false,
            config_dir: Some(temp.path().join("config")),
            data_dir: Some(temp.path().join("data")),
            command: Command::Parse {
                project_path: temp.path().join("missing"),
            },
        };
        assert!(matches!(execute(cli).await, Err(SrctoolError::Io { .. })));
        Ok(())
    }

    #[test]
    fn test_table_lines() {
        let rows = vec![
            vec!["go".to_string(), "installed".to_string()],
            vec!["python".to_string(), String::new()],
        ];
        assert_eq!(
            table_lines(&["NAME", "STATUS"], &rows),
            vec!["NAME    STATUS", "go      installed", "python"]
        );
    }
}
