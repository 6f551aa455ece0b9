//! Install, update and uninstall against an in-process download server.

use std::collections::BTreeSet;
use std::io::Write;
use std::time::Duration;

use md5::{Digest, Md5};
use mockito::{Mock, Server, ServerGuard};
use srctool::storage::CHECKSUM_FILE_NAME;
use srctool::{
    LifecycleManager, Platform, PluginName, Registry, SrctoolError, Storage, TransferClient,
    UninstallOutcome, UpdateOutcome,
};
use tempfile::TempDir;

const GO_V1: &str = "#!/bin/sh\necho '{\"files\": 1}'\n";
const GO_V2: &str = "#!/bin/sh\necho '{\"files\": 2}'\n";

fn name(value: &str) -> PluginName {
    match PluginName::new(value) {
        Ok(name) => name,
        Err(e) => panic!("{e}"),
    }
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

fn storage(temp: &TempDir) -> anyhow::Result<Storage> {
    Ok(Storage::at(temp.path().join("config"), temp.path().join("data"))?)
}

/// A zip holding `plugin-<name>/parser`.
fn plugin_archive(plugin: &str, script: &str) -> anyhow::Result<Vec<u8>> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .unix_permissions(0o755);
        writer.add_directory(format!("plugin-{plugin}/"), options)?;
        writer.start_file(format!("plugin-{plugin}/parser"), options)?;
        writer.write_all(script.as_bytes())?;
        writer.finish()?;
    }
    Ok(cursor.into_inner())
}

/// A download server for linux/amd64. Mocks live as long as the server.
struct PluginServer {
    server: ServerGuard,
    _mocks: Vec<Mock>,
}

impl PluginServer {
    fn url(&self) -> String {
        self.server.url()
    }
}

/// Serve `archives` with a matching catalog.
async fn serve(archives: &[(&str, Vec<u8>)]) -> PluginServer {
    let mut catalog = String::new();
    let mut files = Vec::new();
    for (plugin, bytes) in archives {
        catalog.push_str(&format!(
            "{} linux/amd64/plugin-{plugin}.zip\n",
            digest(bytes)
        ));
        files.push((format!("/linux/amd64/plugin-{plugin}.zip"), Ok(bytes.clone())));
    }
    serve_raw(&catalog, files).await
}

/// Serve a literal catalog. Each file is either a body or an error status.
async fn serve_raw(catalog: &str, files: Vec<(String, Result<Vec<u8>, usize>)>) -> PluginServer {
    let mut server = Server::new_async().await;
    let mut mocks = Vec::new();
    for (path, body) in files {
        let mock = server.mock("GET", path.as_str());
        let mock = match body {
            Ok(bytes) => mock.with_body(bytes),
            Err(status) => mock.with_status(status),
        };
        mocks.push(mock.create_async().await);
    }
    mocks.push(
        server
            .mock("GET", "/MD5SUMS")
            .with_body(catalog)
            .create_async()
            .await,
    );
    PluginServer {
        server,
        _mocks: mocks,
    }
}

fn manager(storage: &Storage, server: &PluginServer) -> anyhow::Result<LifecycleManager> {
    let url = reqwest::Url::parse(&server.url())?;
    let client = TransferClient::new(
        &url,
        Platform::new("linux", "amd64"),
        Duration::from_secs(5),
    )?;
    Ok(LifecycleManager::new(Registry::new(storage.clone()), client))
}

fn staging_dirs(storage: &Storage) -> anyhow::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(storage.parsers_dir())? {
        let file_name = entry?.file_name().to_string_lossy().into_owned();
        if file_name.starts_with('.') {
            names.push(file_name);
        }
    }
    Ok(names)
}

#[tokio::test]
async fn install_then_list() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let storage = storage(&temp)?;
    let archive = plugin_archive("go", GO_V1)?;
    let expected = digest(&archive);
    let server = serve(&[("go", archive)]).await;
    let manager = manager(&storage, &server)?;

    let plugin = manager.install(&name("go")).await?;
    assert_eq!(plugin.checksum.as_deref(), Some(expected.as_str()));
    assert_eq!(
        manager.registry().list_installed()?,
        BTreeSet::from([name("go")])
    );
    assert_eq!(
        std::fs::read_to_string(storage.checksum_path(&name("go")))?,
        expected
    );
    assert_eq!(
        std::fs::read_to_string(storage.executable_path(&name("go")))?,
        GO_V1
    );
    assert!(staging_dirs(&storage)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn install_twice_fails_without_touching_the_install() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let storage = storage(&temp)?;
    let server = serve(&[("go", plugin_archive("go", GO_V1)?)]).await;
    let manager = manager(&storage, &server)?;

    manager.install(&name("go")).await?;
    let record = std::fs::read_to_string(storage.checksum_path(&name("go")))?;

    let result = manager.install(&name("go")).await;
    assert!(matches!(result, Err(SrctoolError::AlreadyInstalled { .. })));
    assert_eq!(
        std::fs::read_to_string(storage.checksum_path(&name("go")))?,
        record
    );
    Ok(())
}

#[tokio::test]
async fn concurrent_installs_of_one_plugin_are_serialized() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let storage = storage(&temp)?;
    let server = serve(&[("go", plugin_archive("go", GO_V1)?)]).await;
    let manager = manager(&storage, &server)?;

    let go = name("go");
    let (first, second) = tokio::join!(manager.install(&go), manager.install(&go));
    let installed = [first.is_ok(), second.is_ok()];
    assert_eq!(installed.iter().filter(|ok| **ok).count(), 1);
    assert!(
        matches!(first, Err(SrctoolError::AlreadyInstalled { .. }))
            || matches!(second, Err(SrctoolError::AlreadyInstalled { .. }))
    );
    Ok(())
}

#[tokio::test]
async fn checksum_mismatch_installs_nothing() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let storage = storage(&temp)?;
    let server = serve_raw(
        "d41d8cd98f00b204e9800998ecf8427e linux/amd64/plugin-go.zip\n",
        vec![(
            "/linux/amd64/plugin-go.zip".to_string(),
            Ok(plugin_archive("go", GO_V1)?),
        )],
    )
    .await;
    let manager = manager(&storage, &server)?;

    let result = manager.install(&name("go")).await;
    assert!(matches!(result, Err(SrctoolError::ChecksumMismatch { .. })));
    assert!(!storage.plugin_dir(&name("go")).exists());
    assert!(staging_dirs(&storage)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn archive_without_plugin_directory_is_rejected() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let storage = storage(&temp)?;
    let server = serve(&[("go", plugin_archive("python", GO_V1)?)]).await;
    let manager = manager(&storage, &server)?;

    let result = manager.install(&name("go")).await;
    assert!(matches!(result, Err(SrctoolError::Extraction { .. })));
    assert!(manager.registry().scan()?.is_empty());
    Ok(())
}

#[tokio::test]
async fn uninstall_removes_the_plugin() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let storage = storage(&temp)?;
    let server = serve(&[("go", plugin_archive("go", GO_V1)?)]).await;
    let manager = manager(&storage, &server)?;
    manager.install(&name("go")).await?;

    let dry = manager.uninstall(&name("go"), true).await?;
    assert_eq!(dry, UninstallOutcome::DryRun(storage.plugin_dir(&name("go"))));
    assert!(storage.plugin_dir(&name("go")).exists());

    let removed = manager.uninstall(&name("go"), false).await?;
    assert_eq!(removed, UninstallOutcome::Removed(storage.plugin_dir(&name("go"))));
    assert!(manager.registry().list_installed()?.is_empty());

    let again = manager.uninstall(&name("go"), false).await;
    assert!(matches!(again, Err(SrctoolError::NotInstalled { .. })));
    Ok(())
}

#[tokio::test]
async fn corrupt_install_is_repaired_by_uninstall() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let storage = storage(&temp)?;
    let server = serve(&[("go", plugin_archive("go", GO_V1)?)]).await;
    let manager = manager(&storage, &server)?;
    std::fs::create_dir_all(storage.plugin_dir(&name("go")))?;

    let install = manager.install(&name("go")).await;
    assert!(matches!(install, Err(SrctoolError::CorruptInstall { .. })));
    let update = manager.update(&name("go")).await;
    assert!(matches!(update, Err(SrctoolError::CorruptInstall { .. })));

    manager.uninstall(&name("go"), false).await?;
    manager.install(&name("go")).await?;
    assert_eq!(
        manager.registry().list_installed()?,
        BTreeSet::from([name("go")])
    );
    Ok(())
}

#[tokio::test]
async fn update_with_equal_checksums_is_a_no_op() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let storage = storage(&temp)?;
    let plugin_dir = storage.plugin_dir(&name("go"));
    std::fs::create_dir_all(&plugin_dir)?;
    std::fs::write(plugin_dir.join(CHECKSUM_FILE_NAME), "abc123")?;
    let modified = std::fs::metadata(&plugin_dir)?.modified()?;

    let mut server = serve_raw("abc123 linux/amd64/plugin-go.zip\n", Vec::new()).await;
    let archive = server
        .server
        .mock("GET", "/linux/amd64/plugin-go.zip")
        .expect(0)
        .create_async()
        .await;
    let manager = manager(&storage, &server)?;

    assert_eq!(manager.update(&name("go")).await?, UpdateOutcome::UpToDate);
    assert_eq!(std::fs::metadata(&plugin_dir)?.modified()?, modified);
    archive.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn update_swaps_in_the_new_version() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let storage = storage(&temp)?;
    let v1 = plugin_archive("go", GO_V1)?;
    let v2 = plugin_archive("go", GO_V2)?;
    let (v1_digest, v2_digest) = (digest(&v1), digest(&v2));

    let old_server = serve(&[("go", v1)]).await;
    manager(&storage, &old_server)?.install(&name("go")).await?;

    let new_server = serve(&[("go", v2)]).await;
    let outcome = manager(&storage, &new_server)?.update(&name("go")).await?;
    assert_eq!(
        outcome,
        UpdateOutcome::Updated {
            previous: v1_digest,
            current: v2_digest.clone(),
        }
    );
    assert_eq!(
        std::fs::read_to_string(storage.checksum_path(&name("go")))?,
        v2_digest
    );
    assert_eq!(
        std::fs::read_to_string(storage.executable_path(&name("go")))?,
        GO_V2
    );
    assert!(staging_dirs(&storage)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_update_keeps_the_previous_version() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let storage = storage(&temp)?;
    let v1 = plugin_archive("go", GO_V1)?;
    let v1_digest = digest(&v1);
    let old_server = serve(&[("go", v1)]).await;
    manager(&storage, &old_server)?.install(&name("go")).await?;

    // The catalog announces a new version but the server sends a broken one.
    let new_server = serve_raw(
        "900150983cd24fb0d6963f7d28e17f72 linux/amd64/plugin-go.zip\n",
        vec![(
            "/linux/amd64/plugin-go.zip".to_string(),
            Ok(b"not a zip".to_vec()),
        )],
    )
    .await;

    let result = manager(&storage, &new_server)?.update(&name("go")).await;
    assert!(matches!(result, Err(SrctoolError::ChecksumMismatch { .. })));
    assert_eq!(
        std::fs::read_to_string(storage.checksum_path(&name("go")))?,
        v1_digest
    );
    assert_eq!(
        std::fs::read_to_string(storage.executable_path(&name("go")))?,
        GO_V1
    );
    assert!(staging_dirs(&storage)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn update_all_reports_each_plugin_and_keeps_failed_installs() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let storage = storage(&temp)?;
    let go = plugin_archive("go", GO_V1)?;
    let python = plugin_archive("python", GO_V1)?;
    let (go_digest, python_digest) = (digest(&go), digest(&python));
    let old_server = serve(&[("go", go), ("python", python)]).await;
    let report = manager(&storage, &old_server)?.install_all().await?;
    assert!(report.failed.is_empty());

    // go is unchanged; python announces a new version that is not served.
    let catalog = format!(
        "{go_digest} linux/amd64/plugin-go.zip\n\
         900150983cd24fb0d6963f7d28e17f72 linux/amd64/plugin-python.zip\n"
    );
    let new_server = serve_raw(
        &catalog,
        vec![("/linux/amd64/plugin-python.zip".to_string(), Err(404))],
    )
    .await;

    let report = manager(&storage, &new_server)?.update_all().await?;
    assert_eq!(
        report.succeeded,
        vec![(name("go"), UpdateOutcome::UpToDate)]
    );
    let failed: Vec<_> = report.failed.iter().map(|(n, _)| n.clone()).collect();
    assert_eq!(failed, vec![name("python")]);

    assert_eq!(
        std::fs::read_to_string(storage.checksum_path(&name("python")))?,
        python_digest
    );
    assert_eq!(
        std::fs::read_to_string(storage.executable_path(&name("python")))?,
        GO_V1
    );
    assert_eq!(
        std::fs::read_to_string(storage.checksum_path(&name("go")))?,
        go_digest
    );
    assert!(staging_dirs(&storage)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn batch_operations_continue_past_failures() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let storage = storage(&temp)?;
    let go = plugin_archive("go", GO_V1)?;
    // python is listed in the catalog but its archive is missing; java is
    // published for another platform only.
    let catalog = format!(
        "{} linux/amd64/plugin-go.zip\n\
         d41d8cd98f00b204e9800998ecf8427e linux/amd64/plugin-python.zip\n\
         d41d8cd98f00b204e9800998ecf8427e darwin/arm64/plugin-java.zip\n",
        digest(&go)
    );
    let server = serve_raw(
        &catalog,
        vec![
            ("/linux/amd64/plugin-go.zip".to_string(), Ok(go)),
            ("/linux/amd64/plugin-python.zip".to_string(), Err(404)),
        ],
    )
    .await;
    let manager = manager(&storage, &server)?;

    let report = manager.install_all().await?;
    let succeeded: Vec<_> = report.succeeded.iter().map(|(n, _)| n.clone()).collect();
    let failed: Vec<_> = report.failed.iter().map(|(n, _)| n.clone()).collect();
    assert_eq!(succeeded, vec![name("go")]);
    assert_eq!(failed, vec![name("python")]);

    let report = manager.uninstall_all(true).await?;
    assert_eq!(report.succeeded.len(), 1);
    assert!(storage.plugin_dir(&name("go")).exists());

    let report = manager.uninstall_all(false).await?;
    assert_eq!(report.succeeded.len(), 1);
    assert!(manager.registry().list_installed()?.is_empty());
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn installed_plugins_are_run_by_parse() -> anyhow::Result<()> {
    use srctool::{JsonProject, Orchestrator};

    let temp = TempDir::new()?;
    let storage = storage(&temp)?;
    let server = serve(&[
        ("go", plugin_archive("go", GO_V1)?),
        ("python", plugin_archive("python", GO_V2)?),
    ])
    .await;
    let report = manager(&storage, &server)?.install_all().await?;
    assert!(report.failed.is_empty());

    let orchestrator = Orchestrator::new(Registry::new(storage.clone()));
    let merged: JsonProject = orchestrator.parse(temp.path()).await?;
    assert_eq!(merged.0, serde_json::json!({"files": 3}));
    Ok(())
}
