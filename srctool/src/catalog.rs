//! The remote `MD5SUMS` catalog.
//!
//! The catalog is one newline-delimited text blob where each line reads
//! `<digest> <os>/<arch>/plugin-<name>.zip`.

use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{Result, SrctoolError};
use crate::integrity;
use crate::platform::{ARCHIVE_EXT, Platform, PluginName};

/// Name of the catalog file at the root of the download server.
pub const CATALOG_FILE_NAME: &str = "MD5SUMS";

/// One well-formed catalog line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub digest: String,
    pub path: String,
}

/// Parsed catalog, keeping only well-formed lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Parse a catalog for listing. Lines that are not exactly two
    /// space-separated fields are skipped.
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| split_line(line).map(|(digest, path)| CatalogEntry { digest, path }))
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Names of the plugins published for `platform`, deduplicated.
    pub fn plugins_for(&self, platform: &Platform) -> BTreeSet<PluginName> {
        let dir = platform.remote_dir();
        self.entries
            .iter()
            .filter_map(|entry| {
                let file_name = entry.path.strip_prefix(&dir)?;
                if file_name.contains('/') {
                    return None;
                }
                PluginName::from_archive(file_name)
            })
            .collect()
    }

    /// Look up the checksum of one plugin archive.
    ///
    /// Unlike [`Catalog::parse`], this is strict: any malformed non-blank
    /// line makes the whole catalog untrustworthy.
    ///
    /// # Errors
    ///
    /// - [`SrctoolError::ManifestFormat`] for a malformed line
    /// - [`SrctoolError::ChecksumNotFound`] if no line names the archive
    pub fn checksum_for(text: &str, platform: &Platform, name: &PluginName) -> Result<String> {
        let wanted = platform.remote_path(name);

        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let (digest, path) =
                split_line(line).ok_or(SrctoolError::ManifestFormat { line: index + 1 })?;
            if path == wanted {
                return Ok(digest);
            }
        }

        Err(SrctoolError::ChecksumNotFound { path: wanted })
    }
}

fn split_line(line: &str) -> Option<(String, String)> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let mut fields = line.split(' ');
    match (fields.next(), fields.next(), fields.next()) {
        (Some(digest), Some(path), None) if !digest.is_empty() && !path.is_empty() => {
            Some((digest.to_string(), path.to_string()))
        }
        _ => None,
    }
}

/// Render a catalog for every plugin archive below `root`.
///
/// Paths are relative to `root` with `/` separators and lines are sorted,
/// so the output can be published as the server's `MD5SUMS` file.
pub fn render(root: &Path) -> Result<String> {
    let mut archives = Vec::new();
    collect_archives(root, &mut archives)?;
    archives.sort();

    let mut out = String::new();
    for path in archives {
        let relative = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        out.push_str(&integrity::checksum(&path)?);
        out.push(' ');
        out.push_str(&relative);
        out.push('\n');
    }
    Ok(out)
}

fn collect_archives(dir: &Path, out: &mut Vec<std::path::PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_archives(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == ARCHIVE_EXT) {
            out.push(path);
        }
    }
    Ok(())
}
