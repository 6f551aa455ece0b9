//! Target platform detection and plugin naming.
//!
//! Plugin archives are published per operating system and architecture,
//! using the identifiers Go toolchains use (`linux/amd64`, `darwin/arm64`).

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::{Result, SrctoolError};

/// Prefix of every plugin directory and archive.
pub const ARTIFACT_PREFIX: &str = "plugin-";

/// Extension of plugin archives on the download server.
pub const ARCHIVE_EXT: &str = "zip";

/// Operating system and architecture pair a plugin is built for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform {
    os: String,
    arch: String,
}

impl Platform {
    /// Build a platform from explicit identifiers.
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// Detect the current platform.
    ///
    /// # Examples
    ///
    /// ```
    /// # use srctool::platform::Platform;
    /// let platform = Platform::detect();
    /// assert!(!platform.os().is_empty());
    /// ```
    pub fn detect() -> Self {
        Self::new(Self::detect_os(), Self::detect_arch())
    }

    pub fn os(&self) -> &str {
        &self.os
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// Directory prefix of this platform's archives, with a trailing slash.
    pub fn remote_dir(&self) -> String {
        format!("{}/{}/", self.os, self.arch)
    }

    /// Path of a plugin archive relative to the server root.
    pub fn remote_path(&self, name: &PluginName) -> String {
        format!("{}{}.{ARCHIVE_EXT}", self.remote_dir(), name.artifact())
    }

    fn detect_os() -> &'static str {
        #[cfg(target_os = "linux")]
        return "linux";
        #[cfg(target_os = "macos")]
        return "darwin";
        #[cfg(target_os = "windows")]
        return "windows";
        #[cfg(target_os = "freebsd")]
        return "freebsd";
        #[cfg(not(any(
            target_os = "linux",
            target_os = "macos",
            target_os = "windows",
            target_os = "freebsd"
        )))]
        return std::env::consts::OS;
    }

    fn detect_arch() -> &'static str {
        #[cfg(target_arch = "x86_64")]
        return "amd64";
        #[cfg(target_arch = "x86")]
        return "386";
        #[cfg(target_arch = "aarch64")]
        return "arm64";
        #[cfg(target_arch = "arm")]
        return "arm";
        #[cfg(not(any(
            target_arch = "x86_64",
            target_arch = "x86",
            target_arch = "aarch64",
            target_arch = "arm"
        )))]
        return std::env::consts::ARCH;
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

/// A validated plugin name, such as `go` or `python`.
///
/// Names end up in filesystem paths and URLs, so they are restricted to
/// lowercase ASCII letters, digits, `-`, `_`, `+` and `.`, may not start
/// with `.` and may not exceed 64 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginName(String);

impl PluginName {
    /// Maximum length for a plugin name.
    pub const MAX_LENGTH: usize = 64;

    /// Creates a new plugin name after validation.
    ///
    /// # Errors
    ///
    /// Returns [`SrctoolError::InvalidPluginName`] if the name is rejected.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let invalid = |reason| SrctoolError::InvalidPluginName {
            name: value.clone(),
            reason,
        };

        if value.is_empty() {
            return Err(invalid("cannot be empty"));
        }
        if value.len() > Self::MAX_LENGTH {
            return Err(invalid("cannot exceed 64 characters"));
        }
        if value.starts_with('.') {
            return Err(invalid("cannot start with '.'"));
        }
        if !value.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '+' | '.')
        }) {
            return Err(invalid("contains invalid characters"));
        }

        Ok(Self(value))
    }

    /// Recover the plugin name from a directory name such as `plugin-go`.
    pub fn from_artifact(dir_name: &str) -> Option<Self> {
        dir_name
            .strip_prefix(ARTIFACT_PREFIX)
            .and_then(|name| Self::new(name).ok())
    }

    /// Recover the plugin name from an archive file name such as
    /// `plugin-go.zip`. Any other extension is rejected.
    pub fn from_archive(file_name: &str) -> Option<Self> {
        file_name
            .strip_suffix(&format!(".{ARCHIVE_EXT}"))
            .and_then(Self::from_artifact)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory and archive stem of this plugin, `plugin-<name>`.
    pub fn artifact(&self) -> String {
        format!("{ARTIFACT_PREFIX}{}", self.0)
    }
}

impl fmt::Display for PluginName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PluginName {
    type Err = SrctoolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for PluginName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for PluginName {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}
