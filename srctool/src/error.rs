//! Error types for plugin management and parsing.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while managing or running parser plugins.
#[derive(Debug, Error)]
pub enum SrctoolError {
    /// Error determining the XDG directories
    #[error("cannot determine directories: {message}")]
    Directories { message: String },

    /// Error performing I/O operations
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Malformed configuration file or value
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// Plugin name rejected before touching the filesystem
    #[error("invalid plugin name '{name}': {reason}")]
    InvalidPluginName { name: String, reason: &'static str },

    /// Plugin is not installed locally
    #[error("plugin '{name}' is not installed")]
    NotInstalled { name: String },

    /// Plugin is already installed locally
    #[error("plugin '{name}' is already installed, use the 'update' command instead")]
    AlreadyInstalled { name: String },

    /// Plugin directory exists but holds no checksum record
    #[error("plugin '{name}' is corrupt ({}), uninstall it first", .path.display())]
    CorruptInstall { name: String, path: PathBuf },

    /// Request could not be sent or its body could not be read
    #[error("failed to fetch {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Server answered with a non-success status
    #[error("server answered {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    /// Server did not announce the size of a download
    #[error("malformed or missing Content-Length header for {url}")]
    MissingContentLength { url: String },

    /// Transfer ended before the announced number of bytes arrived
    #[error("incomplete download of {url}: expected {expected} bytes, got {actual}")]
    IncompleteDownload {
        url: String,
        expected: u64,
        actual: u64,
    },

    /// Catalog has no entry for the requested plugin
    #[error("no checksum found for {path}")]
    ChecksumNotFound { path: String },

    /// Catalog line is not `<digest> <path>`
    #[error("malformed checksums file at line {line}")]
    ManifestFormat { line: usize },

    /// Downloaded archive does not match its catalog checksum
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Archive extraction failed
    #[error("failed to extract {}: {source}", .path.display())]
    Extraction {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// No plugin is available to run
    #[error("no plugin installed")]
    NoPluginsInstalled,

    /// Plugin exited unsuccessfully or produced no output
    #[error("failed to parse with the {plugin} plugin: {reason}")]
    Subprocess { plugin: String, reason: String },

    /// One plugin's output is not a valid project model
    #[error("malformed plugin output: {reason}")]
    InvalidOutput { reason: String },

    /// Per-plugin models could not be combined
    #[error("failed to merge plugin outputs: {reason}")]
    Merge { reason: String },
}

impl SrctoolError {
    /// Shorthand for an extraction failure with any error source.
    pub(crate) fn extraction(
        path: impl Into<PathBuf>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Extraction {
            path: path.into(),
            source: source.into(),
        }
    }

    /// Shorthand for a network failure on `url`.
    pub(crate) fn network(url: &str, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.to_string(),
            source,
        }
    }
}

/// Result type for srctool operations.
pub type Result<T> = std::result::Result<T, SrctoolError>;
