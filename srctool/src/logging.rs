//! Diagnostic output setup.
//!
//! All diagnostics go to stderr; stdout is reserved for command output.

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

/// How verbose diagnostics are, and whether they are colored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogConfig {
    pub verbose: bool,
    pub ansi: bool,
}

impl LogConfig {
    /// Colors are enabled when stderr is a terminal.
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            ansi: std::io::stderr().is_terminal(),
        }
    }

    /// Filter used when `RUST_LOG` is not set.
    pub fn default_directive(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default level.
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(config.ansi)
        .with_target(config.verbose)
        .without_time()
        .init();
}
