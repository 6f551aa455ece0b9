//! srctool - download, manage and run source code parsers.

use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error};

use srctool::cli::{self, Cli};
use srctool::logging::{self, LogConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(&LogConfig::new(cli.debug));

    match cli::execute(cli).await.map_err(anyhow::Error::from) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            for cause in e.chain().skip(1) {
                debug!("caused by: {cause}");
            }
            ExitCode::FAILURE
        }
    }
}
