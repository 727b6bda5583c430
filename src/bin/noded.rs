#![forbid(unsafe_code)]
//! noded entry point

use clap::Parser;
use noded::config::{Args, NodeConfig};
use noded::logging::init_logging;
use noded::shutdown::wait_for_signal;
use noded::Node;
use std::process::ExitCode;
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match NodeConfig::from_sources(&args) {
        Ok(config) => config,
        Err(e) => {
            // Logging is configured from the same sources, so fall back to
            // info to report the failure.
            if init_logging(Level::INFO).is_ok() {
                error!(error = %e, category = ?e.category(), "invalid configuration");
            } else {
                eprintln!("invalid configuration: {}", e);
            }
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(config.log_level) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        network = %config.network,
        dir = %config.data_dir.display(),
        "starting noded"
    );

    let mut node = match Node::start(config).await {
        Ok(node) => node,
        Err(e) => {
            error!(error = %e, category = ?e.category(), "failed to start node");
            return ExitCode::FAILURE;
        }
    };

    match node.run_until(wait_for_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "shutdown did not complete cleanly");
            ExitCode::FAILURE
        }
    }
}
