//! istio-authz CLI
//!
//! Offline validation of Istio manifests and AuthorizationPolicy decisions.

use std::process::ExitCode;

use clap::Parser;
use istio_common::telemetry::{init_logging, TelemetryConfig};

use istio_authz_cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(TelemetryConfig {
        format: cli.log_format,
        default_filter: Some("warn".to_string()),
    }) {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }

    match cli.run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
