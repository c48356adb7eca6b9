//! istio-authz CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use istio_common::telemetry::LogFormat;

/// Validate Istio manifests and evaluate AuthorizationPolicies offline
#[derive(Parser, Debug)]
#[command(name = "istio-authz")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log output format (text or json); filter with RUST_LOG
    #[arg(
        long,
        global = true,
        env = "ISTIO_AUTHZ_LOG_FORMAT",
        default_value = "text"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decode and validate Istio manifests
    Validate(commands::validate::ValidateArgs),
    /// Decide a request against a set of AuthorizationPolicies
    Check(commands::check::CheckArgs),
    /// Print the CustomResourceDefinitions as JSON
    Crds(commands::crds::CrdsArgs),
}

impl Cli {
    /// Run the CLI command
    pub fn run(self) -> Result<ExitCode> {
        match self.command {
            Commands::Validate(args) => commands::validate::run(args).map(|_| ExitCode::SUCCESS),
            Commands::Check(args) => commands::check::run(args),
            Commands::Crds(args) => commands::crds::run(args).map(|_| ExitCode::SUCCESS),
        }
    }
}
