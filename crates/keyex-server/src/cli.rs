//! The command line interface of the `bud-key-ex` binary.
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use keyex_telemetry::TelemetryOptions;

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(name = "bud-key-ex", author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Load the configuration and serve key operations.
    Run(RunArguments),

    /// Load and validate the configuration and all key material without
    /// serving.
    Check(CheckArguments),
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct RunArguments {
    #[command(flatten)]
    pub config: ConfigArguments,

    // IMPORTANT: All (flattened) sub structs should be placed at the end to ensure the help
    // headings are correct.
    #[command(flatten)]
    pub telemetry: TelemetryOptions,
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct CheckArguments {
    #[command(flatten)]
    pub config: ConfigArguments,
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct ConfigArguments {
    /// Path to the JSON configuration FILE.
    #[arg(long = "config", short = 'c', value_name = "FILE", env = "KEYEX_CONFIG")]
    pub path: PathBuf,
}
