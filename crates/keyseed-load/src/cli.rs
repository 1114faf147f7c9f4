use std::path::PathBuf;

use clap::{CommandFactory, Parser};

/// CLI surface definition.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(
    name = "keyseed-load",
    about = "Bulk-load OpenPGP key dumps into keyseed storage",
    version
)]
pub struct Cli {
    /// Settings file (TOML); built-in defaults apply when omitted.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Capture a CPU profile between consecutive SIGUSR2 deliveries.
    #[arg(long)]
    pub cpuprof: bool,

    /// Write a memory snapshot on every SIGUSR2.
    #[arg(long)]
    pub memprof: bool,

    /// Key dump files or glob patterns, processed in order.
    #[arg(value_name = "PATTERN")]
    pub patterns: Vec<String>,
}

/// One-line usage text for the missing-arguments error.
pub fn usage() -> String {
    Cli::command().render_usage().to_string()
}
