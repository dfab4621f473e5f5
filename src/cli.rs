use clap::{Parser, Subcommand};

/// icdaemon CLI application
///
/// Usage errors (no command, extra arguments, unknown keyword) are reported
/// by clap with exit status 2.
#[derive(Parser, Debug)]
#[command(name = "icdaemon")]
#[command(about = "Runs configured tasks in a background daemon")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Lifecycle commands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Detach and start running tasks
    Start,
    /// Stop the running daemon
    Stop,
    /// Stop the daemon if running, then start it
    Restart,
}
