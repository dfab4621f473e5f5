//! icdaemon task daemon
//!
//! Turns the current process into a background daemon tracked by a single
//! PID-file, and runs a static list of tasks on a fixed cadence until it is
//! told to stop.

pub mod cli;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logs;
pub mod pidfile;
pub mod process;
pub mod runner;
pub mod task;

pub use config::{ServiceConfig, ServiceIdentity, Settings};
pub use error::{DaemonError, Result};
pub use lifecycle::{LifecycleController, ServiceState, StopOutcome};
pub use pidfile::PidFile;
pub use process::{Detach, DetachedContext, ProcessDetacher};
pub use runner::{CycleReport, TaskLoop};
pub use task::{Task, TaskOutcome, TaskResult, TaskSet};

/// Application constants
pub mod constants {
    use std::time::Duration;

    /// Default PID-file location
    pub const DEFAULT_PID_FILE: &str = "/tmp/icdaemon.pid";

    /// Default stdout redirect target in debug mode
    pub const DEBUG_STDOUT: &str = "/tmp/icdaemon.out";

    /// Default stderr redirect target in debug mode
    pub const DEBUG_STDERR: &str = "/tmp/icdaemon.err";

    /// Redirect target outside debug mode
    pub const DEV_NULL: &str = "/dev/null";

    /// Delay between termination signals while stopping
    pub const STOP_SIGNAL_INTERVAL: Duration = Duration::from_millis(100);

    /// Default delay between two tasks of one cycle
    pub const DEFAULT_TASK_SLEEP: Duration = Duration::from_secs(1);

    /// Default delay between loop cycles
    pub const DEFAULT_LOOP_SLEEP: Duration = Duration::from_secs(1);

    /// Maximum redirect target size before rotation (10MB)
    pub const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

    /// Environment variable overriding the settings file location
    pub const CONFIG_ENV: &str = "ICDAEMON_CONFIG";
}
