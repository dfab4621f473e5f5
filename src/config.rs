//! Configuration for icdaemon
//!
//! The daemon's options are a static list read once at startup. They are
//! carried as explicit values into the controller and the task loop.

use crate::constants::{
    CONFIG_ENV, DEBUG_STDERR, DEBUG_STDOUT, DEFAULT_LOOP_SLEEP, DEFAULT_PID_FILE,
    DEFAULT_TASK_SLEEP, DEV_NULL,
};
use crate::error::{DaemonError, Result};
use crate::task::{Task, TaskSet};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Filesystem artifacts owned by one service instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub pid_file: PathBuf,
    pub stdin: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

impl ServiceIdentity {
    /// Identity with every standard stream sent to `/dev/null`
    pub fn new(pid_file: impl Into<PathBuf>) -> Self {
        Self {
            pid_file: pid_file.into(),
            stdin: PathBuf::from(DEV_NULL),
            stdout: PathBuf::from(DEV_NULL),
            stderr: PathBuf::from(DEV_NULL),
        }
    }

    pub fn with_stdout(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = path.into();
        self
    }

    pub fn with_stderr(mut self, path: impl Into<PathBuf>) -> Self {
        self.stderr = path.into();
        self
    }

    pub fn with_stdin(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = path.into();
        self
    }
}

/// Runtime options of the task loop
#[derive(Debug)]
pub struct ServiceConfig {
    pub tasks: TaskSet,
    /// Verbose step-by-step logging, including task failures
    pub debug_mode: bool,
    pub task_sleep: Duration,
    pub loop_sleep: Duration,
    /// Switch from SIGTERM to SIGKILL once a stop has been retrying this long
    pub kill_after: Option<Duration>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            tasks: TaskSet::default(),
            debug_mode: true,
            task_sleep: DEFAULT_TASK_SLEEP,
            loop_sleep: DEFAULT_LOOP_SLEEP,
            kill_after: None,
        }
    }
}

/// A task in the settings file: a program run to completion
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CommandTask {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// On-disk form of the option list
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub debug_mode: bool,
    pub task_sleep_secs: f64,
    pub loop_sleep_secs: f64,
    pub kill_after_secs: Option<f64>,
    pub pid_file: PathBuf,
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    pub tasks: Vec<CommandTask>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug_mode: true,
            task_sleep_secs: DEFAULT_TASK_SLEEP.as_secs_f64(),
            loop_sleep_secs: DEFAULT_LOOP_SLEEP.as_secs_f64(),
            kill_after_secs: None,
            pid_file: PathBuf::from(DEFAULT_PID_FILE),
            stdin: None,
            stdout: None,
            stderr: None,
            tasks: Vec::new(),
        }
    }
}

impl Settings {
    /// Location of the settings file: `$ICDAEMON_CONFIG`, else the user
    /// config directory.
    pub fn default_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }
        let config_dir = dirs::config_dir()
            .ok_or(DaemonError::Config("Could not find config directory".to_string()))?;
        Ok(config_dir.join("icdaemon").join("settings.json"))
    }

    /// Load settings from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        interval("task_sleep_secs", self.task_sleep_secs)?;
        interval("loop_sleep_secs", self.loop_sleep_secs)?;
        if let Some(secs) = self.kill_after_secs {
            interval("kill_after_secs", secs)?;
        }

        // the daemon runs from `/`, so relative paths would silently move
        let paths = [Some(&self.pid_file), self.stdin.as_ref(), self.stdout.as_ref(), self.stderr.as_ref()];
        for path in paths.into_iter().flatten() {
            if path.is_relative() {
                return Err(DaemonError::Config(format!(
                    "path must be absolute: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    /// Stream targets, falling back to the debug or quiet defaults
    pub fn identity(&self) -> ServiceIdentity {
        let (default_out, default_err) = if self.debug_mode {
            (DEBUG_STDOUT, DEBUG_STDERR)
        } else {
            (DEV_NULL, DEV_NULL)
        };
        ServiceIdentity {
            pid_file: self.pid_file.clone(),
            stdin: self.stdin.clone().unwrap_or_else(|| PathBuf::from(DEV_NULL)),
            stdout: self.stdout.clone().unwrap_or_else(|| PathBuf::from(default_out)),
            stderr: self.stderr.clone().unwrap_or_else(|| PathBuf::from(default_err)),
        }
    }

    /// Loop options with a command task per configured entry
    pub fn service_config(&self) -> Result<ServiceConfig> {
        let tasks = self
            .tasks
            .iter()
            .map(|t| Task::command(&t.name, &t.program, &t.args))
            .collect();
        Ok(ServiceConfig {
            tasks,
            debug_mode: self.debug_mode,
            task_sleep: interval("task_sleep_secs", self.task_sleep_secs)?,
            loop_sleep: interval("loop_sleep_secs", self.loop_sleep_secs)?,
            kill_after: self
                .kill_after_secs
                .map(|secs| interval("kill_after_secs", secs))
                .transpose()?,
        })
    }
}

/// Seconds from the settings file as a `Duration`
fn interval(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        DaemonError::Config(format!(
            "{} must be a non-negative number of seconds within range, got {}",
            name, secs
        ))
    })
}
