use std::fmt;
use std::path::PathBuf;

/// Custom error type for icdaemon operations
#[derive(Debug)]
pub enum DaemonError {
    /// I/O operation failed
    Io(std::io::Error),
    /// JSON serialization/deserialization failed
    Json(serde_json::Error),
    /// Configuration error
    Config(String),
    /// Detaching from the terminal failed at the named stage
    Detach {
        stage: &'static str,
        source: std::io::Error,
    },
    /// The PID-file already names a process
    AlreadyRunning { pid: i32, pid_file: PathBuf },
    /// Signal delivery failed for a reason other than a missing process
    Signal { pid: i32, source: std::io::Error },
}

impl DaemonError {
    /// Process exit status for a failed lifecycle action
    pub fn exit_code(&self) -> i32 {
        1
    }
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonError::Io(err) => write!(f, "I/O error: {}", err),
            DaemonError::Json(err) => write!(f, "JSON error: {}", err),
            DaemonError::Config(msg) => write!(f, "Configuration error: {}", msg),
            DaemonError::Detach { stage, source } => {
                write!(f, "{} failed: {}", stage, source)
            }
            DaemonError::AlreadyRunning { pid, pid_file } => write!(
                f,
                "pidfile {} already exists (pid {}). Daemon already running?",
                pid_file.display(),
                pid
            ),
            DaemonError::Signal { pid, source } => {
                write!(f, "Failed to signal process {}: {}", pid, source)
            }
        }
    }
}

impl std::error::Error for DaemonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DaemonError::Io(err) => Some(err),
            DaemonError::Json(err) => Some(err),
            DaemonError::Detach { source, .. } => Some(source),
            DaemonError::Signal { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DaemonError {
    fn from(err: std::io::Error) -> Self {
        DaemonError::Io(err)
    }
}

impl From<serde_json::Error> for DaemonError {
    fn from(err: serde_json::Error) -> Self {
        DaemonError::Json(err)
    }
}

/// Result type alias for icdaemon operations
pub type Result<T> = std::result::Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_running_names_the_pid_file() {
        let err = DaemonError::AlreadyRunning {
            pid: 42,
            pid_file: PathBuf::from("/tmp/icdaemon.pid"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/tmp/icdaemon.pid"));
        assert!(msg.contains("already running"));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn signal_failure_exposes_os_error() {
        let err = DaemonError::Signal {
            pid: 7,
            source: std::io::Error::from_raw_os_error(1),
        };
        assert!(std::error::Error::source(&err).is_some());
    }
}
