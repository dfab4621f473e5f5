//! Process detachment and signalling
//!
//! Implements the classic double fork: the caller's process exits, the
//! first child becomes a session leader without a controlling terminal, and
//! the second child (never a session leader) carries on as the daemon.

use crate::config::ServiceIdentity;
use crate::error::{DaemonError, Result};
use crate::pidfile::{PidFile, PidFileGuard};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};

/// Turns the current process into a background process
pub trait Detach {
    /// Returns only in the detached process; every intermediate process
    /// exits with status 0 inside this call.
    fn detach(&self, identity: &ServiceIdentity) -> Result<DetachedContext>;
}

impl<T: Detach + ?Sized> Detach for &T {
    fn detach(&self, identity: &ServiceIdentity) -> Result<DetachedContext> {
        (**self).detach(identity)
    }
}

/// State held by the detached process for its lifetime.
///
/// Dropping it removes the PID-file.
#[derive(Debug)]
pub struct DetachedContext {
    guard: PidFileGuard,
}

impl DetachedContext {
    pub fn new(guard: PidFileGuard) -> Self {
        Self { guard }
    }

    pub fn pid(&self) -> u32 {
        self.guard.pid()
    }

    pub fn pid_file(&self) -> &PidFile {
        self.guard.pid_file()
    }
}

/// Double-fork detacher backed by the OS process primitives
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessDetacher;

impl Detach for ProcessDetacher {
    fn detach(&self, identity: &ServiceIdentity) -> Result<DetachedContext> {
        tracing::debug!("detaching from controlling terminal");

        tracing::debug!("fork #1");
        fork_and_exit_parent("fork #1")?;

        // decouple from the parent environment
        std::env::set_current_dir("/").map_err(|source| DaemonError::Detach {
            stage: "chdir",
            source,
        })?;
        new_session()?;
        reset_umask();

        tracing::debug!("fork #2");
        fork_and_exit_parent("fork #2")?;

        tracing::debug!(
            stdin = %identity.stdin.display(),
            stdout = %identity.stdout.display(),
            stderr = %identity.stderr.display(),
            "redirecting standard streams"
        );
        redirect_streams(identity)?;

        let pid = std::process::id();
        let pid_file = PidFile::new(&identity.pid_file);
        pid_file.write(pid)?;
        let guard = PidFileGuard::new(pid_file, pid);
        if guard.pid_file().is_valid() {
            tracing::debug!(pid, path = %identity.pid_file.display(), "pidfile written");
        } else {
            tracing::warn!(pid, path = %identity.pid_file.display(), "pidfile is empty after write");
        }

        Ok(DetachedContext::new(guard))
    }
}

/// Fork; the parent exits with status 0 and only the child returns.
#[cfg(unix)]
fn fork_and_exit_parent(stage: &'static str) -> Result<()> {
    flush_std_streams();
    // SAFETY: called before any runtime or worker thread is started, so the
    // child inherits a consistent single-threaded address space.
    match unsafe { libc::fork() } {
        -1 => Err(DaemonError::Detach {
            stage,
            source: io::Error::last_os_error(),
        }),
        0 => Ok(()),
        child => {
            tracing::debug!(child, "{}: parent exiting", stage);
            std::process::exit(0)
        }
    }
}

#[cfg(unix)]
fn new_session() -> Result<()> {
    // SAFETY: setsid has no memory-safety preconditions
    if unsafe { libc::setsid() } == -1 {
        return Err(DaemonError::Detach {
            stage: "setsid",
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

#[cfg(unix)]
fn reset_umask() {
    // SAFETY: umask cannot fail
    unsafe {
        libc::umask(0);
    }
}

#[cfg(not(unix))]
fn fork_and_exit_parent(stage: &'static str) -> Result<()> {
    Err(DaemonError::Detach {
        stage,
        source: io::Error::new(io::ErrorKind::Unsupported, "fork is not available"),
    })
}

#[cfg(not(unix))]
fn new_session() -> Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn reset_umask() {}

fn flush_std_streams() {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
}

/// Point fds 0, 1 and 2 at the configured targets
fn redirect_streams(identity: &ServiceIdentity) -> Result<()> {
    flush_std_streams();

    let open_err = |stage: &'static str| move |source: io::Error| DaemonError::Detach { stage, source };
    let stdin = File::open(&identity.stdin).map_err(open_err("open stdin"))?;
    let stdout = open_append(&identity.stdout).map_err(open_err("open stdout"))?;
    let stderr = open_append(&identity.stderr).map_err(open_err("open stderr"))?;

    replace_fd(&stdin, 0).map_err(open_err("redirect stdin"))?;
    replace_fd(&stdout, 1).map_err(open_err("redirect stdout"))?;
    replace_fd(&stderr, 2).map_err(open_err("redirect stderr"))?;
    Ok(())
}

fn open_append(path: &std::path::Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }
    options.open(path)
}

#[cfg(unix)]
fn replace_fd(file: &File, target: i32) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: both descriptors are valid for the duration of the call
    if unsafe { libc::dup2(file.as_raw_fd(), target) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn replace_fd(_file: &File, _target: i32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "dup2 is not available"))
}

/// Signals used to stop the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Terminate,
    Kill,
}

impl std::fmt::Display for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopSignal::Terminate => write!(f, "SIGTERM"),
            StopSignal::Kill => write!(f, "SIGKILL"),
        }
    }
}

/// Deliver `signal` to `pid`
#[cfg(unix)]
pub fn send_signal(pid: i32, signal: StopSignal) -> io::Result<()> {
    let raw = match signal {
        StopSignal::Terminate => libc::SIGTERM,
        StopSignal::Kill => libc::SIGKILL,
    };
    // SAFETY: kill has no memory-safety preconditions
    if unsafe { libc::kill(pid, raw) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn send_signal(_pid: i32, _signal: StopSignal) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "signals are not available"))
}

/// True if `err` says the target process does not exist
pub fn is_no_such_process(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::ESRCH)
    }

    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

/// True if `pid` has exited but not been reaped yet.
///
/// A zombie still accepts signals, so a stop loop waiting for `ESRCH` would
/// spin until its parent reaps it.
#[cfg(target_os = "linux")]
pub fn is_zombie(pid: i32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
        return false;
    };
    // the command name may itself contain ')'
    stat.rfind(')')
        .and_then(|rparen| stat.get(rparen + 1..))
        .and_then(|rest| rest.split_whitespace().next())
        .is_some_and(|state| state == "Z" || state == "X")
}

#[cfg(not(target_os = "linux"))]
pub fn is_zombie(_pid: i32) -> bool {
    false
}
