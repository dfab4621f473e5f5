//! Start/stop/restart of the daemon
//!
//! The PID-file is the single source of truth for whether the daemon runs.
//! Nothing here locks it: two invocations racing on the same PID-file can
//! both pass the duplicate-start check.

use crate::config::{ServiceConfig, ServiceIdentity};
use crate::constants::STOP_SIGNAL_INTERVAL;
use crate::error::{DaemonError, Result};
use crate::logs::rotate_log_if_needed;
use crate::pidfile::PidFile;
use crate::process::{
    Detach, DetachedContext, ProcessDetacher, StopSignal, is_no_such_process, is_zombie, send_signal,
};
use crate::runner::TaskLoop;
use std::thread;
use std::time::Instant;

/// Lifecycle state as seen through the PID-file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    NotRunning,
    /// Only logged while `start` runs; `state()` never returns it
    Starting,
    Running,
    /// Only logged while `stop` runs; `state()` never returns it
    Stopping,
}

/// How a stop request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No PID-file entry
    NotRunning,
    /// The recorded process was already gone; the PID-file was removed
    Stale { pid: i32 },
    /// The recorded process exited after `signals_sent` signals
    Stopped { pid: i32, signals_sent: u32 },
}

/// Orchestrates the daemon's lifecycle around one PID-file
pub struct LifecycleController<D = ProcessDetacher> {
    identity: ServiceIdentity,
    config: ServiceConfig,
    pid_file: PidFile,
    detacher: D,
}

impl LifecycleController<ProcessDetacher> {
    pub fn new(identity: ServiceIdentity, config: ServiceConfig) -> Self {
        Self::with_detacher(identity, config, ProcessDetacher)
    }
}

impl<D: Detach> LifecycleController<D> {
    pub fn with_detacher(identity: ServiceIdentity, config: ServiceConfig, detacher: D) -> Self {
        let pid_file = PidFile::new(&identity.pid_file);
        Self {
            identity,
            config,
            pid_file,
            detacher,
        }
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    /// Running iff the PID-file names a process. No liveness probe is made.
    pub fn state(&self) -> ServiceState {
        match self.pid_file.read() {
            Some(_) => ServiceState::Running,
            None => ServiceState::NotRunning,
        }
    }

    /// Detach and run the task loop.
    ///
    /// The invoking process exits inside the detacher; this returns only in
    /// the daemon, once its loop has been stopped, or on failure.
    pub fn start(&self) -> Result<()> {
        tracing::debug!(state = ?ServiceState::Starting, "start requested");

        let recorded = self.pid_file.read();
        tracing::debug!(pid = ?recorded, path = %self.pid_file.path().display(), "checked pidfile");
        if let Some(pid) = recorded {
            return Err(DaemonError::AlreadyRunning {
                pid,
                pid_file: self.identity.pid_file.clone(),
            });
        }

        rotate_log_if_needed(&self.identity.stdout)?;
        rotate_log_if_needed(&self.identity.stderr)?;

        let context = self.detacher.detach(&self.identity)?;
        self.serve(context)
    }

    fn serve(&self, context: DetachedContext) -> Result<()> {
        tracing::info!(
            pid = context.pid(),
            tasks = self.config.tasks.len(),
            state = ?ServiceState::Running,
            "daemon running"
        );
        println!("For EXIT send SIGTERM to {} ...", context.pid());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let cycles = runtime.block_on(TaskLoop::new(&self.config).run())?;

        tracing::info!(pid = context.pid(), cycles, "daemon exiting");
        drop(context);
        Ok(())
    }

    /// Signal the recorded process until it is gone, then remove the
    /// PID-file.
    pub fn stop(&self) -> Result<StopOutcome> {
        tracing::debug!(state = ?ServiceState::Stopping, "stop requested");

        let Some(pid) = self.pid_file.read() else {
            eprintln!(
                "pidfile {} does not exist. Daemon not running?",
                self.pid_file.path().display()
            );
            return Ok(StopOutcome::NotRunning);
        };

        let first_signal = Instant::now();
        let mut signals_sent = 0u32;
        let mut escalated = false;
        loop {
            let signal = match self.config.kill_after {
                Some(limit) if first_signal.elapsed() >= limit => StopSignal::Kill,
                _ => StopSignal::Terminate,
            };
            if signal == StopSignal::Kill && !escalated {
                tracing::warn!(pid, signals_sent, "process ignores SIGTERM, escalating to SIGKILL");
                escalated = true;
            }

            match send_signal(pid, signal) {
                Ok(()) => {
                    signals_sent += 1;
                    tracing::debug!(pid, %signal, attempt = signals_sent, "signal delivered");
                    thread::sleep(STOP_SIGNAL_INTERVAL);
                    if is_zombie(pid) {
                        tracing::debug!(pid, "process exited, awaiting reap");
                        return self.finish_stop(pid, signals_sent);
                    }
                }
                Err(e) if is_no_such_process(&e) => return self.finish_stop(pid, signals_sent),
                // pidfile stays: the process may still be alive
                Err(source) => return Err(DaemonError::Signal { pid, source }),
            }
        }
    }

    fn finish_stop(&self, pid: i32, signals_sent: u32) -> Result<StopOutcome> {
        self.pid_file.remove()?;
        tracing::debug!(pid, signals_sent, state = ?ServiceState::NotRunning, "process gone, pidfile removed");
        Ok(if signals_sent == 0 {
            StopOutcome::Stale { pid }
        } else {
            StopOutcome::Stopped { pid, signals_sent }
        })
    }

    /// Full stop, then start. Not atomic with respect to other invocations.
    pub fn restart(&self) -> Result<()> {
        self.stop()?;
        self.start()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::task::TaskSet;
    use std::cell::RefCell;
    use std::fs;
    use std::io;
    use std::process::Command;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    /// Records what the PID-file said when detachment was attempted, then
    /// fails so no fork ever happens inside the test harness.
    struct RecordingDetacher {
        pid_file: PidFile,
        calls: RefCell<Vec<Option<i32>>>,
    }

    impl RecordingDetacher {
        fn new(identity: &ServiceIdentity) -> Self {
            Self {
                pid_file: PidFile::new(&identity.pid_file),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl Detach for RecordingDetacher {
        fn detach(&self, _identity: &ServiceIdentity) -> Result<DetachedContext> {
            self.calls.borrow_mut().push(self.pid_file.read());
            Err(DaemonError::Detach {
                stage: "fork #1",
                source: io::Error::other("detachment disabled in tests"),
            })
        }
    }

    fn identity(dir: &TempDir) -> ServiceIdentity {
        ServiceIdentity::new(dir.path().join("icdaemon.pid"))
            .with_stdout(dir.path().join("icdaemon.out"))
            .with_stderr(dir.path().join("icdaemon.err"))
    }

    fn config(kill_after: Option<Duration>) -> ServiceConfig {
        ServiceConfig {
            tasks: TaskSet::default(),
            debug_mode: true,
            task_sleep: Duration::ZERO,
            loop_sleep: Duration::ZERO,
            kill_after,
        }
    }

    fn dead_pid() -> i32 {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id() as i32;
        child.wait().unwrap();
        pid
    }

    /// Spawn `cmd` and reap it from a helper thread so it never lingers as a
    /// zombie that still accepts signals.
    fn spawn_reaped(cmd: &mut Command) -> (i32, thread::JoinHandle<std::process::ExitStatus>) {
        let mut child = cmd.spawn().unwrap();
        let pid = child.id() as i32;
        let waiter = thread::spawn(move || child.wait().unwrap());
        (pid, waiter)
    }

    #[test]
    fn start_refuses_when_pidfile_names_a_process() {
        let dir = tempdir().unwrap();
        let identity = identity(&dir);
        fs::write(&identity.pid_file, format!("{}\n", std::process::id())).unwrap();
        let detacher = RecordingDetacher::new(&identity);
        let controller = LifecycleController::with_detacher(identity.clone(), config(None), &detacher);

        let err = controller.start().unwrap_err();

        assert!(matches!(err, DaemonError::AlreadyRunning { .. }));
        assert_eq!(err.exit_code(), 1);
        assert!(detacher.calls.borrow().is_empty());
        assert_eq!(
            fs::read_to_string(&identity.pid_file).unwrap(),
            format!("{}\n", std::process::id())
        );
    }

    #[test]
    fn start_detaches_when_no_pidfile() {
        let dir = tempdir().unwrap();
        let identity = identity(&dir);
        let detacher = RecordingDetacher::new(&identity);
        let controller = LifecycleController::with_detacher(identity, config(None), &detacher);

        let err = controller.start().unwrap_err();

        assert!(matches!(err, DaemonError::Detach { .. }));
        assert_eq!(*detacher.calls.borrow(), vec![None]);
    }

    #[test]
    fn stop_without_pidfile_is_a_no_op() {
        let dir = tempdir().unwrap();
        let controller = LifecycleController::new(identity(&dir), config(None));

        assert_eq!(controller.stop().unwrap(), StopOutcome::NotRunning);
        assert_eq!(controller.state(), ServiceState::NotRunning);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn stop_with_stale_pidfile_removes_it() {
        let dir = tempdir().unwrap();
        let identity = identity(&dir);
        let pid = dead_pid();
        fs::write(&identity.pid_file, format!("{}\n", pid)).unwrap();
        let controller = LifecycleController::new(identity.clone(), config(None));
        assert_eq!(controller.state(), ServiceState::Running);

        assert_eq!(controller.stop().unwrap(), StopOutcome::Stale { pid });
        assert!(!identity.pid_file.exists());
        assert_eq!(controller.state(), ServiceState::NotRunning);
    }

    #[test]
    fn stop_terminates_live_process_and_removes_pidfile() {
        let dir = tempdir().unwrap();
        let identity = identity(&dir);
        let (pid, waiter) = spawn_reaped(Command::new("sleep").arg("30"));
        fs::write(&identity.pid_file, format!("{}\n", pid)).unwrap();
        let controller = LifecycleController::new(identity.clone(), config(None));

        match controller.stop().unwrap() {
            StopOutcome::Stopped { pid: stopped, signals_sent } => {
                assert_eq!(stopped, pid);
                assert!(signals_sent >= 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!identity.pid_file.exists());
        assert!(!waiter.join().unwrap().success());
    }

    #[test]
    fn stop_escalates_after_kill_after() {
        let dir = tempdir().unwrap();
        let identity = identity(&dir);
        let (pid, waiter) = spawn_reaped(Command::new("sh").args(["-c", "trap '' TERM; exec sleep 30"]));
        fs::write(&identity.pid_file, format!("{}\n", pid)).unwrap();
        let controller =
            LifecycleController::new(identity.clone(), config(Some(Duration::from_millis(300))));

        assert!(matches!(controller.stop().unwrap(), StopOutcome::Stopped { .. }));
        assert!(!identity.pid_file.exists());
        assert!(!waiter.join().unwrap().success());
    }

    #[test]
    fn restart_stops_before_starting() {
        let dir = tempdir().unwrap();
        let identity = identity(&dir);
        fs::write(&identity.pid_file, format!("{}\n", dead_pid())).unwrap();
        let detacher = RecordingDetacher::new(&identity);
        let controller = LifecycleController::with_detacher(identity.clone(), config(None), &detacher);

        assert!(controller.restart().is_err());

        // detachment saw the pidfile already cleared by the stop
        assert_eq!(*detacher.calls.borrow(), vec![None]);
        assert!(!identity.pid_file.exists());
    }

    #[test]
    fn restart_from_not_running_still_starts() {
        let dir = tempdir().unwrap();
        let identity = identity(&dir);
        let detacher = RecordingDetacher::new(&identity);
        let controller = LifecycleController::with_detacher(identity, config(None), &detacher);

        assert!(matches!(controller.restart(), Err(DaemonError::Detach { .. })));
        assert_eq!(detacher.calls.borrow().len(), 1);
    }
}
