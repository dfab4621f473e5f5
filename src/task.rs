//! Tasks executed by the daemon loop
//!
//! A task is an opaque zero-argument action. Whatever it does, running it
//! produces a [`TaskOutcome`], so a failure is a value the loop inspects
//! rather than something that unwinds through it.

use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::process::Command;
use std::sync::Once;

/// What a task action returns
pub type TaskResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Action = Box<dyn Fn() -> TaskResult + Send + Sync>;

thread_local! {
    static SILENT_PANICS: Cell<bool> = const { Cell::new(false) };
}

static PANIC_HOOK: Once = Once::new();

/// Wrap the process panic hook once so a thread can mute it while it runs a
/// task.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !SILENT_PANICS.with(Cell::get) {
                previous(info);
            }
        }));
    });
}

/// Result of one task invocation
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Succeeded,
    /// The action returned an error; holds the error and its source chain
    Failed(String),
    /// The action panicked; holds the panic message
    Panicked(String),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded)
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Succeeded => write!(f, "ok"),
            TaskOutcome::Failed(msg) => write!(f, "failed: {}", msg),
            TaskOutcome::Panicked(msg) => write!(f, "panicked: {}", msg),
        }
    }
}

/// A named unit of work run once per loop cycle
pub struct Task {
    name: String,
    action: Action,
}

impl Task {
    pub fn new<F>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> TaskResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            action: Box::new(action),
        }
    }

    /// Task that runs `program` to completion and fails on a non-zero exit.
    ///
    /// The child inherits the daemon's standard streams.
    pub fn command(name: &str, program: &str, args: &[String]) -> Self {
        let program = program.to_string();
        let args = args.to_vec();
        Self::new(name, move || {
            let status = Command::new(&program).args(&args).status()?;
            if status.success() {
                Ok(())
            } else {
                Err(format!("{} exited with {}", program, status).into())
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the action, capturing both returned errors and panics
    pub fn invoke(&self) -> TaskOutcome {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.action)())) {
            Ok(Ok(())) => TaskOutcome::Succeeded,
            Ok(Err(err)) => TaskOutcome::Failed(error_chain(err.as_ref())),
            Err(payload) => TaskOutcome::Panicked(panic_message(payload.as_ref())),
        }
    }

    /// Like [`Task::invoke`], but a panic is not reported by the panic hook.
    /// The message is still carried in the outcome.
    pub fn invoke_silently(&self) -> TaskOutcome {
        install_panic_hook();
        let was_silent = SILENT_PANICS.with(|silent| silent.replace(true));
        let outcome = self.invoke();
        SILENT_PANICS.with(|silent| silent.set(was_silent));
        outcome
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("name", &self.name).finish_non_exhaustive()
    }
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": caused by: ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Ordered, fixed list of tasks
#[derive(Debug, Default)]
pub struct TaskSet {
    tasks: Vec<Task>,
}

impl TaskSet {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Task> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl FromIterator<Task> for TaskSet {
    fn from_iter<I: IntoIterator<Item = Task>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a TaskSet {
    type Item = &'a Task;
    type IntoIter = std::slice::Iter<'a, Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn successful_action() {
        let task = Task::new("ok", || Ok(()));
        assert_eq!(task.invoke(), TaskOutcome::Succeeded);
        assert_eq!(task.name(), "ok");
    }

    #[test]
    fn returned_error_is_captured_with_its_source() {
        #[derive(Debug)]
        struct Outer(io::Error);
        impl fmt::Display for Outer {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "sync failed")
            }
        }
        impl std::error::Error for Outer {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                Some(&self.0)
            }
        }

        let task = Task::new("sync", || {
            Err(Outer(io::Error::new(io::ErrorKind::Other, "disk gone")).into())
        });
        match task.invoke() {
            TaskOutcome::Failed(msg) => {
                assert!(msg.contains("sync failed"));
                assert!(msg.contains("disk gone"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn panic_is_captured() {
        let task = Task::new("boom", || panic!("exploded"));
        assert_eq!(task.invoke(), TaskOutcome::Panicked("exploded".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn silent_invoke_still_captures_the_panic() {
        let task = Task::new("boom", || panic!("quiet boom"));
        assert_eq!(
            task.invoke_silently(),
            TaskOutcome::Panicked("quiet boom".to_string())
        );
        assert!(!SILENT_PANICS.with(Cell::get));
    }

    #[test]
    fn command_task_reports_exit_status() {
        assert!(Task::command("true", "true", &[]).invoke().is_success());
        assert!(matches!(
            Task::command("false", "false", &[]).invoke(),
            TaskOutcome::Failed(_)
        ));
        assert!(matches!(
            Task::command("missing", "/nonexistent/icdaemon-task", &[]).invoke(),
            TaskOutcome::Failed(_)
        ));
    }

    #[test]
    fn task_set_preserves_order() {
        let set: TaskSet = ["a", "b", "c"]
            .into_iter()
            .map(|name| Task::new(name, || Ok(())))
            .collect();
        let names: Vec<&str> = set.iter().map(Task::name).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(set.len(), 3);
    }
}
