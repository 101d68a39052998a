//! Task state machine and failed-dependency policy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Task state.
///
/// State transitions:
/// - Unscheduled / WaitingOnStartTime / WaitingOnDependency -> Running -> (done)
/// - (pending) -> CanceledBeforeStarting (admin cancel or failed dependency with `Cancel`)
/// - (pending) -> Disabled (failed dependency with `Disable`)
///
/// `Recurring` is only ever carried by a recurring task definition, never by a
/// concrete execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Known to the scheduler but the scheduler is not accepting runs yet.
    Unscheduled,

    /// Needs an administrator to re-enable it (a dependency failed).
    Disabled,

    /// Scheduled start time is in the future.
    WaitingOnStartTime,

    /// At least one dependency has not finished yet.
    WaitingOnDependency,

    /// Currently being executed by a worker.
    Running,

    /// Placeholder for recurring task definitions.
    Recurring,

    /// Finished without problems.
    CompletedSuccessfully,

    /// Finished, but reported non-fatal errors along the way.
    CompletedWithErrors,

    /// Interrupted because the scheduler was shutting down.
    StoppedByShutdown,

    /// Failed.
    StoppedByError,

    /// Interrupted by an administrator while running.
    StoppedByAdministrator,

    /// Cancelled while still pending.
    CanceledBeforeStarting,
}

impl TaskState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_done(self) -> bool {
        matches!(
            self,
            TaskState::CompletedSuccessfully
                | TaskState::CompletedWithErrors
                | TaskState::StoppedByShutdown
                | TaskState::StoppedByError
                | TaskState::StoppedByAdministrator
                | TaskState::CanceledBeforeStarting
        )
    }

    /// Is this a terminal state that dependents may treat as a success?
    pub fn is_successful(self) -> bool {
        self == TaskState::CompletedSuccessfully
    }

    /// Has the task not been dispatched yet?
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            TaskState::Unscheduled
                | TaskState::Disabled
                | TaskState::WaitingOnStartTime
                | TaskState::WaitingOnDependency
        )
    }

    pub fn is_cancelled(self) -> bool {
        matches!(
            self,
            TaskState::CanceledBeforeStarting | TaskState::StoppedByAdministrator
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Unscheduled => "UNSCHEDULED",
            TaskState::Disabled => "DISABLED",
            TaskState::WaitingOnStartTime => "WAITING_ON_START_TIME",
            TaskState::WaitingOnDependency => "WAITING_ON_DEPENDENCY",
            TaskState::Running => "RUNNING",
            TaskState::Recurring => "RECURRING",
            TaskState::CompletedSuccessfully => "COMPLETED_SUCCESSFULLY",
            TaskState::CompletedWithErrors => "COMPLETED_WITH_ERRORS",
            TaskState::StoppedByShutdown => "STOPPED_BY_SHUTDOWN",
            TaskState::StoppedByError => "STOPPED_BY_ERROR",
            TaskState::StoppedByAdministrator => "STOPPED_BY_ADMINISTRATOR",
            TaskState::CanceledBeforeStarting => "CANCELED_BEFORE_STARTING",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to a task when one of its dependencies finishes unsuccessfully.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailedDependencyAction {
    /// Run the dependent task anyway.
    Process,

    /// Cancel the dependent task.
    #[default]
    Cancel,

    /// Disable the dependent task so an administrator has to re-enable it.
    Disable,
}

impl FromStr for FailedDependencyAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "process" => Ok(FailedDependencyAction::Process),
            "cancel" => Ok(FailedDependencyAction::Cancel),
            "disable" => Ok(FailedDependencyAction::Disable),
            other => Err(format!("unknown failed dependency action '{other}'")),
        }
    }
}
