use thiserror::Error;

use crate::domain::{RecurringTaskId, TaskId, TaskType};
use crate::schedule::ScheduleError;

/// Which scheduler set an administrative operation expected the task in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSet {
    Pending,
    Running,
    Completed,
}

impl std::fmt::Display for TaskSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TaskSet::Pending => "pending",
            TaskSet::Running => "running",
            TaskSet::Completed => "completed",
        })
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("malformed schedule: {0}")]
    MalformedSchedule(#[source] ScheduleError),

    #[error("unsatisfiable schedule: {0}")]
    UnsatisfiableSchedule(#[source] ScheduleError),

    #[error("a task with id {0} already exists")]
    DuplicateTaskId(TaskId),

    #[error("a recurring task with id {0} already exists")]
    DuplicateRecurringId(RecurringTaskId),

    #[error("task {task} depends on {dependency}, which does not exist")]
    MissingDependency { task: TaskId, dependency: TaskId },

    #[error("no task with id {0}")]
    NoSuchTask(TaskId),

    #[error("no recurring task with id {0}")]
    NoSuchRecurringTask(RecurringTaskId),

    #[error("task {id} is not {expected}")]
    NotInExpectedSet { id: TaskId, expected: TaskSet },

    #[error("task type {0} is not allowed")]
    TaskTypeNotAllowed(TaskType),

    #[error("no task implementation registered for type {0}")]
    UnknownTaskType(TaskType),

    #[error("invalid payload for task type {task_type}: {reason}")]
    InvalidPayload { task_type: TaskType, reason: String },

    #[error("the scheduler has been stopped")]
    Stopped,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ScheduleError> for SchedulerError {
    fn from(err: ScheduleError) -> Self {
        if err.is_malformed() {
            SchedulerError::MalformedSchedule(err)
        } else {
            SchedulerError::UnsatisfiableSchedule(err)
        }
    }
}

/// Task implementation registration failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate task implementation for type {0}")]
    DuplicateTaskType(TaskType),
}

/// Backing store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot rename current file {from} to {to}: {source}")]
    RenameCurrent {
        from: String,
        to: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot rename new file {from} to {to}: {source}")]
    RenameNew {
        from: String,
        to: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
