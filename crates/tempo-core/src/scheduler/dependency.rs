//! Start decision for a single task.

use chrono::{DateTime, Utc};

use crate::domain::{FailedDependencyAction, TaskId, TaskRecord, TaskState};

/// Decide which state `task` should be in right now.
///
/// 1. A done task keeps its state.
/// 2. While the scheduler is not accepting runs: `Unscheduled`.
/// 3. A start time in the future: `WaitingOnStartTime`.
/// 4. Dependencies, in order:
///    - not done yet: `WaitingOnDependency`
///    - done but not successful: the task's failed-dependency action decides
///      (`Cancel` -> `CanceledBeforeStarting`, `Disable` -> `Disabled`,
///      `Process` -> treat as satisfied)
///    - unknown ids are skipped; they are rejected at submission.
/// 5. Otherwise `Running`.
///
/// Pure: the caller applies the cancellation when `CanceledBeforeStarting` comes back.
pub fn should_start<F>(
    task: &TaskRecord,
    dependency_state: F,
    accepting: bool,
    now: DateTime<Utc>,
) -> TaskState
where
    F: Fn(&TaskId) -> Option<TaskState>,
{
    if task.state.is_done() {
        return task.state;
    }

    if !accepting {
        return TaskState::Unscheduled;
    }

    if task.scheduled_start.is_some_and(|start| start > now) {
        return TaskState::WaitingOnStartTime;
    }

    for dependency in &task.dependencies {
        let Some(state) = dependency_state(dependency) else {
            continue;
        };
        if !state.is_done() {
            return TaskState::WaitingOnDependency;
        }
        if !state.is_successful() {
            match task.failed_dependency_action {
                FailedDependencyAction::Cancel => return TaskState::CanceledBeforeStarting,
                FailedDependencyAction::Disable => return TaskState::Disabled,
                FailedDependencyAction::Process => {}
            }
        }
    }

    TaskState::Running
}
