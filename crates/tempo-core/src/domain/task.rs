use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{FailedDependencyAction, RecurringTaskId, TaskId, TaskState};

/// Name of a task implementation (looked up in the `TaskRegistry`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A schedulable unit of work, as the scheduler tracks and persists it.
///
/// Design:
/// - This is the "single source of truth" for a task's scheduling state.
/// - The pending/running/completed sets hold ordering keys only.
/// - The payload is opaque here; only the task body built from it knows its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub task_type: TaskType,

    #[serde(default)]
    pub payload: serde_json::Value,

    /// `None` means "as soon as possible"; filled in with the submission time.
    #[serde(default)]
    pub scheduled_start: Option<DateTime<Utc>>,

    #[serde(default)]
    pub dependencies: Vec<TaskId>,

    #[serde(default)]
    pub failed_dependency_action: FailedDependencyAction,

    pub state: TaskState,

    #[serde(default)]
    pub completion_time: Option<DateTime<Utc>>,

    /// Set for iterations spawned by a recurring task.
    #[serde(default)]
    pub recurring_task_id: Option<RecurringTaskId>,
}

impl TaskRecord {
    pub fn new(id: impl Into<TaskId>, task_type: TaskType, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            task_type,
            payload,
            scheduled_start: None,
            dependencies: Vec::new(),
            failed_dependency_action: FailedDependencyAction::default(),
            state: TaskState::Unscheduled,
            completion_time: None,
            recurring_task_id: None,
        }
    }

    pub fn starting_at(mut self, start: DateTime<Utc>) -> Self {
        self.scheduled_start = Some(start);
        self
    }

    pub fn depends_on(mut self, dependency: impl Into<TaskId>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn on_failed_dependency(mut self, action: FailedDependencyAction) -> Self {
        self.failed_dependency_action = action;
        self
    }

    pub fn is_recurring(&self) -> bool {
        self.recurring_task_id.is_some()
    }

    /// Record the final state of a task that leaves the pending or running set.
    ///
    /// A task that never ran gets its completion time here so that retention
    /// still applies to it.
    pub fn mark_done(&mut self, state: TaskState, at: DateTime<Utc>) {
        self.state = state;
        if self.completion_time.is_none() {
            self.completion_time = Some(at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn builder_fills_in_fields() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let task = TaskRecord::new("b", TaskType::new("export"), serde_json::json!({"x": 1}))
            .starting_at(start)
            .depends_on("a")
            .on_failed_dependency(FailedDependencyAction::Disable);

        assert_eq!(task.id.as_str(), "b");
        assert_eq!(task.scheduled_start, Some(start));
        assert_eq!(task.dependencies, vec![TaskId::new("a")]);
        assert_eq!(task.failed_dependency_action, FailedDependencyAction::Disable);
        assert_eq!(task.state, TaskState::Unscheduled);
        assert!(!task.is_recurring());
    }

    #[test]
    fn mark_done_keeps_an_existing_completion_time() {
        let first = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 3, 2, 12, 0, 0).unwrap();
        let mut task = TaskRecord::new("t", TaskType::new("noop"), serde_json::Value::Null);

        task.mark_done(TaskState::CanceledBeforeStarting, first);
        task.mark_done(TaskState::CanceledBeforeStarting, later);

        assert_eq!(task.completion_time, Some(first));
    }

    #[test]
    fn record_round_trips_through_json_with_defaults() {
        let json = r#"{"id":"t1","task_type":"backup","state":"WAITING_ON_DEPENDENCY"}"#;
        let task: TaskRecord = serde_json::from_str(json).unwrap();
        assert_eq!(task.failed_dependency_action, FailedDependencyAction::Cancel);
        assert!(task.dependencies.is_empty());
        assert_eq!(task.payload, serde_json::Value::Null);
    }
}
