//! Recurring task definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FailedDependencyAction, RecurringTaskId, TaskId, TaskRecord, TaskState, TaskType};
use crate::schedule::{Schedule, ScheduleError};

/// Template that spawns one concrete task per fire time of its schedule.
///
/// 定義自体は実行されません。スケジューラは常に「次の 1 回分」だけを
/// pending に持ち、それが終わった時点でさらに次の回を作ります。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringTask {
    pub id: RecurringTaskId,
    pub schedule: Schedule,
    pub task_type: TaskType,

    #[serde(default)]
    pub payload: serde_json::Value,

    #[serde(default)]
    pub failed_dependency_action: FailedDependencyAction,
}

impl RecurringTask {
    pub fn new(
        id: impl Into<RecurringTaskId>,
        schedule: Schedule,
        task_type: TaskType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            schedule,
            task_type,
            payload,
            failed_dependency_action: FailedDependencyAction::default(),
        }
    }

    /// Definitions always report `Recurring`.
    pub fn state(&self) -> TaskState {
        TaskState::Recurring
    }

    /// Build the iteration that fires next after `after`.
    ///
    /// The iteration ID is `<recurring id>-<yyyyMMddHHmmssSSS>` of its start time,
    /// so the same fire time always yields the same ID.
    pub fn next_iteration(&self, after: DateTime<Utc>) -> Result<TaskRecord, ScheduleError> {
        let start = self.schedule.next_after_in(&after)?;
        let mut task = TaskRecord::new(
            iteration_id(&self.id, start),
            self.task_type.clone(),
            self.payload.clone(),
        )
        .starting_at(start)
        .on_failed_dependency(self.failed_dependency_action);
        task.recurring_task_id = Some(self.id.clone());
        Ok(task)
    }
}

pub fn iteration_id(recurring: &RecurringTaskId, start: DateTime<Utc>) -> TaskId {
    TaskId::new(format!("{}-{}", recurring, start.format("%Y%m%d%H%M%S%3f")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn nightly() -> RecurringTask {
        RecurringTask::new(
            "nightly-backup",
            Schedule::parse("0 2 * * *").unwrap(),
            TaskType::new("backup"),
            serde_json::json!({"target": "/srv"}),
        )
    }

    #[test]
    fn next_iteration_is_derived_from_the_schedule() {
        let now = Utc.with_ymd_and_hms(2023, 1, 1, 2, 30, 0).unwrap();
        let task = nightly().next_iteration(now).unwrap();

        let expected_start = Utc.with_ymd_and_hms(2023, 1, 2, 2, 0, 0).unwrap();
        assert_eq!(task.id.as_str(), "nightly-backup-20230102020000000");
        assert_eq!(task.scheduled_start, Some(expected_start));
        assert_eq!(task.recurring_task_id, Some(RecurringTaskId::new("nightly-backup")));
        assert_eq!(task.task_type, TaskType::new("backup"));
        assert_eq!(task.payload["target"], "/srv");
        assert_eq!(task.state, TaskState::Unscheduled);
    }

    #[test]
    fn same_fire_time_gives_the_same_iteration_id() {
        let a = Utc.with_ymd_and_hms(2023, 1, 1, 2, 30, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2023, 1, 1, 23, 59, 59).unwrap();
        let recurring = nightly();
        assert_eq!(
            recurring.next_iteration(a).unwrap().id,
            recurring.next_iteration(b).unwrap().id
        );
    }

    #[test]
    fn definition_serializes_schedule_as_text() {
        let json = serde_json::to_value(nightly()).unwrap();
        assert_eq!(json["schedule"], "0 2 * * *");
        assert_eq!(json["failed_dependency_action"], "cancel");
        let back: RecurringTask = serde_json::from_value(json).unwrap();
        assert_eq!(back, nightly());
        assert_eq!(back.state(), TaskState::Recurring);
    }
}
