//! Scheduler state guarded by the single engine lock.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::domain::{RecurringTask, RecurringTaskId, TaskId, TaskRecord, TaskState};
use crate::error::TaskSet;
use crate::observability::SchedulerCounts;
use crate::ports::StoreRecord;
use crate::runtime::{Interruption, TaskBody};
use crate::worker::{WorkerHandle, WorkerId};

/// Ordering key for the task sets: (time, id).
///
/// pending / running は開始時刻順、completed は完了時刻順に並びます。
pub(crate) type TaskKey = (DateTime<Utc>, TaskId);

/// A worker currently executing a task.
pub(crate) struct ActiveWorker {
    pub worker: WorkerHandle,
    pub interrupt_tx: watch::Sender<Option<Interruption>>,
    pub body: Arc<dyn TaskBody>,
    /// Set by an interrupt request; the worker exits instead of going idle.
    pub exit_after_task: bool,
}

/// Invariants:
/// - every id in `tasks` is in exactly one of pending / running / completed
/// - `active` has an entry for each running task, and only those
/// - done-state tasks sit in completed, except cancelled recurring iterations,
///   which wait in pending until their start time
#[derive(Default)]
pub(crate) struct SchedulerState {
    pub tasks: HashMap<TaskId, TaskRecord>,
    pub recurring: BTreeMap<RecurringTaskId, RecurringTask>,
    pub pending: BTreeSet<TaskKey>,
    pub running: BTreeSet<TaskKey>,
    pub completed: BTreeSet<TaskKey>,

    /// Bodies built at submission, waiting for dispatch.
    pub bodies: HashMap<TaskId, Arc<dyn TaskBody>>,
    pub active: HashMap<TaskId, ActiveWorker>,
    pub idle: VecDeque<WorkerHandle>,
    pub next_worker_id: WorkerId,

    /// Tasks may start only while this is set.
    pub accepting: bool,
    /// Once stopped, the scheduler neither runs nor persists anything.
    pub stopped: bool,
}

impl SchedulerState {
    pub fn new() -> Self {
        Self {
            next_worker_id: 1,
            ..Self::default()
        }
    }

    fn start_key(task: &TaskRecord) -> TaskKey {
        (
            task.scheduled_start.unwrap_or(DateTime::<Utc>::MIN_UTC),
            task.id.clone(),
        )
    }

    fn completion_key(task: &TaskRecord) -> TaskKey {
        (
            task.completion_time.unwrap_or(DateTime::<Utc>::MIN_UTC),
            task.id.clone(),
        )
    }

    fn key_for(&self, id: &TaskId, set: TaskSet) -> Option<TaskKey> {
        let task = self.tasks.get(id)?;
        Some(match set {
            TaskSet::Pending | TaskSet::Running => Self::start_key(task),
            TaskSet::Completed => Self::completion_key(task),
        })
    }

    fn set_mut(&mut self, set: TaskSet) -> &mut BTreeSet<TaskKey> {
        match set {
            TaskSet::Pending => &mut self.pending,
            TaskSet::Running => &mut self.running,
            TaskSet::Completed => &mut self.completed,
        }
    }

    /// Add a task (already in `tasks`) to a set.
    pub fn insert_into(&mut self, id: &TaskId, set: TaskSet) {
        if let Some(key) = self.key_for(id, set) {
            self.set_mut(set).insert(key);
        }
    }

    /// Remove a task from a set; the task stays in `tasks`.
    pub fn remove_from(&mut self, id: &TaskId, set: TaskSet) -> bool {
        match self.key_for(id, set) {
            Some(key) => self.set_mut(set).remove(&key),
            None => false,
        }
    }

    pub fn is_in(&self, id: &TaskId, set: TaskSet) -> bool {
        let Some(key) = self.key_for(id, set) else {
            return false;
        };
        match set {
            TaskSet::Pending => self.pending.contains(&key),
            TaskSet::Running => self.running.contains(&key),
            TaskSet::Completed => self.completed.contains(&key),
        }
    }

    pub fn location(&self, id: &TaskId) -> Option<TaskSet> {
        [TaskSet::Pending, TaskSet::Running, TaskSet::Completed]
            .into_iter()
            .find(|set| self.is_in(id, *set))
    }

    pub fn state_of(&self, id: &TaskId) -> Option<TaskState> {
        self.tasks.get(id).map(|t| t.state)
    }

    pub fn ids_in(&self, set: TaskSet) -> Vec<TaskId> {
        let keys = match set {
            TaskSet::Pending => &self.pending,
            TaskSet::Running => &self.running,
            TaskSet::Completed => &self.completed,
        };
        keys.iter().map(|(_, id)| id.clone()).collect()
    }

    pub fn records_in(&self, set: TaskSet) -> Vec<TaskRecord> {
        self.ids_in(set)
            .iter()
            .filter_map(|id| self.tasks.get(id).cloned())
            .collect()
    }

    /// Full snapshot in replay order: root, recurring definitions, then
    /// completed, running and pending tasks.
    pub fn snapshot(&self) -> Vec<StoreRecord> {
        let mut records = Vec::with_capacity(1 + self.recurring.len() + self.tasks.len());
        records.push(StoreRecord::root());
        records.extend(self.recurring.values().cloned().map(StoreRecord::Recurring));
        for set in [TaskSet::Completed, TaskSet::Running, TaskSet::Pending] {
            records.extend(self.records_in(set).into_iter().map(StoreRecord::Task));
        }
        records
    }

    pub fn counts(&self) -> SchedulerCounts {
        SchedulerCounts {
            pending: self.pending.len(),
            running: self.running.len(),
            completed: self.completed.len(),
            recurring: self.recurring.len(),
            idle_workers: self.idle.len(),
            active_workers: self.active.len(),
        }
    }

    /// Drop every task and every idle worker.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.running.clear();
        self.completed.clear();
        self.tasks.clear();
        self.bodies.clear();
        // dropping the handles closes their channels, so idle workers exit
        self.idle.clear();
    }
}
