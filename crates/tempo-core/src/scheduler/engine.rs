//! Engine operations.
//!
//! `*_locked` メソッドは呼び出し側がロックを取得済みであることを前提に
//! `&mut SchedulerState` を受け取ります。1 つの操作が別の操作を内部で呼ぶ場合
//! （recurring task の削除 → iteration のキャンセルなど）も、ロックを取り直さずに
//! そのまま state を渡します。

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::dependency::should_start;
use super::state::{ActiveWorker, SchedulerState};
use crate::config::SchedulerConfig;
use crate::domain::{RecurringTask, RecurringTaskId, TaskId, TaskRecord, TaskState};
use crate::error::{SchedulerError, StoreError, TaskSet};
use crate::ports::{Alert, AlertKind, AlertSink, Clock, IdGenerator, TaskBackingStore};
use crate::runtime::{TaskBody, TaskRegistry};
use crate::worker::{Assignment, CompletionSink, WorkerHandle, WorkerId};

pub(crate) struct SchedulerInner {
    pub state: Mutex<SchedulerState>,
    pub store: Arc<dyn TaskBackingStore>,
    pub registry: Arc<TaskRegistry>,
    pub clock: Arc<dyn Clock>,
    pub alerts: Arc<dyn AlertSink>,
    pub ids: Arc<dyn IdGenerator>,
    pub config: SchedulerConfig,
    /// Wakes the control loop early (new submission, finished task).
    pub wake: Arc<Notify>,
    pub shutdown: watch::Sender<bool>,
    pub control_loop: Mutex<Option<JoinHandle<()>>>,
    me: Weak<SchedulerInner>,
}

impl SchedulerInner {
    pub fn new(
        store: Arc<dyn TaskBackingStore>,
        registry: Arc<TaskRegistry>,
        clock: Arc<dyn Clock>,
        alerts: Arc<dyn AlertSink>,
        ids: Arc<dyn IdGenerator>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new_cyclic(|me| Self {
            state: Mutex::new(SchedulerState::new()),
            store,
            registry,
            clock,
            alerts,
            ids,
            config,
            wake: Arc::new(Notify::new()),
            shutdown,
            control_loop: Mutex::new(None),
            me: me.clone(),
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ------------------------------------------------------------------
    // submission
    // ------------------------------------------------------------------

    /// Check the allow-list and build the task's body.
    pub fn build_body(&self, task: &TaskRecord) -> Result<Arc<dyn TaskBody>, SchedulerError> {
        if !self.config.is_allowed(&task.task_type) {
            return Err(SchedulerError::TaskTypeNotAllowed(task.task_type.clone()));
        }
        self.registry.instantiate(task)
    }

    pub fn submit_locked(
        &self,
        st: &mut SchedulerState,
        mut task: TaskRecord,
        persist: bool,
    ) -> Result<TaskRecord, SchedulerError> {
        if st.tasks.contains_key(&task.id) {
            return Err(SchedulerError::DuplicateTaskId(task.id));
        }
        if let Some(missing) = task.dependencies.iter().find(|d| !st.tasks.contains_key(*d)) {
            return Err(SchedulerError::MissingDependency {
                task: task.id.clone(),
                dependency: missing.clone(),
            });
        }

        let now = self.now();
        if task.scheduled_start.is_none() {
            task.scheduled_start = Some(now);
        }
        let body = if !task.state.is_done() || is_cancelled_iteration(&task) {
            Some(self.build_body(&task)?)
        } else {
            None
        };

        let state = should_start(&task, |id| st.state_of(id), st.accepting, now);
        if state.is_done() {
            task.mark_done(state, now);
        } else {
            task.state = state;
        }

        let id = task.id.clone();
        debug!(task_id = %id, state = %state, "task submitted");
        st.tasks.insert(id.clone(), task);

        if state == TaskState::Running {
            if let Some(body) = body {
                self.dispatch_locked(st, &id, body);
            }
        } else if state.is_done() && !st.tasks.get(&id).is_some_and(is_cancelled_iteration) {
            st.insert_into(&id, TaskSet::Completed);
        } else {
            st.insert_into(&id, TaskSet::Pending);
            if let Some(body) = body {
                st.bodies.insert(id.clone(), body);
            }
        }

        if persist {
            self.persist_locked(st);
        }
        self.wake.notify_one();

        st.tasks
            .get(&id)
            .cloned()
            .ok_or(SchedulerError::NoSuchTask(id))
    }

    // ------------------------------------------------------------------
    // dispatch / completion
    // ------------------------------------------------------------------

    fn acquire_worker(&self, st: &mut SchedulerState) -> WorkerHandle {
        if let Some(worker) = st.idle.pop_front() {
            return worker;
        }
        let id = st.next_worker_id;
        st.next_worker_id += 1;
        let sink: Weak<dyn CompletionSink> = self.me.clone();
        debug!(worker_id = id, "spawning worker");
        WorkerHandle::spawn(id, sink)
    }

    /// Move a task (already removed from pending, or never in it) to running
    /// and hand it to a worker.
    pub fn dispatch_locked(&self, st: &mut SchedulerState, id: &TaskId, body: Arc<dyn TaskBody>) {
        if st.active.contains_key(id) {
            error!(task_id = %id, "task is already assigned to a worker");
            return;
        }
        let Some(task) = st.tasks.get_mut(id) else {
            return;
        };
        task.state = TaskState::Running;
        st.insert_into(id, TaskSet::Running);

        let (interrupt_tx, interrupt_rx) = watch::channel(None);
        let mut assignment = Assignment {
            task_id: id.clone(),
            body: Arc::clone(&body),
            interrupt_rx,
        };

        // An idle worker can only be gone if its runtime is shutting down;
        // fall through to a fresh one before giving up.
        for _ in 0..2 {
            let worker = self.acquire_worker(st);
            match worker.assign(assignment) {
                Ok(()) => {
                    debug!(task_id = %id, worker_id = worker.id(), "task dispatched");
                    st.active.insert(
                        id.clone(),
                        ActiveWorker {
                            worker,
                            interrupt_tx,
                            body,
                            exit_after_task: false,
                        },
                    );
                    return;
                }
                Err(returned) => assignment = returned,
            }
        }

        error!(task_id = %id, "no worker could take the task");
        st.remove_from(id, TaskSet::Running);
        if let Some(task) = st.tasks.get_mut(id) {
            task.mark_done(TaskState::StoppedByError, self.clock.now());
        }
        st.insert_into(id, TaskSet::Completed);
    }

    /// Body for a pending task about to be dispatched.
    pub fn take_body(&self, st: &mut SchedulerState, id: &TaskId) -> Option<Arc<dyn TaskBody>> {
        if let Some(body) = st.bodies.remove(id) {
            return Some(body);
        }
        let task = st.tasks.get(id)?;
        match self.build_body(task) {
            Ok(body) => Some(body),
            Err(e) => {
                error!(task_id = %id, error = %e, "cannot build task body");
                None
            }
        }
    }

    /// Record a finished task. Returns whether the worker should stay in the pool.
    pub fn finish_locked(
        &self,
        st: &mut SchedulerState,
        worker_id: WorkerId,
        id: &TaskId,
        state: TaskState,
    ) -> bool {
        let Some(active) = st.active.remove(id) else {
            warn!(task_id = %id, worker_id, "finished task has no active worker");
            return false;
        };
        if st.stopped {
            return false;
        }

        let now = self.now();
        st.remove_from(id, TaskSet::Running);
        let recurring_id = match st.tasks.get_mut(id) {
            Some(task) => {
                task.state = state;
                task.completion_time = Some(now);
                task.recurring_task_id.clone()
            }
            None => None,
        };
        st.insert_into(id, TaskSet::Completed);
        info!(task_id = %id, worker_id, state = %state, "task finished");

        if let Some(recurring_id) = recurring_id {
            self.schedule_next_iteration_locked(st, &recurring_id, now);
        }
        self.persist_locked(st);
        self.wake.notify_one();

        if active.exit_after_task || !st.accepting {
            false
        } else {
            st.idle.push_back(active.worker);
            true
        }
    }

    /// Submit the iteration after `now`, replacing a completed task with the same id.
    fn schedule_next_iteration_locked(
        &self,
        st: &mut SchedulerState,
        recurring_id: &RecurringTaskId,
        now: DateTime<Utc>,
    ) {
        let Some(recurring) = st.recurring.get(recurring_id).cloned() else {
            return;
        };
        let next = match recurring.next_iteration(now) {
            Ok(next) => next,
            Err(e) => {
                self.alert_recurring(recurring_id, &e.to_string());
                return;
            }
        };

        self.take_place_of_completed(st, &next.id);
        match self.submit_locked(st, next, false) {
            Ok(task) => debug!(recurring_id = %recurring_id, task_id = %task.id, "next iteration scheduled"),
            // already replayed from the backing store
            Err(SchedulerError::DuplicateTaskId(id)) => {
                debug!(recurring_id = %recurring_id, task_id = %id, "iteration already scheduled")
            }
            Err(e) => self.alert_recurring(recurring_id, &e.to_string()),
        }
    }

    fn take_place_of_completed(&self, st: &mut SchedulerState, id: &TaskId) {
        if st.is_in(id, TaskSet::Completed) {
            st.remove_from(id, TaskSet::Completed);
            st.tasks.remove(id);
        }
    }

    fn alert_recurring(&self, recurring_id: &RecurringTaskId, reason: &str) {
        let message = format!("cannot schedule next iteration of recurring task {recurring_id}: {reason}");
        error!(recurring_id = %recurring_id, error = %reason, "cannot schedule recurring iteration");
        self.alerts
            .alert(Alert::new(AlertKind::CannotScheduleRecurringIteration, message));
    }

    // ------------------------------------------------------------------
    // administrative operations
    // ------------------------------------------------------------------

    pub fn add_recurring_locked(
        &self,
        st: &mut SchedulerState,
        recurring: RecurringTask,
        schedule_iteration: bool,
        persist: bool,
    ) -> Result<RecurringTask, SchedulerError> {
        if st.recurring.contains_key(&recurring.id) {
            return Err(SchedulerError::DuplicateRecurringId(recurring.id));
        }
        if !self.config.is_allowed(&recurring.task_type) {
            return Err(SchedulerError::TaskTypeNotAllowed(recurring.task_type));
        }
        if !self.registry.contains(&recurring.task_type) {
            return Err(SchedulerError::UnknownTaskType(recurring.task_type));
        }

        if schedule_iteration {
            let next = recurring.next_iteration(self.now())?;
            self.take_place_of_completed(st, &next.id);
            match self.submit_locked(st, next, false) {
                Ok(_) | Err(SchedulerError::DuplicateTaskId(_)) => {}
                Err(e) => return Err(e),
            }
        }

        info!(recurring_id = %recurring.id, schedule = %recurring.schedule, "recurring task added");
        st.recurring.insert(recurring.id.clone(), recurring.clone());
        if persist {
            self.persist_locked(st);
        }
        Ok(recurring)
    }

    /// Remove a recurring definition and the iterations that have not started.
    ///
    /// Pending iterations are cancelled, then every completed iteration is
    /// dropped. A running iteration is left alone and will not be re-armed.
    /// Tasks that depend on a dropped iteration no longer find it and treat
    /// the dependency as satisfied.
    pub fn remove_recurring_locked(
        &self,
        st: &mut SchedulerState,
        id: &RecurringTaskId,
    ) -> Result<RecurringTask, SchedulerError> {
        let recurring = st
            .recurring
            .remove(id)
            .ok_or_else(|| SchedulerError::NoSuchRecurringTask(id.clone()))?;

        let now = self.now();
        let iterations: Vec<TaskId> = st
            .tasks
            .values()
            .filter(|t| t.recurring_task_id.as_ref() == Some(id))
            .map(|t| t.id.clone())
            .collect();

        for task_id in &iterations {
            if st.is_in(task_id, TaskSet::Pending) {
                self.retire_pending_locked(st, task_id, TaskState::CanceledBeforeStarting, now);
            }
        }
        for task_id in &iterations {
            if st.is_in(task_id, TaskSet::Completed) {
                st.remove_from(task_id, TaskSet::Completed);
                st.tasks.remove(task_id);
            }
        }

        info!(recurring_id = %id, "recurring task removed");
        self.persist_locked(st);
        Ok(recurring)
    }

    /// Move a pending task to completed in the given (done) state.
    pub fn retire_pending_locked(
        &self,
        st: &mut SchedulerState,
        id: &TaskId,
        state: TaskState,
        now: DateTime<Utc>,
    ) {
        st.remove_from(id, TaskSet::Pending);
        st.bodies.remove(id);
        if let Some(task) = st.tasks.get_mut(id) {
            task.mark_done(state, now);
        }
        st.insert_into(id, TaskSet::Completed);
    }

    /// Cancel a task that has not started.
    ///
    /// Anything not pending comes back unchanged. A recurring iteration stays in
    /// pending as cancelled: it is still dispatched when its start time comes
    /// so that it schedules its successor.
    pub fn cancel_locked(
        &self,
        st: &mut SchedulerState,
        id: &TaskId,
    ) -> Result<TaskRecord, SchedulerError> {
        let task = st
            .tasks
            .get(id)
            .ok_or_else(|| SchedulerError::NoSuchTask(id.clone()))?;
        if !task.state.is_pending() {
            return Ok(task.clone());
        }

        let now = self.now();
        if task.is_recurring() {
            if let Some(task) = st.tasks.get_mut(id) {
                task.mark_done(TaskState::CanceledBeforeStarting, now);
            }
        } else {
            self.retire_pending_locked(st, id, TaskState::CanceledBeforeStarting, now);
        }
        info!(task_id = %id, "task cancelled");
        self.persist_locked(st);

        st.tasks
            .get(id)
            .cloned()
            .ok_or_else(|| SchedulerError::NoSuchTask(id.clone()))
    }

    fn check_in(st: &SchedulerState, id: &TaskId, expected: TaskSet) -> Result<(), SchedulerError> {
        if !st.tasks.contains_key(id) {
            return Err(SchedulerError::NoSuchTask(id.clone()));
        }
        if !st.is_in(id, expected) {
            return Err(SchedulerError::NotInExpectedSet {
                id: id.clone(),
                expected,
            });
        }
        Ok(())
    }

    pub fn remove_pending_locked(
        &self,
        st: &mut SchedulerState,
        id: &TaskId,
    ) -> Result<TaskRecord, SchedulerError> {
        Self::check_in(st, id, TaskSet::Pending)?;
        st.remove_from(id, TaskSet::Pending);
        st.bodies.remove(id);
        let task = st
            .tasks
            .remove(id)
            .ok_or_else(|| SchedulerError::NoSuchTask(id.clone()))?;
        info!(task_id = %id, "pending task removed");
        self.persist_locked(st);
        Ok(task)
    }

    pub fn remove_completed_locked(
        &self,
        st: &mut SchedulerState,
        id: &TaskId,
    ) -> Result<TaskRecord, SchedulerError> {
        Self::check_in(st, id, TaskSet::Completed)?;
        st.remove_from(id, TaskSet::Completed);
        let task = st
            .tasks
            .remove(id)
            .ok_or_else(|| SchedulerError::NoSuchTask(id.clone()))?;
        info!(task_id = %id, "completed task removed");
        self.persist_locked(st);
        Ok(task)
    }

    // ------------------------------------------------------------------
    // persistence
    // ------------------------------------------------------------------

    /// Write the snapshot. Failures are logged and alerted, never returned.
    pub fn persist_locked(&self, st: &SchedulerState) {
        if st.stopped {
            return;
        }
        // blocking file I/O under the state lock; writes stay in mutation order
        if let Err(e) = self.store.write_snapshot(&st.snapshot()) {
            error!(error = %e, "cannot persist scheduler state");
            self.alerts.alert(Alert::new(alert_kind_for(&e), e.to_string()));
        }
    }
}

/// Cancelled iterations wait in pending so that they still re-arm their
/// recurring task.
pub(super) fn is_cancelled_iteration(task: &TaskRecord) -> bool {
    task.is_recurring() && task.state == TaskState::CanceledBeforeStarting
}

fn alert_kind_for(err: &StoreError) -> AlertKind {
    match err {
        StoreError::RenameCurrent { .. } => AlertKind::CannotRenameCurrentFile,
        StoreError::RenameNew { .. } => AlertKind::CannotRenameNewFile,
        StoreError::Read { .. }
        | StoreError::Write { .. }
        | StoreError::Encode(_)
        | StoreError::Unavailable(_) => AlertKind::CannotWriteFile,
    }
}

#[async_trait]
impl CompletionSink for SchedulerInner {
    async fn task_finished(&self, worker_id: WorkerId, task_id: &TaskId, state: TaskState) -> bool {
        let mut st = self.state.lock().await;
        self.finish_locked(&mut st, worker_id, task_id, state)
    }
}
