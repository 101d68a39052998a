//! Scheduler engine.
//!
//! # 構成
//! - **state**: ロックで守られるインメモリ状態（task table と 3 つの集合）
//! - **dependency**: `should_start` の判定（純粋関数）
//! - **engine**: submit / cancel / remove / 完了通知などの操作
//! - **control_loop**: pending の再評価と dispatch、保持期間による削除
//! - **replay**: 起動時にバッキングストアから状態を復元
//!
//! すべての変更は単一の `tokio::sync::Mutex` の中で行います。
//! 内部で別の操作を呼ぶときは、ロックを取り直さずに `&mut SchedulerState` を渡します。

mod control_loop;
mod engine;
pub mod dependency;
mod replay;
mod state;


use std::sync::Arc;

use tracing::{info, warn};

use self::engine::SchedulerInner;
pub use self::dependency::should_start;
pub use self::replay::ReplaySummary;
use crate::config::SchedulerConfig;
use crate::domain::{RecurringTask, RecurringTaskId, TaskId, TaskRecord, TaskState};
use crate::error::{SchedulerError, TaskSet};
use crate::impls::FileBackingStore;
use crate::observability::SchedulerCounts;
use crate::ports::{
    AlertSink, Clock, IdGenerator, LogAlertSink, SystemClock, TaskBackingStore, UlidIdGenerator,
};
use crate::runtime::{Interruption, TaskRegistry};
use crate::worker::wait_exited;

/// SchedulerBuilder はスケジューラの依存関係をまとめて組み立てる
///
/// # 使用例
/// ```ignore
/// let scheduler = Scheduler::builder(config)
///     .registry(registry)
///     .store(Arc::new(FileBackingStore::new("tasks.jsonl")))
///     .open()
///     .await?;
/// scheduler.start().await;
/// ```
///
/// 指定しなかったものは本番用の実装になります
/// （`FileBackingStore`、`SystemClock`、`LogAlertSink`、ULID）。
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    registry: TaskRegistry,
    store: Option<Arc<dyn TaskBackingStore>>,
    clock: Option<Arc<dyn Clock>>,
    alerts: Option<Arc<dyn AlertSink>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl SchedulerBuilder {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            registry: TaskRegistry::new(),
            store: None,
            clock: None,
            alerts: None,
            ids: None,
        }
    }

    pub fn registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn store(mut self, store: Arc<dyn TaskBackingStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn alert_sink(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Build the engine and replay the backing store.
    ///
    /// A store that cannot be read at all is fatal. Nothing runs until
    /// [`Scheduler::start`].
    pub async fn open(self) -> Result<Scheduler, SchedulerError> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = self.store.unwrap_or_else(|| {
            Arc::new(FileBackingStore::new(self.config.backing_file.clone()))
        });
        let alerts = self.alerts.unwrap_or_else(|| Arc::new(LogAlertSink));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidIdGenerator::new(Arc::clone(&clock))));

        let inner = SchedulerInner::new(
            store,
            Arc::new(self.registry),
            clock,
            alerts,
            ids,
            self.config,
        );
        let summary = {
            let mut st = inner.state.lock().await;
            inner.replay_locked(&mut st)?
        };

        Ok(Scheduler { inner, summary })
    }
}

/// Handle to a running scheduler. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    summary: ReplaySummary,
}

impl Scheduler {
    pub fn builder(config: SchedulerConfig) -> SchedulerBuilder {
        SchedulerBuilder::new(config)
    }

    /// What startup replay restored.
    pub fn replay_summary(&self) -> &ReplaySummary {
        &self.summary
    }

    /// Start accepting runs and spawn the control loop.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        {
            let mut st = self.inner.state.lock().await;
            if st.stopped {
                return Err(SchedulerError::Stopped);
            }
            st.accepting = true;
        }

        let mut handle = self.inner.control_loop.lock().await;
        if handle.is_none() {
            let task = tokio::spawn(control_loop::run_control_loop(
                Arc::downgrade(&self.inner),
                self.inner.shutdown.subscribe(),
                Arc::clone(&self.inner.wake),
            ));
            *handle = Some(task);
            info!("scheduler started");
        }
        Ok(())
    }

    /// Start accepting runs without a control loop; ticks are driven by hand.
    #[cfg(test)]
    pub(crate) async fn begin_accepting(&self) {
        self.inner.state.lock().await.accepting = true;
    }

    /// Run one control-loop pass now.
    pub async fn tick(&self) -> Result<std::time::Duration, SchedulerError> {
        let mut st = self.inner.state.lock().await;
        if st.stopped {
            return Err(SchedulerError::Stopped);
        }
        Ok(self.inner.tick_locked(&mut st))
    }

    /// Submit a task. A missing start time means "now".
    pub async fn submit(&self, task: TaskRecord) -> Result<TaskRecord, SchedulerError> {
        let mut st = self.inner.state.lock().await;
        if st.stopped {
            return Err(SchedulerError::Stopped);
        }
        self.inner.submit_locked(&mut st, task, true)
    }

    /// Fresh id for a task submitted without one.
    pub fn new_task_id(&self) -> TaskId {
        self.inner.ids.generate_task_id()
    }

    /// Register a recurring task, optionally scheduling its first iteration now.
    pub async fn add_recurring(
        &self,
        recurring: RecurringTask,
        schedule_first: bool,
    ) -> Result<RecurringTask, SchedulerError> {
        let mut st = self.inner.state.lock().await;
        if st.stopped {
            return Err(SchedulerError::Stopped);
        }
        self.inner
            .add_recurring_locked(&mut st, recurring, schedule_first, true)
    }

    pub async fn remove_recurring(
        &self,
        id: &RecurringTaskId,
    ) -> Result<RecurringTask, SchedulerError> {
        let mut st = self.inner.state.lock().await;
        if st.stopped {
            return Err(SchedulerError::Stopped);
        }
        self.inner.remove_recurring_locked(&mut st, id)
    }

    /// Cancel a pending task. Running and finished tasks come back unchanged.
    pub async fn cancel(&self, id: &TaskId) -> Result<TaskRecord, SchedulerError> {
        let mut st = self.inner.state.lock().await;
        if st.stopped {
            return Err(SchedulerError::Stopped);
        }
        self.inner.cancel_locked(&mut st, id)
    }

    pub async fn remove_pending(&self, id: &TaskId) -> Result<TaskRecord, SchedulerError> {
        let mut st = self.inner.state.lock().await;
        if st.stopped {
            return Err(SchedulerError::Stopped);
        }
        self.inner.remove_pending_locked(&mut st, id)
    }

    pub async fn remove_completed(&self, id: &TaskId) -> Result<TaskRecord, SchedulerError> {
        let mut st = self.inner.state.lock().await;
        if st.stopped {
            return Err(SchedulerError::Stopped);
        }
        self.inner.remove_completed_locked(&mut st, id)
    }

    /// Stop the control loop and forget every task.
    ///
    /// Running tasks are not interrupted (see [`Scheduler::interrupt_running`]);
    /// their workers exit once they finish, and their results are discarded.
    /// Nothing is written to the backing store.
    pub async fn stop(&self) {
        // ignore send error: the loop may never have started
        let _ = self.inner.shutdown.send(true);
        self.inner.wake.notify_one();

        let handle = self.inner.control_loop.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "control loop ended abnormally");
        }

        let mut st = self.inner.state.lock().await;
        if st.stopped {
            return;
        }
        st.accepting = false;
        st.stopped = true;
        for active in st.active.values_mut() {
            active.exit_after_task = true;
        }
        st.clear();
        info!("scheduler stopped");
    }

    /// Ask every running task to stop with `state`.
    ///
    /// The abort hook of each body is called once; when `wait` is set this
    /// returns only after those workers have exited.
    pub async fn interrupt_running(&self, state: TaskState, reason: &str, wait: bool) -> usize {
        let targets: Vec<_> = {
            let mut st = self.inner.state.lock().await;
            st.active
                .iter_mut()
                .map(|(id, active)| {
                    active.exit_after_task = true;
                    // ignore send error: the body may have finished already
                    let _ = active.interrupt_tx.send(Some(Interruption {
                        state,
                        reason: reason.to_string(),
                    }));
                    info!(task_id = %id, %state, "interrupting task");
                    (Arc::clone(&active.body), active.worker.exit_signal())
                })
                .collect()
        };

        let count = targets.len();
        let mut exits = Vec::with_capacity(count);
        for (body, exited) in targets {
            body.abort(state, reason);
            exits.push(exited);
        }
        if wait {
            for exited in exits {
                wait_exited(exited).await;
            }
        }
        count
    }

    // ------------------------------------------------------------------
    // queries
    // ------------------------------------------------------------------

    pub async fn get_task(&self, id: &TaskId) -> Option<TaskRecord> {
        self.inner.state.lock().await.tasks.get(id).cloned()
    }

    /// Which set a task is in.
    pub async fn task_location(&self, id: &TaskId) -> Option<TaskSet> {
        self.inner.state.lock().await.location(id)
    }

    pub async fn get_recurring_task(&self, id: &RecurringTaskId) -> Option<RecurringTask> {
        self.inner.state.lock().await.recurring.get(id).cloned()
    }

    /// Pending tasks by start time.
    pub async fn pending_tasks(&self) -> Vec<TaskRecord> {
        self.inner.state.lock().await.records_in(TaskSet::Pending)
    }

    pub async fn running_tasks(&self) -> Vec<TaskRecord> {
        self.inner.state.lock().await.records_in(TaskSet::Running)
    }

    /// Completed tasks by completion time.
    pub async fn completed_tasks(&self) -> Vec<TaskRecord> {
        self.inner.state.lock().await.records_in(TaskSet::Completed)
    }

    pub async fn recurring_tasks(&self) -> Vec<RecurringTask> {
        self.inner
            .state
            .lock()
            .await
            .recurring
            .values()
            .cloned()
            .collect()
    }

    pub async fn counts(&self) -> SchedulerCounts {
        self.inner.state.lock().await.counts()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }
}
