//! Control loop - pending タスクの再評価と dispatch
//!
//! 1 回の tick で行うこと:
//! 1. pending の全タスクに `should_start` を適用
//! 2. Running になったものを worker へ渡す
//! 3. 保持期間を過ぎた completed タスクを削除
//! 4. 何か変わっていれば 1 回だけ永続化
//!
//! tick の戻り値は次の tick までの待ち時間で、最も近い開始時刻に合わせて短くなります。

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, watch};
use tracing::{debug, info};

use super::engine::SchedulerInner;
use super::dependency::should_start;
use super::state::SchedulerState;
use crate::domain::{TaskId, TaskState};
use crate::error::TaskSet;

impl SchedulerInner {
    /// One pass over the pending set. Returns how long to sleep afterwards.
    pub fn tick_locked(&self, st: &mut SchedulerState) -> Duration {
        let now = self.now();
        let max_sleep = self.config.max_sleep();
        let mut sleep = max_sleep;
        let mut changed = false;

        for id in st.ids_in(TaskSet::Pending) {
            let Some(task) = st.tasks.get(&id) else {
                continue;
            };
            let start = task.scheduled_start;
            let recurring = task.is_recurring();
            let current = task.state;
            let decided = should_start(task, |dep| st.state_of(dep), st.accepting, now);

            match decided {
                TaskState::Running => {
                    self.start_pending(st, &id, now);
                    changed = true;
                }
                TaskState::WaitingOnStartTime => {
                    if let Some(start) = start {
                        sleep = sleep.min(until(now, start));
                    }
                    if current != decided {
                        set_state(st, &id, decided);
                        changed = true;
                    }
                }
                TaskState::CanceledBeforeStarting if recurring => match start {
                    Some(start) if start > now => sleep = sleep.min(until(now, start)),
                    _ if st.accepting => {
                        debug!(task_id = %id, "dispatching cancelled recurring iteration");
                        self.start_pending(st, &id, now);
                        changed = true;
                    }
                    _ => {}
                },
                TaskState::CanceledBeforeStarting => {
                    info!(task_id = %id, "task cancelled by failed dependency");
                    self.retire_pending_locked(st, &id, decided, now);
                    changed = true;
                }
                _ if current != decided => {
                    set_state(st, &id, decided);
                    changed = true;
                }
                _ => {}
            }
        }

        if self.expire_completed_locked(st, now) {
            changed = true;
        }
        if changed {
            self.persist_locked(st);
        }
        sleep
    }

    fn start_pending(&self, st: &mut SchedulerState, id: &TaskId, now: DateTime<Utc>) {
        st.remove_from(id, TaskSet::Pending);
        match self.take_body(st, id) {
            Some(body) => self.dispatch_locked(st, id, body),
            None => {
                if let Some(task) = st.tasks.get_mut(id) {
                    task.mark_done(TaskState::StoppedByError, now);
                }
                st.insert_into(id, TaskSet::Completed);
            }
        }
    }

    /// Drop completed tasks older than the retention window.
    fn expire_completed_locked(&self, st: &mut SchedulerState, now: DateTime<Utc>) -> bool {
        let Some(cutoff) = now.checked_sub_signed(self.config.retention()) else {
            return false;
        };
        let expired: Vec<_> = st
            .completed
            .iter()
            .take_while(|(completed_at, _)| *completed_at < cutoff)
            .cloned()
            .collect();

        for key in &expired {
            st.completed.remove(key);
            st.tasks.remove(&key.1);
            debug!(task_id = %key.1, "completed task expired");
        }
        !expired.is_empty()
    }
}

fn set_state(st: &mut SchedulerState, id: &TaskId, state: TaskState) {
    if let Some(task) = st.tasks.get_mut(id) {
        task.state = state;
    }
}

fn until(now: DateTime<Utc>, start: DateTime<Utc>) -> Duration {
    (start - now).to_std().unwrap_or(Duration::ZERO)
}

/// Runs ticks until shutdown is signalled.
///
/// The loop holds the engine weakly between ticks so that dropping every
/// `Scheduler` handle ends it as well.
pub(crate) async fn run_control_loop(
    inner: Weak<SchedulerInner>,
    mut shutdown: watch::Receiver<bool>,
    wake: Arc<Notify>,
) {
    info!("control loop started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let Some(engine) = inner.upgrade() else {
            break;
        };
        let sleep = {
            let mut st = engine.state.lock().await;
            if st.stopped {
                break;
            }
            engine.tick_locked(&mut st)
        };
        drop(engine);

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    debug!("scheduler dropped");
                    break;
                }
            }
            _ = wake.notified() => {}
            _ = tokio::time::sleep(sleep) => {}
        }
    }
    info!("control loop stopped");
}
