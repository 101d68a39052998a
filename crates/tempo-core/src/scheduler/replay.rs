//! Startup replay of the backing store.
//!
//! ファイルの順序（root → recurring → completed → running → pending）に従って
//! 状態を組み立て直します。この時点ではまだ実行を受け付けていないので、
//! 再投入したタスクはすべて `Unscheduled` になります。

use tracing::{debug, error, info, warn};

use super::engine::{SchedulerInner, is_cancelled_iteration};
use super::state::SchedulerState;
use crate::domain::{TaskRecord, TaskState};
use crate::error::{SchedulerError, TaskSet};
use crate::ports::{SNAPSHOT_VERSION, StoreRecord};

/// What replay restored.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    pub recurring: usize,
    pub completed: usize,
    pub resubmitted: usize,
    pub dropped: usize,
}

impl SchedulerInner {
    pub fn replay_locked(&self, st: &mut SchedulerState) -> Result<ReplaySummary, SchedulerError> {
        let records = self.store.load()?;
        let mut summary = ReplaySummary::default();
        let mut live = Vec::new();

        for record in records {
            match record {
                StoreRecord::Root { version } => {
                    if version != SNAPSHOT_VERSION {
                        warn!(version, expected = SNAPSHOT_VERSION, "backing store version differs");
                    }
                }
                StoreRecord::Recurring(recurring) => {
                    let id = recurring.id.clone();
                    match self.add_recurring_locked(st, recurring, false, false) {
                        Ok(_) => summary.recurring += 1,
                        Err(e) => {
                            error!(recurring_id = %id, error = %e, "cannot restore recurring task");
                            summary.dropped += 1;
                        }
                    }
                }
                StoreRecord::Task(task) => {
                    if task.state.is_done() && !is_cancelled_iteration(&task) {
                        if self.restore_completed(st, task) {
                            summary.completed += 1;
                        } else {
                            summary.dropped += 1;
                        }
                    } else {
                        live.push(task);
                    }
                }
            }
        }

        // A dependency may come later in the file; retry until nothing moves.
        loop {
            let before = live.len();
            let mut deferred = Vec::new();
            for task in live {
                let id = task.id.clone();
                match self.submit_locked(st, restored(task.clone()), false) {
                    Ok(_) => summary.resubmitted += 1,
                    Err(SchedulerError::MissingDependency { .. }) => deferred.push(task),
                    Err(e) => {
                        error!(task_id = %id, error = %e, "cannot restore task");
                        summary.dropped += 1;
                    }
                }
            }
            live = deferred;
            if live.is_empty() || live.len() == before {
                break;
            }
        }
        for task in &live {
            error!(task_id = %task.id, "cannot restore task: dependency is missing");
            summary.dropped += 1;
        }

        let definitions: Vec<_> = st.recurring.values().cloned().collect();
        let now = self.now();
        for recurring in definitions {
            match recurring.next_iteration(now) {
                Ok(next) => match self.submit_locked(st, next, false) {
                    Ok(task) => debug!(recurring_id = %recurring.id, task_id = %task.id, "iteration scheduled"),
                    Err(SchedulerError::DuplicateTaskId(_)) => {}
                    Err(e) => error!(recurring_id = %recurring.id, error = %e, "cannot schedule iteration"),
                },
                Err(e) => error!(recurring_id = %recurring.id, error = %e, "cannot schedule iteration"),
            }
        }

        self.persist_locked(st);
        info!(
            recurring = summary.recurring,
            completed = summary.completed,
            resubmitted = summary.resubmitted,
            dropped = summary.dropped,
            "backing store replayed"
        );
        Ok(summary)
    }

    fn restore_completed(&self, st: &mut SchedulerState, mut task: TaskRecord) -> bool {
        if st.tasks.contains_key(&task.id) {
            warn!(task_id = %task.id, "duplicate task in backing store");
            return false;
        }
        let state = task.state;
        task.mark_done(state, self.now());
        let id = task.id.clone();
        st.tasks.insert(id.clone(), task);
        st.insert_into(&id, TaskSet::Completed);
        true
    }
}

/// A task that was running when the process went down starts over.
fn restored(mut task: TaskRecord) -> TaskRecord {
    if !task.state.is_done() {
        task.state = TaskState::Unscheduled;
    }
    task
}
