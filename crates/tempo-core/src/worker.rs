use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use crate::domain::{TaskId, TaskState};
use crate::runtime::{Interruption, TaskBody, TaskContext, TaskError};

pub type WorkerId = u64;

/// One task handed to a worker.
pub(crate) struct Assignment {
    pub task_id: TaskId,
    pub body: Arc<dyn TaskBody>,
    pub interrupt_rx: watch::Receiver<Option<Interruption>>,
}

/// Where a worker reports a finished task.
///
/// 戻り値が `false` ならワーカーはそのまま終了し、`true` なら次の割り当てを待つ。
#[async_trait]
pub(crate) trait CompletionSink: Send + Sync {
    async fn task_finished(&self, worker_id: WorkerId, task_id: &TaskId, state: TaskState) -> bool;
}

/// Handle to one reusable worker.
/// - `tx` を drop するとアイドル中のワーカーは終了する
/// - `exited` で終了を待てる
pub(crate) struct WorkerHandle {
    id: WorkerId,
    tx: mpsc::UnboundedSender<Assignment>,
    exited: watch::Receiver<bool>,
}

impl WorkerHandle {
    /// Spawn a worker that blocks until it is given a task.
    ///
    /// The sink is held weakly so an abandoned scheduler does not keep its
    /// workers alive.
    pub fn spawn(id: WorkerId, sink: Weak<dyn CompletionSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (exited_tx, exited) = watch::channel(false);

        tokio::spawn(async move {
            worker_loop(id, rx, sink).await;
            // ignore send error: nobody may be waiting
            let _ = exited_tx.send(true);
        });

        Self { id, tx, exited }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Hand over a task. Gives it back if the worker is gone.
    pub fn assign(&self, assignment: Assignment) -> Result<(), Assignment> {
        self.tx.send(assignment).map_err(|e| e.0)
    }

    pub fn exit_signal(&self) -> watch::Receiver<bool> {
        self.exited.clone()
    }
}

/// Wait for a worker to finish its loop.
pub(crate) async fn wait_exited(mut exited: watch::Receiver<bool>) {
    // Err means the worker task is gone entirely, which also counts.
    let _ = exited.wait_for(|done| *done).await;
}

async fn worker_loop(
    worker_id: WorkerId,
    mut rx: mpsc::UnboundedReceiver<Assignment>,
    sink: Weak<dyn CompletionSink>,
) {
    debug!(worker_id, "worker started");
    while let Some(assignment) = rx.recv().await {
        let state = execute(worker_id, &assignment).await;

        let Some(sink) = sink.upgrade() else {
            break;
        };
        if !sink.task_finished(worker_id, &assignment.task_id, state).await {
            break;
        }
    }
    debug!(worker_id, "worker exiting");
}

/// Run one body and turn whatever happens into a terminal state.
///
/// The body runs in its own tokio task so that a panic stays contained.
async fn execute(worker_id: WorkerId, assignment: &Assignment) -> TaskState {
    let task_id = &assignment.task_id;
    let ctx = TaskContext::new(task_id.clone(), assignment.interrupt_rx.clone());
    let body = Arc::clone(&assignment.body);

    debug!(worker_id, task_id = %task_id, "running task");
    let result = tokio::spawn(async move { body.run(ctx).await }).await;

    match result {
        Ok(Ok(state)) if state.is_done() => state,
        Ok(Ok(state)) => {
            warn!(worker_id, task_id = %task_id, %state, "task returned a non-terminal state");
            TaskState::StoppedByError
        }
        Ok(Err(TaskError::Interrupted(reason))) => {
            let requested = assignment.interrupt_rx.borrow().clone();
            match requested {
                Some(interruption) => interruption.state,
                None => {
                    warn!(worker_id, task_id = %task_id, %reason, "task interrupted itself");
                    TaskState::StoppedByError
                }
            }
        }
        Ok(Err(e)) => {
            warn!(worker_id, task_id = %task_id, error = %e, "task failed");
            TaskState::StoppedByError
        }
        Err(join_err) => {
            error!(worker_id, task_id = %task_id, error = %join_err, "task panicked");
            TaskState::StoppedByError
        }
    }
}
