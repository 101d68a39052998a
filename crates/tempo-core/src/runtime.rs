//! Task bodies and the registry that builds them.
//!
//! タスクの中身（バックアップ、エクスポートなど）はこの crate の外で実装されます。
//! スケジューラが知っているのは `TaskBody` の `run` と `abort` だけです。
//! task_type 名から `TaskFactory` を引き、payload から body を組み立てます。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::watch;

use crate::domain::{TaskId, TaskRecord, TaskState, TaskType};
use crate::error::{RegistryError, SchedulerError};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("interrupted: {0}")]
    Interrupted(String),

    #[error("{0}")]
    Failed(String),
}

/// Request to stop a running task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interruption {
    /// Terminal state the task should finish in.
    pub state: TaskState,
    pub reason: String,
}

/// Handed to `TaskBody::run`.
///
/// 長時間かかるタスクは `is_interrupted` / `interrupted` を見て自分で止まります。
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    interrupt_rx: watch::Receiver<Option<Interruption>>,
}

impl TaskContext {
    pub(crate) fn new(task_id: TaskId, interrupt_rx: watch::Receiver<Option<Interruption>>) -> Self {
        Self {
            task_id,
            interrupt_rx,
        }
    }

    /// A context with its own interrupt handle, for driving a body directly.
    pub fn detached(task_id: TaskId) -> (Self, watch::Sender<Option<Interruption>>) {
        let (tx, rx) = watch::channel(None);
        (Self::new(task_id, rx), tx)
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn interruption(&self) -> Option<Interruption> {
        self.interrupt_rx.borrow().clone()
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt_rx.borrow().is_some()
    }

    /// Wait until an interruption is requested.
    ///
    /// Never returns if the scheduler side is dropped without interrupting.
    pub async fn interrupted(&mut self) -> Interruption {
        loop {
            if let Some(interruption) = self.interrupt_rx.borrow_and_update().clone() {
                return interruption;
            }
            if self.interrupt_rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// The work a task performs.
#[async_trait]
pub trait TaskBody: Send + Sync {
    /// Run to completion and return a terminal state.
    ///
    /// An `Err`, a panic, or a non-terminal state all end the task as
    /// `StoppedByError`.
    async fn run(&self, ctx: TaskContext) -> Result<TaskState, TaskError>;

    /// Cooperative abort hook, called once when the task is interrupted.
    fn abort(&self, _state: TaskState, _reason: &str) {}
}

/// Builds a body from a task's payload.
pub trait TaskFactory: Send + Sync {
    fn create(&self, payload: &serde_json::Value) -> Result<Arc<dyn TaskBody>, TaskError>;
}

impl<F> TaskFactory for F
where
    F: Fn(&serde_json::Value) -> Result<Arc<dyn TaskBody>, TaskError> + Send + Sync,
{
    fn create(&self, payload: &serde_json::Value) -> Result<Arc<dyn TaskBody>, TaskError> {
        self(payload)
    }
}

/// Registry of task implementations (task_type -> factory).
///
/// Design:
/// - Built during initialization (mutable).
/// - Shared read-only by the scheduler afterwards.
#[derive(Default)]
pub struct TaskRegistry {
    factories: HashMap<TaskType, Arc<dyn TaskFactory>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        task_type: TaskType,
        factory: Arc<dyn TaskFactory>,
    ) -> Result<(), RegistryError> {
        if self.factories.contains_key(&task_type) {
            return Err(RegistryError::DuplicateTaskType(task_type));
        }
        self.factories.insert(task_type, factory);
        Ok(())
    }

    /// Register a body built from a payload decoded into `P`.
    pub fn register_typed<P, B, F>(
        &mut self,
        task_type: TaskType,
        build: F,
    ) -> Result<(), RegistryError>
    where
        P: DeserializeOwned,
        B: TaskBody + 'static,
        F: Fn(P) -> B + Send + Sync + 'static,
    {
        let factory = move |payload: &serde_json::Value| -> Result<Arc<dyn TaskBody>, TaskError> {
            let decoded = serde_json::from_value(payload.clone())
                .map_err(|e| TaskError::InvalidPayload(e.to_string()))?;
            Ok(Arc::new(build(decoded)))
        };
        self.register(task_type, Arc::new(factory))
    }

    pub fn contains(&self, task_type: &TaskType) -> bool {
        self.factories.contains_key(task_type)
    }

    pub fn registered_types(&self) -> Vec<TaskType> {
        self.factories.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Build the body for a task.
    pub fn instantiate(&self, task: &TaskRecord) -> Result<Arc<dyn TaskBody>, SchedulerError> {
        let factory = self
            .factories
            .get(&task.task_type)
            .ok_or_else(|| SchedulerError::UnknownTaskType(task.task_type.clone()))?;

        factory
            .create(&task.payload)
            .map_err(|e| SchedulerError::InvalidPayload {
                task_type: task.task_type.clone(),
                reason: e.to_string(),
            })
    }
}
