//! Domain model (IDs, states, task records, recurring definitions).

pub mod ids;
pub mod recurring;
pub mod state;
pub mod task;

pub use ids::{RecurringTaskId, TaskId};
pub use recurring::{RecurringTask, iteration_id};
pub use state::{FailedDependencyAction, TaskState};
pub use task::{TaskRecord, TaskType};
