use serde::{Deserialize, Serialize};

/// Point-in-time sizes of the scheduler's sets and worker pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub recurring: usize,
    pub idle_workers: usize,
    pub active_workers: usize,
}
