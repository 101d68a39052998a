//! TaskBackingStore port - スケジューラ状態の永続化
//!
//! ストアはレコード列として扱います。
//! - 起動時: すべてのレコードを読み出して replay
//! - 変更時: 全体のスナップショットを置き換える（部分更新はしない）
//!
//! スナップショットの書き込みは原子的でなければなりません。途中でクラッシュしても
//! 直前のスナップショットが読める状態を保つこと。

use serde::{Deserialize, Serialize};

use crate::domain::{RecurringTask, TaskRecord};
use crate::error::StoreError;

/// Current snapshot format version, carried by the root record.
pub const SNAPSHOT_VERSION: u32 = 1;

/// One persisted record.
///
/// A snapshot is always written as: root, recurring definitions, tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreRecord {
    Root { version: u32 },
    Recurring(RecurringTask),
    Task(TaskRecord),
}

impl StoreRecord {
    pub fn root() -> Self {
        StoreRecord::Root {
            version: SNAPSHOT_VERSION,
        }
    }
}

/// Durable mirror of the scheduler.
///
/// Called with the scheduler lock held, so implementations must not call back
/// into the scheduler.
pub trait TaskBackingStore: Send + Sync {
    /// Read every record for startup replay.
    ///
    /// A store that does not exist yet is created holding only the root record.
    /// Individual records that cannot be decoded are skipped (and logged);
    /// I/O failures are returned.
    fn load(&self) -> Result<Vec<StoreRecord>, StoreError>;

    /// Atomically replace the stored snapshot.
    fn write_snapshot(&self, records: &[StoreRecord]) -> Result<(), StoreError>;
}
