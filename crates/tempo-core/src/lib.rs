//! tempo-core
//!
//! Persistent, dependency-aware task scheduler.
//!
//! # モジュール構成
//! - **schedule**: 5 フィールドの crontab 式と次回実行時刻の計算
//! - **domain**: ドメインモデル（ids, task, state, recurring）
//! - **scheduler**: スケジューラ本体（submit, cancel, control loop, replay）
//! - **worker**: タスクを実行するワーカー
//! - **runtime**: `TaskBody` と task_type → factory のレジストリ
//! - **ports**: 抽象化レイヤー（Clock, TaskBackingStore, AlertSink, IdGenerator）
//! - **impls**: ports の実装（JSON Lines ファイル、インメモリ）
//! - **config**: TOML 設定
//! - **error**: エラー型
//! - **observability**: 件数などの状態ビュー

pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod runtime;
pub mod schedule;
pub mod scheduler;
pub mod worker;

pub use config::SchedulerConfig;
pub use domain::{
    FailedDependencyAction, RecurringTask, RecurringTaskId, TaskId, TaskRecord, TaskState,
    TaskType,
};
pub use error::{SchedulerError, StoreError, TaskSet};
pub use observability::SchedulerCounts;
pub use runtime::{TaskBody, TaskContext, TaskError, TaskRegistry};
pub use schedule::{Schedule, ScheduleError};
pub use scheduler::{ReplaySummary, Scheduler, SchedulerBuilder};
