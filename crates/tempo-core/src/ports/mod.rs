//! Ports - 抽象化レイヤー
//!
//! スケジューラが外部に依存する部分（時刻、永続化、通知、ID 発行）を
//! trait として定義し、実装を差し替えられるようにします。

pub mod alert;
pub mod backing_store;
pub mod clock;
pub mod id_generator;

pub use self::alert::{Alert, AlertKind, AlertSink, LogAlertSink};
pub use self::backing_store::{SNAPSHOT_VERSION, StoreRecord, TaskBackingStore};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidIdGenerator};
