//! Impls - ports の実装
//!
//! - **FileBackingStore**: JSON Lines ファイル（本番用）
//! - **MemoryBackingStore** / **RecordingAlertSink**: テスト・組み込み用

pub mod file_store;
pub mod memory_store;

pub use self::file_store::FileBackingStore;
pub use self::memory_store::{MemoryBackingStore, RecordingAlertSink};
