//! In-memory backing store and alert sink, for tests and embedding.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::domain::{RecurringTask, TaskRecord};
use crate::error::StoreError;
use crate::ports::{Alert, AlertKind, AlertSink, StoreRecord, TaskBackingStore};

/// Keeps the last snapshot in memory.
///
/// `set_fail_writes(true)` makes every write fail, which lets tests check that
/// the scheduler keeps going when persistence is broken.
#[derive(Debug, Default)]
pub struct MemoryBackingStore {
    records: Mutex<Vec<StoreRecord>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing snapshot (as if read from disk).
    pub fn with_records(records: Vec<StoreRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful snapshot writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<StoreRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn tasks(&self) -> Vec<TaskRecord> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                StoreRecord::Task(task) => Some(task),
                _ => None,
            })
            .collect()
    }

    pub fn recurring_tasks(&self) -> Vec<RecurringTask> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                StoreRecord::Recurring(recurring) => Some(recurring),
                _ => None,
            })
            .collect()
    }
}

impl TaskBackingStore for MemoryBackingStore {
    fn load(&self) -> Result<Vec<StoreRecord>, StoreError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if records.is_empty() {
            records.push(StoreRecord::root());
        }
        Ok(records.clone())
    }

    fn write_snapshot(&self, records: &[StoreRecord]) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        *self.records.lock().unwrap_or_else(|e| e.into_inner()) = records.to_vec();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Collects alerts so tests can assert on them.
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn count(&self, kind: AlertKind) -> usize {
        self.alerts().iter().filter(|a| a.kind == kind).count()
    }
}

impl AlertSink for RecordingAlertSink {
    fn alert(&self, alert: Alert) {
        self.alerts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(alert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskType;

    #[test]
    fn empty_store_loads_root_record() {
        let store = MemoryBackingStore::new();
        assert_eq!(store.load().unwrap(), vec![StoreRecord::root()]);
    }

    #[test]
    fn failing_writes_keep_the_previous_snapshot() {
        let store = MemoryBackingStore::new();
        let task = TaskRecord::new("t1", TaskType::new("noop"), serde_json::Value::Null);
        store
            .write_snapshot(&[StoreRecord::root(), StoreRecord::Task(task)])
            .unwrap();

        store.set_fail_writes(true);
        assert!(store.write_snapshot(&[StoreRecord::root()]).is_err());

        assert_eq!(store.write_count(), 1);
        assert_eq!(store.tasks().len(), 1);
    }

    #[test]
    fn recording_sink_counts_by_kind() {
        let sink = RecordingAlertSink::new();
        sink.alert(Alert::new(AlertKind::CannotWriteFile, "disk full"));
        sink.alert(Alert::new(AlertKind::CannotWriteFile, "disk full"));
        sink.alert(Alert::new(AlertKind::CannotRenameNewFile, "busy"));

        assert_eq!(sink.count(AlertKind::CannotWriteFile), 2);
        assert_eq!(sink.count(AlertKind::CannotScheduleRecurringIteration), 0);
        assert_eq!(sink.alerts().len(), 3);
    }
}
