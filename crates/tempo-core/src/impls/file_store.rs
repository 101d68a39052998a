//! JSON Lines backing file.
//!
//! 1 行 1 レコード（`StoreRecord` を JSON で）。書き込みは以下の順で行います:
//!
//! 1. `<file>.tmp` に全レコードを書き、fsync
//! 2. 古い `<file>.save` を削除
//! 3. 現在の `<file>` を `<file>.save` にリネーム
//! 4. `<file>.tmp` を `<file>` にリネーム
//!
//! 3 と 4 の間でクラッシュした場合 `<file>` が存在しないので、`load` は
//! `<file>.save` から読み込みます。

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::ports::{StoreRecord, TaskBackingStore};

#[derive(Debug, Clone)]
pub struct FileBackingStore {
    path: PathBuf,
}

impl FileBackingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tmp_path(&self) -> PathBuf {
        self.with_suffix(".tmp")
    }

    pub fn save_path(&self) -> PathBuf {
        self.with_suffix(".save")
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(suffix);
        PathBuf::from(name)
    }

    fn read_records(path: &Path) -> Result<Vec<StoreRecord>, StoreError> {
        let content = fs::read_to_string(path).map_err(|source| StoreError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let mut records = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoreRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %path.display(),
                    line = index + 1,
                    error = %e,
                    "skipping unreadable record in backing file"
                ),
            }
        }
        Ok(records)
    }

    fn write_tmp(&self, tmp: &Path, records: &[StoreRecord]) -> Result<(), StoreError> {
        let write_err = |source: std::io::Error| StoreError::Write {
            path: tmp.display().to_string(),
            source,
        };

        let file = File::create(tmp).map_err(write_err)?;
        let mut writer = BufWriter::new(file);
        for record in records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n").map_err(write_err)?;
        }
        let file = writer
            .into_inner()
            .map_err(|e| write_err(e.into_error()))?;
        file.sync_all().map_err(write_err)
    }
}

impl TaskBackingStore for FileBackingStore {
    fn load(&self) -> Result<Vec<StoreRecord>, StoreError> {
        if self.path.exists() {
            return Self::read_records(&self.path);
        }

        let save = self.save_path();
        if save.exists() {
            warn!(
                path = %self.path.display(),
                save = %save.display(),
                "backing file missing, loading previous snapshot"
            );
            return Self::read_records(&save);
        }

        info!(path = %self.path.display(), "creating new backing file");
        let records = vec![StoreRecord::root()];
        self.write_snapshot(&records)?;
        Ok(records)
    }

    fn write_snapshot(&self, records: &[StoreRecord]) -> Result<(), StoreError> {
        let tmp = self.tmp_path();
        let save = self.save_path();

        self.write_tmp(&tmp, records)?;

        if save.exists()
            && let Err(e) = fs::remove_file(&save)
        {
            debug!(path = %save.display(), error = %e, "cannot remove old snapshot");
        }

        // The new file still goes into place if the rotation fails.
        let mut rotation = Ok(());
        if self.path.exists()
            && let Err(source) = fs::rename(&self.path, &save)
        {
            rotation = Err(StoreError::RenameCurrent {
                from: self.path.display().to_string(),
                to: save.display().to_string(),
                source,
            });
        }

        fs::rename(&tmp, &self.path).map_err(|source| StoreError::RenameNew {
            from: tmp.display().to_string(),
            to: self.path.display().to_string(),
            source,
        })?;

        rotation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RecurringTask, TaskRecord, TaskType};
    use crate::schedule::Schedule;

    fn store_in(dir: &tempfile::TempDir) -> FileBackingStore {
        FileBackingStore::new(dir.path().join("tasks.jsonl"))
    }

    fn snapshot(task_ids: &[&str]) -> Vec<StoreRecord> {
        let mut records = vec![
            StoreRecord::root(),
            StoreRecord::Recurring(RecurringTask::new(
                "nightly",
                Schedule::parse("0 2 * * *").unwrap(),
                TaskType::new("backup"),
                serde_json::Value::Null,
            )),
        ];
        for id in task_ids {
            records.push(StoreRecord::Task(TaskRecord::new(
                *id,
                TaskType::new("backup"),
                serde_json::json!({"n": 1}),
            )));
        }
        records
    }

    #[test]
    fn missing_file_is_created_with_root_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let records = store.load().unwrap();
        assert_eq!(records, vec![StoreRecord::root()]);
        assert!(store.path().exists());
    }

    #[test]
    fn snapshot_replaces_file_and_rotates_previous_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.write_snapshot(&snapshot(&["a"])).unwrap();
        store.write_snapshot(&snapshot(&["a", "b"])).unwrap();

        assert_eq!(store.load().unwrap(), snapshot(&["a", "b"]));
        assert!(!store.tmp_path().exists());

        let previous = FileBackingStore::read_records(&store.save_path()).unwrap();
        assert_eq!(previous, snapshot(&["a"]));
    }

    #[test]
    fn interrupted_write_leaves_previous_snapshot_loadable() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.write_snapshot(&snapshot(&["a"])).unwrap();

        // crash after step 1: half-written tmp file, nothing renamed
        fs::write(store.tmp_path(), "{\"kind\":\"task\",\"id\":").unwrap();

        assert_eq!(store.load().unwrap(), snapshot(&["a"]));
    }

    #[test]
    fn crash_between_renames_falls_back_to_save_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.write_snapshot(&snapshot(&["a"])).unwrap();

        // crash after step 3: current file already rotated away
        fs::rename(store.path(), store.save_path()).unwrap();

        assert_eq!(store.load().unwrap(), snapshot(&["a"]));
    }

    #[test]
    fn unreadable_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let good = serde_json::to_string(&StoreRecord::root()).unwrap();
        fs::write(store.path(), format!("{good}\nnot json\n\n{{\"kind\":\"bogus\"}}\n")).unwrap();

        assert_eq!(store.load().unwrap(), vec![StoreRecord::root()]);
    }

    #[test]
    fn write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackingStore::new(dir.path().join("missing").join("tasks.jsonl"));

        let err = store.write_snapshot(&snapshot(&[])).unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }));
    }
}
