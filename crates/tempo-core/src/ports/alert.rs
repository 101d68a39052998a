//! AlertSink port - 管理者向け通知の抽象化
//!
//! 永続化の失敗や recurring task の再スケジュール失敗はスケジューラを止めずに
//! ログ + アラートとして外へ出します。送信手段はこの crate の外側の責務です。

use std::fmt;

use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    CannotScheduleRecurringIteration,
    CannotRenameCurrentFile,
    CannotRenameNewFile,
    CannotWriteFile,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::CannotScheduleRecurringIteration => "cannot-schedule-recurring-iteration",
            AlertKind::CannotRenameCurrentFile => "cannot-rename-current-task-file",
            AlertKind::CannotRenameNewFile => "cannot-rename-new-task-file",
            AlertKind::CannotWriteFile => "cannot-write-task-file",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
}

impl Alert {
    pub fn new(kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Must not block or fail; it is called while the scheduler lock is held.
pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: Alert);
}

/// Default sink: log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&self, alert: Alert) {
        error!(alert = %alert.kind, message = %alert.message, "scheduler alert");
    }
}
