//! Domain identifiers (strongly-typed IDs).
//!
//! Task ID と recurring task ID はどちらも管理者が指定する文字列です。
//! Phantom type パターンで `Id<T>` に共通実装をまとめつつ、
//! マーカー型によって `TaskId` と `RecurringTaskId` を混同できないようにしています。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// IdMarker は各 ID 型のマーカー trait
pub trait IdMarker: Send + Sync + 'static {
    /// エラーメッセージなどで使う種別名（例: "task"）
    fn kind() -> &'static str;
}

/// ジェネリック ID 型
///
/// 中身はただの `String` で、serde でも文字列としてそのまま出力されます。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    value: String,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn kind(&self) -> &'static str {
        T::kind()
    }
}

impl<T: IdMarker> From<&str> for Id<T> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> From<String> for Id<T> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

/// Task のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn kind() -> &'static str {
        "task"
    }
}

/// Recurring task のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Recurring {}

impl IdMarker for Recurring {
    fn kind() -> &'static str {
        "recurring task"
    }
}

/// Identifier of a concrete task (one execution unit).
pub type TaskId = Id<Task>;

/// Identifier of a recurring task definition.
pub type RecurringTaskId = Id<Recurring>;
