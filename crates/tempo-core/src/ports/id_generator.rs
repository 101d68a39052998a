//! IdGenerator port - ID 生成の抽象化
//!
//! 管理者が ID を指定しないタスクのために、一意な TaskId を発行します。
//!
//! # 実装
//! - **UlidIdGenerator**: ULID ベース（本番用）

use ulid::Ulid;

use crate::domain::TaskId;
use crate::ports::Clock;

/// IdGenerator は一意な TaskId を生成
///
/// # ULID の特性
/// - 時刻でソート可能
/// - 調整なしで生成可能
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;
}

/// UlidIdGenerator は Clock の時刻 + 乱数から ULID を作る
///
/// テスト時に FixedClock を渡すと timestamp 部分が固定されます。
pub struct UlidIdGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidIdGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidIdGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        TaskId::new(self.next_ulid().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generates_unique_ids() {
        let id_gen = UlidIdGenerator::new(SystemClock);

        let id1 = id_gen.generate_task_id();
        let id2 = id_gen.generate_task_id();

        assert_ne!(id1, id2);
        assert_eq!(id1.as_str().len(), 26);
    }

    #[test]
    fn fixed_clock_fixes_the_timestamp_part() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidIdGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_task_id();
        let id2 = id_gen.generate_task_id();

        // ランダム部分があるので ID は異なる
        assert_ne!(id1, id2);

        // timestamp 部分は同じ
        let ts1 = Ulid::from_string(id1.as_str()).unwrap().timestamp_ms();
        let ts2 = Ulid::from_string(id2.as_str()).unwrap().timestamp_ms();
        assert_eq!(ts1, ts2);
        assert_eq!(ts1, fixed_time.timestamp_millis() as u64);
    }
}
