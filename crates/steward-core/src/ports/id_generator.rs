//! IdGenerator port - 発火と実行の相関 ID を生成する
//!
//! ログの 1 行を「どの実行 (run) のどの発火 (firing) か」に結び付けるための ID。
//! テストで決定的にするため、trait として抽象化している。
//!
//! # 実装
//! - **UlidGenerator**: [`Clock`] の時刻を timestamp 部に使う ULID

use crate::domain::ids::{FiringId, RunId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は時刻順にソートできる相関 ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（全タスクループから共有される）
pub trait IdGenerator: Send + Sync {
    fn generate_firing_id(&self) -> FiringId;

    fn generate_run_id(&self) -> RunId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// timestamp 部は Clock から取る。FixedClock を渡せば、テストでの
/// timestamp 部が固定される（乱数部は毎回異なる）。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_firing_id(&self) -> FiringId {
        FiringId::from(self.next_ulid())
    }

    fn generate_run_id(&self) -> RunId {
        RunId::from(self.next_ulid())
    }
}
