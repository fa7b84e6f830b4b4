//! Domain identifiers (strongly-typed names and ULID-based ids).
//!
//! # 2 種類の識別子
//! - **名前**: オペレーターが設定ファイルで付ける [`TaskName`], [`Identity`]。
//!   文字列の newtype なので、config のキーがそのまま対応する。
//! - **生成 ID**: ログの相関に使う [`FiringId`], [`RunId`]。
//!   ULID の上に Phantom type `Id<T>` を被せたもの。
//!
//! ## ULID の特性
//! - **時刻でソート可能**: 先頭が timestamp なので、発火順に並ぶ
//! - **調整なしで生成可能**: タスクループごとに独立して発行できる
//!
//! ## Phantom Type パターン
//! `Id<T>` は共通実装を 1 つだけ持ち、`T` は実行時に存在しないマーカー型。
//! FiringId を RunId の位置に渡すとコンパイルエラーになる。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Unique name of a registered task (e.g. `"run_settlement"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskName(String);

impl TaskName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Submitting identity: the account every operation of a task is signed by.
///
/// Tasks that share an identity share its outstanding-operation budget.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub const DEFAULT: &'static str = "default";

    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new(Self::DEFAULT)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Marker trait for generated id kinds.
pub trait IdMarker: Send + Sync + 'static {
    /// Display prefix (e.g. `"firing-"`).
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// `T` は PhantomData で、実行時にはメモリを消費しない。
///
/// # 例
/// ```ignore
/// let firing: FiringId = Id::from(Ulid::new());
/// let run: RunId = Id::from(Ulid::new());
/// // firing と run は異なる型なので、混同できない
/// ```
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// ULID から Id を作成
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Firing {}

impl IdMarker for Firing {
    fn prefix() -> &'static str {
        "firing-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Run {}

impl IdMarker for Run {
    fn prefix() -> &'static str {
        "run-"
    }
}

/// Identifier of one firing of one task.
pub type FiringId = Id<Firing>;

/// Identifier of one supervisor run (process lifetime).
pub type RunId = Id<Run>;
