//! steward-core
//!
//! Recurring task scheduler for on-chain keeper jobs: each task fires on its
//! own interval, submits at most one operation at a time, tracks it to a
//! terminal status and only then may act again.
//!
//! # Modules
//! - **domain**: names, operations, lifecycle decisions, outcomes, errors
//! - **ports**: collaborators (prober, account state, chain height, action, health, clock)
//! - **app**: tracker, submission gate, coordination store, supervisor, builder
//! - **impls**: simulated chain and health sinks
//! - **config**: typed JSON configuration

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{SchedulerBuilder, SchedulerHandle, ShutdownReason, TaskSpec};
pub use config::{ConfigError, StewardConfig};
