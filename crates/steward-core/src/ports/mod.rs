//! Ports - interfaces to everything outside the scheduler core.
//!
//! Each trait is a collaborator the core consumes: chain access, account
//! counters, the domain action of a task, the heartbeat metric, and time.
//! Implementations live in `impls` (in-memory, logging) or in the embedding
//! application (real RPC clients).

pub mod account;
pub mod action;
pub mod chain;
pub mod clock;
pub mod health;
pub mod id_generator;
pub mod prober;

pub use self::account::AccountState;
pub use self::action::{FiringContext, TaskAction, TaskParams};
pub use self::chain::ChainHeight;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::health::HealthSink;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::prober::OperationProber;
