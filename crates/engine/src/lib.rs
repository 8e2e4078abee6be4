//! `txweave-engine`: the coordinator.
//!
//! [`Engine`] persists submitted transactions and drives their branches
//! through a [`Transport`](txweave_infra::Transport); the protocol drivers
//! (`saga`, `tcc`, `xa`) decide each next step from the stored branch
//! statuses, so a pass can be interrupted at any point and resumed by the
//! [`Scheduler`] on any worker.

pub mod builder;
pub mod config;
pub mod definition;
pub mod engine;
pub mod error;
pub mod scheduler;

mod saga;
mod tcc;
mod xa;

pub use builder::{SagaBuilder, TccBuilder, XaBuilder};
pub use config::{EngineConfig, SchedulerConfig};
pub use definition::{BranchSpec, TransDefinition};
pub use engine::{Engine, PassOutcome, TransactionView};
pub use error::EngineError;
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerStats};
