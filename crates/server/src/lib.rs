//! Coordinator server: environment configuration, store wiring and the
//! submit/query HTTP surface.

pub mod app;
pub mod config;

pub use config::{ConfigError, ServerConfig, StoreKind};
