//! Shared support for the Conveyor queue crates
//!
//! - `config`: layered queue and logging settings (TOML files + `CONVEYOR__*` env)
//! - `error`: configuration error type
//! - `logging`: `tracing` subscriber setup

pub mod config;
pub mod error;
pub mod logging;

pub use self::config::*;
pub use self::error::*;
pub use self::logging::init_tracing;
