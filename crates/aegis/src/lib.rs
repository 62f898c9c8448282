//! # Squad Aegis
//!
//! Administration and observability control plane for a fleet of game
//! servers: RCON pool, typed event bus, plugin runtime, identity resolver,
//! ban propagation and live feeds, wired together behind one
//! constructor-injected dependency record.

pub mod app;
pub mod cli;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod signals;

pub use app::{Application, Dependencies};
pub use cli::CliArgs;
pub use config::AppConfig;
