//! # Ban Propagation
//!
//! Ban lists as subscriptions: a ban write fans out to every participating
//! server through the RCON pool with best-effort at-least-once semantics,
//! and a plain-text ban config file per server reconciles anything the live
//! path missed.

mod config_file;
mod error;
mod service;

pub use config_file::{render_ban_config, render_ban_line};
pub use error::BanError;
pub use service::{BanActor, BanService, CommandRunner};

// Include tests
#[cfg(test)]
mod tests;
