//! # Core Type Definitions
//!
//! Shared identifier and value types used across the Squad Aegis platform.
//! These types provide the building blocks for server management, player
//! identification, and plugin configuration.
//!
//! ## Key Types
//!
//! - [`ServerId`] - Unique identifier for a managed game server
//! - [`SteamId`] - 64-bit Steam account identifier
//! - [`EosId`] - 32-character Epic Online Services identifier
//! - [`ConfigValue`] - Tagged union for plugin and connector configuration
//!
//! ## Design Principles
//!
//! - **Type Safety**: Wrapper types prevent ID confusion (ServerId vs InstanceId)
//! - **Serialization**: All types support JSON serialization
//! - **Validation**: Malformed identifiers are rejected at parse time

mod config;
mod ids;
mod utils;

pub use config::{ConfigFieldType, ConfigValue};
pub use ids::{BanListId, EosId, InstanceId, ServerId, SteamId, TypeError};
pub use utils::current_timestamp;
