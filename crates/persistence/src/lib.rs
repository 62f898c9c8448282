//! # Persistence
//!
//! Store interfaces and adapters backing the platform:
//!
//! - [`relational::Db`]: servers, bans, ban lists, plugin instances,
//!   connectors, audit log. The relational database is the source of truth
//!   for every write path.
//! - [`columnar::ColumnarStore`]: one table per event type, plugin logs and
//!   the derived identity tables.
//! - [`memory`]: in-memory implementations used by tests and as the
//!   fallback backend when no database is configured.
//! - [`postgres`]: sqlx adapters with parameterized queries throughout.

pub mod columnar;
mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod relational;

pub use columnar::{
    ColumnarStore, CombatStats, EventRow, IdentifierKind, LogOrder, LogQuery, Observation,
    ObservationRole, PlayerColumns, PlayerIdentityRecord, PluginLogRecord,
};
pub use error::StoreError;
pub use memory::{MemoryColumnarStore, MemoryDb};
pub use model::{
    AuditLogRecord, BanListRecord, BanRecord, ConnectorRecord, ExtensionRecord,
    RemoteBanSourceRecord, ServerRecord,
};
pub use postgres::{PgColumnarStore, PgDb};
pub use relational::Db;
