//! # Identity Resolver
//!
//! Maps sparse dual-identity observation records (optional Steam id,
//! optional EOS id, player name) to stable canonical identities via a
//! transitive union-find, and answers moderation queries (statistics,
//! search) over whole identity classes.
//!
//! Observations come from *all* event tables, not only joins: some players
//! appear in combat events with no corresponding join record.

mod error;
mod resolver;
mod union_find;

pub use error::IdentityError;
pub use resolver::{build_classes, Identity, IdentityResolver, IdentityStatus, PlayerStats};
pub use union_find::{IdentityKey, UnionFind};
