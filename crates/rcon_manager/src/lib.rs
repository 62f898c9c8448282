//! # RCON Manager
//!
//! Multiplexed, self-healing connection pool to a fleet of game servers
//! speaking the length-prefixed binary RCON protocol, extended with the
//! vendor's broadcast channel (unsolicited frames on the reserved request id
//! `0x7FFFFFFF`).
//!
//! ## Responsibilities
//!
//! - At most one authenticated TCP connection per server id
//! - Request/response correlation by request id, with fragmented responses
//!   reassembled via the empty-sentinel echo
//! - Broadcast frames split off and republished to registered handlers
//! - Reconnection with exponential backoff and jitter, keepalive probing,
//!   and connection health introspection
//!
//! The pool has no dependency on the event bus; the application observes
//! lifecycle transitions through [`ConnectionObserver`] and raw broadcasts
//! through [`RconManager::on_broadcast`], typically feeding both into the
//! bus after decoding with [`parse_broadcast`].

mod connection;
mod error;
mod events;
mod manager;
mod protocol;

pub use error::RconError;
pub use events::{parse_broadcast, BroadcastEvent, ChatChannel};
pub use manager::{
    ConnectionObserver, ConnectionState, ConnectionStatus, RconManager, RconManagerConfig,
};
pub use protocol::{RconFrame, BROADCAST_REQUEST_ID};

// Include tests
#[cfg(test)]
mod tests;
