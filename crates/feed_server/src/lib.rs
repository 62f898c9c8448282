//! # Feed Server
//!
//! Bidirectional WebSocket stream delivering filtered live event feeds to
//! operator clients. A client selects channels via the `types=` query
//! parameter (`chat`, `connection`, `teamkill`), receives a `connected`
//! frame naming the active selection, then JSON event frames, with
//! keepalive pings every 30 seconds. Incoming close frames are honored.

mod error;
mod frames;
mod server;

pub use error::FeedError;
pub use frames::{
    connected_frame, feed_frame, filter_for, parse_feed_types, FeedType,
};
pub use server::{FeedServer, FeedServerConfig};
