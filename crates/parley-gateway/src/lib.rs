//! Realtime gateway: authenticated WebSocket sessions, presence, chat rooms
//! and message fan-out.
//!
//! Ordering: commands from one connection are handled one at a time, in the
//! order they were received. Every store call is a suspension point, so
//! handlers running for *different* connections interleave freely and no
//! cross-connection ordering is promised beyond store timestamps.

pub mod auth;
pub mod broker;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod notifier;
pub mod presence;
pub mod registry;
pub mod relays;
pub mod rooms;
pub mod state;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::Dispatcher;
pub use state::GatewayState;
