//! Broadcast hub: the loopback socket surface and its message protocol.

pub mod protocol;
pub mod server;

pub use protocol::{ByeReason, HubMessage};
pub use server::{BroadcastHub, HubHandle};
