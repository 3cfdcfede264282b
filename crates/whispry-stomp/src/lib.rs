//! STOMP-over-WebSocket push adapter.
//!
//! Implements the core `PushChannel` port: one authenticated socket per
//! session, a user-queue subscription, and a fixed-delay reconnect loop.

mod channel;
pub mod frame;

pub use channel::{StompChannel, StompSettings};
