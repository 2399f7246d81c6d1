//! # Game Protocol
//!
//! Typed packets, connection states, and the interception pipeline.
//!
//! ## Components
//! - **State**: connection states and packet directions
//! - **Packets**: typed views of the packets the proxy inspects
//! - **Dispatcher**: per-state interceptor chains with Pass/Modify/Reject
//! - **Handshake**: login interception and the encryption handoff
//! - **Handlers**: tracking interceptors and the default pipeline
//! - **Commands**: proxy-side chat commands
//! - **Auxiliary**: line-delimited JSON messages for the helper channel
//!
//! Packets without a registered chain are never decoded; they travel as
//! raw bytes.

pub mod auxiliary;
pub mod commands;
pub mod dispatcher;
pub mod handlers;
pub mod handshake;
pub mod packets;
pub mod state;
