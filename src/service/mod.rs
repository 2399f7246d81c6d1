//! # Proxy Service
//!
//! Runtime objects of the proxy.
//!
//! ## Components
//! - **Server**: accepts game and helper connections
//! - **Tunnel**: one proxied player session and its two pumps
//! - **Auxiliary**: the helper's control channel
//! - **Pair**: tunnel/auxiliary pairing and the directory that indexes it
//! - **Handoff**: single-use rendezvous slots
//! - **World**: player and entity state tracked per tunnel
//! - **Context**: configuration, pipeline, directory, licenses, metrics

pub mod auxiliary;
pub mod context;
pub mod handoff;
pub mod pair;
pub mod server;
pub mod tunnel;
pub mod world;

pub use context::ProxyContext;
pub use server::ProxyServer;
