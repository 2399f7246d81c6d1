//! # Intercept Tunnel
//!
//! Transparent intercepting proxy for the Minecraft 1.8 wire protocol.
//!
//! Every player connection becomes a [`Tunnel`] between the client and the
//! upstream server. Packets flow through a table-driven interceptor
//! pipeline that can pass, rewrite, or drop them. Online-mode encryption is
//! followed with help from an auxiliary process that supplies shared-secret
//! candidates over a line-delimited JSON channel.
//!
//! ## Modules
//! - [`core`]: VarInt primitives, packets, and the frame codec
//! - [`protocol`]: typed packets, states, dispatch pipeline, handlers
//! - [`service`]: server, tunnels, auxiliary channels, pair directory
//! - [`modules`]: toggleable per-tunnel features and their scheduler
//! - [`license`]: feature entitlements gating module registration
//! - [`config`]: TOML and environment configuration
//! - [`utils`]: crypto, compression, logging, metrics, timeouts
//!
//! [`Tunnel`]: service::tunnel::Tunnel

pub mod config;
pub mod core;
pub mod error;
pub mod license;
pub mod modules;
pub mod protocol;
pub mod service;
pub mod utils;

pub use config::ProxyConfig;
pub use error::{ProtocolError, Result};
pub use service::{ProxyContext, ProxyServer};
