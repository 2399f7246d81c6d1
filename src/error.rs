//! # Error Types
//!
//! Error handling for the intercepting proxy.
//!
//! Every layer (wire codec, legs, handshake, auxiliary channel, module
//! registry) reports failures through [`ProtocolError`]. Callers decide
//! the blast radius: framing and I/O errors end a tunnel, interceptor errors
//! only abandon the packet being handled.
//!
//! ## Error Categories
//! - **I/O Errors**: socket failures on either leg or the auxiliary link
//! - **Framing Errors**: malformed varints, truncated or oversized frames
//! - **Stream Transform Errors**: zlib and cipher failures
//! - **Handshake Errors**: missing pairs, unmatched secrets, handoff timeouts
//! - **Auxiliary Errors**: malformed or out-of-order control messages
//!
//! ## Example Usage
//! ```rust
//! use intercept_tunnel::error::{ProtocolError, Result};
//!
//! fn parse_state(value: i32) -> Result<u8> {
//!     match value {
//!         1 | 2 => Ok(value as u8),
//!         other => Err(ProtocolError::MalformedPacket(format!("next state {other}"))),
//!     }
//! }
//!
//! assert!(parse_state(3).is_err());
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Lock errors
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";

    /// Framing errors
    pub const ERR_TRUNCATED_PACKET: &str = "Packet ended before all fields were read";
    pub const ERR_STRING_TOO_LONG: &str = "String exceeds its maximum length";
    pub const ERR_DATA_LENGTH_MISMATCH: &str =
        "Decompressed length does not match the declared data length";

    /// Handshake errors
    pub const ERR_NO_VERIFY_TOKEN: &str = "No verify token was recorded for this tunnel";
    pub const ERR_PAIR_NOT_BOUND: &str = "Tunnel is not bound to an auxiliary session";
    pub const ERR_UNEXPECTED_NEXT_STATE: &str = "Handshake requested an unknown next state";

    /// Auxiliary protocol errors
    pub const ERR_HANDSHAKE_REQUIRED: &str = "Auxiliary handshake required before other messages";
    pub const ERR_DUPLICATE_HANDSHAKE: &str = "Auxiliary handshake already completed";
    pub const ERR_UNKNOWN_OPERATION: &str = "Unknown auxiliary operation code";

    /// Disconnect reasons shown to the player
    pub const REASON_DECRYPTION_FAILURE: &str = "decryption failure";
    pub const REASON_NO_AUXILIARY_SESSION: &str = "no auxiliary session";
    pub const REASON_SESSION_IN_USE: &str = "session already in use";
    pub const REASON_HANDSHAKE_TIMEOUT: &str = "encryption handshake timed out";
    pub const REASON_AUXILIARY_LOST: &str = "auxiliary session lost";
    pub const REASON_SERVER_LOST: &str = "server connection lost";
    pub const REASON_SESSION_REPLACED: &str = "session replaced";
    pub const REASON_PROTOCOL_ERROR: &str = "protocol error";
}

/// ProtocolError is the primary error type for all proxy operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid VarInt")]
    InvalidVarInt,

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Compression failed")]
    CompressionFailure,

    #[error("Decompression failed")]
    DecompressionFailure,

    #[error("Cipher already installed on this stream")]
    CipherAlreadyInstalled,

    #[error("Invalid shared secret length: {0}")]
    InvalidSharedSecret(usize),

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Handoff slot already consumed")]
    HandoffConsumed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("No tunnel pair registered for {identity}@{address}")]
    UnknownPair { identity: String, address: String },

    #[error("Entitlement error: {0}")]
    EntitlementError(String),

    #[error("Auxiliary protocol error: {0}")]
    AuxiliaryError(String),

    #[error("Module error: {0}")]
    ModuleError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether the error means the peer simply went away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::ConnectionClosed => true,
            ProtocolError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
