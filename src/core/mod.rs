//! # Core Wire Components
//!
//! Low-level framing shared by both legs of every tunnel.
//!
//! ## Components
//! - **Types**: VarInt, string and byte-array primitives
//! - **Packet**: raw packet id + payload, relayed untouched unless rewritten
//! - **Codec**: Tokio codec with per-leg compression and stream cipher
//!
//! ## Wire Format
//! ```text
//! [Length varint] [PacketId varint] [Payload(N)]
//! ```
//!
//! ## Security
//! - Maximum frame size: 2 MiB (the 3-byte VarInt limit)
//! - Length validation before allocation, declared-length checks on inflate

pub mod codec;
pub mod packet;
pub mod types;
