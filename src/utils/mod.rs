//! # Utility Modules
//!
//! Supporting utilities for stream transforms, logging, and timing.
//!
//! ## Components
//! - **Crypto**: AES-128/CFB8 keystreams and shared-secret candidate selection
//! - **Compression**: zlib with declared-length and size-limit checks
//! - **Logging**: Structured logging configuration
//! - **Timeout**: Async timeout wrappers and default durations
//! - **Metrics**: Thread-safe observability counters
//!
//! ## Security
//! - Decompression bomb protection (declared length capped by max packet size)
//! - Memory zeroing for shared secrets (zeroize crate)

pub mod compression;
pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod timeout;

pub use metrics::{Metrics, MetricsSnapshot};
