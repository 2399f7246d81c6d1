//! Timeout defaults and async wrappers.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;

/// Default timeout for dialing the upstream server
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between auxiliary keep-alive requests
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Upper bound on how long a handoff slot may stay empty during login
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed for tunnels and workers to wind down
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Await `future`, mapping an elapsed deadline to [`ProtocolError::Timeout`].
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}
