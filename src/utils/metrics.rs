//! Observability counters
//!
//! Atomic counters shared by the listeners, tunnels and auxiliary
//! channels of one server. There is no export surface; snapshots are
//! logged periodically and read by tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for one proxy instance
#[derive(Debug)]
pub struct Metrics {
    /// Tunnels constructed
    pub tunnels_opened: AtomicU64,
    /// Tunnels currently open
    pub tunnels_active: AtomicU64,
    /// Tunnels that completed their close sequence
    pub tunnels_closed: AtomicU64,
    /// Encryption handshakes started (EncryptionRequest seen)
    pub handshakes_total: AtomicU64,
    /// Handshakes that installed ciphers on both legs
    pub handshakes_success: AtomicU64,
    /// Handshakes that ended in a disconnect
    pub handshakes_failed: AtomicU64,
    /// Packets written to the opposite leg
    pub packets_relayed: AtomicU64,
    /// Packets replaced by an interceptor
    pub packets_modified: AtomicU64,
    /// Packets dropped by an interceptor
    pub packets_rejected: AtomicU64,
    /// Interceptor failures (packet abandoned, tunnel kept)
    pub interceptor_errors: AtomicU64,
    /// Auxiliary channels accepted
    pub auxiliary_opened: AtomicU64,
    /// Auxiliary channels closed
    pub auxiliary_closed: AtomicU64,
    /// Auxiliary channels closed for missing keep-alives
    pub keepalive_timeouts: AtomicU64,
    /// Module toggles requested
    pub module_toggles: AtomicU64,
    start_time: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            tunnels_opened: AtomicU64::new(0),
            tunnels_active: AtomicU64::new(0),
            tunnels_closed: AtomicU64::new(0),
            handshakes_total: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            packets_relayed: AtomicU64::new(0),
            packets_modified: AtomicU64::new(0),
            packets_rejected: AtomicU64::new(0),
            interceptor_errors: AtomicU64::new(0),
            auxiliary_opened: AtomicU64::new(0),
            auxiliary_closed: AtomicU64::new(0),
            keepalive_timeouts: AtomicU64::new(0),
            module_toggles: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn tunnel_opened(&self) {
        self.tunnels_opened.fetch_add(1, Ordering::Relaxed);
        self.tunnels_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tunnel_closed(&self) {
        self.tunnels_closed.fetch_add(1, Ordering::Relaxed);
        self.tunnels_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn handshake_attempt(&self) {
        self.handshakes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_success(&self) {
        self.handshakes_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_relayed(&self) {
        self.packets_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_modified(&self) {
        self.packets_modified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_rejected(&self) {
        self.packets_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn interceptor_error(&self) {
        self.interceptor_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auxiliary_opened(&self) {
        self.auxiliary_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auxiliary_closed(&self) {
        self.auxiliary_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn keepalive_timeout(&self) {
        self.keepalive_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn module_toggled(&self) {
        self.module_toggles.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tunnels_opened: self.tunnels_opened.load(Ordering::Relaxed),
            tunnels_active: self.tunnels_active.load(Ordering::Relaxed),
            tunnels_closed: self.tunnels_closed.load(Ordering::Relaxed),
            handshakes_total: self.handshakes_total.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            packets_relayed: self.packets_relayed.load(Ordering::Relaxed),
            packets_modified: self.packets_modified.load(Ordering::Relaxed),
            packets_rejected: self.packets_rejected.load(Ordering::Relaxed),
            interceptor_errors: self.interceptor_errors.load(Ordering::Relaxed),
            auxiliary_opened: self.auxiliary_opened.load(Ordering::Relaxed),
            auxiliary_closed: self.auxiliary_closed.load(Ordering::Relaxed),
            keepalive_timeouts: self.keepalive_timeouts.load(Ordering::Relaxed),
            module_toggles: self.module_toggles.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            tunnels_opened = snapshot.tunnels_opened,
            tunnels_active = snapshot.tunnels_active,
            tunnels_closed = snapshot.tunnels_closed,
            handshakes_total = snapshot.handshakes_total,
            handshakes_success = snapshot.handshakes_success,
            handshakes_failed = snapshot.handshakes_failed,
            packets_relayed = snapshot.packets_relayed,
            packets_modified = snapshot.packets_modified,
            packets_rejected = snapshot.packets_rejected,
            interceptor_errors = snapshot.interceptor_errors,
            auxiliary_opened = snapshot.auxiliary_opened,
            auxiliary_closed = snapshot.auxiliary_closed,
            keepalive_timeouts = snapshot.keepalive_timeouts,
            module_toggles = snapshot.module_toggles,
            uptime_seconds = snapshot.uptime_seconds,
            "Proxy metrics"
        );
    }
}

/// Point-in-time copy of [`Metrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub tunnels_opened: u64,
    pub tunnels_active: u64,
    pub tunnels_closed: u64,
    pub handshakes_total: u64,
    pub handshakes_success: u64,
    pub handshakes_failed: u64,
    pub packets_relayed: u64,
    pub packets_modified: u64,
    pub packets_rejected: u64,
    pub interceptor_errors: u64,
    pub auxiliary_opened: u64,
    pub auxiliary_closed: u64,
    pub keepalive_timeouts: u64,
    pub module_toggles: u64,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tunnel_counters() {
        let metrics = Metrics::new();
        metrics.tunnel_opened();
        metrics.tunnel_opened();
        metrics.tunnel_closed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tunnels_opened, 2);
        assert_eq!(snapshot.tunnels_active, 1);
        assert_eq!(snapshot.tunnels_closed, 1);
    }
}
