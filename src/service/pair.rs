//! # Tunnel Pairs
//!
//! A [`TunnelPair`] couples one auxiliary channel with at most one game
//! tunnel. Pairs are created by the auxiliary handshake and looked up by
//! the game login, keyed by `(identity, remote address)`.
//!
//! ## Ownership
//! - The directory owns pairs strongly
//! - A pair owns its auxiliary channel and holds only a weak link to its
//!   tunnel; the tunnel holds the pair strongly until it closes
//! - Closing a pair closes both of its halves, each exactly once

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

use crate::error::{constants, ProtocolError, Result};
use crate::license::Entitlements;
use crate::service::auxiliary::AuxiliaryChannel;
use crate::service::tunnel::Tunnel;

/// Directory key of a pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairId {
    pub identity: String,
    pub address: String,
}

impl PairId {
    pub fn new(identity: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.identity, self.address)
    }
}

pub struct TunnelPair {
    id: PairId,
    auxiliary: Arc<AuxiliaryChannel>,
    license: Arc<dyn Entitlements>,
    tunnel: Mutex<Weak<Tunnel>>,
}

impl TunnelPair {
    pub fn new(
        id: PairId,
        auxiliary: Arc<AuxiliaryChannel>,
        license: Arc<dyn Entitlements>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            auxiliary,
            license,
            tunnel: Mutex::new(Weak::new()),
        })
    }

    pub fn id(&self) -> &PairId {
        &self.id
    }

    pub fn auxiliary(&self) -> &Arc<AuxiliaryChannel> {
        &self.auxiliary
    }

    pub fn license(&self) -> &Arc<dyn Entitlements> {
        &self.license
    }

    /// The bound tunnel, if it is still alive.
    pub fn tunnel(&self) -> Option<Arc<Tunnel>> {
        self.tunnel.lock().ok().and_then(|tunnel| tunnel.upgrade())
    }

    /// Attach `tunnel` to this pair.
    ///
    /// # Errors
    /// `ProtocolError::HandshakeError` if another live tunnel is bound.
    pub fn bind(&self, tunnel: &Arc<Tunnel>) -> Result<()> {
        let mut bound = self
            .tunnel
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))?;
        if let Some(existing) = bound.upgrade() {
            if !Arc::ptr_eq(&existing, tunnel) && !existing.is_closed() {
                return Err(ProtocolError::HandshakeError(format!(
                    "pair {} already bound to tunnel {}",
                    self.id,
                    existing.id()
                )));
            }
        }
        *bound = Arc::downgrade(tunnel);
        Ok(())
    }

    /// Close both halves, telling a still-open tunnel's player `reason`.
    /// Idempotent.
    pub fn close(&self, reason: &str) {
        debug!(pair = %self.id, reason, "Closing pair");
        if let Some(tunnel) = self.tunnel() {
            tunnel.disconnect(reason);
        }
        self.auxiliary.close();
    }
}

/// Concurrent map from [`PairId`] to live pairs.
#[derive(Default)]
pub struct PairDirectory {
    pairs: Mutex<HashMap<PairId, Arc<TunnelPair>>>,
}

impl PairDirectory {
    /// Insert `pair`, replacing and closing any pair already under its id.
    ///
    /// Returns the replaced pair.
    pub fn register(&self, pair: Arc<TunnelPair>) -> Option<Arc<TunnelPair>> {
        let previous = match self.pairs.lock() {
            Ok(mut pairs) => pairs.insert(pair.id().clone(), pair),
            Err(_) => {
                warn!("Pair directory lock poisoned, registration dropped");
                return None;
            }
        };
        if let Some(previous) = &previous {
            warn!(pair = %previous.id(), "Replacing existing pair");
            previous.close(constants::REASON_SESSION_REPLACED);
        }
        previous
    }

    /// Remove `pair` if it is still the registered one, then close it.
    ///
    /// Returns whether an entry was removed.
    pub fn unregister(&self, pair: &Arc<TunnelPair>) -> bool {
        let removed = match self.pairs.lock() {
            Ok(mut pairs) => {
                let current = pairs
                    .get(pair.id())
                    .is_some_and(|registered| Arc::ptr_eq(registered, pair));
                current && pairs.remove(pair.id()).is_some()
            }
            Err(_) => false,
        };
        pair.close(constants::REASON_AUXILIARY_LOST);
        removed
    }

    pub fn lookup(&self, id: &PairId) -> Option<Arc<TunnelPair>> {
        self.pairs.lock().ok().and_then(|pairs| pairs.get(id).cloned())
    }

    pub fn len(&self) -> usize {
        self.pairs.lock().map_or(0, |pairs| pairs.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
