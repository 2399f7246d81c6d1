//! # Feature Entitlements
//!
//! Module registration is gated by a pure predicate over an opaque
//! capability set. The proxy only asks [`Entitlements::has_feature`]; how
//! an auth key maps to a capability set is the resolver's business.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::LicenseConfig;
use crate::error::{ProtocolError, Result};

/// Features a module can be gated on. Values are bit positions in a
/// capability mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum Feature {
    AntiKnockback = 1,
    KillAura = 1 << 1,
    NoFall = 1 << 2,
    Flight = 1 << 3,
    LongJump = 1 << 4,
    UnlimitedCps = 1 << 5,
    TpAura = 1 << 6,
    Esp = 1 << 7,
    Nuker = 1 << 8,
    FastBreak = 1 << 9,
    NoBadEffects = 1 << 10,
    SpeedHack = 1 << 11,
    AutoSoup = 1 << 12,
}

impl Feature {
    pub fn bit(self) -> u64 {
        self as u64
    }
}

/// Capability predicate attached to a tunnel pair.
pub trait Entitlements: Send + Sync + fmt::Debug {
    fn has_feature(&self, feature: Feature) -> bool;
}

/// A plain bitmask of [`Feature`] bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureSet(pub u64);

impl FeatureSet {
    pub fn with(self, feature: Feature) -> Self {
        Self(self.0 | feature.bit())
    }
}

impl Entitlements for FeatureSet {
    fn has_feature(&self, feature: Feature) -> bool {
        self.0 & feature.bit() != 0
    }
}

/// Grants everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevelopmentLicense;

impl Entitlements for DevelopmentLicense {
    fn has_feature(&self, _feature: Feature) -> bool {
        true
    }
}

/// Maps an auxiliary auth key to entitlements.
pub trait LicenseResolver: Send + Sync {
    /// # Errors
    /// `ProtocolError::EntitlementError` if the key grants nothing
    fn resolve(&self, auth_key: &str) -> Result<Arc<dyn Entitlements>>;
}

/// Resolver backed by the `[licenses]` config table.
#[derive(Debug, Clone, Default)]
pub struct StaticLicenses {
    development_mode: bool,
    keys: HashMap<String, u64>,
}

impl StaticLicenses {
    pub fn from_config(config: &LicenseConfig) -> Self {
        Self {
            development_mode: config.development_mode,
            keys: config.keys.clone(),
        }
    }

    pub fn development() -> Self {
        Self {
            development_mode: true,
            keys: HashMap::new(),
        }
    }
}

impl LicenseResolver for StaticLicenses {
    fn resolve(&self, auth_key: &str) -> Result<Arc<dyn Entitlements>> {
        if self.development_mode {
            return Ok(Arc::new(DevelopmentLicense));
        }
        self.keys
            .get(auth_key)
            .map(|mask| Arc::new(FeatureSet(*mask)) as Arc<dyn Entitlements>)
            .ok_or_else(|| ProtocolError::EntitlementError("unknown auth key".to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_bits_match_mask_layout() {
        assert_eq!(Feature::AntiKnockback.bit(), 1);
        assert_eq!(Feature::NoFall.bit(), 4);
        assert_eq!(Feature::Esp.bit(), 128);
        assert_eq!(Feature::AutoSoup.bit(), 4096);
    }

    #[test]
    fn test_feature_set_predicate() {
        let set = FeatureSet::default().with(Feature::NoFall).with(Feature::Flight);
        assert!(set.has_feature(Feature::NoFall));
        assert!(set.has_feature(Feature::Flight));
        assert!(!set.has_feature(Feature::Esp));
    }

    #[test]
    fn test_static_resolver() {
        let mut config = LicenseConfig::default();
        config.keys.insert("abc".to_string(), Feature::Esp.bit());
        let resolver = StaticLicenses::from_config(&config);

        let granted = resolver.resolve("abc").unwrap();
        assert!(granted.has_feature(Feature::Esp));
        assert!(!granted.has_feature(Feature::NoFall));
        assert!(resolver.resolve("nope").is_err());

        let dev = StaticLicenses::development().resolve("anything").unwrap();
        assert!(dev.has_feature(Feature::KillAura));
    }
}
