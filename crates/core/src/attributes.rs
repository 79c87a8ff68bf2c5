//! Typed attribute bag shared by products and pools.
//!
//! Attributes travel as string pairs on the wire. Known keys are modelled as
//! [`AttributeKey`] variants with typed accessors on [`Attributes`]; unknown
//! keys land in [`AttributeKey::Other`] so nothing is lost on the way through.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Attribute keys the engine understands.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AttributeKey {
    /// Guests allowed per unit of capacity, or `"unlimited"`.
    VirtLimit,
    /// Pool (or product) may only be consumed by virtual guests.
    VirtOnly,
    /// Derived capacity is restricted to guests of the consuming host.
    HostLimited,
    /// Quantity multiplier applied at the origin of record.
    InstanceMultiplier,
    /// Marks a pool synthesized from another pool.
    DerivedPool,
    /// Derived pool usable only by guests not yet mapped to a host.
    UnmappedGuestsOnly,
    /// Pool may only be consumed by physical systems.
    PhysicalOnly,
    /// Pool created for a development consumer; never refreshed.
    DevelopmentPool,
    /// Socket count covered per unit.
    Sockets,
    /// Any key not listed above.
    Other(String),
}

impl AttributeKey {
    pub fn as_str(&self) -> &str {
        match self {
            AttributeKey::VirtLimit => "virt_limit",
            AttributeKey::VirtOnly => "virt_only",
            AttributeKey::HostLimited => "host_limited",
            AttributeKey::InstanceMultiplier => "instance_multiplier",
            AttributeKey::DerivedPool => "pool_derived",
            AttributeKey::UnmappedGuestsOnly => "unmapped_guests_only",
            AttributeKey::PhysicalOnly => "physical_only",
            AttributeKey::DevelopmentPool => "dev_pool",
            AttributeKey::Sockets => "sockets",
            AttributeKey::Other(key) => key,
        }
    }
}

impl From<&str> for AttributeKey {
    fn from(value: &str) -> Self {
        match value {
            "virt_limit" => AttributeKey::VirtLimit,
            "virt_only" => AttributeKey::VirtOnly,
            "host_limited" => AttributeKey::HostLimited,
            "instance_multiplier" => AttributeKey::InstanceMultiplier,
            "pool_derived" => AttributeKey::DerivedPool,
            "unmapped_guests_only" => AttributeKey::UnmappedGuestsOnly,
            "physical_only" => AttributeKey::PhysicalOnly,
            "dev_pool" => AttributeKey::DevelopmentPool,
            "sockets" => AttributeKey::Sockets,
            other => AttributeKey::Other(other.to_string()),
        }
    }
}

impl From<String> for AttributeKey {
    fn from(value: String) -> Self {
        AttributeKey::from(value.as_str())
    }
}

impl From<AttributeKey> for String {
    fn from(value: AttributeKey) -> Self {
        value.as_str().to_string()
    }
}

impl core::fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed `virt_limit` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtLimit {
    Unlimited,
    Limited(u32),
}

impl VirtLimit {
    pub const UNLIMITED_TOKEN: &'static str = "unlimited";

    /// Parse the literal `"unlimited"` token or a non-negative integer.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw == Self::UNLIMITED_TOKEN {
            return Some(VirtLimit::Unlimited);
        }
        raw.parse::<u32>().ok().map(VirtLimit::Limited)
    }
}

/// Ordered attribute bag with typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<AttributeKey, String>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: AttributeKey, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &AttributeKey) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &AttributeKey) -> bool {
        self.0.contains_key(key)
    }

    pub fn set(&mut self, key: AttributeKey, value: impl Into<String>) {
        self.0.insert(key, value.into());
    }

    pub fn remove(&mut self, key: &AttributeKey) -> Option<String> {
        self.0.remove(key)
    }

    /// Merge `other` into `self`; keys present in both take `other`'s value.
    pub fn extend(&mut self, other: &Attributes) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AttributeKey, &str)> {
        self.0.iter().map(|(k, v)| (k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Boolean attribute; only a case-insensitive `"true"` counts.
    pub fn flag(&self, key: &AttributeKey) -> bool {
        self.get(key)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// Strict non-negative count. Unparsable values are fatal.
    pub fn require_count(&self, key: &AttributeKey) -> DomainResult<Option<u32>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map(Some)
                .map_err(|_| DomainError::malformed(key.as_str(), raw)),
        }
    }

    /// Lenient `virt_limit` accessor.
    pub fn virt_limit(&self) -> Option<VirtLimit> {
        let raw = self.get(&AttributeKey::VirtLimit)?;
        let parsed = VirtLimit::parse(raw);
        if parsed.is_none() {
            tracing::debug!(value = raw, "invalid virt_limit attribute, assuming no virt_limit");
        }
        parsed
    }
}

impl FromIterator<(AttributeKey, String)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (AttributeKey, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
