//! Device identity records.
//!
//! A [`DeviceIdentity`] is the canonical driver-identity unit: the token
//! sets a device family advertises, the endpoint clusters it was seen with,
//! and the capability set it exposes. Identities are never deleted, only
//! superseded by another identity.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capability::{CapabilityId, Category, PowerSource};
use crate::error::{Error, Result};

/// Unique identifier for a device identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub String);

impl IdentityId {
    /// Generate a fresh identifier for a newly discovered identity.
    pub fn generate(product_token: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}-{}",
            product_token.trim().to_ascii_lowercase(),
            &suffix[..8]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdentityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for IdentityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle of an identity. Only `Validated` identities reach runtime drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdentityState {
    #[default]
    Discovered,
    Validated,
    Superseded,
}

/// How well a manufacturer token matched an advertised manufacturer string.
///
/// Exact matches outrank prefix matches; longer prefixes outrank shorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TokenMatch {
    Prefix(usize),
    Exact,
}

/// Whether a manufacturer token is an OEM prefix such as `_TZE200_`.
pub fn is_oem_prefix(token: &str) -> bool {
    token.len() > 2
        && token.starts_with('_')
        && token.ends_with('_')
        && token[1..token.len() - 1]
            .chars()
            .all(|c| c.is_ascii_alphanumeric())
}

/// Match a stored manufacturer token against an advertised manufacturer string.
pub fn match_manufacturer(token: &str, advertised: &str) -> Option<TokenMatch> {
    if token == advertised {
        Some(TokenMatch::Exact)
    } else if is_oem_prefix(token) && advertised.starts_with(token) {
        Some(TokenMatch::Prefix(token.len()))
    } else {
        None
    }
}

/// Normalize a raw vendor token as received from a feed or a device.
pub fn normalize_token(token: &str) -> String {
    token.trim().trim_matches('\0').to_string()
}

/// Canonical driver identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub id: IdentityId,
    pub manufacturer_tokens: BTreeSet<String>,
    pub product_tokens: BTreeSet<String>,
    #[serde(default)]
    pub cluster_signature: BTreeSet<u16>,
    #[serde(default)]
    pub capabilities: BTreeSet<CapabilityId>,
    #[serde(default)]
    pub power_source: PowerSource,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub state: IdentityState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_into: Option<IdentityId>,
    /// Manufacturer token -> sources that asserted it
    #[serde(default)]
    pub manufacturer_sources: BTreeMap<String, BTreeSet<String>>,
    /// Product token -> sources that asserted it
    #[serde(default)]
    pub product_sources: BTreeMap<String, BTreeSet<String>>,
    /// Capability -> sources that claimed it
    #[serde(default)]
    pub capability_sources: BTreeMap<CapabilityId, BTreeSet<String>>,
}

impl DeviceIdentity {
    /// Create a new discovered identity with one fingerprint.
    pub fn new(
        id: impl Into<IdentityId>,
        manufacturer_token: impl Into<String>,
        product_token: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            manufacturer_tokens: [normalize_token(&manufacturer_token.into())]
                .into_iter()
                .collect(),
            product_tokens: [normalize_token(&product_token.into())].into_iter().collect(),
            cluster_signature: BTreeSet::new(),
            capabilities: BTreeSet::new(),
            power_source: PowerSource::Unknown,
            category: Category::Other,
            state: IdentityState::Discovered,
            merged_into: None,
            manufacturer_sources: BTreeMap::new(),
            product_sources: BTreeMap::new(),
            capability_sources: BTreeMap::new(),
        }
    }

    pub fn with_manufacturer(mut self, token: impl Into<String>) -> Self {
        self.manufacturer_tokens.insert(normalize_token(&token.into()));
        self
    }

    pub fn with_product(mut self, token: impl Into<String>) -> Self {
        self.product_tokens.insert(normalize_token(&token.into()));
        self
    }

    pub fn with_clusters(mut self, clusters: impl IntoIterator<Item = u16>) -> Self {
        self.cluster_signature.extend(clusters);
        self
    }

    pub fn with_capabilities(mut self, caps: impl IntoIterator<Item = CapabilityId>) -> Self {
        self.capabilities.extend(caps);
        self
    }

    pub fn with_power_source(mut self, power_source: PowerSource) -> Self {
        self.power_source = power_source;
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_state(mut self, state: IdentityState) -> Self {
        self.state = state;
        self
    }

    /// Check the structural invariants of an identity.
    ///
    /// Superseded identities may have handed all manufacturer tokens to
    /// their successor; live identities must keep at least one of each.
    pub fn validate(&self) -> Result<()> {
        if !self.is_superseded() && self.manufacturer_tokens.iter().all(|t| t.is_empty()) {
            return Err(Error::InvalidIdentity(
                self.id.clone(),
                "no manufacturer tokens".to_string(),
            ));
        }
        if self.product_tokens.iter().all(|t| t.is_empty()) {
            return Err(Error::InvalidIdentity(
                self.id.clone(),
                "no product tokens".to_string(),
            ));
        }
        if self.state == IdentityState::Superseded && self.merged_into.is_none() {
            return Err(Error::InvalidIdentity(
                self.id.clone(),
                "superseded without a successor".to_string(),
            ));
        }
        if self.merged_into.as_ref() == Some(&self.id) {
            return Err(Error::InvalidIdentity(
                self.id.clone(),
                "superseded by itself".to_string(),
            ));
        }
        Ok(())
    }

    /// Best match of any manufacturer token against an advertised string.
    pub fn manufacturer_match(&self, advertised: &str) -> Option<(TokenMatch, &str)> {
        self.manufacturer_tokens
            .iter()
            .filter_map(|t| match_manufacturer(t, advertised).map(|m| (m, t.as_str())))
            .max_by_key(|(m, _)| *m)
    }

    /// Number of clusters shared with an observed signature.
    pub fn signature_overlap(&self, observed: &BTreeSet<u16>) -> usize {
        self.cluster_signature.intersection(observed).count()
    }

    pub fn exposes(&self, capability: CapabilityId) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn is_validated(&self) -> bool {
        self.state == IdentityState::Validated
    }

    pub fn is_superseded(&self) -> bool {
        self.state == IdentityState::Superseded
    }

    /// Record that a source asserted a manufacturer token.
    pub fn note_manufacturer(&mut self, token: &str, source: &str) {
        self.manufacturer_tokens.insert(token.to_string());
        self.manufacturer_sources
            .entry(token.to_string())
            .or_default()
            .insert(source.to_string());
    }

    /// Record that a source asserted a product token.
    pub fn note_product(&mut self, token: &str, source: &str) {
        self.product_tokens.insert(token.to_string());
        self.product_sources
            .entry(token.to_string())
            .or_default()
            .insert(source.to_string());
    }

    /// Record that a source claimed a capability.
    pub fn note_capability(&mut self, capability: CapabilityId, source: &str) {
        self.capabilities.insert(capability);
        self.capability_sources
            .entry(capability)
            .or_default()
            .insert(source.to_string());
    }

    /// Remove a manufacturer token and its provenance.
    pub fn forget_manufacturer(&mut self, token: &str) -> Option<BTreeSet<String>> {
        self.manufacturer_tokens.remove(token);
        self.manufacturer_sources.remove(token)
    }

    /// Sources that asserted a manufacturer token.
    pub fn manufacturer_provenance(&self, token: &str) -> BTreeSet<String> {
        self.manufacturer_sources
            .get(token)
            .cloned()
            .unwrap_or_default()
    }
}
