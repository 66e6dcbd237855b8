//! Records exchanged with the collaborators around the core: candidate
//! feeds on the way in, live endpoint events from the radio stack, and
//! capability updates and encoded commands on the way out.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityId, Category, PowerSource};
use crate::identity::IdentityId;
use crate::value::{DatapointValue, TypedValue};

/// Unverified claim from one feed about a device identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub source_id: String,
    pub manufacturer_token: String,
    pub product_token: String,
    #[serde(default)]
    pub claimed_capabilities: BTreeSet<CapabilityId>,
    #[serde(default)]
    pub confidence: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_source: Option<PowerSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

impl CandidateRecord {
    pub fn new(
        source_id: impl Into<String>,
        manufacturer_token: impl Into<String>,
        product_token: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            manufacturer_token: manufacturer_token.into(),
            product_token: product_token.into(),
            claimed_capabilities: BTreeSet::new(),
            confidence: 0,
            power_source: None,
            category: None,
        }
    }

    pub fn with_capabilities(mut self, caps: impl IntoIterator<Item = CapabilityId>) -> Self {
        self.claimed_capabilities.extend(caps);
        self
    }

    pub fn with_confidence(mut self, confidence: u8) -> Self {
        self.confidence = confidence.min(100);
        self
    }

    pub fn with_power_source(mut self, power_source: PowerSource) -> Self {
        self.power_source = Some(power_source);
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }
}

/// Already link-decoded event from one endpoint of a live device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndpointEvent {
    /// IAS zone status word (attribute report or change notification).
    ZoneStatus { word: u16 },
    /// IAS zone state attribute read.
    ZoneState { state: u8 },
    /// IAS zone type attribute read.
    ZoneType { zone_type: u16 },
    /// One decoded vendor datapoint.
    Datapoint { dp_key: u16, value: DatapointValue },
    /// Undecoded vendor datapoint frame from cluster 0xEF00.
    DatapointFrame { payload: Vec<u8> },
}

/// Capability value change for the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityUpdate {
    pub identity: IdentityId,
    pub capability: CapabilityId,
    pub value: TypedValue,
    /// Vendor datapoint key, kept for passthrough observations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dp_key: Option<u16>,
}

impl CapabilityUpdate {
    pub fn new(identity: IdentityId, capability: CapabilityId, value: TypedValue) -> Self {
        Self {
            identity,
            capability,
            value,
            dp_key: None,
        }
    }

    /// Observation nothing could classify; `dp_key` is `None` for status words.
    pub fn passthrough(identity: IdentityId, dp_key: Option<u16>, value: TypedValue) -> Self {
        Self {
            identity,
            capability: CapabilityId::PassthroughUnknown,
            value,
            dp_key,
        }
    }
}

/// Encoded cluster command handed back to the radio stack for transmission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundCommand {
    pub identity: IdentityId,
    pub endpoint: u8,
    pub cluster: u16,
    pub command: u8,
    pub payload: Vec<u8>,
}
