//! Capability Projector
//!
//! Brings an identity's capability set in line with the legality rule of its
//! power source: forbidden capabilities are pruned, and the capabilities its
//! category and power source require are added. Running the projector on
//! its own output changes nothing.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use meshid_core::{
    CapabilityId, CapabilityModel, DeviceIdentity, Error, IdentityId, IdentityState, PowerSource,
    TypedValue,
};

/// What one projection pass changed.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ProjectionReport {
    pub identity: IdentityId,
    pub power_source: PowerSource,
    /// Capabilities removed as illegal for the power source
    pub pruned: BTreeSet<CapabilityId>,
    /// Required capabilities that were missing, with their initial value
    pub added: BTreeMap<CapabilityId, TypedValue>,
    /// Whether the pass promoted the identity to `Validated`
    pub validated: bool,
}

impl ProjectionReport {
    pub fn is_noop(&self) -> bool {
        self.pruned.is_empty() && self.added.is_empty() && !self.validated
    }

    /// The legality violation this pass repaired, if any.
    pub fn violation(&self) -> Option<Error> {
        if self.pruned.is_empty() {
            return None;
        }
        Some(Error::IllegalCapabilityCombination {
            identity: self.identity.clone(),
            power_source: self.power_source,
            capabilities: self.pruned.clone(),
        })
    }
}

/// Applies the legality table to identities.
#[derive(Debug, Clone, Default)]
pub struct CapabilityProjector {
    model: CapabilityModel,
}

impl CapabilityProjector {
    pub fn new(model: CapabilityModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &CapabilityModel {
        &self.model
    }

    /// Project an identity in place.
    ///
    /// Illegal capabilities are logged and pruned; they never fail the pass.
    pub fn project(&self, identity: &mut DeviceIdentity) -> ProjectionReport {
        let rule = self.model.rule(identity.power_source);
        let mut report = ProjectionReport {
            identity: identity.id.clone(),
            power_source: identity.power_source,
            ..Default::default()
        };

        report.pruned = identity
            .capabilities
            .intersection(&rule.forbidden)
            .copied()
            .collect();
        for capability in &report.pruned {
            identity.capabilities.remove(capability);
            identity.capability_sources.remove(capability);
        }
        if let Some(violation) = report.violation() {
            tracing::warn!(identity = %identity.id, "{}; pruned", violation);
        }

        let required = self
            .model
            .required_for_identity(identity.category, identity.power_source);
        for capability in required {
            if identity.capabilities.insert(capability) {
                report.added.insert(capability, TypedValue::Unknown);
            }
        }
        if !report.added.is_empty() {
            tracing::debug!(
                identity = %identity.id,
                added = ?report.added.keys().collect::<Vec<_>>(),
                "Added required capabilities"
            );
        }

        if identity.state == IdentityState::Discovered
            && identity.power_source != PowerSource::Unknown
        {
            identity.state = IdentityState::Validated;
            report.validated = true;
        }

        report
    }

    /// Project a copy, leaving the input untouched.
    pub fn projected(&self, identity: &DeviceIdentity) -> (DeviceIdentity, ProjectionReport) {
        let mut copy = identity.clone();
        let report = self.project(&mut copy);
        (copy, report)
    }

    /// Whether an identity already satisfies its power source's rule.
    pub fn is_clean(&self, identity: &DeviceIdentity) -> bool {
        let rule = self.model.rule(identity.power_source);
        identity.capabilities.is_disjoint(&rule.forbidden)
    }
}
