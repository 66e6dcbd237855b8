//! Error types shared by every meshid crate.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::capability::{CapabilityId, PowerSource};
use crate::identity::IdentityId;

/// Result type for meshid operations.
pub type Result<T> = std::result::Result<T, Error>;

/// One identity that plausibly matched an ambiguous lookup, with the
/// sources that asserted the matching manufacturer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintCandidate {
    pub identity: IdentityId,
    pub matched_token: String,
    pub sources: BTreeSet<String>,
}

impl std::fmt::Display for FingerprintCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} via '{}'", self.identity, self.matched_token)?;
        if !self.sources.is_empty() {
            let sources: Vec<&str> = self.sources.iter().map(String::as_str).collect();
            write!(f, " [{}]", sources.join(", "))?;
        }
        Ok(())
    }
}

fn join_candidates(candidates: &[FingerprintCandidate]) -> String {
    candidates
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn join_capabilities(capabilities: &BTreeSet<CapabilityId>) -> String {
    capabilities
        .iter()
        .map(CapabilityId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Error kinds raised by the capability model, the translation table,
/// the fingerprint registry and the merge engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A capability name outside the known vocabulary.
    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    /// An `Enum` transform has no entry for the raw value.
    #[error("Unmapped enum value {raw} for datapoint {dp_key}")]
    UnmappedEnumValue { dp_key: u16, raw: i64 },

    /// A different rule is already published for the same identity and key.
    #[error(
        "Conflicting rule for datapoint {dp_key} of {identity}: existing {existing}, proposed {proposed}"
    )]
    ConflictingRule {
        identity: IdentityId,
        dp_key: u16,
        existing: String,
        proposed: String,
    },

    /// Two or more identities match a lookup equally well.
    #[error(
        "Ambiguous fingerprint {manufacturer}/{product}: {}",
        join_candidates(.candidates)
    )]
    AmbiguousFingerprint {
        manufacturer: String,
        product: String,
        candidates: Vec<FingerprintCandidate>,
    },

    /// Capabilities forbidden for the identity's power source.
    #[error(
        "Illegal capabilities for {power_source} identity {identity}: {}",
        join_capabilities(.capabilities)
    )]
    IllegalCapabilityCombination {
        identity: IdentityId,
        power_source: PowerSource,
        capabilities: BTreeSet<CapabilityId>,
    },

    /// A datapoint value that does not fit its wire encoding.
    #[error("Datapoint {dp} cannot be encoded: {reason}")]
    UnencodableDatapoint { dp: u8, reason: String },

    /// Identity record violates a structural invariant.
    #[error("Invalid identity {0}: {1}")]
    InvalidIdentity(IdentityId, String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Persistence failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguous_fingerprint_lists_provenance() {
        let error = Error::AmbiguousFingerprint {
            manufacturer: "_TZE200_abc".to_string(),
            product: "TS0601".to_string(),
            candidates: vec![
                FingerprintCandidate {
                    identity: IdentityId::from("thermostat_trv"),
                    matched_token: "_TZE200_".to_string(),
                    sources: ["z2m".to_string()].into_iter().collect(),
                },
                FingerprintCandidate {
                    identity: IdentityId::from("curtain_motor"),
                    matched_token: "_TZE200_".to_string(),
                    sources: BTreeSet::new(),
                },
            ],
        };

        let msg = error.to_string();
        assert!(msg.contains("_TZE200_abc/TS0601"));
        assert!(msg.contains("thermostat_trv via '_TZE200_' [z2m]"));
        assert!(msg.contains("curtain_motor"));
    }

    #[test]
    fn test_illegal_combination_display() {
        let error = Error::IllegalCapabilityCombination {
            identity: IdentityId::from("plug"),
            power_source: PowerSource::Mains,
            capabilities: [CapabilityId::MeasureBattery].into_iter().collect(),
        };
        assert_eq!(
            error.to_string(),
            "Illegal capabilities for mains identity plug: measure_battery"
        );
    }
}
