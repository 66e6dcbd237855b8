//! Core types for meshid.
//!
//! This crate defines the capability vocabulary, device identity records and
//! the error and configuration types shared by the storage, device and CLI
//! crates.

pub mod capability;
pub mod config;
pub mod error;
pub mod event;
pub mod identity;
pub mod rule;
pub mod value;

pub use capability::{
    CapabilityDescriptor, CapabilityId, CapabilityLegalityRule, CapabilityModel, Category,
    PowerSource, ValueKind,
};
pub use config::{MergeConfig, SourceReliability};
pub use error::{Error, FingerprintCandidate, Result};
pub use event::{CandidateRecord, CapabilityUpdate, EndpointEvent, OutboundCommand};
pub use identity::{DeviceIdentity, IdentityId, IdentityState, TokenMatch};
pub use rule::{DatapointRule, Transform};
pub use value::{DatapointValue, TypedValue};

/// Re-exports commonly used types.
pub mod prelude {
    // Configuration
    pub use crate::config::{env_vars, MergeConfig, SourceReliability};

    // Error handling
    pub use crate::error::{Error, Result};

    // Vocabulary
    pub use crate::capability::{CapabilityId, CapabilityModel, Category, PowerSource};

    // Records
    pub use crate::event::{CandidateRecord, CapabilityUpdate, EndpointEvent, OutboundCommand};
    pub use crate::identity::{DeviceIdentity, IdentityId, IdentityState};
    pub use crate::rule::{DatapointRule, Transform};
    pub use crate::value::{DatapointValue, TypedValue};
}
