//! Device identity engines for meshid.
//!
//! ## Architecture
//!
//! ```text
//! candidate feeds ──→ MergeEngine ──→ FingerprintRegistry ←── CapabilityProjector
//!                                            │
//! radio stack ──→ DeviceTranslator ──────────┤
//!    events          ├─ protocol (status word, enrollment, frames, warnings)
//!                    └─ DatapointTable ──→ capability updates
//! ```

pub mod builtin;
pub mod merge;
pub mod projector;
pub mod protocol;
pub mod registry;
pub mod translation;
pub mod translator;

pub use builtin::DatapointProfile;
pub use merge::{Ambiguity, MergeEngine, MergeReport, Redirect, RejectReason, TokenDecision, TokenKind};
pub use projector::{CapabilityProjector, ProjectionReport};
pub use protocol::{
    decode, encode_squawk, encode_warning, parse_frame, EnrollmentState, Level, SquawkMode,
    StatusBit, StatusFlags, WarningMode, WarningRequest, ZoneEnrollment,
};
pub use registry::{FingerprintMatch, FingerprintRegistry, LookupScope, RegistrySnapshot, RegistryTxn};
pub use translation::DatapointTable;
pub use translator::{DeviceTranslator, TranslationOutput};
