//! Protocol Translation Layer
//!
//! Wire formats the runtime translator decodes and encodes.
//!
//! ## Architecture
//!
//! ```text
//! Radio stack event                   Decoder
//! ├─ 0x0500 zone status word  ──────→  status::decode      → StatusFlags
//! ├─ 0x0500 zone state read   ──────→  enrollment          → enroll response
//! ├─ 0xEF00 datapoint frame   ──────→  tuya_frame::parse   → DatapointRecord*
//! └─ siren / strobe request   ──────→  warning::encode     → 0x0502 payload
//! ```

pub mod enrollment;
pub mod status;
pub mod tuya_frame;
pub mod warning;

/// IAS Zone cluster.
pub const CLUSTER_IAS_ZONE: u16 = 0x0500;
/// IAS WD (warning device) cluster.
pub const CLUSTER_IAS_WD: u16 = 0x0502;
/// Tuya private datapoint cluster.
pub const CLUSTER_TUYA: u16 = 0xEF00;

/// Zone enroll response (client to server).
pub const CMD_ZONE_ENROLL_RESPONSE: u8 = 0x00;
/// Start warning on the WD cluster.
pub const CMD_START_WARNING: u8 = 0x00;
/// Squawk on the WD cluster.
pub const CMD_SQUAWK: u8 = 0x01;

/// Endpoint hosting the IAS clusters on the devices we know.
pub const DEFAULT_ENDPOINT: u8 = 1;

// Re-exports
pub use enrollment::{EnrollResponse, EnrollmentState, ZoneEnrollment};
pub use status::{decode, project_status, StatusBit, StatusFlags, STATUS_BITS};
pub use tuya_frame::{encode_set_datapoint, parse_frame, DatapointFrame, DatapointRecord, DpType};
pub use warning::{encode_squawk, encode_warning, Level, SquawkMode, WarningMode, WarningRequest};
