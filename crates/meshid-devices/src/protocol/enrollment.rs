//! IAS zone enrollment handshake.
//!
//! ```text
//! Unenrolled ──zone state 0──→ EnrollPending ──zone status report──→ Enrolled
//!      └─────────zone state != 0─────────────────────────────────────────┘
//! ```
//!
//! A zone state of `0` means the device is waiting for the coordinator's
//! enroll response; the machine emits that response once.

use serde::{Deserialize, Serialize};

use super::{CLUSTER_IAS_ZONE, CMD_ZONE_ENROLL_RESPONSE};

/// Enroll response code for success.
pub const ENROLL_SUCCESS: u8 = 0x00;
/// Zone id assigned on enrollment.
pub const DEFAULT_ZONE_ID: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentState {
    #[default]
    Unenrolled,
    EnrollPending,
    Enrolled,
}

/// Encoded zone enroll response, ready for the radio stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollResponse {
    pub cluster: u16,
    pub command: u8,
    pub payload: Vec<u8>,
}

impl EnrollResponse {
    pub fn success(zone_id: u8) -> Self {
        Self {
            cluster: CLUSTER_IAS_ZONE,
            command: CMD_ZONE_ENROLL_RESPONSE,
            payload: vec![ENROLL_SUCCESS, zone_id],
        }
    }
}

/// Per-endpoint enrollment state machine.
#[derive(Debug, Clone, Default)]
pub struct ZoneEnrollment {
    state: EnrollmentState,
}

impl ZoneEnrollment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> EnrollmentState {
        self.state
    }

    /// Handle a zone state attribute read.
    ///
    /// Returns the enroll response to send when the device is unenrolled.
    pub fn on_zone_state(&mut self, zone_state: u8) -> Option<EnrollResponse> {
        if zone_state != 0 {
            if self.state != EnrollmentState::Enrolled {
                tracing::debug!(zone_state, "Zone already enrolled");
            }
            self.state = EnrollmentState::Enrolled;
            return None;
        }

        match self.state {
            EnrollmentState::Unenrolled => {
                tracing::debug!("Zone unenrolled, sending enroll response");
                self.state = EnrollmentState::EnrollPending;
                Some(EnrollResponse::success(DEFAULT_ZONE_ID))
            }
            // The response is already in flight.
            EnrollmentState::EnrollPending => None,
            // The device forgot its enrollment (e.g. after a reset); start over.
            EnrollmentState::Enrolled => {
                tracing::debug!("Zone reports unenrolled again, re-enrolling");
                self.state = EnrollmentState::EnrollPending;
                Some(EnrollResponse::success(DEFAULT_ZONE_ID))
            }
        }
    }

    /// A zone status report arrived; a pending enrollment is complete.
    pub fn on_zone_status(&mut self) {
        if self.state == EnrollmentState::EnrollPending {
            tracing::debug!("Zone enrollment confirmed by status report");
            self.state = EnrollmentState::Enrolled;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unenrolled_zone_gets_response() {
        let mut machine = ZoneEnrollment::new();
        let response = machine.on_zone_state(0).unwrap();
        assert_eq!(machine.state(), EnrollmentState::EnrollPending);
        assert_eq!(response.cluster, 0x0500);
        assert_eq!(response.command, 0x00);
        assert_eq!(response.payload, vec![0x00, 0x01]);

        // No duplicate response while pending.
        assert!(machine.on_zone_state(0).is_none());

        machine.on_zone_status();
        assert_eq!(machine.state(), EnrollmentState::Enrolled);
    }

    #[test]
    fn test_enrolled_zone_skips_handshake() {
        let mut machine = ZoneEnrollment::new();
        assert!(machine.on_zone_state(1).is_none());
        assert_eq!(machine.state(), EnrollmentState::Enrolled);
    }

    #[test]
    fn test_status_report_without_pending_is_ignored() {
        let mut machine = ZoneEnrollment::new();
        machine.on_zone_status();
        assert_eq!(machine.state(), EnrollmentState::Unenrolled);
    }
}
