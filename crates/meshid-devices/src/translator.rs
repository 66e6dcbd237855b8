//! Runtime translator.
//!
//! Turns link-decoded endpoint events from a live device into capability
//! updates for the host application and encoded commands for the radio
//! stack. Translation never fails: anything that cannot be classified is
//! handed on as a passthrough observation.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use meshid_core::{
    CapabilityId, CapabilityUpdate, Category, DatapointValue, DeviceIdentity, EndpointEvent,
    IdentityId, OutboundCommand, Result, TypedValue,
};

use crate::protocol::{
    decode, encode_set_datapoint, encode_squawk, parse_frame, project_status, EnrollmentState,
    Level, SquawkMode, WarningRequest, ZoneEnrollment, CLUSTER_IAS_WD, CLUSTER_TUYA, CMD_SQUAWK,
    CMD_START_WARNING, DEFAULT_ENDPOINT,
};
use crate::registry::FingerprintRegistry;
use crate::translation::DatapointTable;

/// Result of handling one endpoint event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TranslationOutput {
    pub updates: Vec<CapabilityUpdate>,
    pub commands: Vec<OutboundCommand>,
}

impl TranslationOutput {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.commands.is_empty()
    }

    /// First update for a capability.
    pub fn update(&self, capability: CapabilityId) -> Option<&CapabilityUpdate> {
        self.updates.iter().find(|u| u.capability == capability)
    }
}

/// Binds the registry, the datapoint table and per-endpoint enrollment state.
pub struct DeviceTranslator {
    registry: Arc<FingerprintRegistry>,
    table: Arc<DatapointTable>,
    enrollment: DashMap<(IdentityId, u8), ZoneEnrollment>,
}

impl DeviceTranslator {
    pub fn new(registry: Arc<FingerprintRegistry>, table: Arc<DatapointTable>) -> Self {
        Self {
            registry,
            table,
            enrollment: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<FingerprintRegistry> {
        &self.registry
    }

    pub fn table(&self) -> &Arc<DatapointTable> {
        &self.table
    }

    pub fn enrollment_state(&self, identity: &IdentityId, endpoint: u8) -> EnrollmentState {
        self.enrollment
            .get(&(identity.clone(), endpoint))
            .map(|machine| machine.state())
            .unwrap_or_default()
    }

    /// Handle an event from the default endpoint.
    pub fn handle(&self, identity: &IdentityId, event: &EndpointEvent) -> TranslationOutput {
        self.handle_on(identity, DEFAULT_ENDPOINT, event)
    }

    pub fn handle_on(
        &self,
        identity: &IdentityId,
        endpoint: u8,
        event: &EndpointEvent,
    ) -> TranslationOutput {
        let snapshot = self.registry.snapshot();
        let device = match snapshot.resolve(identity) {
            Some(device) if device.is_validated() => device.clone(),
            Some(device) => {
                tracing::warn!(identity = %identity, state = ?device.state, "Event for identity that is not validated");
                return passthrough(identity, event);
            }
            None => {
                tracing::warn!(identity = %identity, "Event for unknown identity");
                return passthrough(identity, event);
            }
        };

        // Rules registered under a superseded id still apply to its successor.
        let owners = snapshot.lineage(identity);
        drop(snapshot);

        let mut output = TranslationOutput::default();
        match event {
            EndpointEvent::ZoneStatus { word } => {
                self.enrollment
                    .entry((device.id.clone(), endpoint))
                    .or_default()
                    .on_zone_status();
                let flags = decode(*word);
                tracing::debug!(identity = %device.id, word = format_args!("{:#06x}", word), ?flags, "Zone status");
                output.updates = project_status(&device, flags);
            }
            EndpointEvent::ZoneState { state } => {
                let response = self
                    .enrollment
                    .entry((device.id.clone(), endpoint))
                    .or_default()
                    .on_zone_state(*state);
                if let Some(response) = response {
                    output.commands.push(OutboundCommand {
                        identity: device.id.clone(),
                        endpoint,
                        cluster: response.cluster,
                        command: response.command,
                        payload: response.payload,
                    });
                }
            }
            EndpointEvent::ZoneType { zone_type } => match Category::from_zone_type(*zone_type) {
                Some(hint) if hint != device.category => {
                    tracing::warn!(
                        identity = %device.id,
                        zone_type = format_args!("{:#06x}", zone_type),
                        %hint,
                        category = %device.category,
                        "Zone type disagrees with identity category"
                    );
                }
                Some(_) => {}
                None => {
                    tracing::debug!(identity = %device.id, zone_type, "Unrecognized zone type");
                }
            },
            EndpointEvent::Datapoint { dp_key, value } => {
                output.updates.push(self.datapoint(&device, &owners, *dp_key, value));
            }
            EndpointEvent::DatapointFrame { payload } => {
                let frame = parse_frame(payload);
                output.updates = frame
                    .records
                    .iter()
                    .map(|record| {
                        self.datapoint(&device, &owners, u16::from(record.dp), &record.value)
                    })
                    .collect();
            }
        }
        output
    }

    fn datapoint(
        &self,
        device: &DeviceIdentity,
        owners: &[IdentityId],
        dp_key: u16,
        value: &DatapointValue,
    ) -> CapabilityUpdate {
        match self.table.resolve_first(owners, dp_key, value) {
            Ok((CapabilityId::PassthroughUnknown, typed)) => {
                tracing::warn!(identity = %device.id, dp_key, value = %typed, "Unclassified datapoint");
                CapabilityUpdate::passthrough(device.id.clone(), Some(dp_key), typed)
            }
            Ok((capability, typed)) if device.exposes(capability) => {
                tracing::debug!(identity = %device.id, dp_key, %capability, value = %typed, "Datapoint");
                CapabilityUpdate::new(device.id.clone(), capability, typed)
            }
            Ok((capability, _)) => {
                tracing::warn!(identity = %device.id, dp_key, %capability, "Datapoint maps to a capability the identity does not expose");
                CapabilityUpdate::passthrough(device.id.clone(), Some(dp_key), value.to_passthrough())
            }
            Err(error) => {
                tracing::warn!(identity = %device.id, dp_key, %error, "Datapoint kept as passthrough");
                CapabilityUpdate::passthrough(device.id.clone(), Some(dp_key), value.to_passthrough())
            }
        }
    }

    /// Encode a start-warning command for a siren.
    pub fn warning_command(
        &self,
        identity: &IdentityId,
        endpoint: u8,
        request: WarningRequest,
    ) -> OutboundCommand {
        OutboundCommand {
            identity: identity.clone(),
            endpoint,
            cluster: CLUSTER_IAS_WD,
            command: CMD_START_WARNING,
            payload: request.encode().to_vec(),
        }
    }

    /// Encode a squawk command for a siren.
    pub fn squawk_command(
        &self,
        identity: &IdentityId,
        endpoint: u8,
        mode: SquawkMode,
        strobe: bool,
        level: Level,
    ) -> OutboundCommand {
        OutboundCommand {
            identity: identity.clone(),
            endpoint,
            cluster: CLUSTER_IAS_WD,
            command: CMD_SQUAWK,
            payload: encode_squawk(mode, strobe, level).to_vec(),
        }
    }

    /// Encode a keyed-datapoint write.
    pub fn set_datapoint_command(
        &self,
        identity: &IdentityId,
        endpoint: u8,
        seq: u16,
        dp: u8,
        value: &DatapointValue,
    ) -> Result<OutboundCommand> {
        Ok(OutboundCommand {
            identity: identity.clone(),
            endpoint,
            cluster: CLUSTER_TUYA,
            command: crate::protocol::tuya_frame::CMD_SET_DATA,
            payload: encode_set_datapoint(seq, dp, value)?.to_vec(),
        })
    }
}

/// Raw observations for an identity the translator cannot serve.
fn passthrough(identity: &IdentityId, event: &EndpointEvent) -> TranslationOutput {
    let raw = |value: i64| TypedValue::Integer(value);
    let updates = match event {
        EndpointEvent::ZoneStatus { word } => {
            vec![CapabilityUpdate::passthrough(identity.clone(), None, raw(i64::from(*word)))]
        }
        EndpointEvent::ZoneState { state } => {
            vec![CapabilityUpdate::passthrough(identity.clone(), None, raw(i64::from(*state)))]
        }
        EndpointEvent::ZoneType { zone_type } => {
            vec![CapabilityUpdate::passthrough(identity.clone(), None, raw(i64::from(*zone_type)))]
        }
        EndpointEvent::Datapoint { dp_key, value } => vec![CapabilityUpdate::passthrough(
            identity.clone(),
            Some(*dp_key),
            value.to_passthrough(),
        )],
        EndpointEvent::DatapointFrame { payload } => parse_frame(payload)
            .records
            .into_iter()
            .map(|record| {
                CapabilityUpdate::passthrough(
                    identity.clone(),
                    Some(u16::from(record.dp)),
                    record.value.to_passthrough(),
                )
            })
            .collect(),
    };
    TranslationOutput {
        updates,
        commands: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshid_core::{DatapointRule, PowerSource, Transform};

    fn translator() -> DeviceTranslator {
        let registry = Arc::new(FingerprintRegistry::new());
        registry
            .upsert(
                DeviceIdentity::new("smoke", "HEIMAN", "SmokeSensor-EM")
                    .with_power_source(PowerSource::Battery)
                    .with_category(Category::SmokeDetector)
                    .with_capabilities([CapabilityId::AlarmBattery, CapabilityId::AlarmTamper]),
            )
            .unwrap();
        DeviceTranslator::new(registry, Arc::new(DatapointTable::new()))
    }

    #[test]
    fn test_zone_status_projection() {
        let translator = translator();
        let id = IdentityId::from("smoke");
        let output = translator.handle(&id, &EndpointEvent::ZoneStatus { word: 0x0009 });
        assert_eq!(
            output.update(CapabilityId::AlarmSmoke).map(|u| &u.value),
            Some(&TypedValue::Bool(true))
        );
        assert_eq!(
            output.update(CapabilityId::AlarmBattery).map(|u| &u.value),
            Some(&TypedValue::Bool(true))
        );
        assert_eq!(
            output.update(CapabilityId::AlarmTamper).map(|u| &u.value),
            Some(&TypedValue::Bool(false))
        );
    }

    #[test]
    fn test_enrollment_flow() {
        let translator = translator();
        let id = IdentityId::from("smoke");
        let output = translator.handle(&id, &EndpointEvent::ZoneState { state: 0 });
        assert_eq!(output.commands.len(), 1);
        assert_eq!(output.commands[0].payload, vec![0x00, 0x01]);
        assert_eq!(translator.enrollment_state(&id, 1), EnrollmentState::EnrollPending);

        translator.handle(&id, &EndpointEvent::ZoneStatus { word: 0 });
        assert_eq!(translator.enrollment_state(&id, 1), EnrollmentState::Enrolled);
        // Other endpoints keep their own state.
        assert_eq!(translator.enrollment_state(&id, 2), EnrollmentState::Unenrolled);
    }

    #[test]
    fn test_unknown_identity_is_passthrough() {
        let translator = translator();
        let output = translator.handle(
            &IdentityId::from("ghost"),
            &EndpointEvent::Datapoint {
                dp_key: 7,
                value: DatapointValue::Value(12),
            },
        );
        assert_eq!(output.updates.len(), 1);
        assert_eq!(output.updates[0].capability, CapabilityId::PassthroughUnknown);
        assert_eq!(output.updates[0].dp_key, Some(7));
    }

    #[test]
    fn test_enum_miss_degrades() {
        let translator = translator();
        let id = IdentityId::from("smoke");
        translator
            .table()
            .register(
                &id,
                DatapointRule::new(
                    9,
                    CapabilityId::AlarmTamper,
                    Transform::enumeration([(0, "ok")]),
                ),
            )
            .unwrap();
        let output = translator.handle(
            &id,
            &EndpointEvent::Datapoint {
                dp_key: 9,
                value: DatapointValue::Enum(4),
            },
        );
        assert_eq!(output.updates[0].capability, CapabilityId::PassthroughUnknown);
        assert_eq!(output.updates[0].value, TypedValue::Integer(4));
    }

    #[test]
    fn test_warning_command() {
        let translator = translator();
        let command = translator.warning_command(
            &IdentityId::from("smoke"),
            1,
            WarningRequest::stop().with_duration(60),
        );
        assert_eq!(command.cluster, 0x0502);
        assert_eq!(command.payload, vec![0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_set_datapoint_command() {
        let translator = translator();
        let id = IdentityId::from("smoke");
        let command = translator
            .set_datapoint_command(&id, 1, 3, 4, &DatapointValue::Enum(1))
            .unwrap();
        assert_eq!(command.cluster, CLUSTER_TUYA);
        assert_eq!(command.payload, vec![0x00, 0x03, 0x04, 0x04, 0x00, 0x01, 0x01]);

        let err = translator
            .set_datapoint_command(&id, 1, 4, 2, &DatapointValue::Value(i64::MAX))
            .unwrap_err();
        assert!(matches!(err, meshid_core::Error::UnencodableDatapoint { dp: 2, .. }));
    }
}
