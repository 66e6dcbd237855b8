//! Builtin datapoint profiles for common keyed-datapoint device families.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use meshid_core::{CapabilityId, Category, DatapointRule, Error, IdentityId, Result, Transform};

use crate::translation::DatapointTable;

/// A family of devices sharing one datapoint layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatapointProfile {
    Climate,
    Soil,
    Motion,
    Contact,
    Plug,
    Dimmer,
    Curtain,
    Thermostat,
    Siren,
}

impl DatapointProfile {
    pub const ALL: [DatapointProfile; 9] = [
        Self::Climate,
        Self::Soil,
        Self::Motion,
        Self::Contact,
        Self::Plug,
        Self::Dimmer,
        Self::Curtain,
        Self::Thermostat,
        Self::Siren,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Climate => "climate",
            Self::Soil => "soil",
            Self::Motion => "motion",
            Self::Contact => "contact",
            Self::Plug => "plug",
            Self::Dimmer => "dimmer",
            Self::Curtain => "curtain",
            Self::Thermostat => "thermostat",
            Self::Siren => "siren",
        }
    }

    /// Profile usually matching a category, if any.
    pub fn for_category(category: Category) -> Option<Self> {
        match category {
            Category::Sensor => Some(Self::Climate),
            Category::MotionSensor => Some(Self::Motion),
            Category::ContactSensor => Some(Self::Contact),
            Category::Plug => Some(Self::Plug),
            Category::Light => Some(Self::Dimmer),
            Category::Cover => Some(Self::Curtain),
            Category::Thermostat => Some(Self::Thermostat),
            Category::Siren => Some(Self::Siren),
            _ => None,
        }
    }

    pub fn rules(&self) -> Vec<DatapointRule> {
        use CapabilityId as C;
        use Transform as T;

        let rule = DatapointRule::new;
        match self {
            // Battery is reported as half the percentage.
            Self::Climate => vec![
                rule(1, C::MeasureTemperature, T::ScaleDiv(10.0)),
                rule(2, C::MeasureHumidity, T::Identity),
                rule(4, C::MeasureBattery, T::Percent(2.0)),
            ],
            Self::Soil => vec![
                rule(3, C::MeasureHumidity, T::Identity),
                rule(5, C::MeasureTemperature, T::ScaleDiv(10.0)),
                rule(15, C::MeasureBattery, T::Clamp { min: 0.0, max: 100.0 }),
            ],
            Self::Motion => vec![
                rule(1, C::AlarmMotion, T::BoolFromZero),
                rule(5, C::MeasureTemperature, T::ScaleDiv(10.0)),
                rule(6, C::MeasureHumidity, T::Identity),
                rule(12, C::MeasureLuminance, T::Identity),
                rule(15, C::MeasureBattery, T::Clamp { min: 0.0, max: 100.0 }),
            ],
            // Contacts report 1 for closed.
            Self::Contact => vec![
                rule(1, C::AlarmContact, T::BoolInverted),
                rule(3, C::MeasureBattery, T::Clamp { min: 0.0, max: 100.0 }),
            ],
            Self::Plug => vec![
                rule(1, C::OnOff, T::BoolFromZero),
                rule(17, C::MeasureCurrent, T::ScaleDiv(1000.0)),
                rule(18, C::MeasurePower, T::ScaleDiv(10.0)),
                rule(19, C::MeasureVoltage, T::ScaleDiv(10.0)),
                rule(20, C::MeterPower, T::ScaleDiv(100.0)),
            ],
            Self::Dimmer => vec![
                rule(1, C::OnOff, T::BoolFromZero),
                rule(2, C::Dim, T::ScaleDiv(1000.0)),
            ],
            Self::Curtain => vec![
                rule(
                    1,
                    C::WindowCoveringsState,
                    T::enumeration([(0, "up"), (1, "idle"), (2, "down")]),
                ),
                rule(2, C::WindowCoveringsSet, T::ScaleDiv(100.0)),
                rule(3, C::WindowCoveringsSet, T::ScaleDiv(100.0)),
            ],
            Self::Thermostat => vec![
                rule(2, C::TargetTemperature, T::ScaleDiv(10.0)),
                rule(3, C::MeasureTemperature, T::ScaleDiv(10.0)),
                rule(
                    4,
                    C::ThermostatMode,
                    T::enumeration([(0, "manual"), (1, "auto"), (2, "away")]),
                ),
            ],
            Self::Siren => vec![
                rule(104, C::AlarmGeneric, T::BoolFromZero),
                rule(105, C::MeasureTemperature, T::ScaleDiv(10.0)),
                rule(106, C::MeasureHumidity, T::Identity),
            ],
        }
    }

    /// Register this profile's rules for an identity.
    pub fn install(&self, table: &DatapointTable, identity: &IdentityId) -> Result<usize> {
        let added = table.register_all(self.rules().into_iter().map(|r| (identity.clone(), r)))?;
        tracing::debug!(identity = %identity, profile = self.name(), added, "Installed datapoint profile");
        Ok(added)
    }
}

impl std::fmt::Display for DatapointProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DatapointProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|profile| profile.name() == name)
            .ok_or_else(|| Error::Config(format!("unknown datapoint profile '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshid_core::{DatapointValue, TypedValue};

    #[test]
    fn test_every_profile_installs_cleanly() {
        let table = DatapointTable::new();
        for profile in DatapointProfile::ALL {
            let id = IdentityId::from(profile.name());
            assert_eq!(profile.install(&table, &id).unwrap(), profile.rules().len());
            // Installing twice is a no-op.
            assert_eq!(profile.install(&table, &id).unwrap(), 0);
        }
    }

    #[test]
    fn test_contact_inversion() {
        let table = DatapointTable::new();
        let id = IdentityId::from("door");
        DatapointProfile::Contact.install(&table, &id).unwrap();
        let (cap, value) = table.resolve(&id, 1, &DatapointValue::Bool(true)).unwrap();
        assert_eq!(cap, CapabilityId::AlarmContact);
        assert_eq!(value, TypedValue::Bool(false));
    }

    #[test]
    fn test_plug_energy_scaling() {
        let table = DatapointTable::new();
        let id = IdentityId::from("plug");
        DatapointProfile::Plug.install(&table, &id).unwrap();
        assert_eq!(
            table.resolve(&id, 19, &DatapointValue::Value(2301)).unwrap().1,
            TypedValue::Number(230.1)
        );
        assert_eq!(
            table.resolve(&id, 17, &DatapointValue::Value(250)).unwrap().1,
            TypedValue::Number(0.25)
        );
    }

    #[test]
    fn test_climate_battery_is_capped() {
        let table = DatapointTable::new();
        let id = IdentityId::from("th");
        DatapointProfile::Climate.install(&table, &id).unwrap();
        assert_eq!(
            table.resolve(&id, 4, &DatapointValue::Value(43)).unwrap(),
            (CapabilityId::MeasureBattery, TypedValue::Number(86.0))
        );
        assert_eq!(
            table.resolve(&id, 4, &DatapointValue::Value(60)).unwrap(),
            (CapabilityId::MeasureBattery, TypedValue::Number(100.0))
        );
    }

    #[test]
    fn test_thermostat_mode_names() {
        let table = DatapointTable::new();
        let id = IdentityId::from("trv");
        DatapointProfile::Thermostat.install(&table, &id).unwrap();
        assert_eq!(
            table.resolve(&id, 4, &DatapointValue::Enum(1)).unwrap(),
            (CapabilityId::ThermostatMode, TypedValue::Enum("auto".to_string()))
        );
        assert!(matches!(
            table.resolve(&id, 4, &DatapointValue::Enum(7)),
            Err(Error::UnmappedEnumValue { dp_key: 4, raw: 7 })
        ));
    }

    #[test]
    fn test_names_parse() {
        for profile in DatapointProfile::ALL {
            assert_eq!(profile.name().parse::<DatapointProfile>().unwrap(), profile);
        }
        assert!("toaster".parse::<DatapointProfile>().is_err());
        assert_eq!(
            DatapointProfile::for_category(Category::Cover),
            Some(DatapointProfile::Curtain)
        );
    }
}
