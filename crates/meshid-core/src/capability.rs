//! Capability Model
//!
//! The typed vocabulary of semantic device properties exposed to the host
//! application, and the legality rules binding them to power-source classes.
//!
//! ## Legality
//!
//! ```text
//! PowerSource ──→ CapabilityLegalityRule
//!                 ├─ allowed   (endorsed for this power class)
//!                 ├─ required  (added by the projector when legal)
//!                 └─ forbidden (pruned by the projector)
//! ```
//!
//! Every lookup here is pure. The only failure is asking about a
//! capability outside the vocabulary.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kind of value a capability carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Boolean,
    Number,
    Enum,
}

/// Static description of a known capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    pub id: CapabilityId,
    pub kind: ValueKind,
    pub unit: Option<&'static str>,
}

macro_rules! capability_vocabulary {
    ($( $(#[$doc:meta])* $variant:ident => $name:literal, $kind:ident, $unit:expr; )*) => {
        /// Semantic device property, named the way the host application names it.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum CapabilityId {
            $( $(#[$doc])* $variant, )*
            /// Datapoint with no translation rule; the raw value is kept.
            PassthroughUnknown,
        }

        impl CapabilityId {
            /// Every capability in the vocabulary (excludes the passthrough entry).
            pub const ALL: &'static [CapabilityId] = &[$( CapabilityId::$variant, )*];

            /// Host-application name of the capability.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( Self::$variant => $name, )*
                    Self::PassthroughUnknown => "passthrough_unknown",
                }
            }

            fn parts(&self) -> Option<(ValueKind, Option<&'static str>)> {
                match self {
                    $( Self::$variant => Some((ValueKind::$kind, $unit)), )*
                    Self::PassthroughUnknown => None,
                }
            }
        }

        impl FromStr for CapabilityId {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim() {
                    $( $name => Ok(Self::$variant), )*
                    "passthrough_unknown" => Ok(Self::PassthroughUnknown),
                    other => Err(Error::UnknownCapability(other.to_string())),
                }
            }
        }
    };
}

capability_vocabulary! {
    OnOff => "onoff", Boolean, None;
    Dim => "dim", Number, None;
    MeasureBattery => "measure_battery", Number, Some("%");
    AlarmBattery => "alarm_battery", Boolean, None;
    MeasureTemperature => "measure_temperature", Number, Some("°C");
    MeasureHumidity => "measure_humidity", Number, Some("%");
    MeasureLuminance => "measure_luminance", Number, Some("lx");
    MeasurePower => "measure_power", Number, Some("W");
    MeasureVoltage => "measure_voltage", Number, Some("V");
    MeasureCurrent => "measure_current", Number, Some("A");
    MeterPower => "meter_power", Number, Some("kWh");
    MeasureCo2 => "measure_co2", Number, Some("ppm");
    AlarmSmoke => "alarm_smoke", Boolean, None;
    AlarmCo => "alarm_co", Boolean, None;
    AlarmGas => "alarm_gas", Boolean, None;
    AlarmWater => "alarm_water", Boolean, None;
    AlarmMotion => "alarm_motion", Boolean, None;
    AlarmContact => "alarm_contact", Boolean, None;
    AlarmTamper => "alarm_tamper", Boolean, None;
    AlarmGeneric => "alarm_generic", Boolean, None;
    TargetTemperature => "target_temperature", Number, Some("°C");
    ThermostatMode => "thermostat_mode", Enum, None;
    WindowCoveringsState => "windowcoverings_state", Enum, None;
    WindowCoveringsSet => "windowcoverings_set", Number, None;
    Locked => "locked", Boolean, None;
    VolumeSet => "volume_set", Number, None;
}

impl CapabilityId {
    /// Value kind carried by the capability; `None` for the passthrough entry.
    pub fn kind(&self) -> Option<ValueKind> {
        self.parts().map(|(kind, _)| kind)
    }

    /// Whether this capability is an alarm flag.
    pub fn is_alarm(&self) -> bool {
        self.as_str().starts_with("alarm_")
    }

    /// Whether this capability is a measurement.
    pub fn is_measurement(&self) -> bool {
        self.as_str().starts_with("measure_") || matches!(self, Self::MeterPower)
    }
}

impl std::fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for CapabilityId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CapabilityId> for String {
    fn from(value: CapabilityId) -> Self {
        value.as_str().to_string()
    }
}

/// Power-source class of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PowerSource {
    Mains,
    Battery,
    #[default]
    Unknown,
}

impl std::fmt::Display for PowerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mains => write!(f, "mains"),
            Self::Battery => write!(f, "battery"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for PowerSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mains" | "ac" => Ok(Self::Mains),
            "battery" => Ok(Self::Battery),
            "unknown" | "" => Ok(Self::Unknown),
            other => Err(Error::Config(format!("unknown power source '{}'", other))),
        }
    }
}

/// Device category classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Switch,
    Plug,
    Light,
    Cover,
    Lock,
    Thermostat,
    Sensor,
    SmokeDetector,
    CoDetector,
    GasDetector,
    WaterLeakSensor,
    MotionSensor,
    ContactSensor,
    Siren,
    Button,
    #[default]
    Other,
}

impl Category {
    /// The single alarm capability the primary status bit (alarm 1) drives.
    pub fn primary_alarm(&self) -> CapabilityId {
        match self {
            Self::SmokeDetector => CapabilityId::AlarmSmoke,
            Self::CoDetector => CapabilityId::AlarmCo,
            Self::GasDetector => CapabilityId::AlarmGas,
            Self::WaterLeakSensor => CapabilityId::AlarmWater,
            Self::MotionSensor => CapabilityId::AlarmMotion,
            Self::ContactSensor => CapabilityId::AlarmContact,
            _ => CapabilityId::AlarmGeneric,
        }
    }

    /// Category implied by an IAS zone type attribute.
    pub fn from_zone_type(zone_type: u16) -> Option<Self> {
        match zone_type {
            0x000D => Some(Self::MotionSensor),
            0x0015 => Some(Self::ContactSensor),
            0x0028 => Some(Self::SmokeDetector),
            0x002A => Some(Self::WaterLeakSensor),
            0x002B => Some(Self::GasDetector),
            0x002C | 0x002D => Some(Self::Button),
            0x0225 => Some(Self::Siren),
            _ => None,
        }
    }

    /// Best-effort category from a claimed capability set.
    pub fn infer(capabilities: &BTreeSet<CapabilityId>) -> Self {
        use CapabilityId as C;

        let alarm_categories = [
            (C::AlarmSmoke, Self::SmokeDetector),
            (C::AlarmCo, Self::CoDetector),
            (C::AlarmGas, Self::GasDetector),
            (C::AlarmWater, Self::WaterLeakSensor),
            (C::AlarmMotion, Self::MotionSensor),
            (C::AlarmContact, Self::ContactSensor),
        ];
        if let Some((_, category)) = alarm_categories
            .iter()
            .find(|(cap, _)| capabilities.contains(cap))
        {
            return *category;
        }

        if capabilities.contains(&C::WindowCoveringsSet)
            || capabilities.contains(&C::WindowCoveringsState)
        {
            Self::Cover
        } else if capabilities.contains(&C::TargetTemperature) {
            Self::Thermostat
        } else if capabilities.contains(&C::Locked) {
            Self::Lock
        } else if capabilities.contains(&C::Dim) {
            Self::Light
        } else if capabilities.contains(&C::OnOff) {
            Self::Switch
        } else if capabilities.iter().any(CapabilityId::is_measurement) {
            Self::Sensor
        } else {
            Self::Other
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "other".to_string());
        f.write_str(&name)
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        serde_json::from_value(serde_json::Value::String(normalized))
            .map_err(|_| Error::Config(format!("unknown category '{}'", s)))
    }
}

/// Capabilities a power-source class allows, requires and forbids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityLegalityRule {
    pub power_source: PowerSource,
    #[serde(default)]
    pub allowed: BTreeSet<CapabilityId>,
    #[serde(default)]
    pub required: BTreeSet<CapabilityId>,
    #[serde(default)]
    pub forbidden: BTreeSet<CapabilityId>,
}

impl CapabilityLegalityRule {
    /// Create a rule that allows and forbids nothing.
    pub fn new(power_source: PowerSource) -> Self {
        Self {
            power_source,
            allowed: BTreeSet::new(),
            required: BTreeSet::new(),
            forbidden: BTreeSet::new(),
        }
    }

    pub fn allow(mut self, caps: impl IntoIterator<Item = CapabilityId>) -> Self {
        self.allowed.extend(caps);
        self
    }

    pub fn require(mut self, caps: impl IntoIterator<Item = CapabilityId>) -> Self {
        self.required.extend(caps);
        self
    }

    pub fn forbid(mut self, caps: impl IntoIterator<Item = CapabilityId>) -> Self {
        self.forbidden.extend(caps);
        self
    }
}

/// Lookup surface over the capability vocabulary and legality table.
#[derive(Debug, Clone)]
pub struct CapabilityModel {
    rules: HashMap<PowerSource, CapabilityLegalityRule>,
}

impl CapabilityModel {
    /// Build a model from explicit rules.
    ///
    /// Power sources without a rule get an empty one. A rule that both
    /// allows/requires and forbids the same capability is rejected.
    pub fn new(rules: impl IntoIterator<Item = CapabilityLegalityRule>) -> Result<Self> {
        let mut table = HashMap::new();
        for rule in rules {
            let overlap: Vec<&str> = rule
                .forbidden
                .iter()
                .filter(|c| rule.allowed.contains(c) || rule.required.contains(c))
                .map(CapabilityId::as_str)
                .collect();
            if !overlap.is_empty() {
                return Err(Error::Config(format!(
                    "{} rule both permits and forbids: {}",
                    rule.power_source,
                    overlap.join(", ")
                )));
            }
            if rule.forbidden.contains(&CapabilityId::PassthroughUnknown)
                || rule.required.contains(&CapabilityId::PassthroughUnknown)
            {
                return Err(Error::UnknownCapability(
                    CapabilityId::PassthroughUnknown.as_str().to_string(),
                ));
            }
            table.insert(rule.power_source, rule);
        }
        for ps in [PowerSource::Mains, PowerSource::Battery, PowerSource::Unknown] {
            table
                .entry(ps)
                .or_insert_with(|| CapabilityLegalityRule::new(ps));
        }
        Ok(Self { rules: table })
    }

    /// The legality table observed across the driver catalog.
    pub fn builtin() -> Self {
        use CapabilityId as C;

        let mains = CapabilityLegalityRule::new(PowerSource::Mains)
            .allow([
                C::OnOff,
                C::Dim,
                C::MeasurePower,
                C::MeasureVoltage,
                C::MeasureCurrent,
                C::MeterPower,
            ])
            .forbid([C::MeasureBattery, C::AlarmBattery]);
        let battery = CapabilityLegalityRule::new(PowerSource::Battery)
            .allow([
                C::AlarmBattery,
                C::MeasureTemperature,
                C::MeasureHumidity,
                C::AlarmMotion,
                C::AlarmContact,
            ])
            .require([C::MeasureBattery])
            .forbid([C::MeasurePower, C::MeasureVoltage, C::MeasureCurrent]);

        let mut rules = HashMap::new();
        rules.insert(PowerSource::Mains, mains);
        rules.insert(PowerSource::Battery, battery);
        rules.insert(
            PowerSource::Unknown,
            CapabilityLegalityRule::new(PowerSource::Unknown),
        );
        Self { rules }
    }

    /// Descriptor of a capability.
    pub fn descriptor(&self, capability: CapabilityId) -> Result<CapabilityDescriptor> {
        capability
            .parts()
            .map(|(kind, unit)| CapabilityDescriptor {
                id: capability,
                kind,
                unit,
            })
            .ok_or_else(|| Error::UnknownCapability(capability.as_str().to_string()))
    }

    /// Descriptor of a capability by host-application name.
    pub fn descriptor_by_name(&self, name: &str) -> Result<CapabilityDescriptor> {
        self.descriptor(name.parse()?)
    }

    /// The legality rule for a power source.
    pub fn rule(&self, power_source: PowerSource) -> &CapabilityLegalityRule {
        // `new` and `builtin` populate every power source.
        &self.rules[&power_source]
    }

    /// Whether a capability may be exposed by an identity with this power source.
    pub fn is_legal(&self, power_source: PowerSource, capability: CapabilityId) -> Result<bool> {
        self.descriptor(capability)?;
        Ok(!self.rule(power_source).forbidden.contains(&capability))
    }

    /// Minimum capability contract a category must expose.
    pub fn required_for(&self, category: Category) -> BTreeSet<CapabilityId> {
        use CapabilityId as C;

        let caps: Vec<CapabilityId> = match category {
            Category::Switch | Category::Plug | Category::Light | Category::Siren => vec![C::OnOff],
            Category::Cover => vec![C::WindowCoveringsSet],
            Category::Lock => vec![C::Locked],
            Category::Thermostat => vec![C::TargetTemperature, C::MeasureTemperature],
            Category::SmokeDetector
            | Category::CoDetector
            | Category::GasDetector
            | Category::WaterLeakSensor
            | Category::MotionSensor
            | Category::ContactSensor => vec![category.primary_alarm(), C::MeasureBattery],
            Category::Button | Category::Sensor => vec![C::MeasureBattery],
            Category::Other => Vec::new(),
        };
        caps.into_iter().collect()
    }

    /// Capabilities the projector must guarantee for an identity: the category
    /// contract plus the power source's requirements, minus anything illegal.
    pub fn required_for_identity(
        &self,
        category: Category,
        power_source: PowerSource,
    ) -> BTreeSet<CapabilityId> {
        let rule = self.rule(power_source);
        self.required_for(category)
            .into_iter()
            .chain(rule.required.iter().copied())
            .filter(|c| !rule.forbidden.contains(c))
            .collect()
    }
}

impl Default for CapabilityModel {
    fn default() -> Self {
        Self::builtin()
    }
}
