//! Datapoint translation rules.
//!
//! A [`DatapointRule`] binds one vendor datapoint key to a capability and a
//! declarative [`Transform`] turning the raw integer into a typed value.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityId, ValueKind};
use crate::error::{Error, Result};
use crate::value::{DatapointValue, TypedValue};

/// Numeric transform applied to a raw datapoint value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "arg", rename_all = "snake_case")]
pub enum Transform {
    Identity,
    /// Divide by a constant (values reported as tenths or hundredths).
    ScaleDiv(f64),
    ScaleMul(f64),
    /// Multiply, then clamp to a 0..=100 percentage (batteries reporting halves).
    Percent(f64),
    /// Any non-zero raw value is `true`.
    BoolFromZero,
    /// Zero raw value is `true` (contacts reporting "closed" as 1).
    BoolInverted,
    /// Look the raw value up in a table of names.
    Enum(BTreeMap<i64, String>),
    /// Clamp into an inclusive range, e.g. battery percentage.
    Clamp { min: f64, max: f64 },
}

impl Transform {
    /// Build an enum transform from `(raw, name)` pairs.
    pub fn enumeration<'a>(entries: impl IntoIterator<Item = (i64, &'a str)>) -> Self {
        Self::Enum(
            entries
                .into_iter()
                .map(|(raw, name)| (raw, name.to_string()))
                .collect(),
        )
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ScaleDiv(d) if *d == 0.0 || !d.is_finite() => {
                Err(Error::Config(format!("invalid divisor {}", d)))
            }
            Self::ScaleMul(m) | Self::Percent(m) if !m.is_finite() => {
                Err(Error::Config(format!("invalid multiplier {}", m)))
            }
            Self::Clamp { min, max } if !(min <= max) => {
                Err(Error::Config(format!("invalid clamp range {}..={}", min, max)))
            }
            Self::Enum(map) if map.is_empty() => {
                Err(Error::Config("enum transform without entries".to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Apply to a raw value for a capability of the given kind.
    ///
    /// Returns `Ok(None)` when the wire value is not something this transform
    /// can interpret (text or raw bytes under a numeric rule).
    pub fn apply(
        &self,
        dp_key: u16,
        kind: ValueKind,
        value: &DatapointValue,
    ) -> Result<Option<TypedValue>> {
        let raw = match (self, value) {
            (Self::Identity, DatapointValue::Text(s)) => {
                return Ok(Some(TypedValue::Text(s.clone())))
            }
            (_, v) => match v.as_i64() {
                Some(raw) => raw,
                None => return Ok(None),
            },
        };

        let typed = match self {
            Self::Identity => match kind {
                ValueKind::Boolean => TypedValue::Bool(raw != 0),
                ValueKind::Number => TypedValue::Number(raw as f64),
                ValueKind::Enum => TypedValue::Enum(raw.to_string()),
            },
            Self::ScaleDiv(d) => TypedValue::Number(raw as f64 / d),
            Self::ScaleMul(m) => TypedValue::Number(raw as f64 * m),
            Self::Percent(m) => TypedValue::Number((raw as f64 * m).clamp(0.0, 100.0)),
            Self::BoolFromZero => TypedValue::Bool(raw != 0),
            Self::BoolInverted => TypedValue::Bool(raw == 0),
            Self::Enum(map) => match map.get(&raw) {
                Some(name) => TypedValue::Enum(name.clone()),
                None => return Err(Error::UnmappedEnumValue { dp_key, raw }),
            },
            Self::Clamp { min, max } => TypedValue::Number((raw as f64).clamp(*min, *max)),
        };
        Ok(Some(typed))
    }
}

impl std::fmt::Display for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identity => write!(f, "identity"),
            Self::ScaleDiv(d) => write!(f, "scale_div:{}", d),
            Self::ScaleMul(m) => write!(f, "scale_mul:{}", m),
            Self::Percent(m) => write!(f, "percent:{}", m),
            Self::BoolFromZero => write!(f, "bool_from_zero"),
            Self::BoolInverted => write!(f, "bool_inverted"),
            Self::Enum(map) => {
                let entries: Vec<String> =
                    map.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                write!(f, "enum:{}", entries.join(","))
            }
            Self::Clamp { min, max } => write!(f, "clamp:{}:{}", min, max),
        }
    }
}

/// Parses the compact form used on the command line, e.g. `scale_div:10`,
/// `enum:0=auto,1=manual` or `clamp:0:100`.
impl FromStr for Transform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Config(format!("invalid transform '{}'", s));
        let number = |v: &str| v.trim().parse::<f64>().map_err(|_| invalid());

        let (name, arg) = match s.trim().split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (s.trim(), None),
        };
        let transform = match (name, arg) {
            ("identity", None) => Self::Identity,
            ("bool_from_zero", None) => Self::BoolFromZero,
            ("bool_inverted", None) => Self::BoolInverted,
            ("scale_div", Some(arg)) => Self::ScaleDiv(number(arg)?),
            ("scale_mul", Some(arg)) => Self::ScaleMul(number(arg)?),
            ("percent", Some(arg)) => Self::Percent(number(arg)?),
            ("clamp", Some(arg)) => {
                let (min, max) = arg.split_once(':').ok_or_else(invalid)?;
                Self::Clamp {
                    min: number(min)?,
                    max: number(max)?,
                }
            }
            ("enum", Some(arg)) => {
                let mut map = BTreeMap::new();
                for entry in arg.split(',').filter(|e| !e.trim().is_empty()) {
                    let (raw, label) = entry.split_once('=').ok_or_else(invalid)?;
                    let raw = raw.trim().parse::<i64>().map_err(|_| invalid())?;
                    map.insert(raw, label.trim().to_string());
                }
                Self::Enum(map)
            }
            _ => return Err(invalid()),
        };
        transform.validate()?;
        Ok(transform)
    }
}

/// Translation of one vendor datapoint key into a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatapointRule {
    pub dp_key: u16,
    pub capability: CapabilityId,
    pub transform: Transform,
}

impl DatapointRule {
    pub fn new(dp_key: u16, capability: CapabilityId, transform: Transform) -> Self {
        Self {
            dp_key,
            capability,
            transform,
        }
    }

    /// Resolve a raw value to `(capability, value)`.
    ///
    /// Values this rule cannot interpret fall back to a passthrough observation.
    pub fn resolve(&self, value: &DatapointValue) -> Result<(CapabilityId, TypedValue)> {
        let Some(kind) = self.capability.kind() else {
            return Ok((CapabilityId::PassthroughUnknown, value.to_passthrough()));
        };
        match self.transform.apply(self.dp_key, kind, value)? {
            Some(typed) => Ok((self.capability, typed)),
            None => Ok((CapabilityId::PassthroughUnknown, value.to_passthrough())),
        }
    }
}

impl std::fmt::Display for DatapointRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dp{} -> {} ({})", self.dp_key, self.capability, self.transform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_div_humidity() {
        let rule = DatapointRule::new(2, CapabilityId::MeasureHumidity, Transform::ScaleDiv(10.0));
        let (cap, value) = rule.resolve(&DatapointValue::Value(215)).unwrap();
        assert_eq!(cap, CapabilityId::MeasureHumidity);
        assert_eq!(value, TypedValue::Number(21.5));
    }

    #[test]
    fn test_scale_div_negative() {
        let rule = DatapointRule::new(1, CapabilityId::MeasureTemperature, Transform::ScaleDiv(10.0));
        let (_, value) = rule.resolve(&DatapointValue::Value(-55)).unwrap();
        assert_eq!(value, TypedValue::Number(-5.5));
    }

    #[test]
    fn test_bool_from_zero() {
        let rule = DatapointRule::new(1, CapabilityId::AlarmMotion, Transform::BoolFromZero);
        assert_eq!(
            rule.resolve(&DatapointValue::Enum(0)).unwrap().1,
            TypedValue::Bool(false)
        );
        assert_eq!(
            rule.resolve(&DatapointValue::Value(7)).unwrap().1,
            TypedValue::Bool(true)
        );
    }

    #[test]
    fn test_enum_miss_is_an_error() {
        let transform = Transform::enumeration([(0, "auto"), (1, "manual")]);
        let rule = DatapointRule::new(4, CapabilityId::ThermostatMode, transform);
        assert_eq!(
            rule.resolve(&DatapointValue::Enum(1)).unwrap().1,
            TypedValue::Enum("manual".to_string())
        );
        assert!(matches!(
            rule.resolve(&DatapointValue::Enum(9)),
            Err(Error::UnmappedEnumValue { dp_key: 4, raw: 9 })
        ));
    }

    #[test]
    fn test_identity_follows_capability_kind() {
        let onoff = DatapointRule::new(1, CapabilityId::OnOff, Transform::Identity);
        assert_eq!(
            onoff.resolve(&DatapointValue::Bool(true)).unwrap().1,
            TypedValue::Bool(true)
        );
        let battery = DatapointRule::new(15, CapabilityId::MeasureBattery, Transform::Identity);
        assert_eq!(
            battery.resolve(&DatapointValue::Value(87)).unwrap().1,
            TypedValue::Number(87.0)
        );
    }

    #[test]
    fn test_raw_bytes_under_numeric_rule_degrade() {
        let rule = DatapointRule::new(2, CapabilityId::MeasureHumidity, Transform::ScaleDiv(10.0));
        let (cap, value) = rule.resolve(&DatapointValue::Raw(vec![1, 2])).unwrap();
        assert_eq!(cap, CapabilityId::PassthroughUnknown);
        assert_eq!(value, TypedValue::Raw(vec![1, 2]));
    }

    #[test]
    fn test_clamp() {
        let rule = DatapointRule::new(
            15,
            CapabilityId::MeasureBattery,
            Transform::Clamp { min: 0.0, max: 100.0 },
        );
        assert_eq!(
            rule.resolve(&DatapointValue::Value(140)).unwrap().1,
            TypedValue::Number(100.0)
        );
    }

    #[test]
    fn test_percent_scales_then_caps() {
        let rule = DatapointRule::new(4, CapabilityId::MeasureBattery, Transform::Percent(2.0));
        assert_eq!(
            rule.resolve(&DatapointValue::Value(43)).unwrap().1,
            TypedValue::Number(86.0)
        );
        assert_eq!(
            rule.resolve(&DatapointValue::Value(60)).unwrap().1,
            TypedValue::Number(100.0)
        );
        assert_eq!(
            rule.resolve(&DatapointValue::Value(-3)).unwrap().1,
            TypedValue::Number(0.0)
        );
        assert_eq!("percent:2".parse::<Transform>().unwrap(), Transform::Percent(2.0));
        assert_eq!(Transform::Percent(2.0).to_string(), "percent:2");
    }

    #[test]
    fn test_parse_compact_form() {
        assert_eq!("scale_div:10".parse::<Transform>().unwrap(), Transform::ScaleDiv(10.0));
        assert_eq!("bool_from_zero".parse::<Transform>().unwrap(), Transform::BoolFromZero);
        assert_eq!(
            "enum:0=auto, 1=manual".parse::<Transform>().unwrap(),
            Transform::enumeration([(0, "auto"), (1, "manual")])
        );
        assert_eq!(
            "clamp:0:100".parse::<Transform>().unwrap(),
            Transform::Clamp { min: 0.0, max: 100.0 }
        );
        assert!("scale_div:0".parse::<Transform>().is_err());
        assert!("scale_pow:2".parse::<Transform>().is_err());
        assert!("enum:".parse::<Transform>().is_err());
    }

    #[test]
    fn test_display_matches_parse() {
        let transform = Transform::enumeration([(0, "open"), (2, "close")]);
        let text = transform.to_string();
        assert_eq!(text, "enum:0=open,2=close");
        assert_eq!(text.parse::<Transform>().unwrap(), transform);
    }

    #[test]
    fn test_rule_json_is_additive() {
        let json = r#"{"dp_key":2,"capability":"measure_humidity","transform":{"kind":"scale_div","arg":10.0}}"#;
        let rule: DatapointRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.transform, Transform::ScaleDiv(10.0));
    }
}
