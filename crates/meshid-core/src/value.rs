//! Values flowing through the translation layer.

use serde::{Deserialize, Serialize};

/// Semantic capability value handed to the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum TypedValue {
    Bool(bool),
    Number(f64),
    Integer(i64),
    Enum(String),
    Text(String),
    /// Raw bytes kept for datapoints nothing could interpret.
    Raw(Vec<u8>),
    /// Placeholder for a required capability nothing has reported yet.
    #[default]
    Unknown,
}

impl TypedValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl std::fmt::Display for TypedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Number(v) => write!(f, "{}", v),
            Self::Integer(v) => write!(f, "{}", v),
            Self::Enum(v) | Self::Text(v) => f.write_str(v),
            Self::Raw(bytes) => {
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// Raw value of a vendor keyed datapoint, as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum DatapointValue {
    Bool(bool),
    Value(i64),
    Enum(u8),
    Bitmap(u32),
    Text(String),
    Raw(Vec<u8>),
}

impl DatapointValue {
    /// Integer view used by numeric transforms. Text and raw payloads have none.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(v) => Some(i64::from(*v)),
            Self::Value(v) => Some(*v),
            Self::Enum(v) => Some(i64::from(*v)),
            Self::Bitmap(v) => Some(i64::from(*v)),
            Self::Text(_) | Self::Raw(_) => None,
        }
    }

    /// Value kept verbatim when no rule applies.
    pub fn to_passthrough(&self) -> TypedValue {
        match self {
            Self::Bool(v) => TypedValue::Bool(*v),
            Self::Value(v) => TypedValue::Integer(*v),
            Self::Enum(v) => TypedValue::Integer(i64::from(*v)),
            Self::Bitmap(v) => TypedValue::Integer(i64::from(*v)),
            Self::Text(s) => TypedValue::Text(s.clone()),
            Self::Raw(bytes) => TypedValue::Raw(bytes.clone()),
        }
    }
}

impl From<i64> for DatapointValue {
    fn from(v: i64) -> Self {
        Self::Value(v)
    }
}

impl From<bool> for DatapointValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datapoint_integer_view() {
        assert_eq!(DatapointValue::Bool(true).as_i64(), Some(1));
        assert_eq!(DatapointValue::Value(-40).as_i64(), Some(-40));
        assert_eq!(DatapointValue::Bitmap(0x0102).as_i64(), Some(258));
        assert_eq!(DatapointValue::Text("x".into()).as_i64(), None);
    }

    #[test]
    fn test_passthrough_keeps_raw() {
        let raw = DatapointValue::Raw(vec![0xde, 0xad]);
        assert_eq!(raw.to_passthrough(), TypedValue::Raw(vec![0xde, 0xad]));
        assert_eq!(raw.to_passthrough().to_string(), "dead");
    }

    #[test]
    fn test_typed_value_json_shape() {
        let json = serde_json::to_value(TypedValue::Number(21.5)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "number", "value": 21.5}));
        let unknown = serde_json::to_value(TypedValue::Unknown).unwrap();
        assert_eq!(unknown, serde_json::json!({"type": "unknown"}));
    }
}
