//! Tuya datapoint frames carried on cluster 0xEF00.
//!
//! ```text
//! frame  := seq:u16be record*
//! record := dp:u8 type:u8 len:u16be data[len]
//! ```
//!
//! Parsing is total: a malformed record ends the frame and everything
//! decoded before it is kept.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use meshid_core::{DatapointValue, Error, Result};

/// Command id of an outbound "set data" frame.
pub const CMD_SET_DATA: u8 = 0x00;

/// Largest datapoint payload accepted on the wire.
const MAX_RECORD_LEN: usize = 255;

/// Wire type of a datapoint record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DpType {
    Raw = 0x00,
    Bool = 0x01,
    Value = 0x02,
    String = 0x03,
    Enum = 0x04,
    Bitmap = 0x05,
}

impl DpType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Raw),
            0x01 => Some(Self::Bool),
            0x02 => Some(Self::Value),
            0x03 => Some(Self::String),
            0x04 => Some(Self::Enum),
            0x05 => Some(Self::Bitmap),
            _ => None,
        }
    }

    pub fn of(value: &DatapointValue) -> Self {
        match value {
            DatapointValue::Bool(_) => Self::Bool,
            DatapointValue::Value(_) => Self::Value,
            DatapointValue::Enum(_) => Self::Enum,
            DatapointValue::Bitmap(_) => Self::Bitmap,
            DatapointValue::Text(_) => Self::String,
            DatapointValue::Raw(_) => Self::Raw,
        }
    }
}

/// One decoded datapoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatapointRecord {
    pub dp: u8,
    pub value: DatapointValue,
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DatapointFrame {
    pub seq: u16,
    pub records: Vec<DatapointRecord>,
    /// Bytes left over after the last well-formed record.
    pub trailing: usize,
}

fn decode_data(dp_type: DpType, data: &[u8]) -> Option<DatapointValue> {
    let mut buf = data;
    let value = match dp_type {
        DpType::Raw => DatapointValue::Raw(data.to_vec()),
        DpType::Bool => DatapointValue::Bool(data.first().is_some_and(|b| *b != 0)),
        DpType::Value => match data.len() {
            4 => DatapointValue::Value(i64::from(buf.get_i32())),
            2 => DatapointValue::Value(i64::from(buf.get_i16())),
            1 => DatapointValue::Value(i64::from(buf.get_i8())),
            3 => DatapointValue::Value(buf.get_int(3)),
            _ => return None,
        },
        DpType::String => DatapointValue::Text(String::from_utf8_lossy(data).into_owned()),
        DpType::Enum => DatapointValue::Enum(*data.first()?),
        DpType::Bitmap => match data.len() {
            1 => DatapointValue::Bitmap(u32::from(buf.get_u8())),
            2 => DatapointValue::Bitmap(u32::from(buf.get_u16())),
            4 => DatapointValue::Bitmap(buf.get_u32()),
            _ => return None,
        },
    };
    Some(value)
}

/// Parse a frame payload (the ZCL payload after the frame header).
pub fn parse_frame(payload: &[u8]) -> DatapointFrame {
    let mut buf = payload;
    if buf.remaining() < 2 {
        return DatapointFrame {
            trailing: payload.len(),
            ..Default::default()
        };
    }

    let mut frame = DatapointFrame {
        seq: buf.get_u16(),
        ..Default::default()
    };

    while buf.remaining() >= 4 {
        let header = &buf[..4];
        let dp = header[0];
        let type_byte = header[1];
        let len = usize::from(u16::from_be_bytes([header[2], header[3]]));

        let Some(dp_type) = DpType::from_u8(type_byte) else {
            tracing::debug!(dp, type_byte, "Unknown datapoint type, stopping");
            break;
        };
        if len > MAX_RECORD_LEN || (len == 0 && dp_type != DpType::Bool) || 4 + len > buf.remaining() {
            tracing::debug!(dp, len, remaining = buf.remaining(), "Malformed datapoint record, stopping");
            break;
        }

        let data = &buf[4..4 + len];
        let Some(value) = decode_data(dp_type, data) else {
            tracing::debug!(dp, ?dp_type, len, "Undecodable datapoint data, stopping");
            break;
        };
        frame.records.push(DatapointRecord { dp, value });
        buf.advance(4 + len);
    }

    frame.trailing = buf.remaining();
    if frame.trailing > 0 {
        tracing::debug!(
            seq = frame.seq,
            trailing = frame.trailing,
            hex = %hex::encode(payload),
            "Datapoint frame has trailing bytes"
        );
    }
    frame
}

/// Build a "set data" payload writing one datapoint.
///
/// Fails when a `Value` does not fit the signed 32-bit wire field or the
/// encoded data exceeds the record length limit.
pub fn encode_set_datapoint(seq: u16, dp: u8, value: &DatapointValue) -> Result<Bytes> {
    let unencodable = |reason: String| Error::UnencodableDatapoint { dp, reason };

    let mut data = BytesMut::new();
    match value {
        DatapointValue::Bool(v) => data.put_u8(u8::from(*v)),
        DatapointValue::Value(v) => {
            let v = i32::try_from(*v)
                .map_err(|_| unencodable(format!("value {} is outside the 32-bit range", v)))?;
            data.put_i32(v);
        }
        DatapointValue::Enum(v) => data.put_u8(*v),
        DatapointValue::Bitmap(v) => match *v {
            v if v <= 0xFF => data.put_u8(v as u8),
            v if v <= 0xFFFF => data.put_u16(v as u16),
            v => data.put_u32(v),
        },
        DatapointValue::Text(s) => data.put_slice(s.as_bytes()),
        DatapointValue::Raw(bytes) => data.put_slice(bytes),
    }
    if data.len() > MAX_RECORD_LEN {
        return Err(unencodable(format!(
            "{} bytes exceed the {} byte limit",
            data.len(),
            MAX_RECORD_LEN
        )));
    }

    let mut out = BytesMut::with_capacity(6 + data.len());
    out.put_u16(seq);
    out.put_u8(dp);
    out.put_u8(DpType::of(value) as u8);
    out.put_u16(data.len() as u16);
    out.put_slice(&data);
    Ok(out.freeze())
}
