//! IAS WD (warning device) command encoding for sirens and strobes.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Warning mode, upper nibble of the start-warning header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningMode {
    Stop = 0,
    Burglar = 1,
    Fire = 2,
    Emergency = 3,
}

/// Siren, squawk and strobe intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    #[default]
    Low = 0,
    Medium = 1,
    High = 2,
    VeryHigh = 3,
}

impl Level {
    /// Map a 0..=100 volume onto the four levels.
    pub fn from_volume(volume: u8) -> Self {
        match volume {
            v if v > 75 => Self::VeryHigh,
            v if v > 50 => Self::High,
            v if v > 25 => Self::Medium,
            _ => Self::Low,
        }
    }
}

/// Squawk mode: confirmation beep for arming or disarming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SquawkMode {
    Armed = 0,
    Disarmed = 1,
}

macro_rules! parse_lowercase {
    ($ty:ident { $($name:literal => $variant:expr),* $(,)? }) => {
        impl std::str::FromStr for $ty {
            type Err = meshid_core::Error;

            fn from_str(s: &str) -> meshid_core::Result<Self> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $( $name => Ok($variant), )*
                    other => Err(meshid_core::Error::Config(format!(
                        concat!("unknown ", stringify!($ty), " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

parse_lowercase!(WarningMode {
    "stop" => WarningMode::Stop,
    "burglar" => WarningMode::Burglar,
    "fire" => WarningMode::Fire,
    "emergency" => WarningMode::Emergency,
});

parse_lowercase!(Level {
    "low" => Level::Low,
    "medium" => Level::Medium,
    "high" => Level::High,
    "very_high" => Level::VeryHigh,
    "veryhigh" => Level::VeryHigh,
});

parse_lowercase!(SquawkMode {
    "armed" => SquawkMode::Armed,
    "disarmed" => SquawkMode::Disarmed,
});

/// A start-warning request before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarningRequest {
    pub mode: WarningMode,
    pub siren_level: Level,
    pub duration_s: u16,
    pub strobe_duty: u8,
    pub strobe_level: Level,
}

impl WarningRequest {
    pub fn new(mode: WarningMode) -> Self {
        Self {
            mode,
            siren_level: Level::High,
            duration_s: 0,
            strobe_duty: 0,
            strobe_level: Level::Low,
        }
    }

    pub fn stop() -> Self {
        Self::new(WarningMode::Stop)
    }

    pub fn with_siren_level(mut self, level: Level) -> Self {
        self.siren_level = level;
        self
    }

    pub fn with_duration(mut self, seconds: u16) -> Self {
        self.duration_s = seconds;
        self
    }

    pub fn with_strobe(mut self, duty: u8, level: Level) -> Self {
        self.strobe_duty = duty;
        self.strobe_level = level;
        self
    }

    /// Apply the wire constraints: duty capped at 100, and `Stop` always silent.
    pub fn normalized(self) -> Self {
        if self.mode == WarningMode::Stop {
            return Self {
                mode: WarningMode::Stop,
                siren_level: Level::Low,
                duration_s: 0,
                strobe_duty: 0,
                strobe_level: Level::Low,
            };
        }
        Self {
            strobe_duty: self.strobe_duty.min(100),
            ..self
        }
    }

    /// Encode the start-warning payload.
    pub fn encode(&self) -> Bytes {
        let request = self.normalized();
        let strobe = u8::from(request.strobe_duty > 0);

        let mut out = BytesMut::with_capacity(5);
        out.put_u8((request.mode as u8) << 4 | strobe << 2 | request.siren_level as u8);
        out.put_u16_le(request.duration_s);
        out.put_u8(request.strobe_duty);
        out.put_u8(request.strobe_level as u8);
        out.freeze()
    }
}

/// Encode a start-warning command payload.
pub fn encode_warning(mode: WarningMode, duration_s: u16, strobe_duty: u8, strobe_level: Level) -> Bytes {
    WarningRequest::new(mode)
        .with_duration(duration_s)
        .with_strobe(strobe_duty, strobe_level)
        .encode()
}

/// Encode a squawk command payload.
pub fn encode_squawk(mode: SquawkMode, strobe: bool, level: Level) -> Bytes {
    let mut out = BytesMut::with_capacity(1);
    out.put_u8((mode as u8) << 4 | u8::from(strobe) << 3 | level as u8);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burglar_warning_layout() {
        let payload = WarningRequest::new(WarningMode::Burglar)
            .with_siren_level(Level::High)
            .with_duration(300)
            .with_strobe(50, Level::High)
            .encode();
        // mode 1, strobe on, level 2
        assert_eq!(&payload[..], &[0x16, 0x2C, 0x01, 50, 0x02]);
    }

    #[test]
    fn test_stop_is_always_silent() {
        let payload = encode_warning(WarningMode::Stop, 600, 80, Level::VeryHigh);
        assert_eq!(&payload[..], &[0x00, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_duty_is_clamped_and_drives_strobe_bit() {
        let payload = encode_warning(WarningMode::Fire, 10, 250, Level::Medium);
        assert_eq!(payload[0] & 0x04, 0x04);
        assert_eq!(payload[3], 100);

        let silent_strobe = encode_warning(WarningMode::Fire, 10, 0, Level::Medium);
        assert_eq!(silent_strobe[0] & 0x04, 0);
    }

    #[test]
    fn test_volume_levels() {
        assert_eq!(Level::from_volume(100), Level::VeryHigh);
        assert_eq!(Level::from_volume(76), Level::VeryHigh);
        assert_eq!(Level::from_volume(75), Level::High);
        assert_eq!(Level::from_volume(51), Level::High);
        assert_eq!(Level::from_volume(50), Level::Medium);
        assert_eq!(Level::from_volume(26), Level::Medium);
        assert_eq!(Level::from_volume(25), Level::Low);
        assert_eq!(Level::from_volume(0), Level::Low);
    }

    #[test]
    fn test_squawk_layout() {
        let payload = encode_squawk(SquawkMode::Disarmed, true, Level::VeryHigh);
        assert_eq!(&payload[..], &[0x1B]);
        let payload = encode_squawk(SquawkMode::Armed, false, Level::Low);
        assert_eq!(&payload[..], &[0x00]);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("Fire".parse::<WarningMode>().unwrap(), WarningMode::Fire);
        assert_eq!("very_high".parse::<Level>().unwrap(), Level::VeryHigh);
        assert!("loud".parse::<Level>().is_err());
    }
}
