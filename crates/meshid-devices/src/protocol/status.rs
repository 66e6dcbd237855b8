//! IAS zone status word decoding.
//!
//! The zone status attribute is a 16-bit word in which each bit carries a
//! fixed, standard-defined meaning. Decoding is total: every `u16` maps to a
//! [`StatusFlags`] value.

use bitflags::bitflags;

use meshid_core::{CapabilityId, CapabilityUpdate, DeviceIdentity, TypedValue};

/// Meaning of one bit of the zone status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusBit {
    Alarm1,
    Alarm2,
    Tamper,
    BatteryLow,
    Supervision,
    Restore,
    Trouble,
    AcMains,
    Test,
    BatteryDefect,
    Reserved10,
    Reserved11,
    Reserved12,
    Reserved13,
    Reserved14,
    Reserved15,
}

/// The standard bit table, indexed by bit position.
pub const STATUS_BITS: [StatusBit; 16] = [
    StatusBit::Alarm1,
    StatusBit::Alarm2,
    StatusBit::Tamper,
    StatusBit::BatteryLow,
    StatusBit::Supervision,
    StatusBit::Restore,
    StatusBit::Trouble,
    StatusBit::AcMains,
    StatusBit::Test,
    StatusBit::BatteryDefect,
    StatusBit::Reserved10,
    StatusBit::Reserved11,
    StatusBit::Reserved12,
    StatusBit::Reserved13,
    StatusBit::Reserved14,
    StatusBit::Reserved15,
];

impl StatusBit {
    pub fn index(self) -> u8 {
        STATUS_BITS
            .iter()
            .position(|b| *b == self)
            .map(|i| i as u8)
            .unwrap_or_default()
    }

    pub fn mask(self) -> u16 {
        1 << self.index()
    }

    pub fn flag(self) -> StatusFlags {
        StatusFlags::from_bits_retain(self.mask())
    }
}

bitflags! {
    #[derive(Copy, Clone, Default, Debug, PartialEq, Eq, Hash)]
    pub struct StatusFlags: u16 {
        const ALARM1 = 1 << 0;
        const ALARM2 = 1 << 1;
        const TAMPER = 1 << 2;
        const BATTERY_LOW = 1 << 3;
        /// Device reports supervision messages
        const SUPERVISION = 1 << 4;
        /// Device reports alarm restores
        const RESTORE = 1 << 5;
        const TROUBLE = 1 << 6;
        const AC_MAINS = 1 << 7;
        const TEST = 1 << 8;
        const BATTERY_DEFECT = 1 << 9;
        const RESERVED = 0b1111_1100_0000_0000;
    }
}

impl StatusFlags {
    pub fn has(&self, bit: StatusBit) -> bool {
        self.contains(bit.flag())
    }

    /// Battery low or battery defect.
    pub fn battery_alarm(&self) -> bool {
        self.intersects(StatusFlags::BATTERY_LOW | StatusFlags::BATTERY_DEFECT)
    }

    /// Bits that are set, in table order.
    pub fn active_bits(&self) -> Vec<StatusBit> {
        STATUS_BITS
            .iter()
            .copied()
            .filter(|bit| self.has(*bit))
            .collect()
    }
}

/// Decode a zone status word.
pub fn decode(word: u16) -> StatusFlags {
    STATUS_BITS
        .iter()
        .enumerate()
        .filter(|(index, _)| word & (1u16 << index) != 0)
        .fold(StatusFlags::empty(), |flags, (_, bit)| flags | bit.flag())
}

/// Project decoded flags onto the capabilities an identity exposes.
///
/// Alarm 1 drives the single alarm chosen by the identity's category;
/// battery low and battery defect are merged into `alarm_battery`.
pub fn project_status(identity: &DeviceIdentity, flags: StatusFlags) -> Vec<CapabilityUpdate> {
    let candidates = [
        (identity.category.primary_alarm(), flags.has(StatusBit::Alarm1)),
        (CapabilityId::AlarmTamper, flags.has(StatusBit::Tamper)),
        (CapabilityId::AlarmBattery, flags.battery_alarm()),
    ];

    candidates
        .into_iter()
        .filter(|(capability, _)| identity.exposes(*capability))
        .map(|(capability, active)| {
            CapabilityUpdate::new(identity.id.clone(), capability, TypedValue::Bool(active))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshid_core::Category;

    #[test]
    fn test_decode_is_total_and_exact() {
        for word in 0..=u16::MAX {
            let flags = decode(word);
            assert_eq!(flags.bits(), word);
            for (index, bit) in STATUS_BITS.iter().enumerate() {
                assert_eq!(flags.has(*bit), word & (1 << index) != 0);
            }
        }
    }

    #[test]
    fn test_bit_table_positions() {
        assert_eq!(StatusBit::Alarm1.mask(), 0x0001);
        assert_eq!(StatusBit::BatteryLow.mask(), 0x0008);
        assert_eq!(StatusBit::BatteryDefect.mask(), 0x0200);
        assert_eq!(StatusBit::Reserved15.index(), 15);
    }

    #[test]
    fn test_smoke_detector_scenario() {
        let flags = decode(0x0009);
        assert_eq!(flags.active_bits(), vec![StatusBit::Alarm1, StatusBit::BatteryLow]);

        let identity = DeviceIdentity::new("smoke", "HEIMAN", "SmokeSensor-EM")
            .with_category(Category::SmokeDetector)
            .with_capabilities([
                CapabilityId::AlarmSmoke,
                CapabilityId::AlarmBattery,
                CapabilityId::MeasureBattery,
            ]);
        let updates = project_status(&identity, flags);
        assert_eq!(updates.len(), 2);
        assert!(updates.iter().any(|u| u.capability == CapabilityId::AlarmSmoke
            && u.value == TypedValue::Bool(true)));
        assert!(updates.iter().any(|u| u.capability == CapabilityId::AlarmBattery
            && u.value == TypedValue::Bool(true)));
    }

    #[test]
    fn test_only_one_primary_alarm() {
        let identity = DeviceIdentity::new("gas", "HEIMAN", "GASSensor-EN")
            .with_category(Category::GasDetector)
            .with_capabilities([CapabilityId::AlarmGas, CapabilityId::AlarmSmoke]);
        let updates = project_status(&identity, decode(0x0001));
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].capability, CapabilityId::AlarmGas);
    }

    #[test]
    fn test_battery_defect_counts_as_battery_alarm() {
        let identity = DeviceIdentity::new("door", "_TZ3000_a", "TS0203")
            .with_category(Category::ContactSensor)
            .with_capabilities([CapabilityId::AlarmContact, CapabilityId::AlarmBattery]);
        let updates = project_status(&identity, decode(0x0200));
        let battery = updates
            .iter()
            .find(|u| u.capability == CapabilityId::AlarmBattery)
            .unwrap();
        assert_eq!(battery.value, TypedValue::Bool(true));
        let contact = updates
            .iter()
            .find(|u| u.capability == CapabilityId::AlarmContact)
            .unwrap();
        assert_eq!(contact.value, TypedValue::Bool(false));
    }

    #[test]
    fn test_unexposed_capabilities_are_skipped() {
        let identity = DeviceIdentity::new("bare", "x", "y").with_category(Category::SmokeDetector);
        assert!(project_status(&identity, decode(0xFFFF)).is_empty());
    }
}
