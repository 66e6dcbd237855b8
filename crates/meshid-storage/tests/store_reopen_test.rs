//! Data survives closing and reopening the database file.

use meshid_core::{
    CapabilityId, DatapointRule, DeviceIdentity, IdentityId, IdentityState, PowerSource, Transform,
};
use meshid_storage::FingerprintStore;

#[test]
fn test_reopen_keeps_identities_and_rules() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("registry.redb");

    let sensor = DeviceIdentity::new("th-sensor", "_TZ3000_fllyghyj", "TS0201")
        .with_manufacturer("_TZ3000_dowj6gyi")
        .with_clusters([0x0000, 0x0001, 0x0402, 0x0405])
        .with_capabilities([
            CapabilityId::MeasureTemperature,
            CapabilityId::MeasureHumidity,
            CapabilityId::MeasureBattery,
        ])
        .with_power_source(PowerSource::Battery)
        .with_state(IdentityState::Validated);

    {
        let store = FingerprintStore::open(&path).unwrap();
        store.save_identity(&sensor).unwrap();
        store
            .save_rule(
                &sensor.id,
                &DatapointRule::new(2, CapabilityId::MeasureHumidity, Transform::ScaleDiv(10.0)),
            )
            .unwrap();
    }

    let store = FingerprintStore::open(&path).unwrap();
    assert_eq!(store.list_identities().unwrap(), vec![sensor.clone()]);
    assert_eq!(
        store.identities_for_product("TS0201").unwrap()[0].id,
        IdentityId::from("th-sensor")
    );
    let rules = store.rules_for(&sensor.id).unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].transform, Transform::ScaleDiv(10.0));
}

#[test]
fn test_resaving_is_idempotent_for_index() {
    let dir = tempfile::tempdir().unwrap();
    let store = FingerprintStore::open(dir.path().join("registry.redb")).unwrap();

    let plug = DeviceIdentity::new("plug", "_TZ3000_okaz9tjs", "TS011F");
    store.save_identity(&plug).unwrap();
    store.save_identity(&plug).unwrap();

    let index = store.load_product_index().unwrap();
    assert_eq!(index["TS011F"], vec![IdentityId::from("plug")]);
    assert_eq!(store.identity_count().unwrap(), 1);
}
