//! Concurrent merges and lookups against one shared registry.

use std::collections::BTreeSet;
use std::sync::Arc;

use meshid_core::{
    CandidateRecord, CapabilityId, DatapointRule, DatapointValue, IdentityId, MergeConfig,
    PowerSource, Transform,
};
use meshid_devices::{DatapointTable, FingerprintRegistry, MergeEngine};

#[test]
fn test_parallel_groups_merge_without_lost_updates() {
    let registry = Arc::new(FingerprintRegistry::new());
    let engine = MergeEngine::new(registry.clone(), MergeConfig::default());

    std::thread::scope(|scope| {
        for product in 0..8 {
            let engine = &engine;
            scope.spawn(move || {
                for vendor in 0..10 {
                    let candidate = CandidateRecord::new(
                        "z2m",
                        format!("_TZ3000_{product}v{vendor}"),
                        format!("TS{product:04}"),
                    )
                    .with_confidence(90)
                    .with_power_source(PowerSource::Mains)
                    .with_capabilities([CapabilityId::OnOff]);
                    engine.merge([candidate]).unwrap();
                }
            });
        }

        // Readers keep seeing complete snapshots while writers commit.
        let registry = &registry;
        scope.spawn(move || {
            for _ in 0..200 {
                let snapshot = registry.snapshot();
                for identity in snapshot.identities() {
                    assert!(!identity.manufacturer_tokens.is_empty());
                    assert!(!identity.product_tokens.is_empty());
                }
            }
        });
    });

    assert_eq!(registry.len(), 8);
    for product in 0..8 {
        let product_token = format!("TS{product:04}");
        let identity = registry
            .lookup(&format!("_TZ3000_{product}v0"), &product_token, &BTreeSet::new())
            .unwrap()
            .unwrap();
        assert_eq!(identity.manufacturer_tokens.len(), 10);
    }
}

#[test]
fn test_same_group_writers_serialize() {
    let registry = Arc::new(FingerprintRegistry::new());
    let engine = MergeEngine::new(registry.clone(), MergeConfig::default());

    std::thread::scope(|scope| {
        for source in 0..4 {
            let engine = &engine;
            scope.spawn(move || {
                for vendor in 0..5 {
                    let candidate = CandidateRecord::new(
                        format!("feed{source}"),
                        format!("_TZ3000_s{source}v{vendor}"),
                        "TS011F",
                    )
                    .with_confidence(90)
                    .with_power_source(PowerSource::Mains);
                    engine.merge([candidate]).unwrap();
                }
            });
        }
    });

    // Every token lands on a single identity for the shared product.
    let identities = registry.identities();
    assert_eq!(identities.len(), 1);
    assert_eq!(identities[0].manufacturer_tokens.len(), 20);
}

#[test]
fn test_resolve_while_registering() {
    let table = DatapointTable::new();
    let id = IdentityId::from("sensor");
    table
        .register(
            &id,
            DatapointRule::new(1, CapabilityId::MeasureTemperature, Transform::ScaleDiv(10.0)),
        )
        .unwrap();

    std::thread::scope(|scope| {
        let table = &table;
        let id = &id;
        scope.spawn(move || {
            for dp in 2..50u16 {
                table
                    .register(id, DatapointRule::new(dp, CapabilityId::MeasureHumidity, Transform::Identity))
                    .unwrap();
            }
        });
        for _ in 0..4 {
            scope.spawn(move || {
                for raw in 0..500 {
                    let (cap, value) = table.resolve(id, 1, &DatapointValue::Value(raw)).unwrap();
                    assert_eq!(cap, CapabilityId::MeasureTemperature);
                    assert_eq!(value.as_f64(), Some(raw as f64 / 10.0));
                }
            });
        }
    });
    assert_eq!(table.len(), 49);
}
