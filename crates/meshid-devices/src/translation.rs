//! Datapoint Translation Table
//!
//! Maps `(identity, dp_key)` to a [`DatapointRule`]. Readers resolve against
//! the last published snapshot without taking the writer lock; writers build
//! a new map and swap it in whole.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use meshid_core::{
    CapabilityId, DatapointRule, DatapointValue, Error, IdentityId, Result, TypedValue,
};
use meshid_storage::FingerprintStore;

type RuleMap = HashMap<(IdentityId, u16), DatapointRule>;

/// Additive rule table shared by the translator and the merge tooling.
#[derive(Debug, Default)]
pub struct DatapointTable {
    snapshot: RwLock<Arc<RuleMap>>,
    writer: Mutex<()>,
}

impl DatapointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table pre-populated with rules; conflicts fail the whole batch.
    pub fn with_rules(rules: impl IntoIterator<Item = (IdentityId, DatapointRule)>) -> Result<Self> {
        let table = Self::new();
        table.register_all(rules)?;
        Ok(table)
    }

    fn current(&self) -> Arc<RuleMap> {
        self.snapshot.read().clone()
    }

    fn publish(&self, map: RuleMap) {
        *self.snapshot.write() = Arc::new(map);
    }

    fn check(map: &RuleMap, identity: &IdentityId, rule: &DatapointRule) -> Result<bool> {
        rule.transform.validate()?;
        match map.get(&(identity.clone(), rule.dp_key)) {
            Some(existing) if existing == rule => Ok(false),
            Some(existing) => Err(Error::ConflictingRule {
                identity: identity.clone(),
                dp_key: rule.dp_key,
                existing: existing.to_string(),
                proposed: rule.to_string(),
            }),
            None => Ok(true),
        }
    }

    /// Add a rule. Registering an identical rule again is a no-op; a
    /// different rule for the same key fails with `ConflictingRule`.
    pub fn register(&self, identity: &IdentityId, rule: DatapointRule) -> Result<()> {
        let _guard = self.writer.lock();
        let current = self.current();
        if !Self::check(&current, identity, &rule)? {
            return Ok(());
        }

        tracing::debug!(identity = %identity, %rule, "Registered datapoint rule");
        let mut next = (*current).clone();
        next.insert((identity.clone(), rule.dp_key), rule);
        self.publish(next);
        Ok(())
    }

    /// Add several rules atomically: either all are published or none.
    pub fn register_all(
        &self,
        rules: impl IntoIterator<Item = (IdentityId, DatapointRule)>,
    ) -> Result<usize> {
        let _guard = self.writer.lock();
        let current = self.current();
        let mut next = (*current).clone();
        let mut added = 0;
        for (identity, rule) in rules {
            if Self::check(&next, &identity, &rule)? {
                next.insert((identity, rule.dp_key), rule);
                added += 1;
            }
        }
        if added > 0 {
            self.publish(next);
        }
        Ok(added)
    }

    /// Explicitly replace whatever rule exists for the key.
    ///
    /// Returns the rule that was replaced.
    pub fn replace(&self, identity: &IdentityId, rule: DatapointRule) -> Result<Option<DatapointRule>> {
        rule.transform.validate()?;
        let _guard = self.writer.lock();
        let mut next = (*self.current()).clone();
        let previous = next.insert((identity.clone(), rule.dp_key), rule.clone());
        if let Some(old) = &previous {
            tracing::info!(identity = %identity, old = %old, new = %rule, "Replaced datapoint rule");
        }
        self.publish(next);
        Ok(previous)
    }

    pub fn get(&self, identity: &IdentityId, dp_key: u16) -> Option<DatapointRule> {
        self.current().get(&(identity.clone(), dp_key)).cloned()
    }

    /// Resolve a raw datapoint to `(capability, value)`.
    ///
    /// A key with no rule resolves to `PassthroughUnknown` with the raw value
    /// kept. Only an enum miss fails.
    pub fn resolve(
        &self,
        identity: &IdentityId,
        dp_key: u16,
        value: &DatapointValue,
    ) -> Result<(CapabilityId, TypedValue)> {
        self.resolve_first(std::slice::from_ref(identity), dp_key, value)
    }

    /// Like [`resolve`](Self::resolve), using the rule of the first owner in
    /// `owners` that has one for `dp_key`.
    pub fn resolve_first(
        &self,
        owners: &[IdentityId],
        dp_key: u16,
        value: &DatapointValue,
    ) -> Result<(CapabilityId, TypedValue)> {
        let rules = self.current();
        let found = owners
            .iter()
            .find_map(|owner| rules.get(&(owner.clone(), dp_key)).map(|rule| (owner, rule)));
        match found {
            Some((owner, rule)) => {
                if Some(owner) != owners.first() {
                    tracing::debug!(identity = %owner, dp_key, "Using rule of superseded identity");
                }
                rule.resolve(value)
            }
            None => {
                tracing::debug!(identity = ?owners.first(), dp_key, "No rule for datapoint");
                Ok((CapabilityId::PassthroughUnknown, value.to_passthrough()))
            }
        }
    }

    /// Rules of one identity, ordered by key.
    pub fn rules_for(&self, identity: &IdentityId) -> Vec<DatapointRule> {
        let mut rules: Vec<DatapointRule> = self
            .current()
            .iter()
            .filter(|((id, _), _)| id == identity)
            .map(|(_, rule)| rule.clone())
            .collect();
        rules.sort_by_key(|rule| rule.dp_key);
        rules
    }

    /// Every rule, ordered by identity then key.
    pub fn entries(&self) -> Vec<(IdentityId, DatapointRule)> {
        let mut entries: Vec<(IdentityId, DatapointRule)> = self
            .current()
            .iter()
            .map(|((id, _), rule)| (id.clone(), rule.clone()))
            .collect();
        entries.sort_by(|a, b| (&a.0, a.1.dp_key).cmp(&(&b.0, b.1.dp_key)));
        entries
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    /// Load every persisted rule. Conflicts with rules already in memory fail.
    pub fn load_from(&self, store: &FingerprintStore) -> Result<usize> {
        let rules = store.list_rules()?;
        let added = self.register_all(rules)?;
        tracing::info!(rules = added, "Loaded datapoint rules");
        Ok(added)
    }

    pub fn save_to(&self, store: &FingerprintStore) -> Result<()> {
        let entries = self.entries();
        store.save_rules(&entries)?;
        tracing::info!(rules = entries.len(), "Saved datapoint rules");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshid_core::Transform;

    fn humidity_rule() -> DatapointRule {
        DatapointRule::new(2, CapabilityId::MeasureHumidity, Transform::ScaleDiv(10.0))
    }

    #[test]
    fn test_resolve_registered_rule() {
        let table = DatapointTable::new();
        let id = IdentityId::from("climate");
        table.register(&id, humidity_rule()).unwrap();

        let (cap, value) = table.resolve(&id, 2, &DatapointValue::Value(215)).unwrap();
        assert_eq!(cap, CapabilityId::MeasureHumidity);
        assert_eq!(value, TypedValue::Number(21.5));
    }

    #[test]
    fn test_unknown_key_is_passthrough() {
        let table = DatapointTable::new();
        let id = IdentityId::from("climate");
        let (cap, value) = table.resolve(&id, 99, &DatapointValue::Value(3)).unwrap();
        assert_eq!(cap, CapabilityId::PassthroughUnknown);
        assert_eq!(value, TypedValue::Integer(3));
    }

    #[test]
    fn test_conflicting_rule_is_rejected() {
        let table = DatapointTable::new();
        let id = IdentityId::from("climate");
        table.register(&id, humidity_rule()).unwrap();
        table.register(&id, humidity_rule()).unwrap();

        let conflicting =
            DatapointRule::new(2, CapabilityId::MeasureHumidity, Transform::ScaleDiv(100.0));
        let err = table.register(&id, conflicting.clone()).unwrap_err();
        match err {
            Error::ConflictingRule {
                dp_key,
                existing,
                proposed,
                ..
            } => {
                assert_eq!(dp_key, 2);
                assert!(existing.contains("scale_div:10"));
                assert!(proposed.contains("scale_div:100"));
            }
            other => panic!("unexpected error: {other}"),
        }

        // Explicit replacement is allowed.
        let old = table.replace(&id, conflicting).unwrap();
        assert_eq!(old, Some(humidity_rule()));
        assert_eq!(
            table.resolve(&id, 2, &DatapointValue::Value(215)).unwrap().1,
            TypedValue::Number(2.15)
        );
    }

    #[test]
    fn test_same_key_under_other_identity_is_independent() {
        let table = DatapointTable::new();
        table.register(&IdentityId::from("a"), humidity_rule()).unwrap();
        table
            .register(
                &IdentityId::from("b"),
                DatapointRule::new(2, CapabilityId::Dim, Transform::ScaleDiv(1000.0)),
            )
            .unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let table = DatapointTable::new();
        let id = IdentityId::from("climate");
        let result = table.register_all([
            (id.clone(), humidity_rule()),
            (
                id.clone(),
                DatapointRule::new(2, CapabilityId::MeasureTemperature, Transform::Identity),
            ),
        ]);
        assert!(result.is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_invalid_transform_is_rejected() {
        let table = DatapointTable::new();
        let bad = DatapointRule::new(1, CapabilityId::MeasureTemperature, Transform::ScaleDiv(0.0));
        assert!(matches!(
            table.register(&IdentityId::from("x"), bad),
            Err(Error::Config(_))
        ));
    }
}
