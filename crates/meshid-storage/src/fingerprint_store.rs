//! Fingerprint registry storage using redb.
//!
//! Persists device identities and datapoint translation rules. Records are
//! stored as JSON so new optional fields can be added without a migration.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};

use meshid_core::{DatapointRule, DeviceIdentity, IdentityId};

use crate::error::{Error, Result};

// Identities table: key = identity id, value = DeviceIdentity (JSON)
const IDENTITIES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("identities");

// Product index table: key = product token, value = comma-separated identity ids
const PRODUCT_INDEX_TABLE: TableDefinition<&str, &str> = TableDefinition::new("product_index");

// Rules table: key = (identity id, dp key), value = DatapointRule (JSON)
const RULES_TABLE: TableDefinition<(&str, u16), &str> = TableDefinition::new("datapoint_rules");

fn split_ids(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// redb-backed store for the fingerprint registry and translation table.
pub struct FingerprintStore {
    db: Database,
    path: PathBuf,
}

impl FingerprintStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;
        let write_txn = db.begin_write()?;
        {
            let _identities = write_txn.open_table(IDENTITIES_TABLE)?;
            let _index = write_txn.open_table(PRODUCT_INDEX_TABLE)?;
            let _rules = write_txn.open_table(RULES_TABLE)?;
        }
        write_txn.commit()?;

        tracing::debug!(path = %path.display(), "Opened fingerprint store");
        Ok(Arc::new(Self {
            db,
            path: path.to_path_buf(),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========== Identities ==========

    /// Save an identity and keep the product index in step with its tokens.
    pub fn save_identity(&self, identity: &DeviceIdentity) -> Result<()> {
        self.save_identities(std::slice::from_ref(identity))
    }

    /// Save several identities in one transaction.
    pub fn save_identities(&self, identities: &[DeviceIdentity]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut identities_table = write_txn.open_table(IDENTITIES_TABLE)?;
            let mut index_table = write_txn.open_table(PRODUCT_INDEX_TABLE)?;

            for identity in identities {
                let id = identity.id.as_str();

                let previous: BTreeSet<String> = match identities_table.get(id)? {
                    Some(value) => serde_json::from_str::<DeviceIdentity>(value.value())?
                        .product_tokens,
                    None => BTreeSet::new(),
                };

                let json = serde_json::to_string(identity)?;
                identities_table.insert(id, json.as_str())?;

                for dropped in previous.difference(&identity.product_tokens) {
                    let remaining: Vec<String> = match index_table.get(dropped.as_str())? {
                        Some(value) => split_ids(value.value())
                            .into_iter()
                            .filter(|other| other != id)
                            .collect(),
                        None => continue,
                    };
                    if remaining.is_empty() {
                        index_table.remove(dropped.as_str())?;
                    } else {
                        index_table.insert(dropped.as_str(), remaining.join(",").as_str())?;
                    }
                }

                for product in &identity.product_tokens {
                    let mut ids = match index_table.get(product.as_str())? {
                        Some(value) => split_ids(value.value()),
                        None => Vec::new(),
                    };
                    if !ids.iter().any(|other| other == id) {
                        ids.push(id.to_string());
                        index_table.insert(product.as_str(), ids.join(",").as_str())?;
                    }
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load an identity.
    pub fn load_identity(&self, id: &IdentityId) -> Result<Option<DeviceIdentity>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(IDENTITIES_TABLE)?;

        match table.get(id.as_str())? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    /// Load an identity that must exist.
    pub fn require_identity(&self, id: &IdentityId) -> Result<DeviceIdentity> {
        self.load_identity(id)?
            .ok_or_else(|| Error::NotFound(format!("identity {}", id)))
    }

    /// List every identity, superseded ones included.
    ///
    /// Records that no longer deserialize are skipped with a warning.
    pub fn list_identities(&self) -> Result<Vec<DeviceIdentity>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(IDENTITIES_TABLE)?;

        let mut identities = Vec::new();
        for result in table.iter()? {
            let (key, value) = result?;
            match serde_json::from_str::<DeviceIdentity>(value.value()) {
                Ok(identity) => identities.push(identity),
                Err(e) => {
                    tracing::warn!(id = key.value(), error = %e, "Skipping unreadable identity")
                }
            }
        }
        Ok(identities)
    }

    /// Identities claiming a product token.
    pub fn identities_for_product(&self, product: &str) -> Result<Vec<DeviceIdentity>> {
        let read_txn = self.db.begin_read()?;

        let ids = {
            let index_table = read_txn.open_table(PRODUCT_INDEX_TABLE)?;
            match index_table.get(product)? {
                Some(value) => split_ids(value.value()),
                None => return Ok(Vec::new()),
            }
        };

        let identities_table = read_txn.open_table(IDENTITIES_TABLE)?;
        let mut identities = Vec::new();
        for id in ids {
            if let Some(value) = identities_table.get(id.as_str())? {
                identities.push(serde_json::from_str(value.value())?);
            }
        }
        Ok(identities)
    }

    /// Load the product index into memory.
    pub fn load_product_index(&self) -> Result<BTreeMap<String, Vec<IdentityId>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PRODUCT_INDEX_TABLE)?;

        let mut index = BTreeMap::new();
        for result in table.iter()? {
            let (key, value) = result?;
            let ids = split_ids(value.value())
                .into_iter()
                .map(IdentityId::from)
                .collect();
            index.insert(key.value().to_string(), ids);
        }
        Ok(index)
    }

    pub fn identity_count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(IDENTITIES_TABLE)?;
        Ok(table.iter()?.count())
    }

    // ========== Datapoint rules ==========

    /// Save a translation rule for an identity.
    pub fn save_rule(&self, identity: &IdentityId, rule: &DatapointRule) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RULES_TABLE)?;
            let json = serde_json::to_string(rule)?;
            table.insert((identity.as_str(), rule.dp_key), json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Save every rule of a table in one transaction.
    pub fn save_rules(&self, rules: &[(IdentityId, DatapointRule)]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RULES_TABLE)?;
            for (identity, rule) in rules {
                let json = serde_json::to_string(rule)?;
                table.insert((identity.as_str(), rule.dp_key), json.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Rules registered for one identity, ordered by datapoint key.
    pub fn rules_for(&self, identity: &IdentityId) -> Result<Vec<DatapointRule>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RULES_TABLE)?;

        let start = (identity.as_str(), 0u16);
        let end = (identity.as_str(), u16::MAX);
        let mut rules = Vec::new();
        for result in table.range(start..=end)? {
            let (_key, value) = result?;
            rules.push(serde_json::from_str(value.value())?);
        }
        Ok(rules)
    }

    /// Every rule in the store.
    pub fn list_rules(&self) -> Result<Vec<(IdentityId, DatapointRule)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RULES_TABLE)?;

        let mut rules = Vec::new();
        for result in table.iter()? {
            let (key, value) = result?;
            let (identity, _dp_key) = key.value();
            let rule: DatapointRule = serde_json::from_str(value.value())?;
            rules.push((IdentityId::from(identity), rule));
        }
        Ok(rules)
    }

    pub fn rule_count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RULES_TABLE)?;
        Ok(table.iter()?.count())
    }
}
