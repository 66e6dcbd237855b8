//! Fingerprint Registry
//!
//! Canonical store of device identities, indexed by product token and
//! disambiguated by manufacturer token, then by cluster signature.
//!
//! ## Concurrency
//!
//! ```text
//! readers ──→ snapshot()  (Arc<RegistrySnapshot>, never mutated)
//! writers ──→ group_lock(product) ──→ commit(|txn| ...) ──→ publish new snapshot
//! ```
//!
//! Writers for different product groups plan concurrently and serialize only
//! for the short commit, which re-applies their changes to the latest
//! snapshot, projects every touched identity and swaps the result in.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use meshid_core::identity::normalize_token;
use meshid_core::{
    DeviceIdentity, Error, FingerprintCandidate, IdentityId, IdentityState, PowerSource, Result,
    TokenMatch,
};
use meshid_storage::FingerprintStore;

use crate::projector::{CapabilityProjector, ProjectionReport};

/// Which identities a lookup may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupScope {
    /// Validated identities only, as exposed to runtime drivers.
    Runtime,
    /// Every identity; superseded matches redirect to their successor.
    Merge,
}

/// A successful fingerprint lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintMatch {
    pub identity: DeviceIdentity,
    pub matched_token: String,
    pub strength: TokenMatch,
    /// Superseded identity the match went through, if any.
    pub redirected_from: Option<IdentityId>,
    /// Sources that asserted the matched token.
    pub sources: BTreeSet<String>,
}

/// Follow `merged_into` links to the live identity. Cycles yield `None`.
fn follow<'a>(
    identities: &'a HashMap<IdentityId, DeviceIdentity>,
    id: &IdentityId,
) -> Option<&'a DeviceIdentity> {
    let mut seen = HashSet::new();
    let mut current = identities.get(id)?;
    while current.is_superseded() {
        if !seen.insert(current.id.clone()) {
            tracing::warn!(identity = %id, "Supersession cycle");
            return None;
        }
        current = identities.get(current.merged_into.as_ref()?)?;
    }
    Some(current)
}

/// Immutable view of the registry published after each commit.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    identities: HashMap<IdentityId, DeviceIdentity>,
    by_product: HashMap<String, BTreeSet<IdentityId>>,
}

impl RegistrySnapshot {
    fn build(identities: HashMap<IdentityId, DeviceIdentity>) -> Self {
        let mut by_product: HashMap<String, BTreeSet<IdentityId>> = HashMap::new();
        for identity in identities.values() {
            for product in &identity.product_tokens {
                by_product
                    .entry(product.clone())
                    .or_default()
                    .insert(identity.id.clone());
            }
        }
        Self {
            identities,
            by_product,
        }
    }

    pub fn get(&self, id: &IdentityId) -> Option<&DeviceIdentity> {
        self.identities.get(id)
    }

    /// The live identity an id resolves to after redirects.
    pub fn resolve(&self, id: &IdentityId) -> Option<&DeviceIdentity> {
        follow(&self.identities, id)
    }

    /// Ids on the redirect chain from `id`, live identity first and `id`
    /// last. Empty when `id` is unknown or the chain cycles.
    pub fn lineage(&self, id: &IdentityId) -> Vec<IdentityId> {
        if self.resolve(id).is_none() {
            return Vec::new();
        }
        let mut chain = Vec::new();
        let mut current = self.identities.get(id);
        while let Some(identity) = current {
            chain.push(identity.id.clone());
            current = identity
                .merged_into
                .as_ref()
                .filter(|_| identity.is_superseded())
                .and_then(|next| self.identities.get(next));
        }
        chain.reverse();
        chain
    }

    pub fn ids_for_product(&self, product: &str) -> BTreeSet<IdentityId> {
        self.by_product.get(product).cloned().unwrap_or_default()
    }

    /// Live identities claiming a product token, redirects applied.
    pub fn live_for_product(&self, product: &str) -> BTreeSet<IdentityId> {
        self.by_product
            .get(product)
            .into_iter()
            .flatten()
            .filter_map(|id| self.resolve(id))
            .map(|identity| identity.id.clone())
            .collect()
    }

    pub fn identities(&self) -> impl Iterator<Item = &DeviceIdentity> {
        self.identities.values()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Find the identity for an advertised fingerprint.
    ///
    /// Exact manufacturer matches beat prefix matches and longer prefixes
    /// beat shorter; remaining ties go to the unique best cluster overlap.
    /// Anything still tied is an `AmbiguousFingerprint`.
    pub fn lookup(
        &self,
        manufacturer: &str,
        product: &str,
        clusters: &BTreeSet<u16>,
        scope: LookupScope,
    ) -> Result<Option<FingerprintMatch>> {
        let manufacturer = normalize_token(manufacturer);
        let product = normalize_token(product);
        let Some(ids) = self.by_product.get(&product) else {
            return Ok(None);
        };

        let mut hits: Vec<FingerprintMatch> = Vec::new();
        for id in ids {
            let Some(identity) = self.identities.get(id) else {
                continue;
            };
            let Some((strength, token)) = identity.manufacturer_match(&manufacturer) else {
                continue;
            };
            let (resolved, redirected_from) = match (identity.state, scope) {
                (IdentityState::Superseded, LookupScope::Runtime) => continue,
                (IdentityState::Superseded, LookupScope::Merge) => match self.resolve(id) {
                    Some(live) => (live, Some(id.clone())),
                    None => continue,
                },
                _ => (identity, None),
            };
            if scope == LookupScope::Runtime && !resolved.is_validated() {
                continue;
            }

            let hit = FingerprintMatch {
                identity: resolved.clone(),
                matched_token: token.to_string(),
                strength,
                redirected_from,
                sources: identity.manufacturer_provenance(token),
            };
            match hits.iter_mut().find(|h| h.identity.id == hit.identity.id) {
                Some(existing) if existing.strength < hit.strength => *existing = hit,
                Some(_) => {}
                None => hits.push(hit),
            }
        }

        let Some(best) = hits.iter().map(|h| h.strength).max() else {
            return Ok(None);
        };
        hits.retain(|h| h.strength == best);
        if hits.len() > 1 {
            let overlaps: Vec<usize> = hits
                .iter()
                .map(|h| h.identity.signature_overlap(clusters))
                .collect();
            let top = overlaps.iter().copied().max().unwrap_or(0);
            if top > 0 && overlaps.iter().filter(|o| **o == top).count() == 1 {
                let winner = overlaps.iter().position(|o| *o == top).unwrap_or(0);
                return Ok(Some(hits.swap_remove(winner)));
            }

            hits.sort_by(|a, b| a.identity.id.cmp(&b.identity.id));
            return Err(Error::AmbiguousFingerprint {
                manufacturer,
                product,
                candidates: hits
                    .into_iter()
                    .map(|h| FingerprintCandidate {
                        identity: h.identity.id,
                        matched_token: h.matched_token,
                        sources: h.sources,
                    })
                    .collect(),
            });
        }
        Ok(hits.pop())
    }
}

/// Working copy handed to a commit closure.
#[derive(Debug)]
pub struct RegistryTxn {
    identities: HashMap<IdentityId, DeviceIdentity>,
    touched: BTreeSet<IdentityId>,
}

impl RegistryTxn {
    pub fn get(&self, id: &IdentityId) -> Option<&DeviceIdentity> {
        self.identities.get(id)
    }

    pub fn get_mut(&mut self, id: &IdentityId) -> Option<&mut DeviceIdentity> {
        let identity = self.identities.get_mut(id)?;
        self.touched.insert(id.clone());
        Some(identity)
    }

    pub fn insert(&mut self, identity: DeviceIdentity) -> Option<DeviceIdentity> {
        self.touched.insert(identity.id.clone());
        self.identities.insert(identity.id.clone(), identity)
    }

    pub fn contains(&self, id: &IdentityId) -> bool {
        self.identities.contains_key(id)
    }

    /// Id of the live identity `id` redirects to.
    pub fn resolve(&self, id: &IdentityId) -> Option<IdentityId> {
        follow(&self.identities, id).map(|identity| identity.id.clone())
    }

    /// Live identities claiming a product token, redirects applied.
    pub fn live_for_product(&self, product: &str) -> BTreeSet<IdentityId> {
        self.identities
            .values()
            .filter(|identity| identity.product_tokens.contains(product))
            .filter_map(|identity| self.resolve(&identity.id))
            .collect()
    }

    /// Give `owner` sole claim on `(token, product)`.
    ///
    /// The token is taken from every other live identity sharing the product,
    /// along with its provenance. An identity left with no manufacturer
    /// token is superseded into `owner`. Returns the identities superseded.
    pub fn claim_manufacturer(
        &mut self,
        owner: &IdentityId,
        token: &str,
        product: &str,
    ) -> Result<Vec<IdentityId>> {
        let holders: Vec<IdentityId> = self
            .identities
            .values()
            .filter(|identity| {
                identity.id != *owner
                    && !identity.is_superseded()
                    && identity.product_tokens.contains(product)
                    && identity.manufacturer_tokens.contains(token)
            })
            .map(|identity| identity.id.clone())
            .collect();

        let mut superseded = Vec::new();
        for holder in holders {
            let (sources, emptied) = match self.get_mut(&holder) {
                Some(identity) => {
                    let sources = identity.forget_manufacturer(token).unwrap_or_default();
                    (sources, identity.manufacturer_tokens.is_empty())
                }
                None => continue,
            };
            tracing::info!(token, product, from = %holder, to = %owner, "Reassigned manufacturer token");

            if let Some(identity) = self.get_mut(owner) {
                identity.manufacturer_tokens.insert(token.to_string());
                identity
                    .manufacturer_sources
                    .entry(token.to_string())
                    .or_default()
                    .extend(sources);
            }
            if emptied {
                self.supersede(&holder, owner)?;
                superseded.push(holder);
            }
        }
        Ok(superseded)
    }

    /// Mark `old` superseded by `into`, moving its tokens and capabilities.
    pub fn supersede(&mut self, old: &IdentityId, into: &IdentityId) -> Result<()> {
        if old == into {
            return Err(Error::InvalidIdentity(
                old.clone(),
                "cannot supersede an identity by itself".to_string(),
            ));
        }
        let target = self
            .resolve(into)
            .ok_or_else(|| Error::NotFound(format!("identity {}", into)))?;
        if target == *old {
            return Err(Error::InvalidIdentity(
                old.clone(),
                format!("{} already redirects to it", into),
            ));
        }

        let source = self
            .get_mut(old)
            .ok_or_else(|| Error::NotFound(format!("identity {}", old)))?;
        let manufacturer_tokens = std::mem::take(&mut source.manufacturer_tokens);
        let manufacturer_sources = std::mem::take(&mut source.manufacturer_sources);
        let moved = source.clone();
        source.state = IdentityState::Superseded;
        source.merged_into = Some(target.clone());

        let successor = self
            .get_mut(&target)
            .ok_or_else(|| Error::NotFound(format!("identity {}", target)))?;
        successor.manufacturer_tokens.extend(manufacturer_tokens);
        for (token, sources) in manufacturer_sources {
            successor
                .manufacturer_sources
                .entry(token)
                .or_default()
                .extend(sources);
        }
        successor.product_tokens.extend(moved.product_tokens);
        for (token, sources) in moved.product_sources {
            successor.product_sources.entry(token).or_default().extend(sources);
        }
        successor.capabilities.extend(moved.capabilities);
        for (capability, sources) in moved.capability_sources {
            successor
                .capability_sources
                .entry(capability)
                .or_default()
                .extend(sources);
        }
        successor.cluster_signature.extend(moved.cluster_signature);
        if successor.power_source == PowerSource::Unknown {
            successor.power_source = moved.power_source;
        }

        tracing::info!(old = %old, into = %target, "Superseded identity");
        Ok(())
    }
}

/// Shared fingerprint registry.
#[derive(Debug, Default)]
pub struct FingerprintRegistry {
    snapshot: RwLock<Arc<RegistrySnapshot>>,
    group_locks: DashMap<String, Arc<Mutex<()>>>,
    commit_lock: Mutex<()>,
    projector: CapabilityProjector,
}

impl FingerprintRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projector(projector: CapabilityProjector) -> Self {
        Self {
            projector,
            ..Self::default()
        }
    }

    pub fn projector(&self) -> &CapabilityProjector {
        &self.projector
    }

    /// Last published snapshot.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.read().clone()
    }

    /// Writer lock for one product-token group.
    pub fn group_lock(&self, product: &str) -> Arc<Mutex<()>> {
        self.group_locks
            .entry(product.to_string())
            .or_default()
            .clone()
    }

    /// Apply a change to the latest state and publish it.
    ///
    /// Every identity the closure touches is projected and validated; if the
    /// closure or validation fails nothing is published.
    pub fn commit<T>(
        &self,
        change: impl FnOnce(&mut RegistryTxn) -> Result<T>,
    ) -> Result<(T, Vec<ProjectionReport>)> {
        let _guard = self.commit_lock.lock();
        let mut txn = RegistryTxn {
            identities: self.snapshot().identities.clone(),
            touched: BTreeSet::new(),
        };
        let value = change(&mut txn)?;

        let mut reports = Vec::with_capacity(txn.touched.len());
        for id in &txn.touched {
            if let Some(identity) = txn.identities.get_mut(id) {
                let report = self.projector.project(identity);
                identity.validate()?;
                reports.push(report);
            }
        }
        if !txn.touched.is_empty() {
            *self.snapshot.write() = Arc::new(RegistrySnapshot::build(txn.identities));
        }
        Ok((value, reports))
    }

    pub fn get(&self, id: &IdentityId) -> Option<DeviceIdentity> {
        self.snapshot().get(id).cloned()
    }

    /// The live identity `id` resolves to after redirects.
    pub fn resolve(&self, id: &IdentityId) -> Option<DeviceIdentity> {
        self.snapshot().resolve(id).cloned()
    }

    /// See [`RegistrySnapshot::lineage`].
    pub fn lineage(&self, id: &IdentityId) -> Vec<IdentityId> {
        self.snapshot().lineage(id)
    }

    /// Runtime lookup: only validated identities are returned.
    pub fn lookup(
        &self,
        manufacturer: &str,
        product: &str,
        clusters: &BTreeSet<u16>,
    ) -> Result<Option<DeviceIdentity>> {
        Ok(self
            .snapshot()
            .lookup(manufacturer, product, clusters, LookupScope::Runtime)?
            .map(|hit| hit.identity))
    }

    /// Lookup across every state, following supersession redirects.
    pub fn lookup_for_merge(
        &self,
        manufacturer: &str,
        product: &str,
        clusters: &BTreeSet<u16>,
    ) -> Result<Option<FingerprintMatch>> {
        self.snapshot()
            .lookup(manufacturer, product, clusters, LookupScope::Merge)
    }

    /// Insert or replace an identity, then project it.
    pub fn upsert(&self, identity: DeviceIdentity) -> Result<ProjectionReport> {
        identity.validate()?;
        let id = identity.id.clone();
        let locks = self.group_locks_for(&identity);
        let _guards: Vec<_> = locks.iter().map(|lock| lock.lock()).collect();
        let (_, reports) = self.commit(|txn| {
            txn.insert(identity);
            Ok(())
        })?;
        tracing::debug!(identity = %id, "Upserted identity");
        Ok(reports.into_iter().next().unwrap_or_default())
    }

    /// Mark `old` superseded by `into`; its tokens and capabilities move.
    pub fn supersede(&self, old: &IdentityId, into: &IdentityId) -> Result<Vec<ProjectionReport>> {
        let (_, reports) = self.commit(|txn| txn.supersede(old, into))?;
        Ok(reports)
    }

    /// Resolve an ambiguity by hand: `owner` becomes the only live holder of
    /// `(token, product)`. Returns the identities superseded as a result.
    pub fn assign_manufacturer(
        &self,
        owner: &IdentityId,
        token: &str,
        product: &str,
    ) -> Result<Vec<IdentityId>> {
        let token = normalize_token(token);
        let product = normalize_token(product);
        let lock = self.group_lock(&product);
        let _guard = lock.lock();
        let (superseded, _) = self.commit(|txn| {
            let identity = txn
                .get_mut(owner)
                .ok_or_else(|| Error::NotFound(format!("identity {}", owner)))?;
            if identity.is_superseded() {
                return Err(Error::InvalidIdentity(
                    owner.clone(),
                    "cannot assign tokens to a superseded identity".to_string(),
                ));
            }
            identity.manufacturer_tokens.insert(token.clone());
            identity.product_tokens.insert(product.clone());
            txn.claim_manufacturer(owner, &token, &product)
        })?;
        Ok(superseded)
    }

    fn group_locks_for(&self, identity: &DeviceIdentity) -> Vec<Arc<Mutex<()>>> {
        // BTreeSet order keeps acquisition order consistent across writers.
        identity
            .product_tokens
            .iter()
            .map(|product| self.group_lock(product))
            .collect()
    }

    /// Every identity, ordered by id.
    pub fn identities(&self) -> Vec<DeviceIdentity> {
        let mut identities: Vec<DeviceIdentity> = self.snapshot().identities().cloned().collect();
        identities.sort_by(|a, b| a.id.cmp(&b.id));
        identities
    }

    /// Identities exposed to runtime drivers.
    pub fn validated(&self) -> Vec<DeviceIdentity> {
        self.identities()
            .into_iter()
            .filter(DeviceIdentity::is_validated)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Load every persisted identity into the registry.
    pub fn load_from(&self, store: &FingerprintStore) -> Result<usize> {
        let identities = store.list_identities()?;
        let count = identities.len();
        self.commit(|txn| {
            for identity in identities {
                txn.insert(identity);
            }
            Ok(())
        })?;
        tracing::info!(identities = count, path = %store.path().display(), "Loaded fingerprint registry");
        Ok(count)
    }

    pub fn save_to(&self, store: &FingerprintStore) -> Result<()> {
        let identities = self.identities();
        store.save_identities(&identities)?;
        tracing::info!(identities = identities.len(), path = %store.path().display(), "Saved fingerprint registry");
        Ok(())
    }
}
