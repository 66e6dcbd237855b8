//! Multi-Source Merge Engine
//!
//! Folds batches of [`CandidateRecord`]s from independent feeds into the
//! fingerprint registry.
//!
//! ## Policy
//!
//! - Candidates are grouped by product token; each group is merged under
//!   that group's writer lock.
//! - A manufacturer token is accepted when one source asserts it with
//!   confidence at or above the threshold, or when enough distinct sources
//!   assert it regardless of confidence.
//! - Claimed capabilities are unioned. Pruning is left to the projector,
//!   which runs on every identity the merge touches.
//! - Every accepted token and capability records the sources behind it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;

use meshid_core::identity::normalize_token;
use meshid_core::{
    CandidateRecord, CapabilityId, Category, DeviceIdentity, Error, FingerprintCandidate,
    IdentityId, MergeConfig, PowerSource, Result,
};

use crate::projector::ProjectionReport;
use crate::registry::{FingerprintRegistry, LookupScope, RegistryTxn};

/// Why a token was not written to an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Neither confident enough nor corroborated by enough sources.
    BelowThreshold,
    /// The identity's token set is full.
    Cap,
    /// Several identities plausibly own the fingerprint.
    Ambiguous,
    /// Empty manufacturer or product token.
    Malformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Manufacturer,
    Product,
}

/// Outcome for one token of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenDecision {
    pub kind: TokenKind,
    pub token: String,
    pub product: String,
    pub sources: BTreeSet<String>,
    pub confidence: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
}

impl TokenDecision {
    fn new(kind: TokenKind, token: &str, product: &str) -> Self {
        Self {
            kind,
            token: token.to_string(),
            product: product.to_string(),
            sources: BTreeSet::new(),
            confidence: 0,
            identity: None,
            reason: None,
        }
    }

    fn manufacturer(token: &str, product: &str, evidence: &TokenEvidence) -> Self {
        Self {
            sources: evidence.sources.clone(),
            confidence: evidence.confidence,
            ..Self::new(TokenKind::Manufacturer, token, product)
        }
    }

    fn for_identity(mut self, identity: &IdentityId) -> Self {
        self.identity = Some(identity.clone());
        self
    }

    fn rejected(mut self, reason: RejectReason) -> Self {
        self.reason = Some(reason);
        self
    }
}

/// A candidate routed through a superseded identity to its successor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redirect {
    pub from: IdentityId,
    pub to: IdentityId,
    pub product: String,
}

/// A fingerprint left unassigned because several identities claim it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ambiguity {
    pub manufacturer: String,
    pub product: String,
    pub candidates: Vec<IdentityId>,
    pub message: String,
}

/// Everything one merge changed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    pub candidates: usize,
    pub created: BTreeSet<IdentityId>,
    pub updated: BTreeSet<IdentityId>,
    pub accepted: Vec<TokenDecision>,
    pub rejected: Vec<TokenDecision>,
    pub capabilities_added: BTreeMap<IdentityId, BTreeSet<CapabilityId>>,
    pub redirects: Vec<Redirect>,
    pub superseded: Vec<IdentityId>,
    pub ambiguities: Vec<Ambiguity>,
    pub projections: Vec<ProjectionReport>,
}

impl MergeReport {
    pub fn absorb(&mut self, other: MergeReport) {
        self.candidates += other.candidates;
        self.created.extend(other.created);
        self.updated.extend(other.updated);
        self.updated.retain(|id| !self.created.contains(id));
        self.accepted.extend(other.accepted);
        self.rejected.extend(other.rejected);
        for (id, caps) in other.capabilities_added {
            self.capabilities_added.entry(id).or_default().extend(caps);
        }
        for redirect in other.redirects {
            if !self.redirects.contains(&redirect) {
                self.redirects.push(redirect);
            }
        }
        self.superseded.extend(other.superseded);
        self.ambiguities.extend(other.ambiguities);
        self.projections.extend(other.projections);
    }

    pub fn is_accepted(&self, manufacturer: &str, product: &str) -> bool {
        self.accepted
            .iter()
            .any(|d| d.token == manufacturer && d.product == product)
    }

    pub fn rejection(&self, manufacturer: &str, product: &str) -> Option<RejectReason> {
        self.rejected
            .iter()
            .find(|d| d.token == manufacturer && d.product == product)
            .and_then(|d| d.reason)
    }

    fn redirect(&mut self, from: &IdentityId, to: &IdentityId, product: &str) {
        let redirect = Redirect {
            from: from.clone(),
            to: to.clone(),
            product: product.to_string(),
        };
        if !self.redirects.contains(&redirect) {
            tracing::warn!(from = %from, to = %to, product, "Candidate redirected through superseded identity");
            self.redirects.push(redirect);
        }
    }

    fn ambiguous(&mut self, decision: TokenDecision, error: Error) {
        tracing::warn!(%error, "Fingerprint left unassigned");
        let candidates = match &error {
            Error::AmbiguousFingerprint { candidates, .. } => {
                candidates.iter().map(|c| c.identity.clone()).collect()
            }
            _ => Vec::new(),
        };
        self.ambiguities.push(Ambiguity {
            manufacturer: decision.token.clone(),
            product: decision.product.clone(),
            candidates,
            message: error.to_string(),
        });
        self.rejected.push(decision.rejected(RejectReason::Ambiguous));
    }
}

/// Everything a batch says about one manufacturer token.
#[derive(Debug, Default)]
struct TokenEvidence {
    sources: BTreeSet<String>,
    confidence: u8,
    capabilities: BTreeMap<CapabilityId, BTreeSet<String>>,
    power_hints: Vec<PowerSource>,
    category_hints: Vec<Category>,
}

/// Most frequent hint; ties and empty input give `None`.
fn majority<T: Ord + Copy>(hints: &[T]) -> Option<T> {
    let mut counts: BTreeMap<T, usize> = BTreeMap::new();
    for hint in hints {
        *counts.entry(*hint).or_default() += 1;
    }
    let top = counts.values().copied().max()?;
    let mut winners = counts.into_iter().filter(|(_, count)| *count == top);
    let (winner, _) = winners.next()?;
    match winners.next() {
        Some(_) => None,
        None => Some(winner),
    }
}

/// Merges candidate batches into a shared registry.
pub struct MergeEngine {
    registry: Arc<FingerprintRegistry>,
    config: MergeConfig,
}

impl MergeEngine {
    pub fn new(registry: Arc<FingerprintRegistry>, config: MergeConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<FingerprintRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Merge one batch. Ambiguities are reported, not returned as errors.
    pub fn merge(&self, batch: impl IntoIterator<Item = CandidateRecord>) -> Result<MergeReport> {
        let mut report = MergeReport::default();
        let mut groups: BTreeMap<String, Vec<CandidateRecord>> = BTreeMap::new();

        for candidate in batch {
            report.candidates += 1;
            let manufacturer = normalize_token(&candidate.manufacturer_token);
            let product = normalize_token(&candidate.product_token);
            if manufacturer.is_empty() || product.is_empty() {
                tracing::debug!(source = %candidate.source_id, "Skipping candidate with empty token");
                let mut decision = TokenDecision::new(TokenKind::Manufacturer, &manufacturer, &product)
                    .rejected(RejectReason::Malformed);
                decision.sources.insert(candidate.source_id);
                report.rejected.push(decision);
                continue;
            }
            groups.entry(product).or_default().push(candidate);
        }

        for (product, candidates) in groups {
            let group = self.merge_group(&product, candidates)?;
            report.absorb(group);
        }

        tracing::info!(
            candidates = report.candidates,
            created = report.created.len(),
            updated = report.updated.len(),
            accepted = report.accepted.len(),
            rejected = report.rejected.len(),
            ambiguous = report.ambiguities.len(),
            "Merged candidate batch"
        );
        Ok(report)
    }

    fn collect_evidence(&self, candidates: Vec<CandidateRecord>) -> BTreeMap<String, TokenEvidence> {
        let mut occurrences: HashMap<(String, String), usize> = HashMap::new();
        for candidate in &candidates {
            let key = (
                candidate.source_id.clone(),
                normalize_token(&candidate.manufacturer_token),
            );
            *occurrences.entry(key).or_default() += 1;
        }

        let mut evidence: BTreeMap<String, TokenEvidence> = BTreeMap::new();
        for candidate in candidates {
            let token = normalize_token(&candidate.manufacturer_token);
            let confidence = if candidate.confidence > 0 {
                candidate.confidence
            } else {
                let seen = occurrences
                    .get(&(candidate.source_id.clone(), token.clone()))
                    .copied()
                    .unwrap_or(1);
                self.config.reliability.confidence(&candidate.source_id, seen)
            };

            let entry = evidence.entry(token).or_default();
            entry.sources.insert(candidate.source_id.clone());
            entry.confidence = entry.confidence.max(confidence);
            for capability in candidate.claimed_capabilities {
                if capability == CapabilityId::PassthroughUnknown {
                    continue;
                }
                entry
                    .capabilities
                    .entry(capability)
                    .or_default()
                    .insert(candidate.source_id.clone());
            }
            if let Some(power_source) = candidate.power_source {
                if power_source != PowerSource::Unknown {
                    entry.power_hints.push(power_source);
                }
            }
            entry.category_hints.extend(candidate.category);
        }
        evidence
    }

    fn merge_group(&self, product: &str, candidates: Vec<CandidateRecord>) -> Result<MergeReport> {
        let lock = self.registry.group_lock(product);
        let _guard = lock.lock();

        let evidence = self.collect_evidence(candidates);
        let snapshot = self.registry.snapshot();
        let mut report = MergeReport::default();
        // `None` collects the tokens that found no identity.
        let mut plan: BTreeMap<Option<IdentityId>, Vec<String>> = BTreeMap::new();

        for (token, entry) in &evidence {
            let decision = TokenDecision::manufacturer(token, product, entry);
            let corroborated = entry.sources.len() >= self.config.corroboration_sources;
            if entry.confidence < self.config.confidence_threshold && !corroborated {
                tracing::debug!(
                    token,
                    product,
                    confidence = entry.confidence,
                    sources = entry.sources.len(),
                    "Token below threshold"
                );
                report.rejected.push(decision.rejected(RejectReason::BelowThreshold));
                continue;
            }

            match snapshot.lookup(token, product, &BTreeSet::new(), LookupScope::Merge) {
                Ok(Some(hit)) => {
                    if let Some(from) = &hit.redirected_from {
                        report.redirect(from, &hit.identity.id, product);
                    }
                    plan.entry(Some(hit.identity.id)).or_default().push(token.clone());
                }
                Ok(None) => {
                    let live = snapshot.live_for_product(product);
                    let mut live_iter = live.iter();
                    match (live_iter.next(), live_iter.next()) {
                        (None, _) => plan.entry(None).or_default().push(token.clone()),
                        (Some(target), None) => {
                            for id in snapshot.ids_for_product(product) {
                                let superseded = snapshot.get(&id).is_some_and(|i| i.is_superseded());
                                if superseded && snapshot.resolve(&id).map(|i| &i.id) == Some(target) {
                                    report.redirect(&id, target, product);
                                }
                            }
                            plan.entry(Some(target.clone())).or_default().push(token.clone());
                        }
                        (Some(_), Some(_)) => {
                            let error = Error::AmbiguousFingerprint {
                                manufacturer: token.clone(),
                                product: product.to_string(),
                                candidates: live
                                    .iter()
                                    .map(|id| FingerprintCandidate {
                                        identity: id.clone(),
                                        matched_token: product.to_string(),
                                        sources: snapshot
                                            .get(id)
                                            .and_then(|i| i.product_sources.get(product).cloned())
                                            .unwrap_or_default(),
                                    })
                                    .collect(),
                            };
                            report.ambiguous(decision, error);
                        }
                    }
                }
                Err(error @ Error::AmbiguousFingerprint { .. }) => report.ambiguous(decision, error),
                Err(error) => return Err(error),
            }
        }

        if plan.is_empty() {
            return Ok(report);
        }

        let (applied, projections) = self
            .registry
            .commit(|txn| self.apply(txn, product, &evidence, plan))?;
        report.absorb(applied);
        report
            .projections
            .extend(projections.into_iter().filter(|p| !p.is_noop()));
        Ok(report)
    }

    fn new_identity(
        &self,
        product: &str,
        tokens: &[String],
        evidence: &BTreeMap<String, TokenEvidence>,
    ) -> DeviceIdentity {
        let mut power_hints = Vec::new();
        let mut category_hints = Vec::new();
        let mut capabilities = BTreeSet::new();
        for entry in tokens.iter().filter_map(|t| evidence.get(t)) {
            power_hints.extend(entry.power_hints.iter().copied());
            category_hints.extend(entry.category_hints.iter().copied());
            capabilities.extend(entry.capabilities.keys().copied());
        }

        let first = tokens.first().map(String::as_str).unwrap_or_default();
        DeviceIdentity::new(IdentityId::generate(product), first, product)
            .with_power_source(majority(&power_hints).unwrap_or(PowerSource::Unknown))
            .with_category(majority(&category_hints).unwrap_or_else(|| Category::infer(&capabilities)))
    }

    /// Write planned tokens into the latest registry state.
    fn apply(
        &self,
        txn: &mut RegistryTxn,
        product: &str,
        evidence: &BTreeMap<String, TokenEvidence>,
        plan: BTreeMap<Option<IdentityId>, Vec<String>>,
    ) -> Result<MergeReport> {
        let mut report = MergeReport::default();

        for (target, tokens) in plan {
            let id = match target {
                Some(planned) => {
                    let live = txn
                        .resolve(&planned)
                        .ok_or_else(|| Error::NotFound(format!("identity {}", planned)))?;
                    if live != planned {
                        report.redirect(&planned, &live, product);
                    }
                    report.updated.insert(live.clone());
                    live
                }
                None => {
                    let identity = self.new_identity(product, &tokens, evidence);
                    let id = identity.id.clone();
                    tracing::info!(identity = %id, product, "Created identity");
                    txn.insert(identity);
                    report.created.insert(id.clone());
                    id
                }
            };

            let mut claimed = Vec::new();
            {
                let identity = txn
                    .get_mut(&id)
                    .ok_or_else(|| Error::NotFound(format!("identity {}", id)))?;
                if !identity.product_tokens.contains(product)
                    && identity.product_tokens.len() >= self.config.max_product_tokens
                {
                    tracing::warn!(identity = %id, product, "Product token cap reached");
                    report.rejected.push(
                        TokenDecision::new(TokenKind::Product, product, product)
                            .for_identity(&id)
                            .rejected(RejectReason::Cap),
                    );
                    continue;
                }

                for token in &tokens {
                    let Some(entry) = evidence.get(token) else {
                        continue;
                    };
                    let decision = TokenDecision::manufacturer(token, product, entry).for_identity(&id);
                    if !identity.manufacturer_tokens.contains(token)
                        && identity.manufacturer_tokens.len() >= self.config.max_manufacturer_tokens
                    {
                        tracing::warn!(identity = %id, token, "Manufacturer token cap reached");
                        report.rejected.push(decision.rejected(RejectReason::Cap));
                        continue;
                    }

                    for source in &entry.sources {
                        identity.note_product(product, source);
                        identity.note_manufacturer(token, source);
                    }
                    for (capability, sources) in &entry.capabilities {
                        if !identity.exposes(*capability) {
                            report
                                .capabilities_added
                                .entry(id.clone())
                                .or_default()
                                .insert(*capability);
                        }
                        for source in sources {
                            identity.note_capability(*capability, source);
                        }
                    }
                    report.accepted.push(decision);
                    claimed.push(token.clone());
                }
            }

            for token in claimed {
                report
                    .superseded
                    .extend(txn.claim_manufacturer(&id, &token, product)?);
            }
        }

        report.updated.retain(|id| !report.created.contains(id));
        Ok(report)
    }
}
