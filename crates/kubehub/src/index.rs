//! Immutable lookup tables built from one discovery round.

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use kmcp_core::GroupVersionKind;
use rustc_hash::FxHashMap;

use crate::discovery::{Discovered, DiscoveredResource};

/// Identifier and GVK lookup over a discovery listing.
///
/// Identifier lookup covers preferred versions only; for each resource the kind, plural,
/// singular and short names are registered in that order, and the first resource in
/// listing order keeps a contested identifier. GVK lookup covers every served version.
#[derive(Debug, Default)]
pub struct DiscoveryIndex {
    resources: Vec<DiscoveredResource>,
    by_identifier: FxHashMap<String, usize>,
    by_gvk: FxHashMap<String, usize>,
    failed: Vec<String>,
}

impl DiscoveryIndex {
    pub fn build(discovered: Discovered) -> Self {
        let Discovered { resources, failed } = discovered;
        let mut by_identifier = FxHashMap::default();
        let mut by_gvk = FxHashMap::default();
        for (i, r) in resources.iter().enumerate() {
            by_gvk.entry(r.gvk_key()).or_insert(i);
            if !r.preferred {
                continue;
            }
            for id in r.identifiers() {
                by_identifier.entry(id.to_string()).or_insert(i);
            }
        }
        Self { resources, by_identifier, by_gvk, failed }
    }

    pub fn lookup(&self, identifier: &str) -> Option<&DiscoveredResource> {
        self.by_identifier.get(identifier).map(|&i| &self.resources[i])
    }

    pub fn lookup_gvk(&self, gvk: &GroupVersionKind) -> Option<&DiscoveredResource> {
        let key = if gvk.group.is_empty() {
            format!("{}/{}", gvk.version, gvk.kind)
        } else {
            format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
        };
        self.by_gvk.get(&key).map(|&i| &self.resources[i])
    }

    /// Every listed resource, all versions, in listing order.
    pub fn resources(&self) -> &[DiscoveredResource] {
        &self.resources
    }

    pub fn preferred(&self) -> impl Iterator<Item = &DiscoveredResource> {
        self.resources.iter().filter(|r| r.preferred)
    }

    /// Group-versions that failed to list in the round this index was built from.
    pub fn failed_group_versions(&self) -> &[String] {
        &self.failed
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Closest known identifier for an unknown one, if any is reasonably close.
    pub fn suggest(&self, identifier: &str) -> Option<String> {
        let lower = identifier.to_lowercase();
        if lower != identifier && self.by_identifier.contains_key(&lower) {
            return Some(lower);
        }
        let matcher = SkimMatcherV2::default();
        self.by_identifier
            .keys()
            .filter_map(|k| matcher.fuzzy_match(k, identifier).map(|score| (score, k)))
            // best score, then shortest, then lexical; map order is not stable
            .max_by(|(sa, ka), (sb, kb)| {
                sa.cmp(sb).then_with(|| kb.len().cmp(&ka.len())).then_with(|| kb.cmp(ka))
            })
            .map(|(_, k)| k.clone())
    }
}
