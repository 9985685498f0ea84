//! Finding the unit that holds a URL.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use tracing::{debug, instrument, trace, warn};
use url::Url;

use super::RouterSettings;
use super::search_set::AuSearchSet;
use crate::au::{ArchivalUnit, AuId, url_stem};
use crate::tree::{ArchiveMemberSpec, CachedUrl};

/// What a lookup requires of the leaf it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentReq {
    /// Only a leaf with content.
    HasContent,
    /// A leaf with content if any unit has one, otherwise any leaf.
    PreferContent,
    /// The first unit that claims the URL, content or not.
    DontCare,
}

impl ContentReq {
    fn wants_content(self) -> bool {
        !matches!(self, Self::DontCare)
    }
}

/// Registered units indexed by URL stem.
#[derive(Debug)]
pub struct AuRouter {
    sets: DashMap<String, Arc<AuSearchSet>>,
    units: DashMap<AuId, Arc<ArchivalUnit>>,
    settings: RwLock<Arc<RouterSettings>>,
    negative_hits: AtomicU64,
}

impl Default for AuRouter {
    fn default() -> Self {
        Self::new(RouterSettings::default())
    }
}

impl AuRouter {
    #[must_use]
    pub fn new(settings: RouterSettings) -> Self {
        Self {
            sets: DashMap::new(),
            units: DashMap::new(),
            settings: RwLock::new(Arc::new(settings)),
            negative_hits: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn settings(&self) -> Arc<RouterSettings> {
        Arc::clone(&self.settings.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Applies new settings to every search set.
    pub fn set_settings(&self, settings: RouterSettings) {
        for entry in &self.sets {
            entry
                .value()
                .set_size_functions(settings.cache_size.clone(), settings.negative_cache_size.clone());
        }
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(settings);
    }

    /// Registers `unit` under each of its stems.
    pub fn add_unit(&self, unit: Arc<ArchivalUnit>) {
        let settings = self.settings();
        for stem in normalized_stems(&unit) {
            debug!(stem = %stem, unit = %unit.id(), "adding stem");
            let set = self.sets.entry(stem).or_insert_with(|| {
                Arc::new(AuSearchSet::new(
                    settings.cache_size.clone(),
                    settings.negative_cache_size.clone(),
                ))
            });
            set.add(Arc::clone(&unit));
        }
        self.units.insert(unit.id().clone(), unit);
    }

    /// Unregisters a unit, dropping search sets left empty.
    pub fn remove_unit(&self, id: &AuId) -> Option<Arc<ArchivalUnit>> {
        let (_, unit) = self.units.remove(id)?;
        for stem in normalized_stems(&unit) {
            debug!(stem = %stem, unit = %id, "removing stem");
            if let Some(set) = self.sets.get(&stem) {
                set.remove(id);
            }
            self.sets.remove_if(&stem, |_, set| set.is_empty());
        }
        Some(unit)
    }

    #[must_use]
    pub fn unit(&self, id: &AuId) -> Option<Arc<ArchivalUnit>> {
        self.units.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Every registered unit, ordered by name.
    #[must_use]
    pub fn units(&self) -> Vec<Arc<ArchivalUnit>> {
        let mut units: Vec<_> = self.units.iter().map(|e| Arc::clone(e.value())).collect();
        units.sort_by_key(|unit| unit.name());
        units
    }

    /// Registered stems, sorted.
    #[must_use]
    pub fn stems(&self) -> Vec<String> {
        let mut stems: Vec<_> = self.sets.iter().map(|e| e.key().clone()).collect();
        stems.sort();
        stems
    }

    /// The search set for the stem of `url`.
    #[must_use]
    pub fn search_set(&self, url: &str) -> Option<Arc<AuSearchSet>> {
        let (_, stem) = normalize(url)?;
        self.sets.get(&stem).map(|e| Arc::clone(e.value()))
    }

    /// Units registered on the stem of `url`, ordered by name.
    #[must_use]
    pub fn candidate_units(&self, url: &str) -> Vec<Arc<ArchivalUnit>> {
        self.search_set(url)
            .map(|set| set.sorted_units())
            .unwrap_or_default()
    }

    /// Lookups answered from a negative cache.
    #[must_use]
    pub fn negative_cache_hits(&self) -> u64 {
        self.negative_hits.load(Ordering::Relaxed)
    }

    /// Moves `unit` to the front of the recency cache of each of its stems.
    pub fn promote(&self, unit: &Arc<ArchivalUnit>) {
        for stem in normalized_stems(unit) {
            if let Some(set) = self.sets.get(&stem) {
                set.add_to_cache(unit);
            }
        }
    }

    /// Forgets failed lookups on `unit`'s stems, after it gained content.
    pub fn flush_negative_cache(&self, unit: &ArchivalUnit) {
        for stem in normalized_stems(unit) {
            if let Some(set) = self.sets.get(&stem) {
                debug!(stem = %stem, "flushing negative cache");
                set.flush_negative_cache();
            }
        }
    }

    /// The best leaf for `url` across all units on its stem.
    ///
    /// Units are tried recency cache first. The unit that supplies the
    /// result is promoted. A content-requiring lookup that fails after
    /// enough content checks is remembered in the stem's negative cache.
    #[instrument(skip(self), fields(url = %url))]
    pub fn find_cached_url(&self, url: &str, req: ContentReq) -> Option<CachedUrl> {
        let (norm_url, stem) = normalize(url)?;
        let Some(set) = self.sets.get(&stem).map(|e| Arc::clone(e.value())) else {
            trace!(stem = %stem, "no units for stem");
            return None;
        };

        if req == ContentReq::HasContent && set.is_recent_negative(&norm_url) {
            debug!("negative cache hit");
            self.negative_hits.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let mut best: Option<(Arc<ArchivalUnit>, CachedUrl)> = None;
        let mut content_checks = 0usize;
        for unit in set.iter() {
            let Some(leaf) = claimed_leaf(&unit, &norm_url) else {
                continue;
            };
            let has_content = if req.wants_content() {
                content_checks += 1;
                leaf.has_content()
            } else {
                false
            };
            match req {
                ContentReq::DontCare => return self.found(&set, &unit, leaf),
                _ if has_content => return self.found(&set, &unit, leaf),
                ContentReq::PreferContent if best.is_none() => best = Some((unit, leaf)),
                _ => {}
            }
        }

        if let Some((unit, leaf)) = best {
            return self.found(&set, &unit, leaf);
        }
        if content_checks >= self.settings().min_disk_searches_for_negative_cache {
            debug!(checks = content_checks, "adding to negative cache");
            set.add_recent_negative(&norm_url);
        }
        None
    }

    /// Every unit's leaf for `url` meeting `req`, recency cache order.
    #[must_use]
    pub fn find_cached_urls(&self, url: &str, req: ContentReq) -> Vec<CachedUrl> {
        let Some(set) = self.search_set(url) else {
            return Vec::new();
        };
        let Some((norm_url, _)) = normalize(url) else {
            return Vec::new();
        };
        set.iter()
            .filter_map(|unit| claimed_leaf(&unit, &norm_url))
            .filter(|leaf| req != ContentReq::HasContent || leaf.has_content())
            .collect()
    }

    fn found(&self, set: &AuSearchSet, unit: &Arc<ArchivalUnit>, leaf: CachedUrl) -> Option<CachedUrl> {
        trace!(unit = %unit.id(), "found");
        set.add_to_cache(unit);
        Some(leaf)
    }
}

/// The leaf `unit` holds for `url`, if its rules include the URL (or, for
/// an archive member, the container).
fn claimed_leaf(unit: &ArchivalUnit, url: &str) -> Option<CachedUrl> {
    let member = match ArchiveMemberSpec::from_url(url) {
        Ok(member) => member,
        Err(e) => {
            debug!(url = %url, error = %e, "unusable member address");
            return None;
        }
    };
    let site_url = member.as_ref().map_or(url, ArchiveMemberSpec::container_url);
    if !unit.should_be_cached(site_url) {
        return None;
    }
    if member.is_some() {
        match unit.tree().resolve_leaf(url) {
            Ok(leaf) => return Some(leaf),
            Err(e) if e.is_not_found() => {}
            Err(e) => debug!(url = %url, error = %e, "member not resolved"),
        }
    }
    match unit.cached_url(url) {
        Ok(leaf) => Some(leaf),
        Err(e) => {
            warn!(url = %url, unit = %unit.id(), error = %e, "lookup failed");
            None
        }
    }
}

/// Normalized URL and its stem.
fn normalize(url: &str) -> Option<(String, String)> {
    let parsed = Url::parse(url).ok()?;
    let normalized = String::from(parsed);
    let stem = url_stem(&normalized)?;
    Some((normalized, stem))
}

fn normalized_stems(unit: &ArchivalUnit) -> Vec<String> {
    let mut stems: Vec<String> = unit
        .stems()
        .iter()
        .filter_map(|stem| normalize(stem).map(|(_, stem)| stem))
        .collect();
    stems.dedup();
    stems
}
