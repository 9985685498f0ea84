//! The set of units sharing one URL stem.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use dashmap::DashMap;
use tracing::debug;

use super::negative_cache::NegativeCache;
use super::step_function::StepFunction;
use crate::au::{ArchivalUnit, AuId};

type UnitList = Arc<Vec<Arc<ArchivalUnit>>>;

/// Units searched for a URL, with a move-to-front cache of recent matches.
///
/// Membership lives in a concurrent map that iterators may read while
/// units are added or removed. The recency cache is an immutable list
/// replaced wholesale under a writer lock, so an iterator keeps walking the
/// list it started with.
#[derive(Debug)]
pub struct AuSearchSet {
    members: DashMap<AuId, Arc<ArchivalUnit>>,
    recent: RwLock<UnitList>,
    writer: Mutex<()>,
    cache_size: RwLock<StepFunction>,
    cache_capacity: AtomicUsize,
    negative_size: RwLock<StepFunction>,
    negative: Mutex<NegativeCache>,
}

impl AuSearchSet {
    #[must_use]
    pub fn new(cache_size: StepFunction, negative_size: StepFunction) -> Self {
        Self {
            members: DashMap::new(),
            recent: RwLock::new(Arc::new(Vec::new())),
            writer: Mutex::new(()),
            cache_size: RwLock::new(cache_size),
            cache_capacity: AtomicUsize::new(0),
            negative_size: RwLock::new(negative_size),
            negative: Mutex::new(NegativeCache::default()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &AuId) -> bool {
        self.members.contains_key(id)
    }

    /// Current recency cache capacity.
    #[must_use]
    pub fn cache_capacity(&self) -> usize {
        self.cache_capacity.load(Ordering::Acquire)
    }

    /// Current negative cache capacity.
    #[must_use]
    pub fn negative_cache_capacity(&self) -> usize {
        self.negative_cache().capacity()
    }

    pub fn add(&self, unit: Arc<ArchivalUnit>) {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.members.insert(unit.id().clone(), unit);
        self.resize();
    }

    /// Removes `id` from the set and from the recency cache.
    pub fn remove(&self, id: &AuId) -> Option<Arc<ArchivalUnit>> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = self.members.remove(id).map(|(_, unit)| unit);
        if removed.is_some() {
            let current = self.recent_snapshot();
            if current.iter().any(|unit| unit.id() == id) {
                let kept: Vec<_> = current
                    .iter()
                    .filter(|unit| unit.id() != id)
                    .cloned()
                    .collect();
                self.publish(kept);
            }
            self.resize();
        }
        removed
    }

    /// Moves `unit` to the front of the recency cache. Units that are not
    /// members are ignored.
    pub fn add_to_cache(&self, unit: &Arc<ArchivalUnit>) {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let capacity = self.cache_capacity();
        if capacity == 0 || !self.members.contains_key(unit.id()) {
            return;
        }
        let current = self.recent_snapshot();
        if current.first().is_some_and(|first| first.id() == unit.id()) {
            return;
        }
        let mut updated = Vec::with_capacity(capacity);
        updated.push(Arc::clone(unit));
        updated.extend(
            current
                .iter()
                .filter(|cached| cached.id() != unit.id())
                .take(capacity - 1)
                .cloned(),
        );
        self.publish(updated);
    }

    /// Replaces the sizing functions and recomputes both capacities.
    pub fn set_size_functions(&self, cache_size: StepFunction, negative_size: StepFunction) {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        *self.cache_size.write().unwrap_or_else(PoisonError::into_inner) = cache_size;
        *self.negative_size.write().unwrap_or_else(PoisonError::into_inner) = negative_size;
        self.resize();
    }

    /// True if `url` recently matched no unit.
    #[must_use]
    pub fn is_recent_negative(&self, url: &str) -> bool {
        self.negative_cache().contains(url)
    }

    pub fn add_recent_negative(&self, url: &str) {
        self.negative_cache().insert(url);
    }

    pub fn flush_negative_cache(&self) {
        self.negative_cache().clear();
    }

    /// Every member, recency cache first, then the rest ordered by id.
    #[must_use]
    pub fn iter(&self) -> SearchSetIter<'_> {
        SearchSetIter {
            set: self,
            recent: self.recent_snapshot(),
            position: 0,
            rest: None,
            seen: HashSet::new(),
        }
    }

    /// Members ordered by name, for display.
    #[must_use]
    pub fn sorted_units(&self) -> Vec<Arc<ArchivalUnit>> {
        let mut units: Vec<_> = self.members.iter().map(|e| Arc::clone(e.value())).collect();
        units.sort_by_key(|unit| unit.name());
        units
    }

    fn recent_snapshot(&self) -> UnitList {
        Arc::clone(&self.recent.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn publish(&self, units: Vec<Arc<ArchivalUnit>>) {
        *self.recent.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(units);
    }

    fn negative_cache(&self) -> std::sync::MutexGuard<'_, NegativeCache> {
        self.negative.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Recomputes capacities from the member count. Caller holds the
    /// writer lock.
    fn resize(&self) {
        let count = self.members.len();
        let capacity = self
            .cache_size
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .value_for_count(count);
        self.cache_capacity.store(capacity, Ordering::Release);

        let current = self.recent_snapshot();
        if current.len() > capacity {
            self.publish(current.iter().take(capacity).cloned().collect());
        }

        let negative = self
            .negative_size
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .value_for_count(count);
        self.negative_cache().resize(negative);
        debug!(members = count, cache = capacity, negative, "search set resized");
    }
}

/// Iterator over an [`AuSearchSet`]; see [`AuSearchSet::iter`].
pub struct SearchSetIter<'a> {
    set: &'a AuSearchSet,
    recent: UnitList,
    position: usize,
    rest: Option<std::vec::IntoIter<Arc<ArchivalUnit>>>,
    seen: HashSet<AuId>,
}

impl Iterator for SearchSetIter<'_> {
    type Item = Arc<ArchivalUnit>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(unit) = self.recent.get(self.position) {
            self.position += 1;
            if self.set.contains(unit.id()) && self.seen.insert(unit.id().clone()) {
                return Some(Arc::clone(unit));
            }
        }

        let set = self.set;
        let rest = self.rest.get_or_insert_with(|| {
            let mut units: Vec<_> = set.members.iter().map(|e| Arc::clone(e.value())).collect();
            units.sort_by(|a, b| a.id().as_str().cmp(b.id().as_str()));
            units.into_iter()
        });
        rest.find(|unit| !self.seen.contains(unit.id()))
    }
}
