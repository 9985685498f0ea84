//! URL-to-unit routing.
//!
//! # Overview
//!
//! [`AuRouter`] indexes registered units by URL stem
//! (`scheme://host[:port]/`). Each stem has an [`AuSearchSet`] holding the
//! units on that stem, a recency cache of the units that most recently
//! answered a lookup, and a negative cache of URLs that recently matched
//! nothing. Both cache capacities are [`StepFunction`]s of the set's
//! member count.
//!
//! Adds and removes may run while lookups iterate. An iteration that
//! started before a change may or may not see it, but never sees a
//! partially updated set.

mod negative_cache;
mod router;
mod search_set;
mod step_function;

pub use negative_cache::NegativeCache;
pub use router::{AuRouter, ContentReq};
pub use search_set::{AuSearchSet, SearchSetIter};
pub use step_function::{StepFunction, StepFunctionError};

/// Recency cache size by member count.
pub const DEFAULT_CACHE_SIZE: &str = "[1,0],[2,1],[5,2],[10,3],[50,10],[200,20]";

/// Negative cache size by member count.
pub const DEFAULT_NEGATIVE_CACHE_SIZE: &str = "[10,10],[1000,100],[5000,200]";

/// Content checks a failed lookup must make before it is cached.
pub const DEFAULT_MIN_DISK_SEARCHES_FOR_NEGATIVE_CACHE: usize = 2;

/// Router tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterSettings {
    pub cache_size: StepFunction,
    pub negative_cache_size: StepFunction,
    pub min_disk_searches_for_negative_cache: usize,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE.parse().unwrap_or_else(|_| StepFunction::zero()),
            negative_cache_size: DEFAULT_NEGATIVE_CACHE_SIZE
                .parse()
                .unwrap_or_else(|_| StepFunction::zero()),
            min_disk_searches_for_negative_cache: DEFAULT_MIN_DISK_SEARCHES_FOR_NEGATIVE_CACHE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_parse() {
        let settings = RouterSettings::default();
        assert_eq!(settings.cache_size.to_string(), DEFAULT_CACHE_SIZE);
        assert_eq!(settings.negative_cache_size.to_string(), DEFAULT_NEGATIVE_CACHE_SIZE);
    }
}
