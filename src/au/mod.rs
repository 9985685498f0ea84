//! Preservation units.
//!
//! # Overview
//!
//! An [`ArchivalUnit`] is one configured logical publication. Its identity
//! ([`AuId`]) is derived from the unit type and the definitional
//! parameters, so two configurations naming the same type, base URL and
//! parameters describe the same unit. Everything else (display name, crawl
//! rules, the unchanged-since hint) may change through
//! [`ArchivalUnit::reconfigure`], which re-derives all cached state and
//! swaps it in atomically.
//!
//! Per-type behavior (redirect scheme, result map, hash filter) lives in a
//! [`UnitType`] shared by all units of that type.

mod registry;
mod rules;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::archive::ArchiveTypes;
use crate::fetch::{HttpResultMap, RedirectScheme};
use crate::repository::{Repository, RepositoryError};
use crate::tree::{CachedUrl, CachedUrlSet, ContentTree, HashFilter, IdentityFilter, TreeError};

pub use registry::{
    ComponentRegistry, HashFilterFactory, ResultHandlerFactory, UnitTypeRegistry,
};
pub use rules::{CrawlRule, CrawlRules, RuleAction, RuleError, RuleVerdict};

/// Parameter name under which the base URL enters the unit identity.
pub const BASE_URL_PARAM: &str = "base_url";

/// Errors creating or reconfiguring a unit.
#[derive(Debug, Error)]
pub enum AuError {
    #[error("invalid base URL {url}")]
    InvalidBaseUrl { url: String },

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error("reconfiguration would change unit identity from {current} to {proposed}")]
    IdentityChanged { current: AuId, proposed: AuId },

    #[error("unknown unit type {key}")]
    UnknownUnitType { key: String },

    #[error("invalid HTTP date {value:?}")]
    InvalidDate { value: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Stable unit identity: `<type>&<key>~<value>&...` with sorted,
/// percent-encoded definitional parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AuId(String);

impl AuId {
    /// Derives the identity from a unit type key and definitional parameters.
    #[must_use]
    pub fn derive(unit_type: &str, definitional: &BTreeMap<String, String>) -> Self {
        let params: Vec<String> = definitional
            .iter()
            .map(|(key, value)| format!("{}~{}", urlencoding::encode(key), urlencoding::encode(value)))
            .collect();
        Self(format!("{unit_type}&{}", params.join("&")))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One configured crawl rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RuleConfig {
    pub action: RuleAction,
    pub pattern: String,
}

/// Configuration of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuConfig {
    /// Key of the unit type in the [`UnitTypeRegistry`].
    pub unit_type: String,
    /// Root URL of the publication. Definitional.
    pub base_url: String,
    /// Human-readable name. Not definitional.
    #[serde(default)]
    pub name: Option<String>,
    /// Further definitional parameters (volume, year, journal id...).
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Crawl rules; empty means "everything under the base URL".
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    /// HTTP-date after which unchanged archives need not be re-expanded.
    #[serde(default)]
    pub exclude_unchanged_after: Option<String>,
}

impl AuConfig {
    #[must_use]
    pub fn new(unit_type: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            unit_type: unit_type.into(),
            base_url: base_url.into(),
            name: None,
            params: BTreeMap::new(),
            rules: Vec::new(),
            exclude_unchanged_after: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_rule(mut self, action: RuleAction, pattern: impl Into<String>) -> Self {
        self.rules.push(RuleConfig {
            action,
            pattern: pattern.into(),
        });
        self
    }

    /// Identity of the unit this configuration describes.
    #[must_use]
    pub fn au_id(&self) -> AuId {
        let mut definitional = self.params.clone();
        definitional.insert(BASE_URL_PARAM.to_string(), self.base_url.clone());
        AuId::derive(&self.unit_type, &definitional)
    }
}

/// Per-type behavior shared by every unit of the type.
#[derive(Debug)]
pub struct UnitType {
    key: String,
    redirect_scheme: RedirectScheme,
    result_map: Arc<HttpResultMap>,
    hash_filter: Arc<dyn HashFilter>,
}

impl UnitType {
    /// A type with in-spec redirects, the default result map and no hash
    /// filtering.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            redirect_scheme: RedirectScheme::FOLLOW_IN_SPEC,
            result_map: Arc::new(HttpResultMap::default()),
            hash_filter: Arc::new(IdentityFilter),
        }
    }

    #[must_use]
    pub fn with_redirect_scheme(mut self, scheme: RedirectScheme) -> Self {
        self.redirect_scheme = scheme;
        self
    }

    #[must_use]
    pub fn with_result_map(mut self, map: HttpResultMap) -> Self {
        self.result_map = Arc::new(map);
        self
    }

    #[must_use]
    pub fn with_hash_filter(mut self, filter: Arc<dyn HashFilter>) -> Self {
        self.hash_filter = filter;
        self
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn redirect_scheme(&self) -> RedirectScheme {
        self.redirect_scheme
    }

    #[must_use]
    pub fn result_map(&self) -> &HttpResultMap {
        &self.result_map
    }

    #[must_use]
    pub fn hash_filter(&self) -> &Arc<dyn HashFilter> {
        &self.hash_filter
    }
}

/// State derived from configuration, replaced wholesale on reconfigure.
#[derive(Debug)]
struct AuState {
    config: AuConfig,
    name: String,
    rules: CrawlRules,
    stems: Vec<String>,
    exclude_unchanged_after: Option<SystemTime>,
}

impl AuState {
    fn derive(config: AuConfig) -> Result<Self, AuError> {
        let base_stem = url_stem(&config.base_url).ok_or_else(|| AuError::InvalidBaseUrl {
            url: config.base_url.clone(),
        })?;
        let mut stems = vec![base_stem];
        for (key, value) in &config.params {
            if key.ends_with("_url")
                && let Some(stem) = url_stem(value)
                && !stems.contains(&stem)
            {
                stems.push(stem);
            }
        }

        let rules = if config.rules.is_empty() {
            CrawlRules::prefix(&config.base_url)?
        } else {
            CrawlRules::new(
                config
                    .rules
                    .iter()
                    .map(|rule| CrawlRule::new(rule.action, &rule.pattern))
                    .collect::<Result<_, _>>()?,
            )
        };

        let exclude_unchanged_after = config
            .exclude_unchanged_after
            .as_deref()
            .map(|value| {
                httpdate::parse_http_date(value).map_err(|_| AuError::InvalidDate {
                    value: value.to_string(),
                })
            })
            .transpose()?;

        let name = config
            .name
            .clone()
            .unwrap_or_else(|| format!("{} {}", config.unit_type, config.base_url));

        Ok(Self {
            config,
            name,
            rules,
            stems,
            exclude_unchanged_after,
        })
    }
}

/// A configured preservation unit.
#[derive(Debug)]
pub struct ArchivalUnit {
    id: AuId,
    unit_type: Arc<UnitType>,
    tree: Arc<ContentTree>,
    state: RwLock<Arc<AuState>>,
}

impl ArchivalUnit {
    /// Creates a unit storing its content in `repository`.
    ///
    /// # Errors
    ///
    /// Returns [`AuError`] for an invalid base URL, rule or date.
    pub fn new(
        config: AuConfig,
        unit_type: Arc<UnitType>,
        repository: Arc<dyn Repository>,
        archive_types: Arc<ArchiveTypes>,
    ) -> Result<Self, AuError> {
        if config.unit_type != unit_type.key() {
            return Err(AuError::UnknownUnitType {
                key: config.unit_type,
            });
        }
        let id = config.au_id();
        let state = AuState::derive(config)?;
        let tree = Arc::new(ContentTree::new(
            id.as_str(),
            repository,
            archive_types,
            Arc::clone(unit_type.hash_filter()),
        ));
        info!(au = %id, name = %state.name, "unit created");
        Ok(Self {
            id,
            unit_type,
            tree,
            state: RwLock::new(Arc::new(state)),
        })
    }

    fn state(&self) -> Arc<AuState> {
        Arc::clone(&self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner))
    }

    /// Applies a new configuration with the same identity.
    ///
    /// # Errors
    ///
    /// Returns [`AuError::IdentityChanged`] if the definitional parameters
    /// differ, or any derivation error; the unit is unchanged on error.
    pub fn reconfigure(&self, config: AuConfig) -> Result<(), AuError> {
        let proposed = config.au_id();
        if proposed != self.id {
            return Err(AuError::IdentityChanged {
                current: self.id.clone(),
                proposed,
            });
        }
        let state = Arc::new(AuState::derive(config)?);
        debug!(au = %self.id, name = %state.name, "unit reconfigured");
        *self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner) = state;
        Ok(())
    }

    #[must_use]
    pub fn id(&self) -> &AuId {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.state().name.clone()
    }

    #[must_use]
    pub fn config(&self) -> AuConfig {
        self.state().config.clone()
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        self.state().config.base_url.clone()
    }

    #[must_use]
    pub fn unit_type(&self) -> &Arc<UnitType> {
        &self.unit_type
    }

    #[must_use]
    pub fn result_map(&self) -> &HttpResultMap {
        self.unit_type.result_map()
    }

    #[must_use]
    pub fn redirect_scheme(&self) -> RedirectScheme {
        self.unit_type.redirect_scheme()
    }

    /// `scheme://host[:port]/` prefixes under which the unit's URLs live.
    #[must_use]
    pub fn stems(&self) -> Vec<String> {
        self.state().stems.clone()
    }

    /// True if the current crawl rules place `url` in this unit.
    #[must_use]
    pub fn should_be_cached(&self, url: &str) -> bool {
        self.state().rules.matches(url)
    }

    #[must_use]
    pub fn exclude_unchanged_after(&self) -> Option<SystemTime> {
        self.state().exclude_unchanged_after
    }

    #[must_use]
    pub fn tree(&self) -> &Arc<ContentTree> {
        &self.tree
    }

    /// The node covering the whole unit.
    #[must_use]
    pub fn root(&self) -> CachedUrlSet {
        self.tree.root()
    }

    /// Leaf for `url`, with or without content.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::Repository`] if the storage layer fails.
    pub fn cached_url(&self, url: &str) -> Result<CachedUrl, TreeError> {
        self.tree.cached_url(url)
    }
}

impl fmt::Display for ArchivalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[AU: {}]", self.name())
    }
}

/// Origin of `url` with a trailing slash, lower-cased by URL parsing.
#[must_use]
pub fn url_stem(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed.host_str()?;
    Some(format!("{}/", parsed.origin().ascii_serialization()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::repository::MemoryRepository;

    fn unit(config: AuConfig) -> ArchivalUnit {
        ArchivalUnit::new(
            config,
            Arc::new(UnitType::new("journal")),
            Arc::new(MemoryRepository::new()),
            Arc::new(ArchiveTypes::default()),
        )
        .unwrap()
    }

    #[test]
    fn test_au_id_is_sorted_and_encoded() {
        let config = AuConfig::new("journal", "http://x.org/")
            .with_param("volume", "12")
            .with_param("journal_id", "a&b");
        assert_eq!(
            config.au_id().as_str(),
            "journal&base_url~http%3A%2F%2Fx.org%2F&journal_id~a%26b&volume~12"
        );
    }

    #[test]
    fn test_au_id_ignores_non_definitional_fields() {
        let a = AuConfig::new("journal", "http://x.org/").with_name("A");
        let b = AuConfig::new("journal", "http://x.org/")
            .with_name("B")
            .with_rule(RuleAction::Include, ".*");
        assert_eq!(a.au_id(), b.au_id());
    }

    #[test]
    fn test_default_rules_cover_base_url() {
        let au = unit(AuConfig::new("journal", "http://x.org/vol1/"));
        assert!(au.should_be_cached("http://x.org/vol1/a.html"));
        assert!(!au.should_be_cached("http://x.org/vol2/a.html"));
    }

    #[test]
    fn test_stems_include_url_params() {
        let au = unit(
            AuConfig::new("journal", "http://X.org:8080/vol1/")
                .with_param("download_url", "https://cdn.x.org/files/"),
        );
        assert_eq!(
            au.stems(),
            vec!["http://x.org:8080/".to_string(), "https://cdn.x.org/".to_string()]
        );
    }

    #[test]
    fn test_reconfigure_rederives_rules() {
        let au = unit(AuConfig::new("journal", "http://x.org/"));
        assert!(au.should_be_cached("http://x.org/private/a"));

        au.reconfigure(
            AuConfig::new("journal", "http://x.org/")
                .with_name("Renamed")
                .with_rule(RuleAction::Exclude, "/private/")
                .with_rule(RuleAction::Include, "^http://x.org/"),
        )
        .unwrap();
        assert!(!au.should_be_cached("http://x.org/private/a"));
        assert_eq!(au.name(), "Renamed");
    }

    #[test]
    fn test_reconfigure_rejects_identity_change() {
        let au = unit(AuConfig::new("journal", "http://x.org/"));
        let err = au
            .reconfigure(AuConfig::new("journal", "http://y.org/"))
            .unwrap_err();
        assert!(matches!(err, AuError::IdentityChanged { .. }));
        assert_eq!(au.base_url(), "http://x.org/");
    }

    #[test]
    fn test_invalid_date_rejected() {
        let mut config = AuConfig::new("journal", "http://x.org/");
        config.exclude_unchanged_after = Some("yesterday".to_string());
        let err = ArchivalUnit::new(
            config,
            Arc::new(UnitType::new("journal")),
            Arc::new(MemoryRepository::new()),
            Arc::new(ArchiveTypes::default()),
        )
        .unwrap_err();
        assert!(matches!(err, AuError::InvalidDate { .. }));
    }
}
