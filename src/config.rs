//! TOML configuration.
//!
//! # Overview
//!
//! A configuration file declares where content is stored, fetch and
//! routing tunables, the unit types in use and the units themselves:
//!
//! ```toml
//! [repository]
//! dir = "/var/lib/preserver"
//!
//! [fetch]
//! read_timeout_secs = 120
//!
//! [[unit_type]]
//! key = "journal"
//! redirect = ["follow", "in_spec"]
//! result_map = { "429" = "handler:retry_after", "403" = "permission" }
//!
//! [[unit]]
//! unit_type = "journal"
//! base_url = "http://example.com/"
//! params = { volume = "12" }
//! rules = [{ action = "include", pattern = "^http://example\\.com/v12/" }]
//! ```
//!
//! [`load_config`] parses and validates a file; [`PreserverConfig::build`]
//! turns it into a [`Runtime`] with every unit registered for routing.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::archive::{ArchiveFormat, ArchiveLimits, ArchiveTypes};
use crate::au::{ArchivalUnit, AuConfig, AuError, ComponentRegistry, UnitType, UnitTypeRegistry};
use crate::fetch::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_MAX_CONTENT_BYTES, DEFAULT_MAX_REDIRECTS, DEFAULT_RETRY_COUNT,
    DEFAULT_RETRY_DELAY, READ_TIMEOUT_SECS,
};
use crate::fetch::{
    ClientSettings, DEFAULT_USER_AGENT, FetchOptions, HttpResultMap, RedirectFlag, RedirectScheme,
    ResultEntry, ResultKind, RetryPolicy,
};
use crate::iter::IterOptions;
use crate::repository::{FsRepository, MemoryRepository, Repository, RepositoryError};
use crate::routing::{
    AuRouter, DEFAULT_MIN_DISK_SEARCHES_FOR_NEGATIVE_CACHE, RouterSettings, StepFunction,
};

/// Prefix marking a result map value as a named handler.
pub const HANDLER_PREFIX: &str = "handler:";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config value for `{field}`: {message}")]
    Invalid { field: String, message: String },

    #[error("unit type {unit_type}: unknown result handler {name:?}")]
    UnknownHandler { unit_type: String, name: String },

    #[error("unit type {unit_type}: unknown hash filter {name:?}")]
    UnknownHashFilter { unit_type: String, name: String },

    #[error("unit type {unit_type}: unknown decision {name:?} for code {code}")]
    UnknownDecision {
        unit_type: String,
        code: u16,
        name: String,
    },

    #[error(transparent)]
    Unit(#[from] AuError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ConfigError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Root of the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreserverConfig {
    #[serde(default)]
    pub repository: RepositorySection,
    #[serde(default)]
    pub fetch: FetchSection,
    #[serde(default)]
    pub iteration: IterationSection,
    #[serde(default)]
    pub routing: RoutingSection,
    /// MIME type or `.extension` to archive tag; replaces the default table.
    #[serde(default)]
    pub archive_types: Option<BTreeMap<String, String>>,
    #[serde(default, rename = "unit_type")]
    pub unit_types: Vec<UnitTypeSection>,
    #[serde(default, rename = "unit")]
    pub units: Vec<AuConfig>,
}

/// `[repository]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositorySection {
    /// Root directory; content is kept in memory when absent.
    pub dir: Option<PathBuf>,
}

/// `[fetch]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchSection {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub user_agent: String,
    pub fatal_on_timeout: bool,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub network_retry_count: u32,
    pub network_retry_delay_ms: u64,
    pub max_redirects: usize,
    pub max_content_bytes: u64,
    pub conditional: bool,
}

impl Default for FetchSection {
    fn default() -> Self {
        let delay_ms = u64::try_from(DEFAULT_RETRY_DELAY.as_millis()).unwrap_or(u64::MAX);
        Self {
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            fatal_on_timeout: false,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay_ms: delay_ms,
            network_retry_count: DEFAULT_RETRY_COUNT,
            network_retry_delay_ms: delay_ms,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            max_content_bytes: DEFAULT_MAX_CONTENT_BYTES,
            conditional: true,
        }
    }
}

impl FetchSection {
    #[must_use]
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            connect_timeout_secs: self.connect_timeout_secs,
            read_timeout_secs: self.read_timeout_secs,
            user_agent: self.user_agent.clone(),
        }
    }

    #[must_use]
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            max_redirects: self.max_redirects,
            fatal_on_timeout: self.fatal_on_timeout,
            max_content_bytes: self.max_content_bytes,
            conditional: self.conditional,
        }
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_count: self.retry_count,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            network_retry_count: self.network_retry_count,
            network_retry_delay: Duration::from_millis(self.network_retry_delay_ms),
        }
    }
}

/// `[iteration]`
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IterationSection {
    pub content_only: bool,
    pub included_only: bool,
    /// Largest archive member extracted during iteration or resolution.
    pub max_member_bytes: u64,
    /// Bytes inflated from one container before the rest is skipped.
    pub max_expanded_bytes: u64,
}

impl Default for IterationSection {
    fn default() -> Self {
        let defaults = IterOptions::default();
        let limits = ArchiveLimits::default();
        Self {
            content_only: defaults.content_only,
            included_only: defaults.included_only,
            max_member_bytes: limits.max_member_bytes,
            max_expanded_bytes: limits.max_expanded_bytes,
        }
    }
}

impl IterationSection {
    #[must_use]
    pub fn options(&self) -> IterOptions {
        IterOptions {
            content_only: self.content_only,
            included_only: self.included_only,
        }
    }

    #[must_use]
    pub fn archive_limits(&self) -> ArchiveLimits {
        ArchiveLimits {
            max_member_bytes: self.max_member_bytes,
            max_expanded_bytes: self.max_expanded_bytes,
        }
    }
}

/// `[routing]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoutingSection {
    pub cache_size: StepFunction,
    pub negative_cache_size: StepFunction,
    pub min_disk_searches_for_negative_cache: usize,
}

impl Default for RoutingSection {
    fn default() -> Self {
        let defaults = RouterSettings::default();
        Self {
            cache_size: defaults.cache_size,
            negative_cache_size: defaults.negative_cache_size,
            min_disk_searches_for_negative_cache: DEFAULT_MIN_DISK_SEARCHES_FOR_NEGATIVE_CACHE,
        }
    }
}

impl RoutingSection {
    #[must_use]
    pub fn settings(&self) -> RouterSettings {
        RouterSettings {
            cache_size: self.cache_size.clone(),
            negative_cache_size: self.negative_cache_size.clone(),
            min_disk_searches_for_negative_cache: self.min_disk_searches_for_negative_cache,
        }
    }
}

/// One `[[unit_type]]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitTypeSection {
    pub key: String,
    /// Redirect flags; absent means follow within the crawl rules.
    #[serde(default)]
    pub redirect: Option<Vec<RedirectFlag>>,
    /// Status code to decision name or `handler:<name>`.
    #[serde(default)]
    pub result_map: BTreeMap<String, String>,
    /// Registered hash filter name.
    #[serde(default)]
    pub hash_filter: Option<String>,
}

/// Everything a command needs, built from a configuration.
#[derive(Debug)]
pub struct Runtime {
    pub router: Arc<AuRouter>,
    pub client_settings: ClientSettings,
    pub fetch_options: FetchOptions,
    pub iter_options: IterOptions,
}

/// Reads, parses and validates a configuration file.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file cannot be read, is not valid TOML
/// for this schema, or holds out-of-range values.
pub fn load_config(path: &Path) -> Result<PreserverConfig, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: PreserverConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    debug!(path = %path.display(), units = config.units.len(), "config loaded");
    Ok(config)
}

impl PreserverConfig {
    /// Checks values against their allowed ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_timeout_secs("fetch.connect_timeout_secs", self.fetch.connect_timeout_secs)?;
        validate_timeout_secs("fetch.read_timeout_secs", self.fetch.read_timeout_secs)?;
        if self.fetch.max_content_bytes == 0 {
            return Err(ConfigError::invalid("fetch.max_content_bytes", "must be positive"));
        }
        if self.fetch.user_agent.trim().is_empty() {
            return Err(ConfigError::invalid("fetch.user_agent", "must not be empty"));
        }
        if self.iteration.max_member_bytes == 0 {
            return Err(ConfigError::invalid("iteration.max_member_bytes", "must be positive"));
        }
        if self.iteration.max_expanded_bytes == 0 {
            return Err(ConfigError::invalid("iteration.max_expanded_bytes", "must be positive"));
        }

        if let Some(table) = &self.archive_types {
            for (key, tag) in table {
                if ArchiveFormat::from_tag(tag).is_none() {
                    return Err(ConfigError::invalid(
                        format!("archive_types.{key}"),
                        format!("{tag:?}. Expected one of .zip, .tar, .tgz, .tar.gz"),
                    ));
                }
            }
        }

        let mut keys = std::collections::HashSet::new();
        for unit_type in &self.unit_types {
            if !keys.insert(unit_type.key.as_str()) {
                return Err(ConfigError::invalid(
                    "unit_type.key",
                    format!("{:?} is declared twice", unit_type.key),
                ));
            }
            for code in unit_type.result_map.keys() {
                parse_code(&unit_type.key, code)?;
            }
        }
        for unit in &self.units {
            if !keys.contains(unit.unit_type.as_str()) {
                return Err(ConfigError::invalid(
                    "unit.unit_type",
                    format!("{:?} is not a declared unit type", unit.unit_type),
                ));
            }
        }
        Ok(())
    }

    /// Archive registry from `[archive_types]`, or the default one, with
    /// the `[iteration]` size limits.
    #[must_use]
    pub fn archive_types(&self) -> ArchiveTypes {
        let types = match &self.archive_types {
            Some(table) => ArchiveTypes::from_table(table.clone()),
            None => ArchiveTypes::default(),
        };
        types.with_limits(self.iteration.archive_limits())
    }

    /// Builds the unit type registry, resolving named components.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unknown handlers, filters or decision
    /// names.
    pub fn unit_type_registry(
        &self,
        components: &ComponentRegistry,
    ) -> Result<UnitTypeRegistry, ConfigError> {
        let policy = self.fetch.retry_policy();
        let mut registry = UnitTypeRegistry::new();
        for section in &self.unit_types {
            let mut overrides = Vec::with_capacity(section.result_map.len());
            for (code, value) in &section.result_map {
                let code = parse_code(&section.key, code)?;
                overrides.push((code, result_entry(&section.key, code, value, components)?));
            }

            let mut unit_type = UnitType::new(section.key.clone())
                .with_result_map(HttpResultMap::new(policy).with_overrides(overrides));
            if let Some(flags) = &section.redirect {
                unit_type =
                    unit_type.with_redirect_scheme(RedirectScheme::from_flags(flags.iter().copied()));
            }
            if let Some(name) = &section.hash_filter {
                let filter =
                    components
                        .hash_filter(name)
                        .ok_or_else(|| ConfigError::UnknownHashFilter {
                            unit_type: section.key.clone(),
                            name: name.clone(),
                        })?;
                unit_type = unit_type.with_hash_filter(filter);
            }
            registry.register(unit_type);
        }
        Ok(registry)
    }

    /// Builds every unit and registers it with a new router.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a unit type, unit or repository cannot be
    /// set up.
    pub fn build(&self, components: &ComponentRegistry) -> Result<Runtime, ConfigError> {
        let types = self.unit_type_registry(components)?;
        let archive_types = Arc::new(self.archive_types());
        let router = Arc::new(AuRouter::new(self.routing.settings()));

        for config in &self.units {
            let unit_type = types.get(&config.unit_type)?;
            let id = config.au_id();
            let repository: Arc<dyn Repository> = match &self.repository.dir {
                Some(dir) => Arc::new(FsRepository::for_unit(dir, id.as_str())?),
                None => Arc::new(MemoryRepository::new()),
            };
            let unit = ArchivalUnit::new(
                config.clone(),
                unit_type,
                repository,
                Arc::clone(&archive_types),
            )?;
            debug!(unit = %unit.id(), name = %unit.name(), "unit configured");
            router.add_unit(Arc::new(unit));
        }
        info!(units = self.units.len(), types = types.len(), "runtime built");

        Ok(Runtime {
            router,
            client_settings: self.fetch.client_settings(),
            fetch_options: self.fetch.fetch_options(),
            iter_options: self.iteration.options(),
        })
    }
}

fn validate_timeout_secs(field: &str, value: u64) -> Result<(), ConfigError> {
    if !(1..=3600).contains(&value) {
        return Err(ConfigError::invalid(
            field,
            format!("{value}. Expected range: 1..=3600"),
        ));
    }
    Ok(())
}

fn parse_code(unit_type: &str, code: &str) -> Result<u16, ConfigError> {
    code.trim()
        .parse::<u16>()
        .ok()
        .filter(|code| (100..=599).contains(code))
        .ok_or_else(|| {
            ConfigError::invalid(
                format!("unit_type.{unit_type}.result_map"),
                format!("{code:?} is not an HTTP status code"),
            )
        })
}

fn result_entry(
    unit_type: &str,
    code: u16,
    value: &str,
    components: &ComponentRegistry,
) -> Result<ResultEntry, ConfigError> {
    if let Some(name) = value.strip_prefix(HANDLER_PREFIX) {
        return components
            .result_handler(name)
            .map(ResultEntry::Handler)
            .ok_or_else(|| ConfigError::UnknownHandler {
                unit_type: unit_type.to_string(),
                name: name.to_string(),
            });
    }
    ResultKind::from_name(value)
        .map(ResultEntry::Fixed)
        .ok_or_else(|| ConfigError::UnknownDecision {
            unit_type: unit_type.to_string(),
            code,
            name: value.to_string(),
        })
}
