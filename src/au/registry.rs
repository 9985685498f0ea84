//! Explicit registration tables.
//!
//! Unit types, result handlers and hash filters are looked up by stable
//! string keys in tables populated at startup. Nothing is resolved by
//! type name at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use super::{AuError, UnitType};
use crate::fetch::{CacheResultHandler, RetryAfterHandler};
use crate::tree::{HashFilter, IdentityFilter};

/// Constructor of a result handler.
pub type ResultHandlerFactory = fn() -> Arc<dyn CacheResultHandler>;

/// Constructor of a hash filter.
pub type HashFilterFactory = fn() -> Arc<dyn HashFilter>;

/// Named constructors for pluggable per-type components.
#[derive(Debug, Clone)]
pub struct ComponentRegistry {
    result_handlers: HashMap<String, ResultHandlerFactory>,
    hash_filters: HashMap<String, HashFilterFactory>,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ComponentRegistry {
    /// A registry with nothing registered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            result_handlers: HashMap::new(),
            hash_filters: HashMap::new(),
        }
    }

    /// A registry holding the built-in components: the `retry_after`
    /// result handler and the `identity` hash filter.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register_result_handler("retry_after", retry_after_handler);
        registry.register_hash_filter("identity", identity_filter);
        registry
    }

    pub fn register_result_handler(&mut self, name: impl Into<String>, factory: ResultHandlerFactory) {
        self.result_handlers.insert(name.into(), factory);
    }

    pub fn register_hash_filter(&mut self, name: impl Into<String>, factory: HashFilterFactory) {
        self.hash_filters.insert(name.into(), factory);
    }

    /// Constructs the named result handler.
    #[must_use]
    pub fn result_handler(&self, name: &str) -> Option<Arc<dyn CacheResultHandler>> {
        self.result_handlers.get(name).map(|factory| factory())
    }

    /// Constructs the named hash filter.
    #[must_use]
    pub fn hash_filter(&self, name: &str) -> Option<Arc<dyn HashFilter>> {
        self.hash_filters.get(name).map(|factory| factory())
    }
}

fn retry_after_handler() -> Arc<dyn CacheResultHandler> {
    Arc::new(RetryAfterHandler)
}

fn identity_filter() -> Arc<dyn HashFilter> {
    Arc::new(IdentityFilter)
}

/// Unit types by key.
#[derive(Debug, Default)]
pub struct UnitTypeRegistry {
    types: HashMap<String, Arc<UnitType>>,
}

impl UnitTypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `unit_type`, replacing any type with the same key.
    pub fn register(&mut self, unit_type: UnitType) -> Arc<UnitType> {
        let unit_type = Arc::new(unit_type);
        self.types
            .insert(unit_type.key().to_string(), Arc::clone(&unit_type));
        unit_type
    }

    /// Looks up a type.
    ///
    /// # Errors
    ///
    /// Returns [`AuError::UnknownUnitType`] for an unregistered key.
    pub fn get(&self, key: &str) -> Result<Arc<UnitType>, AuError> {
        self.types
            .get(key)
            .cloned()
            .ok_or_else(|| AuError::UnknownUnitType {
                key: key.to_string(),
            })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = ComponentRegistry::default();
        assert!(registry.result_handler("retry_after").is_some());
        assert!(registry.hash_filter("identity").is_some());
        assert!(registry.result_handler("missing").is_none());
    }

    #[test]
    fn test_unit_type_lookup() {
        let mut registry = UnitTypeRegistry::new();
        registry.register(UnitType::new("journal"));
        assert_eq!(registry.get("journal").unwrap().key(), "journal");
        assert!(matches!(
            registry.get("book"),
            Err(AuError::UnknownUnitType { .. })
        ));
    }
}
