//! Crawl rules: ordered regex rules deciding whether a URL belongs to a unit.
//!
//! Rules are evaluated in order and the first rule that does not ignore
//! the URL decides. A URL no rule decides is excluded.

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// What a rule does with matching and non-matching URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Include on match, otherwise ignore.
    Include,
    /// Exclude on match, otherwise ignore.
    Exclude,
    /// Include when not matching, otherwise ignore.
    NoMatchInclude,
    /// Exclude when not matching, otherwise ignore.
    NoMatchExclude,
    /// Include on match, exclude otherwise.
    IncludeElseExclude,
    /// Exclude on match, include otherwise.
    ExcludeElseInclude,
}

/// A rule's verdict for one URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleVerdict {
    Include,
    Exclude,
    Ignore,
}

/// Invalid rule definition.
#[derive(Debug, Error)]
#[error("invalid crawl rule pattern {pattern:?}: {source}")]
pub struct RuleError {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

/// One rule.
#[derive(Debug, Clone)]
pub struct CrawlRule {
    action: RuleAction,
    pattern: Regex,
}

impl CrawlRule {
    /// Compiles a rule.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] for an invalid pattern.
    pub fn new(action: RuleAction, pattern: &str) -> Result<Self, RuleError> {
        let pattern = Regex::new(pattern).map_err(|source| RuleError {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { action, pattern })
    }

    #[must_use]
    pub fn evaluate(&self, url: &str) -> RuleVerdict {
        let matched = self.pattern.is_match(url);
        match (self.action, matched) {
            (RuleAction::Include | RuleAction::IncludeElseExclude, true)
            | (RuleAction::NoMatchInclude | RuleAction::ExcludeElseInclude, false) => {
                RuleVerdict::Include
            }
            (RuleAction::Exclude | RuleAction::ExcludeElseInclude, true)
            | (RuleAction::NoMatchExclude | RuleAction::IncludeElseExclude, false) => {
                RuleVerdict::Exclude
            }
            _ => RuleVerdict::Ignore,
        }
    }
}

/// First-match rule list.
#[derive(Debug, Clone, Default)]
pub struct CrawlRules {
    rules: Vec<CrawlRule>,
}

impl CrawlRules {
    #[must_use]
    pub fn new(rules: Vec<CrawlRule>) -> Self {
        Self { rules }
    }

    /// Single rule including everything under `prefix`.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the pattern is an escaped literal.
    pub fn prefix(prefix: &str) -> Result<Self, RuleError> {
        let rule = CrawlRule::new(RuleAction::Include, &format!("^{}", regex::escape(prefix)))?;
        Ok(Self::new(vec![rule]))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// True if the first deciding rule includes `url`.
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        self.rules
            .iter()
            .map(|rule| rule.evaluate(url))
            .find(|verdict| *verdict != RuleVerdict::Ignore)
            == Some(RuleVerdict::Include)
    }
}
