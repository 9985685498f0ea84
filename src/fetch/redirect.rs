//! Redirect policy.
//!
//! Four independently combinable flags. Following requires `follow`;
//! `in_spec` and `on_host` each add a condition the target must meet, and
//! every set condition must hold. `store_all` stores the content under
//! every name in the chain instead of only the requested URL.

use serde::Deserialize;
use url::Url;

use super::error::CacheExceptionKind;

/// A single redirect flag, as named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectFlag {
    Follow,
    InSpec,
    OnHost,
    StoreAll,
}

/// Combination of redirect flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RedirectScheme {
    follow: bool,
    in_spec: bool,
    on_host: bool,
    store_all: bool,
}

impl RedirectScheme {
    /// Never follow redirects.
    pub const DONT_FOLLOW: Self = Self {
        follow: false,
        in_spec: false,
        on_host: false,
        store_all: false,
    };

    /// Follow any redirect.
    pub const FOLLOW: Self = Self {
        follow: true,
        ..Self::DONT_FOLLOW
    };

    /// Follow redirects whose target the unit's crawl rules accept.
    pub const FOLLOW_IN_SPEC: Self = Self {
        in_spec: true,
        ..Self::FOLLOW
    };

    /// Follow redirects that stay on the same host.
    pub const FOLLOW_ON_HOST: Self = Self {
        on_host: true,
        ..Self::FOLLOW
    };

    /// Builds a scheme from configuration flags.
    pub fn from_flags(flags: impl IntoIterator<Item = RedirectFlag>) -> Self {
        flags.into_iter().fold(Self::DONT_FOLLOW, |scheme, flag| match flag {
            RedirectFlag::Follow => Self {
                follow: true,
                ..scheme
            },
            RedirectFlag::InSpec => Self {
                in_spec: true,
                ..scheme
            },
            RedirectFlag::OnHost => Self {
                on_host: true,
                ..scheme
            },
            RedirectFlag::StoreAll => Self {
                store_all: true,
                ..scheme
            },
        })
    }

    /// Adds the store-all flag.
    #[must_use]
    pub fn storing_all(self) -> Self {
        Self {
            store_all: true,
            ..self
        }
    }

    #[must_use]
    pub fn follows(&self) -> bool {
        self.follow
    }

    #[must_use]
    pub fn stores_all(&self) -> bool {
        self.store_all
    }

    /// Decides whether a redirect from `from` to `to` may be followed.
    ///
    /// Returns `Ok(())` to follow, `Err(None)` if redirects are not followed
    /// at all, or `Err(Some(kind))` naming the violated condition.
    ///
    /// # Errors
    ///
    /// See above; the error is the reason the redirect must not be followed.
    pub fn check(
        &self,
        from: &str,
        to: &str,
        in_crawl_spec: impl FnOnce(&str) -> bool,
    ) -> Result<(), Option<CacheExceptionKind>> {
        if !self.follow {
            return Err(None);
        }
        if self.in_spec && !in_crawl_spec(to) {
            return Err(Some(CacheExceptionKind::RedirectOutsideCrawlSpec));
        }
        if self.on_host && !same_host(from, to) {
            return Err(Some(CacheExceptionKind::RedirectOffHost));
        }
        Ok(())
    }
}

fn same_host(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => {
            a.host_str().map(str::to_ascii_lowercase) == b.host_str().map(str::to_ascii_lowercase)
                && a.port_or_known_default() == b.port_or_known_default()
        }
        _ => false,
    }
}
