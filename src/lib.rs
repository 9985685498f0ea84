//! Preserver Core Library
//!
//! Ingestion and content-addressing core for a web-preservation daemon:
//! fetch URLs into per-unit versioned repositories, expose the stored
//! content as a URL-ordered tree with virtual archive members, iterate and
//! hash it, and route an arbitrary URL to the unit holding it.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`repository`] - Versioned per-URL content storage
//! - [`archive`] - Zip and tar container reading
//! - [`tree`] - Content tree, subtree specs and archive members
//! - [`au`] - Preservation units, crawl rules and registries
//! - [`fetch`] - Fetcher, cacher, redirect scheme and result map
//! - [`iter`] - Filtered and archive-expanding iteration
//! - [`hasher`] - Subtree content hashing
//! - [`routing`] - URL-to-unit lookup with recency and negative caches
//! - [`config`] - TOML configuration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod archive;
pub mod au;
pub mod config;
pub mod fetch;
pub mod hasher;
pub mod iter;
pub mod repository;
pub mod routing;
pub mod tree;

// Re-export commonly used types
pub use au::{ArchivalUnit, AuConfig, AuId, ComponentRegistry, UnitType};
pub use config::{ConfigError, PreserverConfig, Runtime, load_config};
pub use fetch::{
    CacheException, CacheExceptionKind, FetchOptions, FetchResult, HttpClient, UrlFetcher,
    fetch_with_retry,
};
pub use hasher::{ContentHasher, HashSummary};
pub use iter::{ArchiveMemberIterator, CuIterable, CuIterator, IterOptions};
pub use routing::{AuRouter, ContentReq};
pub use tree::{CachedUrl, CachedUrlSet, CachedUrlSetSpec};
