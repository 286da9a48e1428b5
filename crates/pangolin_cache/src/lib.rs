#![deny(missing_docs)]

//! Package archive caches for the pangolin package manager.
//!
//! A cache root (a "pkgs dir") holds downloaded package archives and their
//! extracted forms. [`PackageCache`] answers whether a single root holds a
//! usable copy of a package; [`MultiCache`] layers several roots in order and
//! locates the first one that can be written to.

mod multi_cache;
mod package_cache;

pub use multi_cache::MultiCache;
pub use package_cache::{CacheWritable, PackageCache, PACKAGE_CACHE_MAGIC_FILE, URLS_FILE};

use std::path::PathBuf;

/// Errors produced by the cache layer.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// None of the configured cache roots is writable or creatable.
    #[error("did not find a writable package cache directory among {0:?}")]
    NoWritableCache(Vec<PathBuf>),
}
