use std::path::PathBuf;

use pangolin_types::PackageInfo;

use crate::package_cache::{CacheWritable, PackageCache};
use crate::CacheError;

/// An ordered list of package cache roots.
///
/// Queries walk the roots in order, so the ordering decides which cache a
/// later fetch reuses. Only the first writable (or creatable) root ever
/// receives new downloads.
#[derive(Debug)]
pub struct MultiCache {
    caches: Vec<PackageCache>,
}

impl MultiCache {
    /// Constructs a multi cache over the given roots, keeping their order.
    pub fn new<I>(pkgs_dirs: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<PathBuf>,
    {
        Self {
            caches: pkgs_dirs.into_iter().map(PackageCache::new).collect(),
        }
    }

    /// Returns the first cache that is writable. A missing root is created on
    /// the fly; roots that exist but cannot be written to are skipped.
    pub fn first_writable(&self) -> Result<&PackageCache, CacheError> {
        for cache in &self.caches {
            tracing::debug!("checking cache dir {}", cache.path().display());
            match cache.writable_status() {
                CacheWritable::Writable => return Ok(cache),
                CacheWritable::Missing if cache.create_directory() => return Ok(cache),
                _ => continue,
            }
        }
        Err(CacheError::NoWritableCache(
            self.caches.iter().map(|c| c.path().to_path_buf()).collect(),
        ))
    }

    /// Returns true iff any cache holds a usable copy of the package.
    pub fn query(&self, pkg: &PackageInfo) -> bool {
        self.caches.iter().any(|cache| cache.query(pkg))
    }

    /// The caches in this multi cache, in priority order.
    pub fn caches(&self) -> &[PackageCache] {
        &self.caches
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use pangolin_digest::{compute_bytes_digest, Md5};
    use pangolin_types::{ArchiveType, PackageInfo};
    use tempfile::TempDir;

    use super::MultiCache;
    use crate::CacheError;

    const PAYLOAD: &[u8] = b"second root holds the archive";

    fn test_package() -> PackageInfo {
        let mut pkg = PackageInfo::from_parts(
            "bar",
            "2.0",
            "1",
            1,
            "https://repo.example.com/main",
            "noarch",
            ArchiveType::TarBz2,
        );
        pkg.size = PAYLOAD.len() as u64;
        pkg.md5 = Some(format!("{:x}", compute_bytes_digest::<Md5>(PAYLOAD)));
        pkg
    }

    #[test]
    fn query_returns_union_over_roots() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        std::fs::write(second.path().join("bar-2.0-1.tar.bz2"), PAYLOAD).unwrap();

        let caches = MultiCache::new([first.path(), second.path()]);
        assert!(caches.query(&test_package()));

        let empty_only = MultiCache::new([first.path()]);
        assert!(!empty_only.query(&test_package()));
    }

    #[test]
    fn first_writable_creates_missing_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("pkgs");

        let caches = MultiCache::new([root.clone()]);
        let writable = caches.first_writable().unwrap();
        assert_eq!(writable.path(), root);
        assert!(root.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn no_writable_root_reports_all_candidates() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        // The sentinel exists but is read-only, and the parent prevents
        // creating the second root.
        std::fs::write(locked.join(crate::PACKAGE_CACHE_MAGIC_FILE), "").unwrap();
        std::fs::set_permissions(
            locked.join(crate::PACKAGE_CACHE_MAGIC_FILE),
            std::fs::Permissions::from_mode(0o444),
        )
        .unwrap();
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o555)).unwrap();

        // Permission bits are not enforced for privileged users; skip the
        // assertion when the probe still succeeds.
        if std::fs::create_dir(dir.path().join("probe")).is_ok() {
            std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let missing = dir.path().join("missing");
        let caches = MultiCache::new([locked.clone(), missing.clone()]);
        let err = caches.first_writable().unwrap_err();
        assert_matches!(err, CacheError::NoWritableCache(candidates) => {
            assert_eq!(candidates, vec![locked, missing]);
        });

        // Restore permissions so the tempdir can be cleaned up.
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}
