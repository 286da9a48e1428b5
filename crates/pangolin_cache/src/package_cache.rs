use std::collections::HashMap;
use std::path::{Path, PathBuf};

use pangolin_digest::{compute_file_digest, Md5};
use pangolin_types::{strip_archive_extension, PackageInfo};
use parking_lot::Mutex;

/// An empty file whose presence marks a directory as a managed package cache.
pub const PACKAGE_CACHE_MAGIC_FILE: &str = ".pangolin_cache_magic";

/// The append-only list of archive URLs fetched into a cache root.
pub const URLS_FILE: &str = "urls.txt";

/// The writability of a cache root, probed lazily and cached for the lifetime
/// of the [`PackageCache`] instance.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CacheWritable {
    /// The root has not been probed yet.
    Unknown,
    /// The root exists and the caller can write to it.
    Writable,
    /// The root exists but cannot be written to.
    NotWritable,
    /// The root directory (or its magic sentinel) does not exist.
    Missing,
}

/// A single package cache root.
///
/// The cache holds raw package archives next to their extracted directories.
/// [`PackageCache::query`] validates either form against the metadata of a
/// [`PackageInfo`] and memoizes the verdict, so repeated queries for the same
/// package never touch the filesystem twice.
#[derive(Debug)]
pub struct PackageCache {
    pkgs_dir: PathBuf,
    writable: Mutex<CacheWritable>,
    valid_cache: Mutex<HashMap<String, bool>>,
}

impl PackageCache {
    /// Constructs a new cache over the given root directory. No filesystem
    /// access happens until the cache is queried or probed.
    pub fn new(pkgs_dir: impl Into<PathBuf>) -> Self {
        Self {
            pkgs_dir: pkgs_dir.into(),
            writable: Mutex::new(CacheWritable::Unknown),
            valid_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the root directory of this cache.
    pub fn path(&self) -> &Path {
        &self.pkgs_dir
    }

    /// Returns true if this cache holds a usable copy of the package, either
    /// as a validated archive or as a validated extracted directory.
    pub fn query(&self, pkg: &PackageInfo) -> bool {
        let fingerprint = pkg.to_string();
        if let Some(valid) = self.valid_cache.lock().get(&fingerprint) {
            return *valid;
        }

        debug_assert!(!pkg.file_name.is_empty());

        let tarball_path = self.pkgs_dir.join(&pkg.file_name);
        let valid = if tarball_path.exists() {
            let valid = validate_archive(&tarball_path, pkg);
            tracing::debug!("{} archive validation: {}", tarball_path.display(), valid);
            valid
        } else {
            match strip_archive_extension(&pkg.file_name) {
                Some(stem) if self.pkgs_dir.join(stem).exists() => {
                    validate_extracted(&self.pkgs_dir.join(stem), pkg)
                }
                _ => false,
            }
        };

        self.valid_cache.lock().insert(fingerprint, valid);
        valid
    }

    /// Attempts to materialize the cache root by creating the directory, the
    /// magic sentinel file, and an empty `urls.txt`. Returns whether the cache
    /// is now writable.
    pub fn create_directory(&self) -> bool {
        tracing::info!(
            "attempting to create package cache directory {}",
            self.pkgs_dir.display()
        );
        match self.try_create() {
            Ok(()) => {
                *self.writable.lock() = CacheWritable::Writable;
                true
            }
            Err(e) => {
                tracing::error!(
                    "cannot create package cache directory {}: {}",
                    self.pkgs_dir.display(),
                    e
                );
                false
            }
        }
    }

    fn try_create(&self) -> std::io::Result<()> {
        fs_err::create_dir_all(&self.pkgs_dir)?;
        touch(&self.pkgs_dir.join(PACKAGE_CACHE_MAGIC_FILE))?;
        touch(&self.pkgs_dir.join(URLS_FILE))?;
        Ok(())
    }

    /// Returns the writability of this cache root. The first call probes the
    /// filesystem; subsequent calls return the cached verdict.
    pub fn writable_status(&self) -> CacheWritable {
        let mut writable = self.writable.lock();
        if *writable == CacheWritable::Unknown {
            *writable = self.check_writable();
        }
        *writable
    }

    fn check_writable(&self) -> CacheWritable {
        let magic_file = self.pkgs_dir.join(PACKAGE_CACHE_MAGIC_FILE);
        match magic_file.metadata() {
            Ok(metadata) if metadata.is_file() => {
                // An append-open exercises the effective identity's write
                // permission without modifying the sentinel.
                match std::fs::OpenOptions::new().append(true).open(&magic_file) {
                    Ok(_) => {
                        tracing::debug!("{} is writable", magic_file.display());
                        CacheWritable::Writable
                    }
                    Err(_) => {
                        tracing::debug!("{} is not writable", magic_file.display());
                        CacheWritable::NotWritable
                    }
                }
            }
            _ => {
                tracing::debug!("{} does not exist", magic_file.display());
                CacheWritable::Missing
            }
        }
    }
}

fn touch(path: &Path) -> std::io::Result<()> {
    fs_err::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(|_| ())
}

/// Validates the raw archive form: the file size must equal the expected
/// payload size and the MD5 digest must match. A package without an MD5
/// checksum can never validate as an archive.
fn validate_archive(tarball_path: &Path, pkg: &PackageInfo) -> bool {
    let Some(expected_md5) = pkg.md5.as_deref() else {
        return false;
    };
    let Ok(metadata) = tarball_path.metadata() else {
        return false;
    };
    if metadata.len() != pkg.size {
        return false;
    }
    match compute_file_digest::<Md5>(tarball_path) {
        Ok(digest) => format!("{digest:x}") == expected_md5,
        Err(e) => {
            tracing::warn!("failed to hash {}: {}", tarball_path.display(), e);
            false
        }
    }
}

/// Validates the extracted form: `info/repodata_record.json` must parse and
/// its `size`, `sha256`, `channel` and `url` fields must equal the package's
/// metadata exactly. An unreadable or corrupted record downgrades to a miss
/// so the package is fetched again.
fn validate_extracted(extracted_dir: &Path, pkg: &PackageInfo) -> bool {
    // A package without a SHA256 checksum can never validate as extracted.
    let Some(expected_sha256) = pkg.sha256.as_deref() else {
        return false;
    };
    let record_path = extracted_dir.join("info").join("repodata_record.json");
    let contents = match fs_err::read_to_string(&record_path) {
        Ok(contents) => contents,
        Err(_) => return false,
    };
    let record: serde_json::Value = match serde_json::from_str(&contents) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(
                "found corrupted repodata_record file {}: {}",
                record_path.display(),
                e
            );
            return false;
        }
    };

    let valid = record.get("size").and_then(serde_json::Value::as_u64) == Some(pkg.size)
        && record.get("sha256").and_then(serde_json::Value::as_str) == Some(expected_sha256)
        && record.get("channel").and_then(serde_json::Value::as_str) == Some(pkg.channel.as_str())
        && record.get("url").and_then(serde_json::Value::as_str) == Some(pkg.url.as_str());
    if !valid {
        tracing::warn!(
            "found directory with same name, but different size, channel, url or checksum: {}",
            record_path.display()
        );
    }
    valid
}

#[cfg(test)]
mod test {
    use std::fs;

    use pangolin_digest::{compute_bytes_digest, Md5, Sha256};
    use pangolin_types::{ArchiveType, PackageInfo};
    use tempfile::TempDir;

    use super::{CacheWritable, PackageCache, PACKAGE_CACHE_MAGIC_FILE, URLS_FILE};

    const PAYLOAD: &[u8] = b"pretend this is a package archive";

    fn test_package() -> PackageInfo {
        let mut pkg = PackageInfo::from_parts(
            "foo",
            "1.0",
            "0",
            0,
            "https://repo.example.com/main",
            "linux-64",
            ArchiveType::TarBz2,
        );
        pkg.size = PAYLOAD.len() as u64;
        pkg.md5 = Some(format!("{:x}", compute_bytes_digest::<Md5>(PAYLOAD)));
        pkg.sha256 = Some(format!("{:x}", compute_bytes_digest::<Sha256>(PAYLOAD)));
        pkg
    }

    fn write_record(dir: &TempDir, pkg: &PackageInfo, contents: &str) {
        let info_dir = dir.path().join("foo-1.0-0/info");
        fs::create_dir_all(&info_dir).unwrap();
        let record = contents
            .replace("{size}", &pkg.size.to_string())
            .replace("{sha256}", pkg.sha256.as_deref().unwrap())
            .replace("{channel}", &pkg.channel)
            .replace("{url}", &pkg.url);
        fs::write(info_dir.join("repodata_record.json"), record).unwrap();
    }

    const RECORD_TEMPLATE: &str = r#"{
    "name": "foo",
    "size": {size},
    "sha256": "{sha256}",
    "channel": "{channel}",
    "url": "{url}"
}"#;

    #[test]
    fn empty_cache_misses() {
        let dir = TempDir::new().unwrap();
        let cache = PackageCache::new(dir.path());
        assert!(!cache.query(&test_package()));
    }

    #[test]
    fn archive_form_hit() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("foo-1.0-0.tar.bz2"), PAYLOAD).unwrap();

        let cache = PackageCache::new(dir.path());
        assert!(cache.query(&test_package()));
    }

    #[test]
    fn archive_form_wrong_size_misses() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("foo-1.0-0.tar.bz2"), PAYLOAD).unwrap();

        let mut pkg = test_package();
        pkg.size += 1;
        let cache = PackageCache::new(dir.path());
        assert!(!cache.query(&pkg));
    }

    #[test]
    fn archive_form_without_md5_misses() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("foo-1.0-0.tar.bz2"), PAYLOAD).unwrap();

        let mut pkg = test_package();
        pkg.md5 = None;
        let cache = PackageCache::new(dir.path());
        assert!(!cache.query(&pkg));
    }

    #[test]
    fn extracted_form_hit() {
        let dir = TempDir::new().unwrap();
        let pkg = test_package();
        write_record(&dir, &pkg, RECORD_TEMPLATE);

        let cache = PackageCache::new(dir.path());
        assert!(cache.query(&pkg));
    }

    #[test]
    fn extracted_form_field_mismatch_misses() {
        let dir = TempDir::new().unwrap();
        let pkg = test_package();
        write_record(&dir, &pkg, RECORD_TEMPLATE);

        let mut other = pkg;
        other.url = String::from("https://elsewhere.example.com/main/linux-64/foo-1.0-0.tar.bz2");
        let cache = PackageCache::new(dir.path());
        assert!(!cache.query(&other));
    }

    #[test]
    fn corrupt_record_downgrades_to_miss() {
        let dir = TempDir::new().unwrap();
        let pkg = test_package();
        let info_dir = dir.path().join("foo-1.0-0/info");
        fs::create_dir_all(&info_dir).unwrap();
        fs::write(info_dir.join("repodata_record.json"), "{ not json").unwrap();

        let cache = PackageCache::new(dir.path());
        assert!(!cache.query(&pkg));
    }

    #[test]
    fn query_is_memoized() {
        let dir = TempDir::new().unwrap();
        let pkg = test_package();
        let cache = PackageCache::new(dir.path());

        assert!(!cache.query(&pkg));

        // Making the package appear after the first query does not change the
        // memoized verdict within this cache lifetime.
        fs::write(dir.path().join("foo-1.0-0.tar.bz2"), PAYLOAD).unwrap();
        assert!(!cache.query(&pkg));

        // A fresh cache instance sees the file.
        let fresh = PackageCache::new(dir.path());
        assert!(fresh.query(&pkg));
    }

    #[test]
    fn writable_status_probes_sentinel() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("pkgs");

        let cache = PackageCache::new(&root);
        assert_eq!(cache.writable_status(), CacheWritable::Missing);

        assert!(cache.create_directory());
        assert_eq!(cache.writable_status(), CacheWritable::Writable);
        assert!(root.join(PACKAGE_CACHE_MAGIC_FILE).is_file());
        assert!(root.join(URLS_FILE).is_file());

        // A fresh instance re-probes and finds the sentinel.
        let fresh = PackageCache::new(&root);
        assert_eq!(fresh.writable_status(), CacheWritable::Writable);
    }

    #[cfg(unix)]
    #[test]
    fn readonly_sentinel_is_not_writable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let cache = PackageCache::new(dir.path());
        assert!(cache.create_directory());

        let sentinel = dir.path().join(PACKAGE_CACHE_MAGIC_FILE);
        fs::set_permissions(&sentinel, fs::Permissions::from_mode(0o444)).unwrap();

        // Permission bits are not enforced for privileged users; skip the
        // assertion when the write probe still succeeds.
        if fs::OpenOptions::new().append(true).open(&sentinel).is_ok() {
            return;
        }

        let fresh = PackageCache::new(dir.path());
        assert_eq!(fresh.writable_status(), CacheWritable::NotWritable);
    }
}
