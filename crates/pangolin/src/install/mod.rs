//! Materializing packages into a prefix and removing them again.

mod link;
mod unlink;

pub use link::{link_package, LinkError};
pub use unlink::{unlink_package, UnlinkError};

use std::path::{Path, PathBuf};

use pangolin_types::PackageInfo;
use serde::{Deserialize, Serialize};

/// Per-transaction state handed to every link and unlink operation.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    /// The prefix packages are materialized into.
    pub target_prefix: PathBuf,

    /// The interpreter version that will be present after the transaction,
    /// used to place architecture-neutral interpreter packages. Empty when no
    /// interpreter is (or will be) installed.
    pub interpreter_version: String,
}

impl TransactionContext {
    /// Creates a context for the given prefix and post-transaction
    /// interpreter version.
    pub fn new(target_prefix: impl Into<PathBuf>, interpreter_version: impl Into<String>) -> Self {
        Self {
            target_prefix: target_prefix.into(),
            interpreter_version: interpreter_version.into(),
        }
    }

    /// The prefix-relative site-packages directory derived from the
    /// interpreter version, e.g. `lib/python3.11/site-packages`. `None` when
    /// no interpreter version is known.
    pub fn site_packages_dir(&self) -> Option<PathBuf> {
        let mut parts = self.interpreter_version.split('.');
        let major = parts.next().filter(|s| !s.is_empty())?;
        let minor = parts.next()?;
        Some(
            PathBuf::from("lib")
                .join(format!("python{major}.{minor}"))
                .join("site-packages"),
        )
    }
}

/// The record written to `<prefix>/pangolin-meta/` for every linked package.
/// It ties the package metadata to the files the link step created, which is
/// exactly what the unlink step needs to undo it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefixRecord {
    /// The package this record describes.
    pub package_info: PackageInfo,

    /// The prefix-relative paths created when the package was linked.
    pub files: Vec<PathBuf>,
}

impl PrefixRecord {
    /// The record filename for a package, `<name>-<version>-<build>.json`.
    pub fn file_name(pkg: &PackageInfo) -> String {
        format!("{pkg}.json")
    }

    /// Reads a record from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self, std::io::Error> {
        let contents = fs_err::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(std::io::Error::other)
    }

    /// Writes the record as pretty-printed JSON.
    pub fn write_to_path(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs_err::write(path, json)
    }
}

#[cfg(test)]
mod test {
    use super::TransactionContext;

    #[test]
    fn site_packages_dir_follows_interpreter_version() {
        let ctx = TransactionContext::new("/prefix", "3.11.4");
        assert_eq!(
            ctx.site_packages_dir(),
            Some(std::path::PathBuf::from("lib/python3.11/site-packages"))
        );

        let no_interpreter = TransactionContext::new("/prefix", "");
        assert_eq!(no_interpreter.site_packages_dir(), None);
    }
}
