//! Unlinking packages from a prefix.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use pangolin_types::history::PREFIX_META_DIR;
use pangolin_types::PackageInfo;

use super::{PrefixRecord, TransactionContext};

/// An error that can occur while unlinking a package from a prefix.
#[derive(Debug, thiserror::Error)]
pub enum UnlinkError {
    /// No prefix record exists for the package, so its files are unknown.
    #[error("no prefix record found for {0}")]
    RecordMissing(String),

    /// A file belonging to the package could not be deleted.
    #[error("failed to delete {0}")]
    FailedToDeleteFile(PathBuf, #[source] std::io::Error),

    /// An I/O error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Removes a linked package from the prefix: every file its prefix record
/// lists, any directories the removal left empty, and the record itself.
/// Files that are already gone are ignored.
pub fn unlink_package(pkg: &PackageInfo, ctx: &TransactionContext) -> Result<(), UnlinkError> {
    let record_path = ctx
        .target_prefix
        .join(PREFIX_META_DIR)
        .join(PrefixRecord::file_name(pkg));
    if !record_path.is_file() {
        return Err(UnlinkError::RecordMissing(pkg.to_string()));
    }
    let record = PrefixRecord::from_path(&record_path)?;

    let mut parents = BTreeSet::new();
    for relative_path in &record.files {
        let path = ctx.target_prefix.join(relative_path);
        match fs_err::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(UnlinkError::FailedToDeleteFile(path, e)),
        }
        if let Some(parent) = path.parent() {
            parents.insert(parent.to_path_buf());
        }
    }

    // Deepest first, so an emptied subtree collapses bottom-up.
    for parent in parents.iter().rev() {
        remove_empty_directories(parent, &ctx.target_prefix)?;
    }

    fs_err::remove_file(record_path)?;
    Ok(())
}

/// Walks from `directory` up towards the prefix root, removing every directory
/// that ended up empty. The prefix itself is never removed.
fn remove_empty_directories(directory: &Path, target_prefix: &Path) -> Result<(), UnlinkError> {
    let mut current = directory;
    while current != target_prefix && current.starts_with(target_prefix) {
        match fs_err::read_dir(current) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => break,
            Err(e) => return Err(e.into()),
        }
        fs_err::remove_dir(current)?;
        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }
    Ok(())
}
